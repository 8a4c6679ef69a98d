//! Event status codes and client error codes.
//!
//! Status codes are 16-bit values partitioned by leading nibbles: `F0xx`
//! generic/location, `F1xx` motion, `F2xx` geozone, `F4xx` digital I/O,
//! `F6xx` analog, `F7xx` temperature, `F8xx` login/logout/ack/nak, `F9xx`
//! on-board computer, `FDxx` device conditions.

/// 16-bit event status code.
pub type StatusCode = u16;

/// No status.
pub const STATUS_NONE: StatusCode = 0x0000;

// --- generic/location
/// First fix after boot.
pub const STATUS_INITIALIZED: StatusCode = 0xF010;
/// Plain location report.
pub const STATUS_LOCATION: StatusCode = 0xF020;
/// Operator-requested waymark.
pub const STATUS_WAYMARK: StatusCode = 0xF030;
/// Response to a server location query.
pub const STATUS_QUERY: StatusCode = 0xF040;

// --- motion
/// Motion started.
pub const STATUS_MOTION_START: StatusCode = 0xF111;
/// Periodic in-motion report.
pub const STATUS_MOTION_IN_MOTION: StatusCode = 0xF112;
/// Motion stopped.
pub const STATUS_MOTION_STOP: StatusCode = 0xF113;
/// Periodic dormant (stopped) report.
pub const STATUS_MOTION_DORMANT: StatusCode = 0xF114;
/// Excess speed detected.
pub const STATUS_MOTION_EXCESS_SPEED: StatusCode = 0xF11A;
/// Simple moving report (serial transports).
pub const STATUS_MOTION_MOVING: StatusCode = 0xF11C;

// --- odometer
/// Odometer report for counter *k* (`STATUS_ODOM_0 + k`).
pub const STATUS_ODOM_0: StatusCode = 0xF130;
/// Odometer limit crossed for counter *k* (`STATUS_ODOM_LIMIT_0 + k`).
pub const STATUS_ODOM_LIMIT_0: StatusCode = 0xF140;

// --- geozone
/// Arrived in a geozone.
pub const STATUS_GEOFENCE_ARRIVE: StatusCode = 0xF210;
/// Departed a geozone.
pub const STATUS_GEOFENCE_DEPART: StatusCode = 0xF230;
/// Geozone violation.
pub const STATUS_GEOFENCE_VIOLATION: StatusCode = 0xF250;

// --- digital I/O
/// Digital input state report.
pub const STATUS_INPUT_STATE: StatusCode = 0xF400;
/// Digital input *k* turned on (`STATUS_INPUT_ON_0 + k`).
pub const STATUS_INPUT_ON_0: StatusCode = 0xF420;
/// Digital input *k* turned off (`STATUS_INPUT_OFF_0 + k`).
pub const STATUS_INPUT_OFF_0: StatusCode = 0xF440;
/// Elapsed-timer *k* report (`STATUS_ELAPSED_0 + k`).
pub const STATUS_ELAPSED_0: StatusCode = 0xF4A0;

// --- analog
/// Analog sensor *k* report (`STATUS_SENSOR32_0 + k`).
pub const STATUS_SENSOR32_0: StatusCode = 0xF600;
/// Analog sensor *k* range alarm (`STATUS_SENSOR32_RANGE_0 + k`).
pub const STATUS_SENSOR32_RANGE_0: StatusCode = 0xF620;

// --- temperature
/// Temperature channel *k* report (`STATUS_TEMPERATURE_0 + k`).
pub const STATUS_TEMPERATURE_0: StatusCode = 0xF710;
/// Temperature channel *k* range alarm.
pub const STATUS_TEMPERATURE_RANGE_0: StatusCode = 0xF730;

// --- misc
/// Login.
pub const STATUS_LOGIN: StatusCode = 0xF811;
/// Logout.
pub const STATUS_LOGOUT: StatusCode = 0xF812;
/// Acknowledge.
pub const STATUS_ACK: StatusCode = 0xF831;
/// Negative acknowledge.
pub const STATUS_NAK: StatusCode = 0xF832;

// --- on-board computer
/// OBC fault code report.
pub const STATUS_OBC_FAULT: StatusCode = 0xF911;
/// OBC value out of range.
pub const STATUS_OBC_RANGE: StatusCode = 0xF920;
/// OBC engine RPM out of range.
pub const STATUS_OBC_RPM_RANGE: StatusCode = 0xF922;
/// OBC fuel level out of range.
pub const STATUS_OBC_FUEL_RANGE: StatusCode = 0xF924;

// --- device conditions
/// Low battery.
pub const STATUS_LOW_BATTERY: StatusCode = 0xFD10;
/// Main power failure.
pub const STATUS_POWER_FAILURE: StatusCode = 0xFD13;

// ----------------------------------------------------------------------------
// Client error codes, reported to the server in error packets.

/// 16-bit client error code.
pub type ErrorCode = u16;

/// Invalid packet header byte.
pub const ERROR_PACKET_HEADER: ErrorCode = 0xF111;
/// Unknown packet type.
pub const ERROR_PACKET_TYPE: ErrorCode = 0xF112;
/// Invalid packet payload length.
pub const ERROR_PACKET_LENGTH: ErrorCode = 0xF113;
/// Unsupported packet encoding.
pub const ERROR_PACKET_ENCODING: ErrorCode = 0xF114;
/// Invalid packet payload.
pub const ERROR_PACKET_PAYLOAD: ErrorCode = 0xF115;
/// Packet checksum mismatch.
pub const ERROR_PACKET_CHECKSUM: ErrorCode = 0xF116;
/// Acknowledged sequence not found in the queue.
pub const ERROR_PACKET_ACK: ErrorCode = 0xF117;
/// The server rejected the account/device identification.
pub const ERROR_ACCOUNT_INVALID: ErrorCode = 0xF118;
/// Generic protocol error.
pub const ERROR_PROTOCOL_ERROR: ErrorCode = 0xF11F;

/// Property is read-only.
pub const ERROR_PROPERTY_READ_ONLY: ErrorCode = 0xF201;
/// Property is write-only.
pub const ERROR_PROPERTY_WRITE_ONLY: ErrorCode = 0xF202;
/// Unknown property key.
pub const ERROR_PROPERTY_INVALID_ID: ErrorCode = 0xF211;
/// Invalid property value.
pub const ERROR_PROPERTY_INVALID_VALUE: ErrorCode = 0xF212;
/// Unclassified property error.
pub const ERROR_PROPERTY_UNKNOWN_ERROR: ErrorCode = 0xF213;

/// Command has no registered handler.
pub const ERROR_COMMAND_INVALID: ErrorCode = 0xF311;
/// Command handler returned an error.
pub const ERROR_COMMAND_ERROR: ErrorCode = 0xF312;

/// Invalid upload type.
pub const ERROR_UPLOAD_TYPE: ErrorCode = 0xF401;
/// Invalid upload length.
pub const ERROR_UPLOAD_LENGTH: ErrorCode = 0xF402;
/// Upload chunk offset overlap or gap.
pub const ERROR_UPLOAD_OFFSET: ErrorCode = 0xF404;

/// The GPS fix went stale.
pub const ERROR_GPS_EXPIRED: ErrorCode = 0xF911;
/// The GPS receiver stopped communicating.
pub const ERROR_GPS_FAILURE: ErrorCode = 0xF912;

/// Internal client error.
pub const ERROR_INTERNAL_ERROR: ErrorCode = 0xFE11;

// ----------------------------------------------------------------------------
// Command error codes (client to server, in command property replies).

/// Command execution was successful.
pub const COMMAND_OK: u16 = 0x0000;
/// Command execution was successful, acknowledgement returned to server.
pub const COMMAND_OK_ACK: u16 = 0x0001;
/// Insufficient/invalid/missing command arguments.
pub const COMMAND_ARGUMENTS: u16 = 0xF011;
/// An index in the command arguments is out of range.
pub const COMMAND_INDEX: u16 = 0xF012;
/// A status code in the command arguments is invalid.
pub const COMMAND_STATUS: u16 = 0xF013;
/// More data was found in the payload than was expected.
pub const COMMAND_OVERFLOW: u16 = 0xF021;
/// A generic value in the command arguments is invalid.
pub const COMMAND_VALUE: u16 = 0xF100;
/// A 'type' value in the command arguments is invalid.
pub const COMMAND_TYPE: u16 = 0xF104;
/// A geozone ID in the command arguments is invalid.
pub const COMMAND_ZONE_ID: u16 = 0xF111;
/// A radius value in the command arguments is invalid.
pub const COMMAND_RADIUS: u16 = 0xF121;
/// A latitude/longitude value in the command arguments is invalid.
pub const COMMAND_LATLON: u16 = 0xF122;
/// The requested information is unavailable.
pub const COMMAND_UNAVAILABLE: u16 = 0xF201;
/// Command execution failed.
pub const COMMAND_EXECUTION: u16 = 0xF511;
/// Command execution failed due to hardware failure.
pub const COMMAND_HARDWARE_FAILURE: u16 = 0xF521;
/// A requested command feature is not supported.
pub const COMMAND_FEATURE_NOT_SUPPORTED: u16 = 0xFF01;
