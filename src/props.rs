//! Property manager.
//!
//! A typed, indexed key/value table parameterizing every other component.
//! Keys are 16-bit values ordered ascending in the table so lookups can
//! binary-search; an out-of-order key detected at initialization disables
//! the optimization and falls back to a linear scan.
//!
//! In-code accessors (`get_u32`, `set_string`, ...) ignore the read-only/
//! write-only attributes; the wire accessors (`get_value`,
//! `set_value_cmd`) obey them and return the protocol error codes.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::codec;
use crate::error::Prop;
use crate::geo::GpsOdometer;
use crate::packet::{Packet, PKT_CLIENT_PROPERTY_VALUE};
use crate::status::{COMMAND_OK, COMMAND_OK_ACK};

/// A 16-bit property key.
pub type Key = u16;

// --- local serial port configuration
/// Transport serial port / output file path.
pub const PROP_CFG_XPORT_PORT: Key = 0xEF11;
/// Transport serial port speed, bps.
pub const PROP_CFG_XPORT_BPS: Key = 0xEF12;
/// Transport serial debug logging.
pub const PROP_CFG_XPORT_DEBUG: Key = 0xEF13;
/// GPS receiver serial port.
pub const PROP_CFG_GPS_PORT: Key = 0xEF21;
/// GPS receiver port speed, bps.
pub const PROP_CFG_GPS_BPS: Key = 0xEF22;
/// GPS receiver model name.
pub const PROP_CFG_GPS_MODEL: Key = 0xEF23;
/// GPS receiver debug logging.
pub const PROP_CFG_GPS_DEBUG: Key = 0xEF24;
/// Auxiliary serial port 0 device.
pub const PROP_CFG_SERIAL0_PORT: Key = 0xEF31;
/// Auxiliary serial port 0 speed, bps.
pub const PROP_CFG_SERIAL0_BPS: Key = 0xEF32;
/// Auxiliary serial port 0 debug logging.
pub const PROP_CFG_SERIAL0_DEBUG: Key = 0xEF33;
/// Auxiliary serial port 1 (GPRS modem) device.
pub const PROP_CFG_SERIAL1_PORT: Key = 0xEF41;
/// Auxiliary serial port 1 speed, bps.
pub const PROP_CFG_SERIAL1_BPS: Key = 0xEF42;
/// Auxiliary serial port 1 debug logging.
pub const PROP_CFG_SERIAL1_DEBUG: Key = 0xEF43;

// --- miscellaneous commands
/// Command: save properties to auxiliary storage.
pub const PROP_CMD_SAVE_PROPS: Key = 0xF000;
/// Command: queue a status event of the requested type.
pub const PROP_CMD_STATUS_EVENT: Key = 0xF011;
/// Command: reset/reboot the client.
pub const PROP_CMD_RESET: Key = 0xF0FF;

// --- retained state properties
/// Protocol version triplet.
pub const PROP_STATE_PROTOCOL: Key = 0xF100;
/// Firmware version string.
pub const PROP_STATE_FIRMWARE: Key = 0xF101;
/// Copyright string.
pub const PROP_STATE_COPYRIGHT: Key = 0xF107;
/// Hardware serial number.
pub const PROP_STATE_SERIAL: Key = 0xF110;
/// Unique device identifier (binary).
pub const PROP_STATE_UNIQUE_ID: Key = 0xF112;
/// Account identifier.
pub const PROP_STATE_ACCOUNT_ID: Key = 0xF114;
/// Device identifier.
pub const PROP_STATE_DEVICE_ID: Key = 0xF115;
/// User identifier.
pub const PROP_STATE_USER_ID: Key = 0xF117;
/// Time the user identifier was set.
pub const PROP_STATE_USER_TIME: Key = 0xF118;
/// Current device time, UTC seconds (refreshed on read).
pub const PROP_STATE_TIME: Key = 0xF121;
/// Last valid GPS fix with odometer.
pub const PROP_STATE_GPS: Key = 0xF123;
/// GPS diagnostic counters (last sample, last valid, A count, V count,
/// restarts).
pub const PROP_STATE_GPS_DIAGNOSTIC: Key = 0xF124;
/// Event queue statistics (queued, total generated).
pub const PROP_STATE_QUEUED_EVENTS: Key = 0xF125;
/// Device diagnostic counters.
pub const PROP_STATE_DEV_DIAGNOSTIC: Key = 0xF126;

// --- communication protocol properties
/// Client speaks first on duplex connect.
pub const PROP_COMM_SPEAK_FIRST: Key = 0xF303;
/// First session block carries identification only.
pub const PROP_COMM_FIRST_BRIEF: Key = 0xF304;
/// Connection quota: total, duplex, window minutes.
pub const PROP_COMM_MAX_CONNECTIONS: Key = 0xF311;
/// Absolute minimum delay between any two connections, seconds.
pub const PROP_COMM_MIN_XMIT_DELAY: Key = 0xF312;
/// Minimum interval between connections, seconds.
pub const PROP_COMM_MIN_XMIT_RATE: Key = 0xF313;
/// Maximum interval without a duplex connection, seconds.
pub const PROP_COMM_MAX_XMIT_RATE: Key = 0xF315;
/// Maximum events per duplex session.
pub const PROP_COMM_MAX_DUP_EVENTS: Key = 0xF317;
/// Maximum events per simplex datagram.
pub const PROP_COMM_MAX_SIM_EVENTS: Key = 0xF318;

// --- communication connection properties
/// Opaque communication settings string.
pub const PROP_COMM_SETTINGS: Key = 0xF3A0;
/// Server host name.
pub const PROP_COMM_HOST: Key = 0xF3A1;
/// Server port.
pub const PROP_COMM_PORT: Key = 0xF3A2;
/// Primary DNS.
pub const PROP_COMM_DNS_1: Key = 0xF3A3;
/// Secondary DNS.
pub const PROP_COMM_DNS_2: Key = 0xF3A4;
/// Named dial-up connection.
pub const PROP_COMM_CONNECTION: Key = 0xF3A5;
/// GPRS APN name.
pub const PROP_COMM_APN_NAME: Key = 0xF3A6;
/// GPRS APN server.
pub const PROP_COMM_APN_SERVER: Key = 0xF3A7;
/// GPRS APN user.
pub const PROP_COMM_APN_USER: Key = 0xF3A8;
/// GPRS APN password.
pub const PROP_COMM_APN_PASSWORD: Key = 0xF3A9;
/// GPRS dial string.
pub const PROP_COMM_APN_PHONE: Key = 0xF3AA;
/// Additional APN settings.
pub const PROP_COMM_APN_SETTINGS: Key = 0xF3AB;
/// Minimum acceptable modem signal (+CSQ).
pub const PROP_COMM_MIN_SIGNAL: Key = 0xF3AC;
/// Server access PIN (binary).
pub const PROP_COMM_ACCESS_PIN: Key = 0xF3AD;

// --- packet/data format properties
/// Number of custom formats in use.
pub const PROP_COMM_CUSTOM_FORMATS: Key = 0xF3C0;
/// Supported encoding bitmask.
pub const PROP_COMM_ENCODINGS: Key = 0xF3C1;
/// Total bytes read from the server.
pub const PROP_COMM_BYTES_READ: Key = 0xF3F1;
/// Total bytes written to the server.
pub const PROP_COMM_BYTES_WRITTEN: Key = 0xF3F2;

// --- GPS properties
/// GPS sample interval, seconds.
pub const PROP_GPS_SAMPLE_RATE: Key = 0xF511;
/// Blocking fix-acquisition wait, seconds.
pub const PROP_GPS_AQUIRE_WAIT: Key = 0xF512;
/// Fix expiration (staleness) interval, seconds.
pub const PROP_GPS_EXPIRATION: Key = 0xF513;
/// System clock sync threshold, seconds.
pub const PROP_GPS_CLOCK_DELTA: Key = 0xF515;
/// Minimum required accuracy, meters.
pub const PROP_GPS_ACCURACY: Key = 0xF521;
/// Speeds below this report as zero, kph.
pub const PROP_GPS_MIN_SPEED: Key = 0xF522;
/// Minimum odometer distance delta, meters.
pub const PROP_GPS_DISTANCE_DELTA: Key = 0xF531;

// --- geozone properties
/// Command: geozone administration (add/remove/save).
pub const PROP_CMD_GEOF_ADMIN: Key = 0xF542;
/// Number of zones in the table.
pub const PROP_GEOF_COUNT: Key = 0xF547;
/// Zone table version string.
pub const PROP_GEOF_VERSION: Key = 0xF548;
/// Arrival confirmation delay, seconds.
pub const PROP_GEOF_ARRIVE_DELAY: Key = 0xF54A;
/// Departure confirmation delay, seconds.
pub const PROP_GEOF_DEPART_DELAY: Key = 0xF54D;
/// Current zone ID (0 = none).
pub const PROP_GEOF_CURRENT: Key = 0xF551;

// --- motion properties
/// Motion start definition type.
pub const PROP_MOTION_START_TYPE: Key = 0xF711;
/// Motion start threshold, kph or meters.
pub const PROP_MOTION_START: Key = 0xF712;
/// In-motion event interval, seconds.
pub const PROP_MOTION_IN_MOTION: Key = 0xF713;
/// Sub-threshold delay before "stopped", seconds.
pub const PROP_MOTION_STOP: Key = 0xF714;
/// Stop event stamping mode.
pub const PROP_MOTION_STOP_TYPE: Key = 0xF715;
/// Dormant event interval, seconds.
pub const PROP_MOTION_DORMANT_INTRVL: Key = 0xF716;
/// Dormant event count limit (0 = unlimited).
pub const PROP_MOTION_DORMANT_COUNT: Key = 0xF717;
/// Excess speed threshold, kph.
pub const PROP_MOTION_EXCESS_SPEED: Key = 0xF721;
/// Moving event interval for serial transports, seconds.
pub const PROP_MOTION_MOVING_INTRVL: Key = 0xF725;

// --- odometer properties
/// Odometer value, meters (`+ k` for counter *k*, 0..=7).
pub const PROP_ODOMETER_0_VALUE: Key = 0xF770;
/// Odometer alarm limit, meters (`+ k` for counter *k*).
pub const PROP_ODOMETER_0_LIMIT: Key = 0xF780;
/// Odometer reference fix (`+ k` for counter *k*).
pub const PROP_ODOMETER_0_GPS: Key = 0xF790;

bitflags! {
    /// Property attributes; the low bits carry volatile state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attr: u16 {
        /// Persist to auxiliary storage.
        const SAVE        = 0x8000;
        /// Hidden from listings.
        const HIDDEN      = 0x4000;
        /// Server may not write.
        const READ_ONLY   = 0x2000;
        /// Server may not read (commands).
        const WRITE_ONLY  = 0x1000;
        /// Changed since last save.
        const CHANGED     = 0x0001;
        /// Differs from the table default.
        const NON_DEFAULT = 0x0002;
    }
}

const RO: Attr = Attr::READ_ONLY;
const WO: Attr = Attr::WRITE_ONLY;
const SAVE: Attr = Attr::SAVE;

/// Base storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// Unsigned 8-bit (also the boolean alias).
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Unsigned 24-bit.
    U24,
    /// Unsigned 32-bit.
    U32,
    /// Binary blob, at most 32 bytes.
    Binary,
    /// Bounded string, at most 31 characters.
    Text,
    /// GPS fix with odometer.
    Gps,
    /// Server-invokable command.
    Command,
}

/// A property type: base class plus signed/hex flags and a decimal shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropType {
    /// Base storage class.
    pub base: Base,
    /// Numeric values are signed.
    pub signed: bool,
    /// Render numerics as hex.
    pub hex: bool,
    /// Decimal shift 0..=15: stored value is `round(x * 10^dec)`.
    pub dec: u8,
}

impl PropType {
    /// Unsigned 8-bit.
    pub const U8: PropType = PropType::base(Base::U8);
    /// Boolean (alias of `U8`).
    pub const BOOLEAN: PropType = PropType::base(Base::U8);
    /// Unsigned 16-bit.
    pub const U16: PropType = PropType::base(Base::U16);
    /// Unsigned 32-bit.
    pub const U32: PropType = PropType::base(Base::U32);
    /// Signed 16-bit.
    pub const I16: PropType = PropType {
        signed: true,
        ..PropType::base(Base::U16)
    };
    /// Signed 32-bit.
    pub const I32: PropType = PropType {
        signed: true,
        ..PropType::base(Base::U32)
    };
    /// Hex-rendered 16-bit.
    pub const HEX16: PropType = PropType {
        hex: true,
        ..PropType::base(Base::U16)
    };
    /// Hex-rendered 8-bit.
    pub const HEX8: PropType = PropType {
        hex: true,
        ..PropType::base(Base::U8)
    };
    /// Binary blob.
    pub const BINARY: PropType = PropType::base(Base::Binary);
    /// Bounded string.
    pub const STRING: PropType = PropType::base(Base::Text);
    /// GPS with odometer.
    pub const GPS: PropType = PropType::base(Base::Gps);
    /// Command.
    pub const COMMAND: PropType = PropType::base(Base::Command);

    const fn base(base: Base) -> PropType {
        PropType {
            base,
            signed: false,
            hex: false,
            dec: 0,
        }
    }

    /// Adds a decimal shift.
    pub const fn with_dec(mut self, dec: u8) -> PropType {
        self.dec = dec;
        self
    }

    /// Byte width of one numeric element.
    pub fn width(&self) -> usize {
        match self.base {
            Base::U8 => 1,
            Base::U16 => 2,
            Base::U24 => 3,
            Base::U32 => 4,
            _ => 0,
        }
    }

    /// Checks for a numeric base class.
    pub fn is_numeric(&self) -> bool {
        self.width() > 0
    }
}

/// Command handler: `(protocol index, key, payload) -> command error code`.
pub type CommandFn = fn(usize, Key, &[u8]) -> u16;

/// Notify hook: called before wire gets and after wire sets.
pub type NotifyFn = fn(Refresh, Key);

/// Notify hook registration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Before a property value is retrieved.
    Get,
    /// After a property value is set.
    Set,
}

/// Property storage.
#[derive(Clone)]
enum PropData {
    U32(Vec<u32>),
    Binary(Vec<u8>),
    Text(String),
    Gps(GpsOdometer),
    Command(Option<CommandFn>),
}

impl fmt::Debug for PropData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropData::U32(v) => write!(f, "U32({v:?})"),
            PropData::Binary(v) => write!(f, "Binary({} bytes)", v.len()),
            PropData::Text(v) => write!(f, "Text({v:?})"),
            PropData::Gps(v) => write!(f, "Gps({v:?})"),
            PropData::Command(v) => write!(f, "Command(set: {})", v.is_some()),
        }
    }
}

/// Binary blob capacity, bytes.
const BINARY_CAPACITY: usize = 32;
/// String capacity, characters.
const STRING_CAPACITY: usize = 31;

/// One table entry.
#[derive(Debug, Clone)]
pub struct PropEntry {
    key: Key,
    name: &'static str,
    ptype: PropType,
    attr: Attr,
    max_ndx: usize,
    default: &'static str,
    len_ndx: usize,
    data: PropData,
}

impl PropEntry {
    fn new(
        key: Key,
        name: &'static str,
        ptype: PropType,
        attr: Attr,
        max_ndx: usize,
        default: &'static str,
    ) -> PropEntry {
        let mut entry = PropEntry {
            key,
            name,
            ptype,
            attr,
            max_ndx: max_ndx.max(1),
            default,
            len_ndx: 0,
            data: match ptype.base {
                Base::Binary => PropData::Binary(Vec::new()),
                Base::Text => PropData::Text(String::new()),
                Base::Gps => PropData::Gps(GpsOdometer::default()),
                Base::Command => PropData::Command(None),
                _ => PropData::U32(vec![0; max_ndx.max(1)]),
            },
        };
        entry.init_from_str(default, true);
        entry
    }

    /// Property key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Symbolic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Attribute bits.
    pub fn attr(&self) -> Attr {
        self.attr
    }

    fn numeric_element(&self, text: &str) -> u32 {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16).unwrap_or(0);
        }
        let val: f64 = text.parse().unwrap_or(0.0);
        let shifted = codec::round(val * 10f64.powi(i32::from(self.ptype.dec)));
        shifted as u32
    }

    /// Initializes the value from its textual form. `internal` resets the
    /// non-default flag (table initialization); loads from file do not.
    fn init_from_str(&mut self, text: &str, internal: bool) {
        self.len_ndx = 0;
        if internal {
            self.attr.remove(Attr::NON_DEFAULT);
        }
        match (&self.ptype.base, text.is_empty()) {
            (Base::Command, _) => {}
            (_, true) => match &mut self.data {
                PropData::U32(v) => v.iter_mut().for_each(|x| *x = 0),
                PropData::Binary(v) => v.clear(),
                PropData::Text(v) => v.clear(),
                PropData::Gps(v) => *v = GpsOdometer::default(),
                PropData::Command(_) => {}
            },
            (Base::Binary, false) => {
                let mut bytes = codec::from_hex(text).unwrap_or_default();
                bytes.truncate(BINARY_CAPACITY);
                self.len_ndx = bytes.len();
                self.data = PropData::Binary(bytes);
            }
            (Base::Text, false) => {
                let mut s = text.to_owned();
                s.truncate(STRING_CAPACITY);
                self.len_ndx = 1;
                self.data = PropData::Text(s);
            }
            (Base::Gps, false) => {
                let gps = GpsOdometer::from_csv(text).unwrap_or_default();
                self.len_ndx = usize::from(gps.is_defined());
                self.data = PropData::Gps(gps);
            }
            (_, false) => {
                let mut vals = vec![0u32; self.max_ndx];
                let mut count = 0;
                for (i, field) in text.split(',').enumerate().take(self.max_ndx) {
                    vals[i] = self.numeric_element(field);
                    count = i + 1;
                }
                self.len_ndx = count;
                self.data = PropData::U32(vals);
            }
        }
    }

    fn mark_set(&mut self) {
        self.attr.insert(Attr::CHANGED | Attr::NON_DEFAULT);
    }

    /// Renders the value in its persistence form.
    fn to_value_string(&self) -> String {
        match &self.data {
            PropData::U32(vals) => {
                let mut out = String::new();
                for (i, &raw) in vals.iter().take(self.len_ndx.max(1)).enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if self.ptype.dec > 0 {
                        let div = 10f64.powi(i32::from(self.ptype.dec));
                        let val = if self.ptype.signed {
                            f64::from(raw as i32) / div
                        } else {
                            f64::from(raw) / div
                        };
                        out.push_str(&format!("{:.*}", usize::from(self.ptype.dec), val));
                    } else if self.ptype.hex {
                        out.push_str(&format!("0x{:0width$X}", raw, width = self.ptype.width() * 2));
                    } else if self.ptype.signed {
                        out.push_str(&format!("{}", raw as i32));
                    } else {
                        out.push_str(&format!("{raw}"));
                    }
                }
                out
            }
            PropData::Binary(bytes) => {
                if bytes.is_empty() {
                    String::new()
                } else {
                    format!("0x{}", codec::to_hex(bytes))
                }
            }
            PropData::Text(s) => s.clone(),
            PropData::Gps(gps) => {
                if gps.is_defined() {
                    gps.to_csv()
                } else {
                    String::new()
                }
            }
            PropData::Command(_) => String::new(),
        }
    }

    /// Encodes the value for the wire, every numeric element at its full
    /// type width.
    fn encode_value(&self) -> Result<Vec<u8>, Prop> {
        match &self.data {
            PropData::U32(vals) => {
                let width = self.ptype.width();
                let mut out = Vec::with_capacity(self.max_ndx * width);
                for &raw in vals.iter().take(self.max_ndx) {
                    codec::write_uint(&mut out, raw, width);
                }
                Ok(out)
            }
            PropData::Binary(bytes) => Ok(bytes.clone()),
            PropData::Text(s) => Ok(s.as_bytes().to_vec()),
            PropData::Gps(gps) => {
                let mut out = Vec::with_capacity(16);
                codec::write_uint(&mut out, gps.fixtime, 4);
                gps.point.encode8(&mut out);
                codec::write_uint(&mut out, gps.meters, 4);
                Ok(out)
            }
            PropData::Command(_) => Err(Prop::WriteOnly),
        }
    }

    /// Applies a wire value. The bytes-per-element of numeric arrays is
    /// derived from the supplied length, capped at the type width.
    fn decode_value(&mut self, data: &[u8]) -> Result<usize, Prop> {
        if data.is_empty() {
            self.len_ndx = 0;
            self.mark_set();
            return Ok(0);
        }
        match self.ptype.base {
            Base::U8 | Base::U16 | Base::U24 | Base::U32 => {
                let max_bpe = self.ptype.width();
                if data.len() < self.max_ndx * max_bpe && data.len() % self.max_ndx != 0 {
                    return Err(Prop::InvalidLength);
                }
                let bpe = (data.len() / self.max_ndx).min(max_bpe);
                if bpe == 0 {
                    return Err(Prop::InvalidLength);
                }
                let mut vals = vec![0u32; self.max_ndx];
                for (n, val) in vals.iter_mut().enumerate() {
                    let chunk = &data[n * bpe..];
                    *val = if self.ptype.signed {
                        codec::read_int(chunk, bpe) as u32
                    } else {
                        codec::read_uint(chunk, bpe)
                    };
                }
                self.data = PropData::U32(vals);
                self.len_ndx = self.max_ndx;
                self.mark_set();
                Ok(self.max_ndx * bpe)
            }
            Base::Binary => {
                let take = data.len().min(BINARY_CAPACITY);
                self.data = PropData::Binary(data[..take].to_vec());
                self.len_ndx = take;
                self.mark_set();
                Ok(take)
            }
            Base::Text => {
                let take = data.len().min(STRING_CAPACITY);
                let end = data[..take].iter().position(|&b| b == 0).unwrap_or(take);
                let s = String::from_utf8_lossy(&data[..end]).into_owned();
                self.len_ndx = 1;
                self.data = PropData::Text(s);
                self.mark_set();
                Ok(end)
            }
            Base::Gps => {
                // valid lengths: 10/14 lo-res, 12/16 hi-res
                if data.len() < 4 {
                    return Err(Prop::InvalidLength);
                }
                let mut gps = GpsOdometer {
                    fixtime: codec::read_uint(data, 4),
                    ..GpsOdometer::default()
                };
                let used = match data.len() {
                    10 | 14 => {
                        gps.point = crate::geo::GeoPoint::decode6(&data[4..]);
                        if data.len() == 14 {
                            gps.meters = codec::read_uint(&data[10..], 4);
                            14
                        } else {
                            10
                        }
                    }
                    12 | 16 => {
                        gps.point = crate::geo::GeoPoint::decode8(&data[4..]);
                        if data.len() == 16 {
                            gps.meters = codec::read_uint(&data[12..], 4);
                            16
                        } else {
                            12
                        }
                    }
                    _ => return Err(Prop::InvalidLength),
                };
                self.data = PropData::Gps(gps);
                self.len_ndx = 1;
                self.mark_set();
                Ok(used)
            }
            Base::Command => Err(Prop::InvalidKey),
        }
    }
}

/// The property table with lookup state and notify hooks.
#[derive(Debug)]
pub struct PropStore {
    entries: Vec<PropEntry>,
    binary_search_ok: bool,
    notify_get: Option<NotifyFn>,
    notify_set: Option<NotifyFn>,
}

/// The process-wide property store.
pub static PROPS: Lazy<Mutex<PropStore>> = Lazy::new(|| Mutex::new(PropStore::with_defaults()));

impl PropStore {
    /// Builds the store from the default table, verifying key order.
    pub fn with_defaults() -> PropStore {
        let entries = default_table();
        let mut ordered = true;
        let mut last: Key = 0;
        for e in &entries {
            if e.key < last {
                warn!("Property key out of sequence: {:#06X} {}", e.key, e.name);
                ordered = false;
            }
            last = e.key;
        }
        debug!("Property table size: {} entries", entries.len());
        PropStore {
            entries,
            binary_search_ok: ordered,
            notify_get: None,
            notify_set: None,
        }
    }

    /// Resets every entry to its table default.
    pub fn reset_to_defaults(&mut self) {
        for e in &mut self.entries {
            let default = e.default;
            e.init_from_str(default, true);
            e.attr.remove(Attr::CHANGED);
        }
    }

    fn entry(&self, key: Key) -> Option<&PropEntry> {
        if self.binary_search_ok {
            self.entries
                .binary_search_by_key(&key, |e| e.key)
                .ok()
                .map(|i| &self.entries[i])
        } else {
            self.entries.iter().find(|e| e.key == key)
        }
    }

    fn entry_mut(&mut self, key: Key) -> Option<&mut PropEntry> {
        if self.binary_search_ok {
            self.entries
                .binary_search_by_key(&key, |e| e.key)
                .ok()
                .map(move |i| &mut self.entries[i])
        } else {
            self.entries.iter_mut().find(|e| e.key == key)
        }
    }

    fn entry_by_name(&mut self, name: &str) -> Option<&mut PropEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    fn fire(&self, mode: Refresh, key: Key) {
        let hook = match mode {
            Refresh::Get => self.notify_get,
            Refresh::Set => self.notify_set,
        };
        if let Some(f) = hook {
            f(mode, key);
        }
    }

    /// Registers a notify hook for gets, sets, or both.
    pub fn set_notify(&mut self, mode: Refresh, hook: NotifyFn) {
        match mode {
            Refresh::Get => self.notify_get = Some(hook),
            Refresh::Set => self.notify_set = Some(hook),
        }
    }

    /// Registers a command handler on a command-typed key.
    pub fn set_command(&mut self, key: Key, cmd: CommandFn) -> bool {
        match self.entry_mut(key) {
            Some(e) if e.ptype.base == Base::Command => {
                e.data = PropData::Command(Some(cmd));
                e.len_ndx = 1;
                true
            }
            _ => false,
        }
    }

    /// Overrides the read-only attribute.
    pub fn set_read_only(&mut self, key: Key, read_only: bool) -> bool {
        match self.entry_mut(key) {
            Some(e) => {
                e.attr.set(Attr::READ_ONLY, read_only);
                true
            }
            None => false,
        }
    }

    /// Overrides the save attribute.
    pub fn set_save(&mut self, key: Key, save: bool) -> bool {
        match self.entry_mut(key) {
            Some(e) => {
                e.attr.set(Attr::SAVE, save);
                true
            }
            None => false,
        }
    }

    // --- in-code accessors (read-only/write-only attributes NOT checked)

    /// Reads an unsigned element, `dft` when unset or mistyped.
    pub fn get_u32_at(&self, key: Key, ndx: usize, dft: u32) -> u32 {
        match self.entry(key) {
            Some(e) if e.ptype.is_numeric() && ndx < e.max_ndx && e.len_ndx > ndx => {
                match &e.data {
                    PropData::U32(v) => v[ndx],
                    _ => dft,
                }
            }
            _ => dft,
        }
    }

    /// Reads element 0.
    pub fn get_u32(&self, key: Key, dft: u32) -> u32 {
        self.get_u32_at(key, 0, dft)
    }

    /// Writes an unsigned element, marking changed and non-default.
    pub fn set_u32_at(&mut self, key: Key, ndx: usize, val: u32) -> bool {
        match self.entry_mut(key) {
            Some(e) if e.ptype.is_numeric() && ndx < e.max_ndx => {
                if let PropData::U32(v) = &mut e.data {
                    v[ndx] = val;
                    e.len_ndx = e.len_ndx.max(ndx + 1);
                    e.mark_set();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Writes element 0.
    pub fn set_u32(&mut self, key: Key, val: u32) -> bool {
        self.set_u32_at(key, 0, val)
    }

    /// Adds to an unsigned element, returning the updated value.
    pub fn add_u32(&mut self, key: Key, delta: u32) -> Option<u32> {
        let cur = self.get_u32(key, 0);
        let new = cur.wrapping_add(delta);
        if self.set_u32(key, new) {
            Some(new)
        } else {
            None
        }
    }

    /// Reads a boolean (non-zero element 0).
    pub fn get_bool(&self, key: Key, dft: bool) -> bool {
        self.get_u32(key, u32::from(dft)) != 0
    }

    /// Writes a boolean.
    pub fn set_bool(&mut self, key: Key, val: bool) -> bool {
        self.set_u32(key, u32::from(val))
    }

    /// Reads a decimal-shifted element as a double.
    pub fn get_double_at(&self, key: Key, ndx: usize, dft: f64) -> f64 {
        match self.entry(key) {
            Some(e) if e.ptype.is_numeric() && ndx < e.max_ndx && e.len_ndx > ndx => {
                let raw = match &e.data {
                    PropData::U32(v) => v[ndx],
                    _ => return dft,
                };
                let div = 10f64.powi(i32::from(e.ptype.dec));
                if e.ptype.signed {
                    f64::from(raw as i32) / div
                } else {
                    f64::from(raw) / div
                }
            }
            _ => dft,
        }
    }

    /// Reads element 0 as a double.
    pub fn get_double(&self, key: Key, dft: f64) -> f64 {
        self.get_double_at(key, 0, dft)
    }

    /// Writes a double through the decimal shift.
    pub fn set_double_at(&mut self, key: Key, ndx: usize, val: f64) -> bool {
        let raw = match self.entry(key) {
            Some(e) if e.ptype.is_numeric() => {
                codec::round(val * 10f64.powi(i32::from(e.ptype.dec))) as u32
            }
            _ => return false,
        };
        self.set_u32_at(key, ndx, raw)
    }

    /// Writes element 0 as a double.
    pub fn set_double(&mut self, key: Key, val: f64) -> bool {
        self.set_double_at(key, 0, val)
    }

    /// Reads a string property.
    pub fn get_string(&self, key: Key, dft: &str) -> String {
        match self.entry(key) {
            Some(PropEntry {
                data: PropData::Text(s),
                len_ndx,
                ..
            }) if *len_ndx > 0 => s.clone(),
            _ => dft.to_owned(),
        }
    }

    /// Writes a string property (truncated to capacity).
    pub fn set_string(&mut self, key: Key, val: &str) -> bool {
        match self.entry_mut(key) {
            Some(e) if e.ptype.base == Base::Text => {
                let mut s = val.to_owned();
                s.truncate(STRING_CAPACITY);
                e.data = PropData::Text(s);
                e.len_ndx = 1;
                e.mark_set();
                true
            }
            _ => false,
        }
    }

    /// Reads a binary property.
    pub fn get_binary(&self, key: Key) -> Option<Vec<u8>> {
        match self.entry(key) {
            Some(PropEntry {
                data: PropData::Binary(b),
                ..
            }) => Some(b.clone()),
            _ => None,
        }
    }

    /// Writes a binary property (truncated to capacity).
    pub fn set_binary(&mut self, key: Key, val: &[u8]) -> bool {
        match self.entry_mut(key) {
            Some(e) if e.ptype.base == Base::Binary => {
                let take = val.len().min(BINARY_CAPACITY);
                e.data = PropData::Binary(val[..take].to_vec());
                e.len_ndx = take;
                e.mark_set();
                true
            }
            _ => false,
        }
    }

    /// Reads a GPS property.
    pub fn get_gps(&self, key: Key) -> Option<GpsOdometer> {
        match self.entry(key) {
            Some(PropEntry {
                data: PropData::Gps(g),
                ..
            }) => Some(*g),
            _ => None,
        }
    }

    /// Writes a GPS property.
    pub fn set_gps(&mut self, key: Key, val: &GpsOdometer) -> bool {
        match self.entry_mut(key) {
            Some(e) if e.ptype.base == Base::Gps => {
                e.data = PropData::Gps(*val);
                e.len_ndx = usize::from(val.is_defined());
                e.mark_set();
                true
            }
            _ => false,
        }
    }

    // --- wire accessors (read-only/write-only attributes obeyed)

    /// Encodes a property value for the server. Obeys write-only.
    pub fn get_value(&self, key: Key) -> Result<Vec<u8>, Prop> {
        let entry = self.entry(key).ok_or(Prop::InvalidKey)?;
        if entry.attr.contains(Attr::WRITE_ONLY) || entry.ptype.base == Base::Command {
            return Err(Prop::WriteOnly);
        }
        self.fire(Refresh::Get, key);
        // re-read in case the hook refreshed the value
        let entry = self.entry(key).ok_or(Prop::InvalidKey)?;
        entry.encode_value()
    }

    /// Applies a server-supplied value, dispatching commands. Obeys
    /// read-only. Returns the number of bytes consumed.
    pub fn set_value_cmd(&mut self, proto_ndx: usize, key: Key, data: &[u8]) -> Result<usize, Prop> {
        let entry = self.entry(key).ok_or(Prop::InvalidKey)?;
        if entry.attr.contains(Attr::READ_ONLY) {
            return Err(Prop::ReadOnly);
        }
        if entry.ptype.base == Base::Command {
            let cmd = match &entry.data {
                PropData::Command(Some(cmd)) => *cmd,
                _ => {
                    warn!("Command not initialized: {:#06X}", key);
                    return Err(Prop::CommandInvalid);
                }
            };
            // dispatched without holding a borrow so the handler can
            // re-enter the store
            let code = cmd(proto_ndx, key, data);
            return match code {
                COMMAND_OK => Ok(0),
                COMMAND_OK_ACK => Err(Prop::CommandError(COMMAND_OK_ACK)),
                err => Err(Prop::CommandError(err)),
            };
        }
        let used = self
            .entry_mut(key)
            .ok_or(Prop::InvalidKey)?
            .decode_value(data)?;
        self.fire(Refresh::Set, key);
        Ok(used)
    }

    /// Builds a `PKT_CLIENT_PROPERTY_VALUE` packet carrying key + value.
    pub fn property_packet(&self, key: Key) -> Result<Packet, Prop> {
        let value = self.get_value(key)?;
        let mut payload = Vec::with_capacity(2 + value.len());
        codec::write_uint(&mut payload, u32::from(key), 2);
        payload.extend_from_slice(&value);
        Ok(Packet::new(PKT_CLIENT_PROPERTY_VALUE, payload))
    }

    /// Re-initializes a property from text, clearing the changed flag.
    pub fn init_from_string(&mut self, key: Key, text: &str) -> bool {
        match self.entry_mut(key) {
            Some(e) => {
                e.init_from_str(text, true);
                true
            }
            None => false,
        }
    }

    /// Renders a property as `name=value`.
    pub fn print_to_string(&self, key: Key) -> Option<String> {
        self.fire(Refresh::Get, key);
        let e = self.entry(key)?;
        Some(format!("{}={}", e.name, e.to_value_string()))
    }

    /// Checks whether any saved property changed since the last save.
    pub fn has_changed(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.attr.contains(Attr::SAVE | Attr::CHANGED))
    }

    /// Clears every changed flag.
    pub fn clear_changed(&mut self) {
        for e in &mut self.entries {
            e.attr.remove(Attr::CHANGED);
        }
    }

    /// Saves properties as `key=value` lines. When `all` is false only
    /// save-flagged entries holding non-default values are written; when
    /// true every save-flagged entry is written. Changed flags are
    /// cleared either way.
    pub fn save<P: AsRef<Path>>(&mut self, path: P, all: bool) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        for i in 0..self.entries.len() {
            let (key, skip) = {
                let e = &self.entries[i];
                let skip = !e.attr.contains(Attr::SAVE)
                    || (!all && !e.attr.contains(Attr::NON_DEFAULT))
                    || e.ptype.base == Base::Command;
                (e.key, skip)
            };
            if skip {
                self.entries[i].attr.remove(Attr::CHANGED);
                continue;
            }
            self.fire(Refresh::Get, key);
            let e = &mut self.entries[i];
            writeln!(file, "{}={}", e.name, e.to_value_string())?;
            e.attr.remove(Attr::CHANGED);
        }
        Ok(())
    }

    /// Loads `key=value` lines. Keys may be symbolic names or `0xNNNN`.
    /// Blank lines and `#` comments are ignored; a final line without a
    /// newline is dropped. Loaded entries are forced non-default with the
    /// changed flag clear.
    ///
    /// A missing file is not an error (`Ok(false)`); any other I/O
    /// failure is.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, show: bool) -> std::io::Result<bool> {
        let file = match File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Property file not present: {}", path.as_ref().display());
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            let n = match reader.read_line(&mut line) {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // unterminated trailing line is dropped
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((k, v)) = trimmed.split_once('=') else {
                warn!("Unknown key/value ignored: {trimmed}");
                continue;
            };
            let (k, v) = (k.trim(), v.trim_start());
            let entry = if let Some(hex) = k.strip_prefix("0x").or_else(|| k.strip_prefix("0X")) {
                u16::from_str_radix(hex, 16)
                    .ok()
                    .and_then(|key| self.entry_mut(key))
            } else {
                self.entry_by_name(k)
            };
            match entry {
                Some(e) => {
                    e.init_from_str(v, false);
                    e.attr.insert(Attr::NON_DEFAULT);
                    e.attr.remove(Attr::CHANGED);
                    if show {
                        debug!("Loaded {k}={v}");
                    }
                }
                None => warn!("Unknown key/value ignored: {k}"),
            }
        }
        Ok(true)
    }
}

// ----------------------------------------------------------------------------
// Global-store accessors. Rule engines and the protocol driver go through
// these; each takes the store lock for the duration of one operation.

/// Reads an unsigned element from the global store.
pub fn get_u32_at(key: Key, ndx: usize, dft: u32) -> u32 {
    PROPS.lock().unwrap().get_u32_at(key, ndx, dft)
}

/// Reads element 0 from the global store.
pub fn get_u32(key: Key, dft: u32) -> u32 {
    PROPS.lock().unwrap().get_u32(key, dft)
}

/// Writes an unsigned element to the global store.
pub fn set_u32_at(key: Key, ndx: usize, val: u32) -> bool {
    PROPS.lock().unwrap().set_u32_at(key, ndx, val)
}

/// Writes element 0 to the global store.
pub fn set_u32(key: Key, val: u32) -> bool {
    PROPS.lock().unwrap().set_u32(key, val)
}

/// Adds to an unsigned element in the global store.
pub fn add_u32(key: Key, delta: u32) -> Option<u32> {
    PROPS.lock().unwrap().add_u32(key, delta)
}

/// Reads a boolean from the global store.
pub fn get_bool(key: Key, dft: bool) -> bool {
    PROPS.lock().unwrap().get_bool(key, dft)
}

/// Reads a decimal-shifted double from the global store.
pub fn get_double(key: Key, dft: f64) -> f64 {
    PROPS.lock().unwrap().get_double(key, dft)
}

/// Writes a decimal-shifted double to the global store.
pub fn set_double(key: Key, val: f64) -> bool {
    PROPS.lock().unwrap().set_double(key, val)
}

/// Reads a string from the global store.
pub fn get_string(key: Key, dft: &str) -> String {
    PROPS.lock().unwrap().get_string(key, dft)
}

/// Writes a string to the global store.
pub fn set_string(key: Key, val: &str) -> bool {
    PROPS.lock().unwrap().set_string(key, val)
}

/// Reads a binary value from the global store.
pub fn get_binary(key: Key) -> Option<Vec<u8>> {
    PROPS.lock().unwrap().get_binary(key)
}

/// Reads a GPS value from the global store.
pub fn get_gps(key: Key) -> Option<GpsOdometer> {
    PROPS.lock().unwrap().get_gps(key)
}

/// Writes a GPS value to the global store.
pub fn set_gps(key: Key, val: &GpsOdometer) -> bool {
    PROPS.lock().unwrap().set_gps(key, val)
}

/// Account ID shortcut.
pub fn account_id() -> String {
    get_string(PROP_STATE_ACCOUNT_ID, "")
}

/// Device ID shortcut.
pub fn device_id() -> String {
    get_string(PROP_STATE_DEVICE_ID, "")
}

/// Applies a server-supplied value through a shared store. Command
/// handlers are dispatched after the store lock is released so they can
/// re-enter the store.
pub fn set_value_dispatch(
    store: &Mutex<PropStore>,
    proto_ndx: usize,
    key: Key,
    data: &[u8],
) -> Result<usize, Prop> {
    let cmd = {
        let guard = store.lock().unwrap();
        let entry = guard.entry(key).ok_or(Prop::InvalidKey)?;
        if entry.attr.contains(Attr::READ_ONLY) {
            return Err(Prop::ReadOnly);
        }
        match (&entry.ptype.base, &entry.data) {
            (Base::Command, PropData::Command(Some(cmd))) => Some(*cmd),
            (Base::Command, _) => {
                warn!("Command not initialized: {key:#06X}");
                return Err(Prop::CommandInvalid);
            }
            _ => None,
        }
    };
    match cmd {
        Some(cmd) => match cmd(proto_ndx, key, data) {
            COMMAND_OK => Ok(0),
            code => Err(Prop::CommandError(code)),
        },
        None => store.lock().unwrap().set_value_cmd(proto_ndx, key, data),
    }
}

/// Applies a server-supplied value through the global store.
pub fn set_value_cmd(proto_ndx: usize, key: Key, data: &[u8]) -> Result<usize, Prop> {
    set_value_dispatch(&PROPS, proto_ndx, key, data)
}

/// Encodes a property value through the global store.
pub fn get_value(key: Key) -> Result<Vec<u8>, Prop> {
    PROPS.lock().unwrap().get_value(key)
}

/// Builds a property-value packet through the global store.
pub fn property_packet(key: Key) -> Result<Packet, Prop> {
    PROPS.lock().unwrap().property_packet(key)
}

/// The default property table, ordered by ascending key.
fn default_table() -> Vec<PropEntry> {
    use PropType as T;
    let e = PropEntry::new;
    vec![
        // --- local serial port configuration
        e(PROP_CFG_XPORT_PORT, "cfg.xpo.port", T::STRING, RO, 1, ""),
        e(PROP_CFG_XPORT_BPS, "cfg.xpo.bps", T::U32, RO, 1, ""),
        e(PROP_CFG_XPORT_DEBUG, "cfg.xpo.debug", T::BOOLEAN, RO, 1, "0"),
        e(PROP_CFG_GPS_PORT, "cfg.gps.port", T::STRING, RO, 1, ""),
        e(PROP_CFG_GPS_BPS, "cfg.gps.bps", T::U32, RO, 1, "4800"),
        e(PROP_CFG_GPS_MODEL, "cfg.gps.model", T::STRING, RO, 1, ""),
        e(PROP_CFG_GPS_DEBUG, "cfg.gps.debug", T::BOOLEAN, RO, 1, "0"),
        e(PROP_CFG_SERIAL0_PORT, "cfg.sp0.port", T::STRING, RO, 1, ""),
        e(PROP_CFG_SERIAL0_BPS, "cfg.sp0.bps", T::U32, RO, 1, ""),
        e(PROP_CFG_SERIAL0_DEBUG, "cfg.sp0.debug", T::BOOLEAN, RO, 1, "0"),
        e(PROP_CFG_SERIAL1_PORT, "cfg.sp1.port", T::STRING, RO, 1, ""),
        e(PROP_CFG_SERIAL1_BPS, "cfg.sp1.bps", T::U32, RO, 1, ""),
        e(PROP_CFG_SERIAL1_DEBUG, "cfg.sp1.debug", T::BOOLEAN, RO, 1, "0"),
        // --- miscellaneous commands
        e(PROP_CMD_SAVE_PROPS, "cmd.saveprops", T::COMMAND, WO, 1, ""),
        e(PROP_CMD_STATUS_EVENT, "cmd.status", T::COMMAND, WO, 1, ""),
        e(PROP_CMD_RESET, "cmd.reset", T::COMMAND, WO, 1, ""),
        // --- retained state properties
        e(PROP_STATE_PROTOCOL, "sta.proto", T::U8, RO, 3, "0,2,1"),
        e(PROP_STATE_FIRMWARE, "sta.firm", T::STRING, RO, 1, ""),
        e(PROP_STATE_COPYRIGHT, "sta.copyright", T::STRING, RO, 1, ""),
        e(PROP_STATE_SERIAL, "sta.serial", T::STRING, RO, 1, ""),
        e(PROP_STATE_UNIQUE_ID, "sta.uniq", T::BINARY, RO, 30, ""),
        e(PROP_STATE_ACCOUNT_ID, "sta.account", T::STRING, RO, 1, ""),
        e(PROP_STATE_DEVICE_ID, "sta.device", T::STRING, RO, 1, ""),
        e(PROP_STATE_USER_ID, "sta.user", T::STRING, SAVE, 1, ""),
        e(PROP_STATE_USER_TIME, "sta.user.time", T::U32, RO.union(SAVE), 1, "0"),
        e(PROP_STATE_TIME, "sta.time", T::U32, RO, 1, "0"),
        e(PROP_STATE_GPS, "sta.gpsloc", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_STATE_GPS_DIAGNOSTIC, "sta.gpsdiag", T::U32, RO, 5, "0,0,0,0,0"),
        e(PROP_STATE_QUEUED_EVENTS, "sta.evtqueue", T::U32, RO, 2, "0,0"),
        e(PROP_STATE_DEV_DIAGNOSTIC, "sta.devdiag", T::U32, RO.union(SAVE), 5, "0,0,0,0,0"),
        // --- communication protocol properties
        e(PROP_COMM_SPEAK_FIRST, "com.first", T::BOOLEAN, SAVE, 1, "1"),
        e(PROP_COMM_FIRST_BRIEF, "com.brief", T::BOOLEAN, SAVE, 1, "0"),
        e(PROP_COMM_MAX_CONNECTIONS, "com.maxconn", T::U8, SAVE, 3, "8,4,60"),
        e(PROP_COMM_MIN_XMIT_DELAY, "com.mindelay", T::U16, SAVE, 1, "180"),
        e(PROP_COMM_MIN_XMIT_RATE, "com.minrate", T::U32, SAVE, 1, "180"),
        e(PROP_COMM_MAX_XMIT_RATE, "com.maxrate", T::U32, SAVE, 1, "3600"),
        e(PROP_COMM_MAX_DUP_EVENTS, "com.maxduplex", T::U8, SAVE, 1, "10"),
        e(PROP_COMM_MAX_SIM_EVENTS, "com.maxsimplex", T::U8, SAVE, 1, "2"),
        // --- communication connection properties
        e(PROP_COMM_SETTINGS, "com.settings", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_HOST, "com.host", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_PORT, "com.port", T::U16, SAVE, 1, "0"),
        e(PROP_COMM_DNS_1, "com.dns1", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_DNS_2, "com.dns2", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_CONNECTION, "com.connection", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_NAME, "com.apnname", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_SERVER, "com.apnserv", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_USER, "com.apnuser", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_PASSWORD, "com.apnpass", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_PHONE, "com.apnphone", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_APN_SETTINGS, "com.apnsett", T::STRING, SAVE, 1, ""),
        e(PROP_COMM_MIN_SIGNAL, "com.minsignal", T::I16, SAVE, 1, "7"),
        e(PROP_COMM_ACCESS_PIN, "com.pin", T::BINARY, SAVE, 8, ""),
        // --- packet/data format properties
        e(PROP_COMM_CUSTOM_FORMATS, "com.custfmt", T::U8, SAVE, 1, "0"),
        e(PROP_COMM_ENCODINGS, "com.encodng", T::HEX8, SAVE, 1, "0x7"),
        e(PROP_COMM_BYTES_READ, "com.rdcnt", T::U32, SAVE, 1, "0"),
        e(PROP_COMM_BYTES_WRITTEN, "com.wrcnt", T::U32, SAVE, 1, "0"),
        // --- GPS properties
        e(PROP_GPS_SAMPLE_RATE, "gps.smprate", T::U16, SAVE, 1, "7"),
        e(PROP_GPS_AQUIRE_WAIT, "gps.aquwait", T::U16, SAVE, 1, "0"),
        e(PROP_GPS_EXPIRATION, "gps.expire", T::U16, SAVE, 1, "300"),
        e(PROP_GPS_CLOCK_DELTA, "gps.updclock", T::U8, SAVE, 1, "15"),
        e(PROP_GPS_ACCURACY, "gps.accuracy", T::U16, SAVE, 1, "0"),
        e(PROP_GPS_MIN_SPEED, "gps.minspd", T::U16.with_dec(1), SAVE, 1, "8.0"),
        e(PROP_GPS_DISTANCE_DELTA, "gps.dstdelt", T::U32, SAVE, 1, "500"),
        // --- geozone properties
        e(PROP_CMD_GEOF_ADMIN, "gf.admin", T::COMMAND, WO, 1, ""),
        e(PROP_GEOF_COUNT, "gf.count", T::U16, RO, 1, "0"),
        e(PROP_GEOF_VERSION, "gf.version", T::STRING, SAVE, 1, ""),
        e(PROP_GEOF_ARRIVE_DELAY, "gf.arr.delay", T::U32, SAVE, 1, "30"),
        e(PROP_GEOF_DEPART_DELAY, "gf.dep.delay", T::U32, SAVE, 1, "10"),
        e(PROP_GEOF_CURRENT, "gf.current", T::U32, SAVE, 1, "0"),
        // --- motion properties
        e(PROP_MOTION_START_TYPE, "mot.start.type", T::U8, SAVE, 1, "0"),
        e(PROP_MOTION_START, "mot.start", T::U16.with_dec(1), SAVE, 1, "0.0"),
        e(PROP_MOTION_IN_MOTION, "mot.inmotion", T::U16, SAVE, 1, "0"),
        e(PROP_MOTION_STOP, "mot.stop", T::U16, SAVE, 1, "600"),
        e(PROP_MOTION_STOP_TYPE, "mot.stop.type", T::U8, SAVE, 1, "0"),
        e(PROP_MOTION_DORMANT_INTRVL, "mot.dorm.rate", T::U32, SAVE, 1, "0"),
        e(PROP_MOTION_DORMANT_COUNT, "mot.dorm.cnt", T::U16, SAVE, 1, "1"),
        e(PROP_MOTION_EXCESS_SPEED, "mot.exspeed", T::U16.with_dec(1), SAVE, 1, "0.0"),
        e(PROP_MOTION_MOVING_INTRVL, "mot.moving", T::U16, SAVE, 1, "0"),
        // --- odometer properties
        e(PROP_ODOMETER_0_VALUE, "odo.0.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 1, "odo.1.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 2, "odo.2.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 3, "odo.3.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 4, "odo.4.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 5, "odo.5.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 6, "odo.6.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_VALUE + 7, "odo.7.value", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT, "odo.0.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 1, "odo.1.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 2, "odo.2.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 3, "odo.3.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 4, "odo.4.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 5, "odo.5.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 6, "odo.6.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_LIMIT + 7, "odo.7.limit", T::U32, SAVE, 1, "0"),
        e(PROP_ODOMETER_0_GPS, "odo.0.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 1, "odo.1.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 2, "odo.2.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 3, "odo.3.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 4, "odo.4.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 5, "odo.5.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 6, "odo.6.gps", T::GPS, RO.union(SAVE), 1, ""),
        e(PROP_ODOMETER_0_GPS + 7, "odo.7.gps", T::GPS, RO.union(SAVE), 1, ""),
    ]
}
