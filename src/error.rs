//! Error module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that happened in a certain part of the startup logic.
#[derive(Debug, Clone, Copy, Error)]
pub enum Init {
    /// Property store initialization error.
    #[error("there was an error initializing the property store")]
    Props,
    /// GPS reader initialization error.
    #[error("there was an error starting the GPS reader")]
    Gps,
    /// Transport initialization error.
    #[error("there was an error initializing the transport")]
    Transport,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum Config {
    /// Error opening the configuration file.
    #[error("error opening the configuration file at '{}'", path.display())]
    Open {
        /// The path of the configuration file.
        path: PathBuf,
    },
    /// Error reading the configuration file.
    #[error("error reading the configuration file at '{}'", path.display())]
    Read {
        /// The path of the configuration file.
        path: PathBuf,
    },
    /// Invalid TOML found in the configuration file.
    #[error("invalid TOML found in the configuration file at '{}'", path.display())]
    InvalidToml {
        /// The path of the configuration file.
        path: PathBuf,
    },
    /// Invalid configuration options.
    #[error("the configuration is invalid:\n{errors}")]
    Invalid {
        /// The list of errors in the configuration.
        errors: String,
    },
}

/// GPS reader errors.
#[derive(Debug, Error)]
pub enum Gps {
    /// Error opening the GPS serial port.
    #[error("an error occurred trying to open the GPS serial port '{port}'")]
    Open {
        /// The configured serial port.
        port: String,
    },
    /// The serial port reached EOF.
    #[error("EOF was found when reading the GPS serial port")]
    SerialEnd,
    /// Invalid GPS fix status code.
    #[error("invalid GPS fix status: '{status}'")]
    InvalidStatus {
        /// The invalid GPS status code that was received.
        status: String,
    },
    /// Serial I/O error while reading the GPS port.
    #[error("GPS serial I/O error")]
    Io(#[from] std::io::Error),
}

/// Property store errors.
///
/// Each variant maps to the combined protocol error code reported to the
/// server: kind in the high byte, length or command sub-code in the low
/// 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Prop {
    /// The property key does not exist.
    #[error("invalid property key")]
    InvalidKey,
    /// The operation does not apply to the property type.
    #[error("invalid property type")]
    InvalidType,
    /// The supplied data length does not fit the property type.
    #[error("invalid property value length")]
    InvalidLength,
    /// The property cannot be written.
    #[error("property is read-only")]
    ReadOnly,
    /// The property cannot be read.
    #[error("property is write-only")]
    WriteOnly,
    /// The command property has no registered handler.
    #[error("command property has no registered handler")]
    CommandInvalid,
    /// The command handler returned an error code.
    #[error("command returned error code {0:#06X}")]
    CommandError(u16),
}

impl Prop {
    /// Combined 32-bit error code as sent to the server.
    pub fn code(self) -> u32 {
        match self {
            Prop::InvalidKey => 0x0100_0000,
            Prop::InvalidType => 0x0200_0000,
            Prop::InvalidLength => 0x0300_0000,
            Prop::ReadOnly => 0x1100_0000,
            Prop::WriteOnly => 0x1200_0000,
            Prop::CommandInvalid => 0x2200_0000,
            Prop::CommandError(sub) => 0x2300_0000 | u32::from(sub),
        }
    }
}

/// GeoZone errors. The geozone-admin command maps these onto the wire
/// command error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Zone {
    /// Zone ID `0` is reserved for "no zone".
    #[error("zone ID 0 is reserved")]
    ReservedId,
    /// The zone radius must be greater than zero.
    #[error("zone radius must be greater than zero")]
    Radius,
    /// The zone geometry is invalid for its type.
    #[error("invalid zone geometry")]
    Geometry,
    /// The zone type is not supported.
    #[error("unsupported zone type")]
    Kind,
    /// The zone table is full.
    #[error("the zone table is full")]
    TableFull,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum Transport {
    /// The transport could not be opened.
    #[error("the transport could not be opened: {reason}")]
    OpenFailed {
        /// Human readable open-failure reason.
        reason: String,
    },
    /// The transport is not open.
    #[error("the transport is not open")]
    NotOpen,
    /// A read timed out before a full packet arrived.
    #[error("read timed out before a full packet arrived")]
    ReadTimeout,
    /// A partial packet was read.
    #[error("a partial packet was read ({got} of {want} bytes)")]
    PartialPacket {
        /// Bytes actually read.
        got: usize,
        /// Bytes required.
        want: usize,
    },
    /// The peer closed the connection.
    #[error("the peer closed the connection")]
    PeerClosed,
    /// A received frame could not be parsed.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What failed to parse.
        reason: String,
    },
    /// A write failed.
    #[error("transport write failed")]
    WriteFailed,
    /// The requested connection type is not supported by this medium.
    #[error("connection type not supported by this transport")]
    Unsupported,
    /// Underlying I/O error.
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),
}

/// GPRS modem errors.
#[derive(Debug, Error)]
pub enum Modem {
    /// No serial connection to the modem.
    #[error("there was no open serial connection to the modem")]
    NoSerial,
    /// The modem did not answer `AT`.
    #[error("the modem did not respond to AT")]
    NoResponse,
    /// Error turning the modem 'echo' off.
    #[error("there was an error turning the modem echo off")]
    EchoOff,
    /// Signal quality below the configured minimum.
    #[error("signal quality {csq} below minimum {min}")]
    Signal {
        /// Reported +CSQ value.
        csq: u8,
        /// Minimum acceptable value.
        min: u8,
    },
    /// The modem is not registered on the network.
    #[error("the modem is not registered on the network (+CGREG: {stat})")]
    NotRegistered {
        /// Reported registration state.
        stat: u8,
    },
    /// GPRS attach failed.
    #[error("GPRS attach failed")]
    AttachFailed,
    /// The modem rejected the connection request.
    #[error("the modem rejected the connection to {host}:{port}")]
    ConnectFailed {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// The modem returned a partial response.
    #[error("the modem returned a partial response: `{response}`")]
    PartialResponse {
        /// Contents of the partial response.
        response: String,
    },
}

#[cfg(test)]
mod tests {
    use super::Prop;

    /// Checks the combined property error codes.
    #[test]
    fn prop_error_codes() {
        assert_eq!(Prop::InvalidKey.code(), 0x0100_0000);
        assert_eq!(Prop::ReadOnly.code(), 0x1100_0000);
        assert_eq!(Prop::WriteOnly.code(), 0x1200_0000);
        assert_eq!(Prop::CommandError(0xF011).code(), 0x2300_F011);
    }
}
