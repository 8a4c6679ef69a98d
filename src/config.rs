//! Configuration module.
//!
//! Bootstrap configuration read from `config.toml`. This covers only what
//! must be known before the property store is loaded: serial ports,
//! identifiers, transport choice and file locations. Everything else is a
//! property (and is server-settable at runtime).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error;
use crate::CONFIG_FILE;

/// Configuration object.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match Config::from_file(CONFIG_FILE) {
    Ok(c) => c,
    Err(e) => {
        crate::print_system_failure(&e, "Error loading configuration");
        panic!("invalid configuration");
    }
});

/// Transport media selectable as the primary transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Append packets to a local file (simplex only).
    File,
    /// Direct TCP/UDP sockets.
    Socket,
    /// Serial/Bluetooth link (duplex only).
    Serial,
    /// GPRS modem with AT-command dialing.
    Gprs,
}

/// Device identity section.
#[derive(Debug, Deserialize)]
pub struct Device {
    account: String,
    device: String,
    #[serde(default)]
    unique_id: String,
    #[serde(default)]
    firmware: String,
}

impl Device {
    /// Gets the account identifier.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Gets the device identifier.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Gets the unique binary identifier as a hex string (may be empty).
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Gets the firmware version string.
    pub fn firmware(&self) -> &str {
        &self.firmware
    }
}

/// GPS receiver section.
#[derive(Debug, Deserialize)]
pub struct Gps {
    uart: PathBuf,
    baud_rate: u32,
    #[serde(default)]
    model: String,
}

impl Gps {
    /// Gets the receiver serial device.
    pub fn uart(&self) -> &Path {
        &self.uart
    }

    /// Gets the receiver baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Gets the receiver model name (for model-specific setup strings).
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Primary transport section.
#[derive(Debug, Deserialize)]
pub struct Transport {
    kind: TransportKind,
    /// Serial device (serial/gprs kinds) or output file (file kind).
    #[serde(default)]
    port: String,
    #[serde(default)]
    baud_rate: u32,
}

impl Transport {
    /// Gets the transport kind.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Gets the port/device/file backing the transport.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Gets the serial baud rate (serial/gprs kinds).
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// Server coordinates used to seed the communication properties.
#[derive(Debug, Deserialize, Default)]
pub struct Comm {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
}

impl Comm {
    /// Gets the server host seed (may be empty).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Gets the server port seed.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Configuration object.
#[derive(Debug, Deserialize)]
pub struct Config {
    debug: bool,
    props_file: PathBuf,
    geozone_file: PathBuf,
    device: Device,
    gps: Gps,
    transport: Transport,
    #[serde(default)]
    comm: Comm,
}

impl Config {
    /// Creates a new configuration object from a path.
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let file = File::open(path.as_ref()).context(error::Config::Open {
            path: path.as_ref().to_owned(),
        })?;
        let mut reader = BufReader::new(file);
        let mut contents = String::new();

        reader
            .read_to_string(&mut contents)
            .context(error::Config::Read {
                path: path.as_ref().to_owned(),
            })?;

        let config: Config = toml::from_str(&contents).context(error::Config::InvalidToml {
            path: path.as_ref().to_owned(),
        })?;

        if let (false, errors) = config.verify() {
            Err(error::Config::Invalid { errors }.into())
        } else {
            Ok(config)
        }
    }

    /// Verify the correctness of the configuration, and return a list of
    /// errors if invalid.
    fn verify(&self) -> (bool, String) {
        let mut errors = String::new();
        let mut ok = true;

        if self.device.account.is_empty() {
            ok = false;
            errors.push_str("the account identifier must not be empty\n");
        }
        if self.device.device.is_empty() {
            ok = false;
            errors.push_str("the device identifier must not be empty\n");
        }
        if !self.device.unique_id.is_empty()
            && crate::codec::from_hex(&self.device.unique_id).is_none()
        {
            ok = false;
            errors.push_str("the unique ID must be an even-length hex string\n");
        }

        if self.gps.baud_rate == 0 {
            ok = false;
            errors.push_str("the GPS baud rate must not be zero\n");
        }

        match self.transport.kind {
            TransportKind::Serial | TransportKind::Gprs => {
                if self.transport.port.is_empty() {
                    ok = false;
                    errors.push_str("serial/gprs transports require a port\n");
                }
                if self.transport.baud_rate == 0 {
                    ok = false;
                    errors.push_str("serial/gprs transports require a baud rate\n");
                }
            }
            TransportKind::Socket => {
                if self.comm.host.is_empty() || self.comm.port == 0 {
                    ok = false;
                    errors.push_str("the socket transport requires comm.host and comm.port\n");
                }
            }
            TransportKind::File => {}
        }

        (ok, errors)
    }

    /// Gets whether the tracker should run in debug mode (relaxed rate
    /// floors, verbose logging).
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Gets the property persistence file.
    pub fn props_file(&self) -> &Path {
        &self.props_file
    }

    /// Gets the geozone table file.
    pub fn geozone_file(&self) -> &Path {
        &self.geozone_file
    }

    /// Gets the device identity section.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Gets the GPS receiver section.
    pub fn gps(&self) -> &Gps {
        &self.gps
    }

    /// Gets the primary transport section.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Gets the server coordinates section.
    pub fn comm(&self) -> &Comm {
        &self.comm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config() {
        let config = Config::from_file("config.toml").unwrap();

        assert!(config.debug());
        assert_eq!(config.device().account(), "opendmtp");
        assert_eq!(config.device().device(), "tracker-1");
        assert_eq!(config.gps().baud_rate(), 4800);
        assert_eq!(config.transport().kind(), TransportKind::Socket);
    }

    #[test]
    fn config_error() {
        let config = Config {
            debug: false,
            props_file: PathBuf::from("props.conf"),
            geozone_file: PathBuf::from("geozone.dat"),
            device: Device {
                account: String::new(),
                device: "dev".to_owned(),
                unique_id: "0x".to_owned(),
                firmware: String::new(),
            },
            gps: Gps {
                uart: PathBuf::from("/dev/ttyS0"),
                baud_rate: 0,
                model: String::new(),
            },
            transport: Transport {
                kind: TransportKind::Serial,
                port: String::new(),
                baud_rate: 0,
            },
            comm: Comm::default(),
        };
        let (ok, errors) = config.verify();

        assert!(!ok);
        assert!(errors.contains("account identifier"));
        assert!(errors.contains("GPS baud rate"));
        assert!(errors.contains("serial/gprs transports require a port"));
    }

    #[test]
    fn config_static() {
        assert!(CONFIG.debug());
    }
}
