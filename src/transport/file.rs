//! File transport: appends packet data to a local file.
//!
//! Intended for offline capture and bench testing; supports simplex
//! sessions only. Reads return synthetic ACK/EOT packets so a protocol
//! driver accidentally running a duplex session terminates cleanly.

use std::fs::OpenOptions;
use std::io::Write;

use tracing::{debug, error, warn};

use crate::error;
use crate::packet::{PACKET_HEADER_BASIC, PKT_SERVER_ACK, PKT_SERVER_EOT};
use crate::props::{self, PROP_CFG_XPORT_PORT};

use super::{Transport, TransportMedia, TransportType};

/// Fallback output file when `cfg.xpo.port` is unset.
const DEFAULT_FILE: &str = "dmtpdata.dmt";

/// Datagram buffer bound; data past the MTU risks fragmentation anyway.
const DATAGRAM_CAPACITY: usize = 2000;

/// Append-to-file transport.
pub struct FileTransport {
    kind: TransportType,
    file: Option<std::fs::File>,
    datagram: Vec<u8>,
    read_alternator: u32,
}

impl FileTransport {
    /// Creates a closed file transport.
    pub fn new() -> FileTransport {
        FileTransport {
            kind: TransportType::None,
            file: None,
            datagram: Vec::with_capacity(DATAGRAM_CAPACITY),
            read_alternator: 0,
        }
    }
}

impl Default for FileTransport {
    fn default() -> FileTransport {
        FileTransport::new()
    }
}

impl Transport for FileTransport {
    fn media(&self) -> TransportMedia {
        TransportMedia::File
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self, kind: TransportType) -> Result<(), error::Transport> {
        if self.is_open() {
            warn!("Transport seems to still be open!");
            let _ = self.close(false);
        }

        if kind == TransportType::Duplex {
            warn!("'Duplex' should be disabled for file transport!");
        }
        let mut path = props::get_string(PROP_CFG_XPORT_PORT, "");
        if path.is_empty() {
            path = DEFAULT_FILE.to_owned();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| error::Transport::OpenFailed {
                reason: format!("{path}: {e}"),
            })?;
        self.file = Some(file);
        self.kind = kind;
        self.datagram.clear();
        debug!("Opened {} file transport", kind.name());
        Ok(())
    }

    fn close(&mut self, send_udp: bool) -> Result<(), error::Transport> {
        let Some(mut file) = self.file.take() else {
            return Err(error::Transport::NotOpen);
        };
        debug!("{} transport close", self.kind.name());

        let mut result = Ok(());
        if send_udp && self.kind == TransportType::Simplex {
            // the buffered datagram becomes one contiguous file append
            if let Err(e) = file.write_all(&self.datagram) {
                result = Err(e.into());
            }
        }

        self.kind = TransportType::None;
        self.datagram.clear();
        result
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, error::Transport> {
        // Alternate synthetic ACK and EOT frames: the driver's duplex
        // loop acknowledges and then ends the session.
        if buf.len() < 3 {
            return Err(error::Transport::PartialPacket {
                got: 0,
                want: 3,
            });
        }
        buf[0] = PACKET_HEADER_BASIC;
        buf[1] = if self.read_alternator % 2 == 1 {
            PKT_SERVER_EOT
        } else {
            PKT_SERVER_ACK
        };
        buf[2] = 0;
        self.read_alternator += 1;
        Ok(3)
    }

    fn read_flush(&mut self) {}

    fn write_packet(&mut self, data: &[u8]) -> Result<usize, error::Transport> {
        let Some(file) = self.file.as_mut() else {
            error!("Transport is not open");
            return Err(error::Transport::NotOpen);
        };
        if data.is_empty() {
            return Ok(0);
        }
        match self.kind {
            TransportType::Simplex => {
                // queue until close
                if self.datagram.len() + data.len() > DATAGRAM_CAPACITY {
                    return Err(error::Transport::WriteFailed);
                }
                self.datagram.extend_from_slice(data);
                Ok(data.len())
            }
            TransportType::Duplex => {
                file.write_all(data)?;
                Ok(data.len())
            }
            TransportType::None => Err(error::Transport::NotOpen),
        }
    }
}
