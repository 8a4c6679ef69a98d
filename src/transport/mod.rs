//! Transport abstraction.
//!
//! Four interchangeable media implement the same contract behind the
//! [`Transport`] trait; the protocol driver neither knows nor cares which
//! one carries the session.

mod file;
mod gprs;
mod serial;
mod socket;

pub use file::FileTransport;
pub use gprs::GprsTransport;
pub use serial::SerialTransport;
pub use socket::SocketTransport;

use std::io::Read;

use crate::config::{TransportKind, CONFIG};
use crate::error;
use crate::packet::{PACKET_ASCII_EOL, PACKET_ASCII_HEADER, PACKET_HEADER_LENGTH};
use crate::props::{
    self, PROP_CFG_SERIAL0_PORT, PROP_CFG_SERIAL1_PORT, PROP_COMM_HOST, PROP_COMM_PORT,
};

/// Transport media classes. Policy short-circuits key off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMedia {
    /// Append-to-file transport.
    File,
    /// Direct TCP/UDP sockets.
    Socket,
    /// Serial/Bluetooth link.
    Serial,
    /// GPRS modem.
    Gprs,
}

/// Session connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    /// Not connected.
    #[default]
    None,
    /// One-way datagram transmission.
    Simplex,
    /// Bidirectional conversation.
    Duplex,
}

impl TransportType {
    /// Display name used in transport logs.
    pub fn name(self) -> &'static str {
        match self {
            TransportType::None => "None",
            TransportType::Simplex => "Simplex",
            TransportType::Duplex => "Duplex",
        }
    }
}

/// The six-function transport contract.
pub trait Transport: Send {
    /// The media class, for accounting short-circuits.
    fn media(&self) -> TransportMedia;

    /// Whether a session is currently open.
    fn is_open(&self) -> bool;

    /// Opens a session of the given type.
    fn open(&mut self, kind: TransportType) -> Result<(), error::Transport>;

    /// Closes the session. For simplex sessions `send_udp` flushes the
    /// buffered writes as a single datagram.
    fn close(&mut self, send_udp: bool) -> Result<(), error::Transport>;

    /// Reads one framed packet into `buf`, returning its length.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, error::Transport>;

    /// Discards any pending input.
    fn read_flush(&mut self);

    /// Writes one encoded packet, returning the bytes written (buffered
    /// writes count as written).
    fn write_packet(&mut self, data: &[u8]) -> Result<usize, error::Transport>;
}

/// Builds the primary transport chosen by the bootstrap configuration,
/// after verifying that the properties the medium depends on are in
/// place. Without them the client could never connect.
pub fn create_primary() -> Result<Box<dyn Transport>, error::Transport> {
    let missing = |what: &str| error::Transport::OpenFailed {
        reason: format!("{what} not configured"),
    };
    let server_known =
        !props::get_string(PROP_COMM_HOST, "").is_empty() && props::get_u32(PROP_COMM_PORT, 0) > 0;

    match CONFIG.transport().kind() {
        TransportKind::File => Ok(Box::new(FileTransport::new())),
        TransportKind::Socket => {
            if !server_known {
                return Err(missing("server host/port"));
            }
            Ok(Box::new(SocketTransport::new()))
        }
        TransportKind::Serial => {
            if props::get_string(PROP_CFG_SERIAL0_PORT, "").is_empty() {
                return Err(missing("serial transport port"));
            }
            Ok(Box::new(SerialTransport::new()))
        }
        TransportKind::Gprs => {
            if props::get_string(PROP_CFG_SERIAL1_PORT, "").is_empty() {
                return Err(missing("modem port"));
            }
            if !server_known {
                return Err(missing("server host/port"));
            }
            Ok(Box::new(GprsTransport::new()))
        }
    }
}

/// Reads one packet frame from a byte stream: a 3-byte header, then
/// either hex-ASCII text up to `\r` or exactly the binary payload length.
/// Partial reads fail hard.
pub(crate) fn read_framed<R: Read>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<usize, error::Transport> {
    if buf.len() < PACKET_HEADER_LENGTH {
        return Err(error::Transport::PartialPacket {
            got: 0,
            want: PACKET_HEADER_LENGTH,
        });
    }

    read_exact(stream, &mut buf[..PACKET_HEADER_LENGTH])?;

    if buf[0] == PACKET_ASCII_HEADER {
        // ASCII encoded: read until the carriage return
        let mut pos = PACKET_HEADER_LENGTH;
        loop {
            if pos >= buf.len() {
                return Err(error::Transport::PartialPacket {
                    got: pos,
                    want: buf.len() + 1,
                });
            }
            let mut byte = [0u8];
            read_exact(stream, &mut byte)?;
            if byte[0] == PACKET_ASCII_EOL {
                return Ok(pos);
            }
            buf[pos] = byte[0];
            pos += 1;
        }
    }

    let payload_len = usize::from(buf[PACKET_HEADER_LENGTH - 1]);
    if payload_len > 0 {
        if buf.len() < PACKET_HEADER_LENGTH + payload_len {
            return Err(error::Transport::PartialPacket {
                got: PACKET_HEADER_LENGTH,
                want: PACKET_HEADER_LENGTH + payload_len,
            });
        }
        read_exact(
            stream,
            &mut buf[PACKET_HEADER_LENGTH..PACKET_HEADER_LENGTH + payload_len],
        )?;
        Ok(PACKET_HEADER_LENGTH + payload_len)
    } else {
        Ok(PACKET_HEADER_LENGTH)
    }
}

fn read_exact<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<(), error::Transport> {
    let mut got = 0;
    while got < buf.len() {
        match stream.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(if got == 0 {
                    error::Transport::PeerClosed
                } else {
                    error::Transport::PartialPacket {
                        got,
                        want: buf.len(),
                    }
                })
            }
            Ok(n) => got += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                return Err(error::Transport::ReadTimeout)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Encoding, Packet, PKT_SERVER_ACK, PKT_SERVER_EOT};

    #[test]
    fn framed_binary_read() {
        let pkt = Packet::new(PKT_SERVER_ACK, vec![0x00, 0x2A]);
        let frame = pkt.encode(Encoding::Binary);
        let mut cursor = std::io::Cursor::new(frame.clone());
        let mut buf = [0u8; 600];
        let n = read_framed(&mut cursor, &mut buf).unwrap();
        assert_eq!(&buf[..n], &frame[..]);
    }

    #[test]
    fn framed_zero_payload() {
        let pkt = Packet::new(PKT_SERVER_EOT, Vec::new());
        let frame = pkt.encode(Encoding::Binary);
        let mut cursor = std::io::Cursor::new(frame);
        let mut buf = [0u8; 600];
        let n = read_framed(&mut cursor, &mut buf).unwrap();
        assert_eq!(n, PACKET_HEADER_LENGTH);
    }

    #[test]
    fn framed_ascii_read() {
        let pkt = Packet::new(PKT_SERVER_ACK, vec![0x07]);
        let frame = pkt.encode(Encoding::HexAscii);
        let mut cursor = std::io::Cursor::new(frame.clone());
        let mut buf = [0u8; 600];
        let n = read_framed(&mut cursor, &mut buf).unwrap();
        // the trailing \r is consumed but not returned
        assert_eq!(&buf[..n], &frame[..frame.len() - 1]);
        let back = Packet::decode(&buf[..n]).unwrap();
        assert_eq!(back.pkt_type, PKT_SERVER_ACK);
        assert_eq!(back.payload, [0x07]);
    }

    /// A truncated stream is a hard failure, not a short read.
    #[test]
    fn framed_partial_fails() {
        let pkt = Packet::new(PKT_SERVER_ACK, vec![1, 2, 3, 4]);
        let frame = pkt.encode(Encoding::Binary);
        let mut cursor = std::io::Cursor::new(frame[..5].to_vec());
        let mut buf = [0u8; 600];
        assert!(read_framed(&mut cursor, &mut buf).is_err());
    }
}
