//! Packet framing.
//!
//! Binary packets are framed as `[header][type][len][payload...]`. ASCII
//! packets are framed as `$` + two hex digits of the packet type + the
//! hex-encoded payload + an optional `*CK` checksum, terminated with `\r`.

use crate::codec;
use crate::error;

/// Header byte of binary protocol packets.
pub const PACKET_HEADER_BASIC: u8 = 0xE0;
/// Header byte of ASCII-encoded packets.
pub const PACKET_ASCII_HEADER: u8 = b'$';
/// ASCII packet terminator.
pub const PACKET_ASCII_EOL: u8 = b'\r';
/// Bytes of header read before the payload length is known.
pub const PACKET_HEADER_LENGTH: usize = 3;
/// Maximum payload length (the length field is a single byte).
pub const PACKET_MAX_PAYLOAD: usize = 255;

/// Sequence value meaning "no/every sequence".
pub const SEQUENCE_ALL: u32 = 0xFFFF_FFFF;

/// Mask covering a sequence field of `len` bytes.
pub fn sequence_mask(len: u8) -> u32 {
    match len {
        0 => 0,
        1 => 0xFF,
        2 => 0xFFFF,
        3 => 0x00FF_FFFF,
        _ => 0xFFFF_FFFF,
    }
}

// --- client packet types
/// End of block, no more packets to send.
pub const PKT_CLIENT_EOB_DONE: u8 = 0x00;
/// End of block, more packets pending.
pub const PKT_CLIENT_EOB_MORE: u8 = 0x01;
/// Unique-ID identification payload.
pub const PKT_CLIENT_UNIQUE_ID: u8 = 0x11;
/// Account-ID identification string.
pub const PKT_CLIENT_ACCOUNT_ID: u8 = 0x12;
/// Device-ID identification string.
pub const PKT_CLIENT_DEVICE_ID: u8 = 0x13;
/// Standard-resolution fixed-format event.
pub const PKT_CLIENT_FIXED_FMT_STD: u8 = 0x30;
/// High-resolution fixed-format event.
pub const PKT_CLIENT_FIXED_FMT_HIGH: u8 = 0x31;
/// First custom-format event type (0x50..=0x5F).
pub const PKT_CLIENT_CUSTOM_FMT_0: u8 = 0x50;
/// Property value reply.
pub const PKT_CLIENT_PROPERTY_VALUE: u8 = 0xB0;
/// Custom format declaration (24-bit field descriptors).
pub const PKT_CLIENT_FORMAT_DEF_24: u8 = 0xCF;
/// Diagnostic message.
pub const PKT_CLIENT_DIAGNOSTIC: u8 = 0xD1;
/// Client error report.
pub const PKT_CLIENT_ERROR: u8 = 0xE0;

// --- server packet types
/// Acknowledge events up to a sequence.
pub const PKT_SERVER_ACK: u8 = 0xA0;
/// Request a property value.
pub const PKT_SERVER_GET_PROPERTY: u8 = 0xB0;
/// Set a property value.
pub const PKT_SERVER_SET_PROPERTY: u8 = 0xB1;
/// File upload chunk.
pub const PKT_SERVER_FILE_UPLOAD: u8 = 0xC0;
/// Server-detected error.
pub const PKT_SERVER_ERROR: u8 = 0xE0;
/// End of transmission.
pub const PKT_SERVER_EOT: u8 = 0xFF;

/// Packet priority. Consumers drain higher priorities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// No priority assigned.
    #[default]
    None,
    /// Low priority (periodic reports).
    Low,
    /// Normal priority.
    Normal,
    /// High priority (alarms).
    High,
}

/// Wire encoding of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Raw binary framing.
    #[default]
    Binary,
    /// Hex-ASCII framing with checksum trailer.
    HexAscii,
}

/// A framed unit on the wire, queued as an owned copy.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Packet type byte.
    pub pkt_type: u8,
    /// Queue priority.
    pub priority: Priority,
    /// Sequence number (`SEQUENCE_ALL` when the format has no sequence
    /// field).
    pub sequence: u32,
    /// Byte width of the sequence field, 0 when absent.
    pub seq_len: u8,
    /// Payload offset of the sequence field, for in-place patching.
    pub seq_pos: u8,
    /// Set once the packet has been written to a transport.
    pub sent: bool,
    /// Bit-exact payload.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet with the given type and payload.
    pub fn new(pkt_type: u8, payload: Vec<u8>) -> Packet {
        Packet {
            pkt_type,
            payload,
            ..Packet::default()
        }
    }

    /// Creates a packet with a priority.
    pub fn with_priority(pkt_type: u8, payload: Vec<u8>, priority: Priority) -> Packet {
        Packet {
            pkt_type,
            payload,
            priority,
            ..Packet::default()
        }
    }

    /// Frames the packet for the wire in the given encoding.
    pub fn encode(&self, encoding: Encoding) -> Vec<u8> {
        let len = self.payload.len().min(PACKET_MAX_PAYLOAD);
        match encoding {
            Encoding::Binary => {
                let mut out = Vec::with_capacity(PACKET_HEADER_LENGTH + len);
                out.push(PACKET_HEADER_BASIC);
                out.push(self.pkt_type);
                out.push(len as u8);
                out.extend_from_slice(&self.payload[..len]);
                out
            }
            Encoding::HexAscii => {
                let mut body = format!("{:02X}", self.pkt_type);
                body.push_str(&codec::to_hex(&self.payload[..len]));
                let sum = codec::xor_checksum(body.as_bytes());
                let mut out = Vec::with_capacity(body.len() + 5);
                out.push(PACKET_ASCII_HEADER);
                out.extend_from_slice(body.as_bytes());
                out.extend_from_slice(format!("*{sum:02X}").as_bytes());
                out.push(PACKET_ASCII_EOL);
                out
            }
        }
    }

    /// Parses a framed server packet as returned by a transport's
    /// `read_packet` (binary frame, or ASCII frame without the trailing
    /// `\r`).
    pub fn decode(frame: &[u8]) -> Result<Packet, error::Transport> {
        if frame.is_empty() {
            return Err(error::Transport::PartialPacket { got: 0, want: 1 });
        }
        if frame[0] == PACKET_ASCII_HEADER {
            return Packet::decode_ascii(frame);
        }
        if frame[0] != PACKET_HEADER_BASIC {
            return Err(error::Transport::InvalidFrame {
                reason: format!("unexpected header byte {:#04X}", frame[0]),
            });
        }
        if frame.len() < PACKET_HEADER_LENGTH {
            return Err(error::Transport::PartialPacket {
                got: frame.len(),
                want: PACKET_HEADER_LENGTH,
            });
        }
        let len = usize::from(frame[2]);
        if frame.len() < PACKET_HEADER_LENGTH + len {
            return Err(error::Transport::PartialPacket {
                got: frame.len(),
                want: PACKET_HEADER_LENGTH + len,
            });
        }
        Ok(Packet::new(
            frame[1],
            frame[PACKET_HEADER_LENGTH..PACKET_HEADER_LENGTH + len].to_vec(),
        ))
    }

    fn decode_ascii(frame: &[u8]) -> Result<Packet, error::Transport> {
        let invalid = |reason: &str| error::Transport::InvalidFrame {
            reason: reason.to_owned(),
        };
        let text = std::str::from_utf8(&frame[1..])
            .map_err(|_| invalid("non-UTF8 ASCII packet"))?
            .trim_end_matches('\r');
        let (body, check) = match text.rsplit_once('*') {
            Some((body, hex)) => (body, Some(hex)),
            None => (text, None),
        };
        if let Some(hex) = check {
            let want =
                u8::from_str_radix(hex, 16).map_err(|_| invalid("malformed checksum trailer"))?;
            if codec::xor_checksum(body.as_bytes()) != want {
                return Err(invalid("checksum mismatch"));
            }
        }
        if body.len() < 2 {
            return Err(error::Transport::PartialPacket {
                got: body.len(),
                want: 2,
            });
        }
        let pkt_type =
            u8::from_str_radix(&body[..2], 16).map_err(|_| invalid("malformed type digits"))?;
        let payload = codec::from_hex(&body[2..]).ok_or_else(|| invalid("malformed hex payload"))?;
        Ok(Packet::new(pkt_type, payload))
    }

    /// Patches a freshly assigned sequence number into the payload, at the
    /// position recorded by the encoder.
    pub fn patch_sequence(&mut self, sequence: u32) {
        if self.seq_len == 0 {
            return;
        }
        self.sequence = sequence & sequence_mask(self.seq_len);
        let pos = usize::from(self.seq_pos);
        let len = usize::from(self.seq_len);
        if pos + len <= self.payload.len() {
            let mut tmp = Vec::with_capacity(len);
            codec::write_uint(&mut tmp, self.sequence, len);
            self.payload[pos..pos + len].copy_from_slice(&tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trip() {
        let pkt = Packet::new(PKT_CLIENT_ACCOUNT_ID, b"example".to_vec());
        let frame = pkt.encode(Encoding::Binary);
        assert_eq!(frame[0], PACKET_HEADER_BASIC);
        assert_eq!(frame[1], PKT_CLIENT_ACCOUNT_ID);
        assert_eq!(frame[2], 7);
        let back = Packet::decode(&frame).unwrap();
        assert_eq!(back.pkt_type, PKT_CLIENT_ACCOUNT_ID);
        assert_eq!(back.payload, b"example");
    }

    #[test]
    fn ascii_round_trip() {
        let pkt = Packet::new(PKT_SERVER_ACK, vec![0x00, 0x2A]);
        let frame = pkt.encode(Encoding::HexAscii);
        assert_eq!(frame[0], b'$');
        assert_eq!(*frame.last().unwrap(), b'\r');
        let back = Packet::decode(&frame).unwrap();
        assert_eq!(back.pkt_type, PKT_SERVER_ACK);
        assert_eq!(back.payload, [0x00, 0x2A]);
    }

    /// A corrupted ASCII checksum must be rejected.
    #[test]
    fn ascii_checksum_rejected() {
        let pkt = Packet::new(PKT_SERVER_ACK, vec![0x01]);
        let mut frame = pkt.encode(Encoding::HexAscii);
        // flip a payload nibble without fixing the checksum
        frame[3] = if frame[3] == b'0' { b'1' } else { b'0' };
        assert!(Packet::decode(&frame).is_err());
    }

    #[test]
    fn truncated_binary_rejected() {
        let pkt = Packet::new(PKT_SERVER_SET_PROPERTY, vec![1, 2, 3, 4]);
        let frame = pkt.encode(Encoding::Binary);
        assert!(Packet::decode(&frame[..5]).is_err());
    }

    #[test]
    fn sequence_patching() {
        let mut pkt = Packet::new(PKT_CLIENT_FIXED_FMT_STD, vec![0, 0, 0, 0]);
        pkt.seq_pos = 2;
        pkt.seq_len = 2;
        pkt.patch_sequence(0x1_02AB);
        assert_eq!(pkt.sequence, 0x02AB);
        assert_eq!(pkt.payload, [0, 0, 0x02, 0xAB]);
    }

    #[test]
    fn sequence_masks() {
        assert_eq!(sequence_mask(1), 0xFF);
        assert_eq!(sequence_mask(2), 0xFFFF);
        assert_eq!(sequence_mask(4), 0xFFFF_FFFF);
    }
}
