//! Byte-order helpers for the DMTP wire format.
//!
//! All multi-byte integers on the wire are big-endian regardless of host,
//! and fields occupy an exact declared byte width (1 to 4 bytes for
//! numerics). These helpers write and read such bounded-width values and
//! implement the NMEA/ASCII-packet XOR checksum.

/// Appends `len` big-endian bytes of `val` to `out`.
///
/// Values wider than the field are truncated to the low `len` bytes; this
/// matches the wire contract where the field width is fixed by the format
/// declaration, not by the value magnitude.
pub fn write_uint(out: &mut Vec<u8>, val: u32, len: usize) {
    for i in (0..len.min(4)).rev() {
        out.push(((val >> (8 * i)) & 0xFF) as u8);
    }
    // widths above 4 pad with leading zeros
    for _ in 4..len {
        out.insert(out.len() - 4, 0);
    }
}

/// Appends `len` big-endian bytes of the signed value `val` (two's
/// complement truncated to the field width).
pub fn write_int(out: &mut Vec<u8>, val: i32, len: usize) {
    write_uint(out, val as u32, len);
}

/// Reads `len` big-endian bytes from `buf` as an unsigned integer.
pub fn read_uint(buf: &[u8], len: usize) -> u32 {
    let mut val = 0u32;
    for &b in buf.iter().take(len) {
        val = (val << 8) | u32::from(b);
    }
    val
}

/// Reads `len` big-endian bytes from `buf` as a sign-extended integer.
pub fn read_int(buf: &[u8], len: usize) -> i32 {
    let raw = read_uint(buf, len);
    let bits = 8 * len.min(4) as u32;
    if bits < 32 && (raw & (1 << (bits - 1))) != 0 {
        (raw | (u32::MAX << bits)) as i32
    } else {
        raw as i32
    }
}

/// Rounds a double to the nearest integer, away from zero on ties.
pub fn round(val: f64) -> i64 {
    if val >= 0.0 {
        (val + 0.5) as i64
    } else {
        (val - 0.5) as i64
    }
}

/// XOR of all bytes, the NMEA-0183 and ASCII-packet checksum.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Validates a `*HH` checksum trailer: XOR of the bytes before `*` must
/// equal the two hex digits after it. Returns `false` when no `*` is
/// present or the digits do not parse.
pub fn checksum_trailer_ok(body: &str) -> bool {
    match body.rsplit_once('*') {
        Some((payload, hex)) if hex.len() >= 2 => {
            match u8::from_str_radix(&hex[..2], 16) {
                Ok(want) => xor_checksum(payload.as_bytes()) == want,
                Err(_) => false,
            }
        }
        _ => false,
    }
}

/// Encodes bytes as upper-case hex.
pub fn to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02X}"));
    }
    s
}

/// Decodes a hex string (with optional `0x` prefix) into bytes. Returns
/// `None` on odd length or invalid digits.
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    for i in (0..text.len()).step_by(2) {
        out.push(u8::from_str_radix(&text[i..i + 2], 16).ok()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trip() {
        for &(val, len) in &[(0u32, 1usize), (0xFF, 1), (0x1234, 2), (0xABCDEF, 3), (0xDEADBEEF, 4)] {
            let mut buf = Vec::new();
            write_uint(&mut buf, val, len);
            assert_eq!(buf.len(), len);
            assert_eq!(read_uint(&buf, len), val);
        }
    }

    #[test]
    fn uint_truncates_to_width() {
        let mut buf = Vec::new();
        write_uint(&mut buf, 0x1_0234, 2);
        assert_eq!(buf, [0x02, 0x34]);
    }

    #[test]
    fn int_sign_extension() {
        let mut buf = Vec::new();
        write_int(&mut buf, -5, 2);
        assert_eq!(read_int(&buf, 2), -5);

        buf.clear();
        write_int(&mut buf, -200, 3);
        assert_eq!(read_int(&buf, 3), -200);

        buf.clear();
        write_int(&mut buf, 1000, 2);
        assert_eq!(read_int(&buf, 2), 1000);
    }

    #[test]
    fn rounding() {
        assert_eq!(round(0.4), 0);
        assert_eq!(round(0.5), 1);
        assert_eq!(round(-0.5), -1);
        assert_eq!(round(-0.4), 0);
        assert_eq!(round(12.34 * 10.0), 123);
    }

    /// A tampered byte between `$` and `*` must invalidate the checksum.
    #[test]
    fn nmea_checksum() {
        let body = "GPRMC,025423.494,A,3709.0642,N,11907.8315,W,0.094824,108.52,200505,,";
        let sum = xor_checksum(body.as_bytes());
        let sentence = format!("{body}*{sum:02X}");
        assert!(checksum_trailer_ok(&sentence));

        let tampered = sentence.replacen('A', "V", 1);
        assert!(!checksum_trailer_ok(&tampered));

        assert!(!checksum_trailer_ok("GPRMC,no,trailer"));
    }

    #[test]
    fn hex_round_trip() {
        let data = [0x00, 0x1A, 0xFF];
        assert_eq!(to_hex(&data), "001AFF");
        assert_eq!(from_hex("0x001AFF").unwrap(), data);
        assert_eq!(from_hex("001AFF").unwrap(), data);
        assert!(from_hex("0x1").is_none());
        assert!(from_hex("zz").is_none());
    }
}
