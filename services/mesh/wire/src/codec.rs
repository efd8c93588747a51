//! Encoding and decoding for the vendor opcode protocol.
//!
//! Every message starts with a 3-byte big-endian opcode followed by the
//! payload. There is no length prefix; framing belongs to the send primitive.
//! Text payloads are ASCII terminated by a single NUL byte.

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::trace;

/// Size of the opcode prefix in bytes
pub const OPCODE_LEN: usize = 3;

/// Largest value representable by an opcode
pub const MAX_OPCODE: u32 = 0x00FF_FFFF;

/// Terminator appended to text payloads
pub const TEXT_TERMINATOR: u8 = 0x00;

/// A 24-bit message opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u32);

impl Opcode {
    /// Build an opcode from a raw value, keeping the low 24 bits.
    ///
    /// Intended for constants; use `Opcode::try_from` for untrusted input.
    pub const fn from_u24(raw: u32) -> Self {
        Self(raw & MAX_OPCODE)
    }

    /// Raw opcode value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Big-endian wire representation
    pub fn to_be_bytes(self) -> [u8; OPCODE_LEN] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    /// Parse the big-endian wire representation
    pub fn from_be_bytes(bytes: [u8; OPCODE_LEN]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<u32> for Opcode {
    type Error = WireError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        if raw > MAX_OPCODE {
            return Err(WireError::OpcodeRange(raw));
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Prefix `payload` with the big-endian opcode
pub fn encode(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(OPCODE_LEN + payload.len());
    buf.put_slice(&opcode.to_be_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a message into its opcode and the remaining payload
pub fn decode(data: &[u8]) -> Result<(Opcode, &[u8]), WireError> {
    if data.len() < OPCODE_LEN {
        return Err(WireError::Malformed {
            len: data.len(),
            need: OPCODE_LEN,
        });
    }

    let (prefix, rest) = data.split_at(OPCODE_LEN);
    let opcode = Opcode::from_be_bytes([prefix[0], prefix[1], prefix[2]]);
    trace!("Decoded opcode {} with {} payload bytes", opcode, rest.len());
    Ok((opcode, rest))
}

/// Encode a NUL-terminated ASCII text message
pub fn encode_text(opcode: Opcode, text: &str) -> Result<Bytes, WireError> {
    if !text.is_ascii() {
        return Err(WireError::NonAscii);
    }

    let mut buf = BytesMut::with_capacity(OPCODE_LEN + text.len() + 1);
    buf.put_slice(&opcode.to_be_bytes());
    buf.put_slice(text.as_bytes());
    buf.put_u8(TEXT_TERMINATOR);
    Ok(buf.freeze())
}

/// Read the text carried after the opcode, stopping at the first NUL.
///
/// A payload without a terminator is accepted as-is.
pub fn decode_text(rest: &[u8]) -> Result<&str, WireError> {
    let end = rest
        .iter()
        .position(|&b| b == TEXT_TERMINATOR)
        .unwrap_or(rest.len());
    let text = &rest[..end];

    if !text.is_ascii() {
        return Err(WireError::NonAscii);
    }
    std::str::from_utf8(text).map_err(|_| WireError::NonAscii)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: Opcode = Opcode::from_u24(0xfbf105);

    #[test]
    fn test_encode_layout() {
        let bytes = encode(HELLO, b"abc");
        assert_eq!(bytes.as_ref(), &[0xfb, 0xf1, 0x05, b'a', b'b', b'c']);
    }

    #[test]
    fn test_roundtrip() {
        let bytes = encode(HELLO, b"\x01\x02\x03\x04");
        let (opcode, rest) = decode(&bytes).unwrap();
        assert_eq!(opcode, HELLO);
        assert_eq!(rest, b"\x01\x02\x03\x04");
    }

    #[test]
    fn test_decode_opcode_only() {
        let (opcode, rest) = decode(&[0x00, 0x00, 0x01]).unwrap();
        assert_eq!(opcode.value(), 1);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_short_input() {
        for len in 0..OPCODE_LEN {
            let data = vec![0xAB; len];
            assert_eq!(
                decode(&data),
                Err(WireError::Malformed { len, need: OPCODE_LEN })
            );
        }
    }

    #[test]
    fn test_text_payload() {
        let bytes = encode_text(HELLO, "Participant").unwrap();
        assert_eq!(&bytes[..3], &[0xfb, 0xf1, 0x05]);
        assert_eq!(&bytes[3..], b"Participant\x00");

        let (opcode, rest) = decode(&bytes).unwrap();
        assert_eq!(opcode, HELLO);
        assert_eq!(decode_text(rest).unwrap(), "Participant");
    }

    #[test]
    fn test_empty_text_is_just_terminator() {
        let bytes = encode_text(HELLO, "").unwrap();
        assert_eq!(bytes.len(), OPCODE_LEN + 1);
        assert_eq!(bytes[3], TEXT_TERMINATOR);
    }

    #[test]
    fn test_text_rejects_non_ascii() {
        assert_eq!(encode_text(HELLO, "héllo"), Err(WireError::NonAscii));
        assert_eq!(decode_text(&[0xC3, 0xA9, 0x00]), Err(WireError::NonAscii));
    }

    #[test]
    fn test_decode_text_without_terminator() {
        assert_eq!(decode_text(b"S1").unwrap(), "S1");
        assert_eq!(decode_text(b"a\x00b").unwrap(), "a");
    }

    #[test]
    fn test_opcode_range() {
        assert!(Opcode::try_from(MAX_OPCODE).is_ok());
        assert_eq!(
            Opcode::try_from(0x0100_0000),
            Err(WireError::OpcodeRange(0x0100_0000))
        );
        assert_eq!(Opcode::from_u24(0x12fd05f1).value(), 0xfd05f1);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(HELLO.to_string(), "0xfbf105");
        assert_eq!(Opcode::from_u24(1).to_string(), "0x1");
    }
}
