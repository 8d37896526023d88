//! GTP-U header encoding/decoding (3GPP TS 29.281)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// GTP-U protocol version.
pub const GTP_VERSION: u8 = 1;

/// Well-known GTP-U UDP port.
pub const GTP_U_PORT: u16 = 2152;

/// Plain GTP-U header length in bytes.
const HEADER_LEN: usize = 8;

/// GTP-U message types the simulator handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtpMessageType {
    /// Echo Request
    EchoRequest = 1,
    /// Echo Response
    EchoResponse = 2,
    /// G-PDU (user data)
    GPdu = 255,
}

impl GtpMessageType {
    /// Parses the message type octet.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::EchoRequest),
            2 => Some(Self::EchoResponse),
            255 => Some(Self::GPdu),
            _ => None,
        }
    }
}

/// GTP-U codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GtpError {
    /// Packet shorter than the mandatory header
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },
    /// Version field is not GTP-U v1
    #[error("unsupported GTP version {0}")]
    UnsupportedVersion(u8),
    /// Unknown message type octet
    #[error("unknown GTP message type {0}")]
    UnknownMessageType(u8),
    /// Header length field disagrees with the buffer
    #[error("length mismatch: header says {expected}, payload has {actual}")]
    LengthMismatch {
        /// Length from the header
        expected: usize,
        /// Actual payload length
        actual: usize,
    },
}

/// A decoded GTP-U packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpPacket {
    /// Message type
    pub message_type: GtpMessageType,
    /// Tunnel endpoint identifier
    pub teid: u32,
    /// Payload (the user IP packet for G-PDU)
    pub payload: Bytes,
}

/// Encodes a G-PDU carrying `payload` towards tunnel `teid`.
pub fn encode_gpdu(teid: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    // version 1, protocol type GTP, no optional fields
    buf.put_u8(GTP_VERSION << 5 | 1 << 4);
    buf.put_u8(GtpMessageType::GPdu as u8);
    buf.put_u16(payload.len() as u16);
    buf.put_u32(teid);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Decodes a GTP-U packet.
pub fn decode_gtpu(data: &[u8]) -> Result<GtpPacket, GtpError> {
    if data.len() < HEADER_LEN {
        return Err(GtpError::BufferTooShort {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }
    let mut buf = Bytes::copy_from_slice(data);
    let flags = buf.get_u8();
    let version = flags >> 5;
    if version != GTP_VERSION {
        return Err(GtpError::UnsupportedVersion(version));
    }
    let mt = buf.get_u8();
    let message_type = GtpMessageType::from_u8(mt).ok_or(GtpError::UnknownMessageType(mt))?;
    let length = buf.get_u16() as usize;
    let teid = buf.get_u32();
    if buf.remaining() < length {
        return Err(GtpError::LengthMismatch {
            expected: length,
            actual: buf.remaining(),
        });
    }
    let payload = buf.split_to(length);
    Ok(GtpPacket {
        message_type,
        teid,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpdu_roundtrip() {
        let payload = b"\x45\x00\x00\x1c user ip packet";
        let encoded = encode_gpdu(0xdead_beef, payload);
        let decoded = decode_gtpu(&encoded).unwrap();
        assert_eq!(decoded.message_type, GtpMessageType::GPdu);
        assert_eq!(decoded.teid, 0xdead_beef);
        assert_eq!(&decoded.payload[..], payload);
    }

    #[test]
    fn test_rejects_short_buffer() {
        assert_eq!(
            decode_gtpu(&[0x30, 0xff]),
            Err(GtpError::BufferTooShort {
                needed: 8,
                available: 2
            })
        );
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut encoded = encode_gpdu(1, b"x");
        encoded[0] = 2 << 5;
        assert_eq!(decode_gtpu(&encoded), Err(GtpError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let encoded = encode_gpdu(1, b"hello");
        assert!(matches!(
            decode_gtpu(&encoded[..encoded.len() - 2]),
            Err(GtpError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_message_type() {
        let mut encoded = encode_gpdu(1, b"");
        encoded[1] = 0x42;
        assert_eq!(decode_gtpu(&encoded), Err(GtpError::UnknownMessageType(0x42)));
    }
}
