//! GTP-U support for ransim
//!
//! Encoding and decoding of GTP-U (TS 29.281) headers for the simulated N3
//! user plane. Only the plain 8-octet header is supported; the simulator
//! neither sends nor expects extension headers.

pub mod codec;

pub use codec::{decode_gtpu, encode_gpdu, GtpError, GtpMessageType, GtpPacket, GTP_U_PORT};
