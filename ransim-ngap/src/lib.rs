//! NGAP protocol support for ransim
//!
//! Typed PDU structures for the procedures the simulator drives, plus a
//! compact binary codec. The PDU set mirrors what a gNB exchanges with an
//! AMF for UE attach, session management and context release; it is not a
//! conformance-grade ASN.1 encoding.

pub mod codec;
pub mod pdu;

pub use codec::{decode_ngap_pdu, encode_ngap_pdu, NgapCodecError};
pub use pdu::*;
