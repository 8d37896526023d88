//! NGAP codec
//!
//! Encodes [`NgapPdu`] values to a compact tagged binary form and back:
//! a one-octet procedure tag followed by the procedure's fields. Strings are
//! u8-length prefixed, NAS payloads u16-length prefixed, lists u8-counted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::pdu::*;
use ransim_common::types::{Plmn, Snssai};

/// NGAP codec error types.
#[derive(Debug, Error)]
pub enum NgapCodecError {
    /// Error while encoding a PDU
    #[error("NGAP encoding error: {0}")]
    Encode(String),

    /// Error while decoding a PDU
    #[error("NGAP decoding error: {0}")]
    Decode(String),
}

impl From<NgapCodecError> for ransim_common::Error {
    fn from(err: NgapCodecError) -> Self {
        ransim_common::Error::Decode(err.to_string())
    }
}

// Procedure tags on the wire.
const TAG_NG_SETUP_REQUEST: u8 = 0x01;
const TAG_NG_SETUP_RESPONSE: u8 = 0x02;
const TAG_NG_SETUP_FAILURE: u8 = 0x03;
const TAG_INITIAL_UE_MESSAGE: u8 = 0x10;
const TAG_UPLINK_NAS_TRANSPORT: u8 = 0x11;
const TAG_DOWNLINK_NAS_TRANSPORT: u8 = 0x12;
const TAG_INITIAL_CONTEXT_SETUP_REQUEST: u8 = 0x13;
const TAG_INITIAL_CONTEXT_SETUP_RESPONSE: u8 = 0x14;
const TAG_PDU_SESSION_SETUP_REQUEST: u8 = 0x20;
const TAG_PDU_SESSION_SETUP_RESPONSE: u8 = 0x21;
const TAG_PDU_SESSION_RELEASE_COMMAND: u8 = 0x22;
const TAG_PDU_SESSION_RELEASE_RESPONSE: u8 = 0x23;
const TAG_UE_CONTEXT_RELEASE_REQUEST: u8 = 0x30;
const TAG_UE_CONTEXT_RELEASE_COMMAND: u8 = 0x31;
const TAG_UE_CONTEXT_RELEASE_COMPLETE: u8 = 0x32;

/// Encodes an NGAP PDU to bytes.
pub fn encode_ngap_pdu(pdu: &NgapPdu) -> Result<Vec<u8>, NgapCodecError> {
    let mut buf = BytesMut::with_capacity(64);
    match pdu {
        NgapPdu::NgSetupRequest(m) => {
            buf.put_u8(TAG_NG_SETUP_REQUEST);
            buf.put_u32(m.gnb_id);
            put_string(&mut buf, &m.ran_node_name)?;
            buf.put_slice(&m.plmn.encode());
            buf.put_u32(m.tac);
            buf.put_u8(m.slices.len() as u8);
            for slice in &m.slices {
                put_snssai(&mut buf, slice);
            }
        }
        NgapPdu::NgSetupResponse(m) => {
            buf.put_u8(TAG_NG_SETUP_RESPONSE);
            put_string(&mut buf, &m.amf_name)?;
            buf.put_u8(m.relative_capacity);
        }
        NgapPdu::NgSetupFailure(m) => {
            buf.put_u8(TAG_NG_SETUP_FAILURE);
            buf.put_u8(m.cause);
        }
        NgapPdu::InitialUeMessage(m) => {
            buf.put_u8(TAG_INITIAL_UE_MESSAGE);
            buf.put_i64(m.ran_ue_ngap_id);
            put_bytes(&mut buf, &m.nas_pdu)?;
            buf.put_slice(&m.plmn.encode());
            buf.put_u32(m.tac);
            buf.put_u64(m.nci);
            buf.put_u8(m.establishment_cause);
        }
        NgapPdu::UplinkNasTransport(m) => {
            buf.put_u8(TAG_UPLINK_NAS_TRANSPORT);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_bytes(&mut buf, &m.nas_pdu)?;
        }
        NgapPdu::DownlinkNasTransport(m) => {
            buf.put_u8(TAG_DOWNLINK_NAS_TRANSPORT);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_bytes(&mut buf, &m.nas_pdu)?;
        }
        NgapPdu::InitialContextSetupRequest(m) => {
            buf.put_u8(TAG_INITIAL_CONTEXT_SETUP_REQUEST);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_opt_bytes(&mut buf, m.nas_pdu.as_deref())?;
        }
        NgapPdu::InitialContextSetupResponse(m) => {
            buf.put_u8(TAG_INITIAL_CONTEXT_SETUP_RESPONSE);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
        }
        NgapPdu::PduSessionResourceSetupRequest(m) => {
            buf.put_u8(TAG_PDU_SESSION_SETUP_REQUEST);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            buf.put_u8(m.items.len() as u8);
            for item in &m.items {
                buf.put_u8(item.psi);
                put_opt_bytes(&mut buf, item.nas_pdu.as_deref())?;
                buf.put_u32(item.ul_teid);
                buf.put_slice(&item.upf_address.octets());
                buf.put_u8(item.qfi);
            }
        }
        NgapPdu::PduSessionResourceSetupResponse(m) => {
            buf.put_u8(TAG_PDU_SESSION_SETUP_RESPONSE);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            buf.put_u8(m.setup_items.len() as u8);
            for item in &m.setup_items {
                buf.put_u8(item.psi);
                buf.put_u32(item.dl_teid);
                buf.put_slice(&item.gnb_address.octets());
            }
            buf.put_u8(m.failed_items.len() as u8);
            for item in &m.failed_items {
                buf.put_u8(item.psi);
                buf.put_u8(item.cause);
            }
        }
        NgapPdu::PduSessionResourceReleaseCommand(m) => {
            buf.put_u8(TAG_PDU_SESSION_RELEASE_COMMAND);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_opt_bytes(&mut buf, m.nas_pdu.as_deref())?;
            put_psis(&mut buf, &m.psis);
        }
        NgapPdu::PduSessionResourceReleaseResponse(m) => {
            buf.put_u8(TAG_PDU_SESSION_RELEASE_RESPONSE);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_psis(&mut buf, &m.psis);
        }
        NgapPdu::UeContextReleaseRequest(m) => {
            buf.put_u8(TAG_UE_CONTEXT_RELEASE_REQUEST);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
            put_psis(&mut buf, &m.psis);
            buf.put_u8(m.cause);
        }
        NgapPdu::UeContextReleaseCommand(m) => {
            buf.put_u8(TAG_UE_CONTEXT_RELEASE_COMMAND);
            buf.put_i64(m.amf_ue_ngap_id);
            match m.ran_ue_ngap_id {
                Some(id) => {
                    buf.put_u8(0x01);
                    buf.put_i64(id);
                }
                None => buf.put_u8(0x00),
            }
            buf.put_u8(m.cause);
        }
        NgapPdu::UeContextReleaseComplete(m) => {
            buf.put_u8(TAG_UE_CONTEXT_RELEASE_COMPLETE);
            buf.put_i64(m.amf_ue_ngap_id);
            buf.put_i64(m.ran_ue_ngap_id);
        }
    }
    Ok(buf.to_vec())
}

/// Decodes an NGAP PDU from bytes.
pub fn decode_ngap_pdu(bytes: &[u8]) -> Result<NgapPdu, NgapCodecError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if !buf.has_remaining() {
        return Err(NgapCodecError::Decode("empty PDU".into()));
    }
    let tag = buf.get_u8();
    match tag {
        TAG_NG_SETUP_REQUEST => {
            need(&buf, 4)?;
            let gnb_id = buf.get_u32();
            let ran_node_name = get_string(&mut buf)?;
            let plmn = get_plmn(&mut buf)?;
            need(&buf, 5)?;
            let tac = buf.get_u32();
            let count = buf.get_u8() as usize;
            let mut slices = Vec::with_capacity(count);
            for _ in 0..count {
                slices.push(get_snssai(&mut buf)?);
            }
            Ok(NgapPdu::NgSetupRequest(NgSetupRequest {
                gnb_id,
                ran_node_name,
                plmn,
                tac,
                slices,
            }))
        }
        TAG_NG_SETUP_RESPONSE => {
            let amf_name = get_string(&mut buf)?;
            need(&buf, 1)?;
            Ok(NgapPdu::NgSetupResponse(NgSetupResponse {
                amf_name,
                relative_capacity: buf.get_u8(),
            }))
        }
        TAG_NG_SETUP_FAILURE => {
            need(&buf, 1)?;
            Ok(NgapPdu::NgSetupFailure(NgSetupFailure {
                cause: buf.get_u8(),
            }))
        }
        TAG_INITIAL_UE_MESSAGE => {
            need(&buf, 8)?;
            let ran_ue_ngap_id = buf.get_i64();
            let nas_pdu = get_bytes(&mut buf)?;
            let plmn = get_plmn(&mut buf)?;
            need(&buf, 13)?;
            Ok(NgapPdu::InitialUeMessage(InitialUeMessage {
                ran_ue_ngap_id,
                nas_pdu,
                plmn,
                tac: buf.get_u32(),
                nci: buf.get_u64(),
                establishment_cause: buf.get_u8(),
            }))
        }
        TAG_UPLINK_NAS_TRANSPORT => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let nas_pdu = get_bytes(&mut buf)?;
            Ok(NgapPdu::UplinkNasTransport(UplinkNasTransport {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
                nas_pdu,
            }))
        }
        TAG_DOWNLINK_NAS_TRANSPORT => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let nas_pdu = get_bytes(&mut buf)?;
            Ok(NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
                nas_pdu,
            }))
        }
        TAG_INITIAL_CONTEXT_SETUP_REQUEST => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let nas_pdu = get_opt_bytes(&mut buf)?;
            Ok(NgapPdu::InitialContextSetupRequest(
                InitialContextSetupRequest {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    nas_pdu,
                },
            ))
        }
        TAG_INITIAL_CONTEXT_SETUP_RESPONSE => {
            need(&buf, 16)?;
            Ok(NgapPdu::InitialContextSetupResponse(
                InitialContextSetupResponse {
                    amf_ue_ngap_id: buf.get_i64(),
                    ran_ue_ngap_id: buf.get_i64(),
                },
            ))
        }
        TAG_PDU_SESSION_SETUP_REQUEST => {
            need(&buf, 17)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let count = buf.get_u8() as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                need(&buf, 1)?;
                let psi = buf.get_u8();
                let nas_pdu = get_opt_bytes(&mut buf)?;
                need(&buf, 9)?;
                let ul_teid = buf.get_u32();
                let upf_address = get_ipv4(&mut buf);
                let qfi = buf.get_u8();
                items.push(PduSessionSetupItem {
                    psi,
                    nas_pdu,
                    ul_teid,
                    upf_address,
                    qfi,
                });
            }
            Ok(NgapPdu::PduSessionResourceSetupRequest(
                PduSessionResourceSetupRequest {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    items,
                },
            ))
        }
        TAG_PDU_SESSION_SETUP_RESPONSE => {
            need(&buf, 17)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let setup_count = buf.get_u8() as usize;
            let mut setup_items = Vec::with_capacity(setup_count);
            for _ in 0..setup_count {
                need(&buf, 9)?;
                setup_items.push(PduSessionSetupResponseItem {
                    psi: buf.get_u8(),
                    dl_teid: buf.get_u32(),
                    gnb_address: get_ipv4(&mut buf),
                });
            }
            need(&buf, 1)?;
            let failed_count = buf.get_u8() as usize;
            let mut failed_items = Vec::with_capacity(failed_count);
            for _ in 0..failed_count {
                need(&buf, 2)?;
                failed_items.push(PduSessionFailedItem {
                    psi: buf.get_u8(),
                    cause: buf.get_u8(),
                });
            }
            Ok(NgapPdu::PduSessionResourceSetupResponse(
                PduSessionResourceSetupResponse {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    setup_items,
                    failed_items,
                },
            ))
        }
        TAG_PDU_SESSION_RELEASE_COMMAND => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let nas_pdu = get_opt_bytes(&mut buf)?;
            let psis = get_psis(&mut buf)?;
            Ok(NgapPdu::PduSessionResourceReleaseCommand(
                PduSessionResourceReleaseCommand {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    nas_pdu,
                    psis,
                },
            ))
        }
        TAG_PDU_SESSION_RELEASE_RESPONSE => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let psis = get_psis(&mut buf)?;
            Ok(NgapPdu::PduSessionResourceReleaseResponse(
                PduSessionResourceReleaseResponse {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    psis,
                },
            ))
        }
        TAG_UE_CONTEXT_RELEASE_REQUEST => {
            need(&buf, 16)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = buf.get_i64();
            let psis = get_psis(&mut buf)?;
            need(&buf, 1)?;
            Ok(NgapPdu::UeContextReleaseRequest(UeContextReleaseRequest {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
                psis,
                cause: buf.get_u8(),
            }))
        }
        TAG_UE_CONTEXT_RELEASE_COMMAND => {
            need(&buf, 9)?;
            let amf_ue_ngap_id = buf.get_i64();
            let ran_ue_ngap_id = if buf.get_u8() == 0x01 {
                need(&buf, 8)?;
                Some(buf.get_i64())
            } else {
                None
            };
            need(&buf, 1)?;
            Ok(NgapPdu::UeContextReleaseCommand(UeContextReleaseCommand {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
                cause: buf.get_u8(),
            }))
        }
        TAG_UE_CONTEXT_RELEASE_COMPLETE => {
            need(&buf, 16)?;
            Ok(NgapPdu::UeContextReleaseComplete(UeContextReleaseComplete {
                amf_ue_ngap_id: buf.get_i64(),
                ran_ue_ngap_id: buf.get_i64(),
            }))
        }
        other => Err(NgapCodecError::Decode(format!(
            "unknown procedure tag {other:#04x}"
        ))),
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), NgapCodecError> {
    if buf.remaining() < n {
        Err(NgapCodecError::Decode(format!(
            "truncated PDU: need {n} bytes, have {}",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), NgapCodecError> {
    let len = u8::try_from(s.len())
        .map_err(|_| NgapCodecError::Encode(format!("string too long: {} bytes", s.len())))?;
    buf.put_u8(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_string(buf: &mut Bytes) -> Result<String, NgapCodecError> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    String::from_utf8(buf.split_to(len).to_vec())
        .map_err(|_| NgapCodecError::Decode("string is not valid UTF-8".into()))
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) -> Result<(), NgapCodecError> {
    let len = u16::try_from(data.len())
        .map_err(|_| NgapCodecError::Encode(format!("payload too long: {} bytes", data.len())))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, NgapCodecError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn put_opt_bytes(buf: &mut BytesMut, data: Option<&[u8]>) -> Result<(), NgapCodecError> {
    match data {
        Some(data) => {
            buf.put_u8(0x01);
            put_bytes(buf, data)
        }
        None => {
            buf.put_u8(0x00);
            Ok(())
        }
    }
}

fn get_opt_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, NgapCodecError> {
    need(buf, 1)?;
    if buf.get_u8() == 0x01 {
        Ok(Some(get_bytes(buf)?))
    } else {
        Ok(None)
    }
}

fn put_psis(buf: &mut BytesMut, psis: &[u8]) {
    buf.put_u8(psis.len() as u8);
    buf.put_slice(psis);
}

fn get_psis(buf: &mut Bytes) -> Result<Vec<u8>, NgapCodecError> {
    need(buf, 1)?;
    let count = buf.get_u8() as usize;
    need(buf, count)?;
    Ok(buf.split_to(count).to_vec())
}

fn put_snssai(buf: &mut BytesMut, snssai: &Snssai) {
    buf.put_u8(snssai.sst);
    match snssai.sd {
        Some(sd) => {
            buf.put_u8(0x01);
            buf.put_slice(&sd.to_be_bytes()[1..]);
        }
        None => buf.put_u8(0x00),
    }
}

fn get_snssai(buf: &mut Bytes) -> Result<Snssai, NgapCodecError> {
    need(buf, 2)?;
    let sst = buf.get_u8();
    let sd = if buf.get_u8() == 0x01 {
        need(buf, 3)?;
        let mut sd = [0u8; 4];
        buf.copy_to_slice(&mut sd[1..]);
        Some(u32::from_be_bytes(sd))
    } else {
        None
    };
    Ok(Snssai { sst, sd })
}

fn get_plmn(buf: &mut Bytes) -> Result<Plmn, NgapCodecError> {
    need(buf, 3)?;
    let mut octets = [0u8; 3];
    buf.copy_to_slice(&mut octets);
    Ok(Plmn::decode(&octets))
}

fn get_ipv4(buf: &mut Bytes) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets);
    Ipv4Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pdu: NgapPdu) {
        let encoded = encode_ngap_pdu(&pdu).unwrap();
        let decoded = decode_ngap_pdu(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_ng_setup_roundtrip() {
        roundtrip(NgapPdu::NgSetupRequest(NgSetupRequest {
            gnb_id: 1,
            ran_node_name: "ransim-gnb1".into(),
            plmn: Plmn::new(208, 93),
            tac: 1,
            slices: vec![
                Snssai {
                    sst: 1,
                    sd: Some(0x010203),
                },
                Snssai { sst: 2, sd: None },
            ],
        }));
        roundtrip(NgapPdu::NgSetupResponse(NgSetupResponse {
            amf_name: "open5gs-amf".into(),
            relative_capacity: 255,
        }));
    }

    #[test]
    fn test_initial_ue_message_roundtrip() {
        roundtrip(NgapPdu::InitialUeMessage(InitialUeMessage {
            ran_ue_ngap_id: 42,
            nas_pdu: Bytes::from_static(&[0x7e, 0x00, 0x41, 0x01]),
            plmn: Plmn::new(208, 93),
            tac: 1,
            nci: 0x10,
            establishment_cause: 3,
        }));
    }

    #[test]
    fn test_pdu_session_setup_roundtrip() {
        roundtrip(NgapPdu::PduSessionResourceSetupRequest(
            PduSessionResourceSetupRequest {
                amf_ue_ngap_id: 7,
                ran_ue_ngap_id: 42,
                items: vec![PduSessionSetupItem {
                    psi: 5,
                    nas_pdu: Some(Bytes::from_static(&[0x2e, 0x05, 0x01, 0xc2])),
                    ul_teid: 0x1234,
                    upf_address: Ipv4Addr::new(10, 45, 0, 1),
                    qfi: 1,
                }],
            },
        ));
        roundtrip(NgapPdu::PduSessionResourceSetupResponse(
            PduSessionResourceSetupResponse {
                amf_ue_ngap_id: 7,
                ran_ue_ngap_id: 42,
                setup_items: vec![PduSessionSetupResponseItem {
                    psi: 5,
                    dl_teid: 0x99,
                    gnb_address: Ipv4Addr::new(192, 168, 1, 1),
                }],
                failed_items: vec![PduSessionFailedItem { psi: 6, cause: 30 }],
            },
        ));
    }

    #[test]
    fn test_ue_context_release_roundtrip() {
        roundtrip(NgapPdu::UeContextReleaseRequest(UeContextReleaseRequest {
            amf_ue_ngap_id: 7,
            ran_ue_ngap_id: 42,
            psis: vec![5, 6],
            cause: 20,
        }));
        roundtrip(NgapPdu::UeContextReleaseCommand(UeContextReleaseCommand {
            amf_ue_ngap_id: 7,
            ran_ue_ngap_id: None,
            cause: 20,
        }));
        roundtrip(NgapPdu::UeContextReleaseCommand(UeContextReleaseCommand {
            amf_ue_ngap_id: 7,
            ran_ue_ngap_id: Some(42),
            cause: 20,
        }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_ngap_pdu(&[]).is_err());
        assert!(decode_ngap_pdu(&[0xee, 0x01]).is_err());
        // Truncated uplink transport
        let encoded = encode_ngap_pdu(&NgapPdu::UplinkNasTransport(UplinkNasTransport {
            amf_ue_ngap_id: 1,
            ran_ue_ngap_id: 2,
            nas_pdu: Bytes::from_static(b"abcd"),
        }))
        .unwrap();
        assert!(decode_ngap_pdu(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn test_ran_ue_id_routing_accessor() {
        let pdu = NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
            amf_ue_ngap_id: 7,
            ran_ue_ngap_id: 42,
            nas_pdu: Bytes::new(),
        });
        assert_eq!(pdu.ran_ue_ngap_id(), Some(42));
        let setup = NgapPdu::NgSetupFailure(NgSetupFailure { cause: 1 });
        assert_eq!(setup.ran_ue_ngap_id(), None);
    }
}
