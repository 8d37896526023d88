//! 5GMM messages

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::need;
use crate::header::{Epd, MmMessageType, SecurityHeaderType};
use ransim_common::types::{Guti5G, Plmn, Snssai};
use ransim_common::Error;

/// Initial registration request, sent plain with the SUCI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// NAS key set identifier
    pub ngksi: u8,
    /// Concealed subscriber identity
    pub suci: Vec<u8>,
    /// UE security capability octets (EA, IA)
    pub security_capabilities: [u8; 2],
    /// Requested slice
    pub snssai: Snssai,
}

/// Registration accept; the GUTI is the part the simulator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationAccept {
    /// Assigned temporary identity
    pub guti: Option<Guti5G>,
}

/// Authentication request carrying the 5G AKA challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// NAS key set identifier for the new context
    pub ngksi: u8,
    /// ABBA parameter
    pub abba: Vec<u8>,
    /// Challenge RAND
    pub rand: [u8; 16],
    /// Authentication token (SQN⊕AK || AMF || MAC)
    pub autn: [u8; 16],
}

/// Authentication response with the derived RES*.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// RES* value
    pub res_star: [u8; 16],
}

/// Security mode command selecting the NAS algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityModeCommand {
    /// NAS key set identifier
    pub ngksi: u8,
    /// Selected ciphering algorithm id (NEA)
    pub ciphering_alg: u8,
    /// Selected integrity algorithm id (NIA)
    pub integrity_alg: u8,
    /// Replayed UE security capabilities
    pub replayed_capabilities: [u8; 2],
}

/// Service request identifying the UE by S-TMSI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// NAS key set identifier
    pub ngksi: u8,
    /// Service type (data, signalling, ...)
    pub service_type: u8,
    /// AMF set id from the GUTI
    pub amf_set_id: u16,
    /// AMF pointer from the GUTI
    pub amf_pointer: u8,
    /// 5G-TMSI
    pub tmsi: u32,
}

/// UE-originating deregistration request, identified by GUTI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeregistrationRequest {
    /// Switch-off flag (no accept expected when set)
    pub switch_off: bool,
    /// NAS key set identifier
    pub ngksi: u8,
    /// Current temporary identity
    pub guti: Guti5G,
}

/// Downlink NAS transport carrying an SM payload container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlNasTransport {
    /// Encoded 5GSM message
    pub payload: Bytes,
}

/// Uplink NAS transport carrying an SM payload container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlNasTransport {
    /// Encoded 5GSM message
    pub payload: Bytes,
    /// PDU session id the payload belongs to
    pub psi: u8,
    /// Request type (initial, existing session)
    pub request_type: u8,
    /// Data network name
    pub dnn: String,
    /// Requested slice
    pub snssai: Snssai,
}

/// A decoded plain 5GMM message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmMessage {
    /// Registration request
    RegistrationRequest(RegistrationRequest),
    /// Registration accept
    RegistrationAccept(RegistrationAccept),
    /// Registration complete
    RegistrationComplete,
    /// UE-originating deregistration request
    DeregistrationRequest(DeregistrationRequest),
    /// Network accepts a UE-originating deregistration
    DeregistrationAccept,
    /// Network-initiated deregistration request
    DeregistrationRequestUeTerm {
        /// Whether the network asks for re-registration
        reregistration_required: bool,
    },
    /// UE accepts a network-initiated deregistration
    DeregistrationAcceptUeTerm,
    /// Service request
    ServiceRequest(ServiceRequest),
    /// Service accept
    ServiceAccept,
    /// Authentication request
    AuthenticationRequest(AuthenticationRequest),
    /// Authentication response
    AuthenticationResponse(AuthenticationResponse),
    /// Security mode command
    SecurityModeCommand(SecurityModeCommand),
    /// Security mode complete
    SecurityModeComplete,
    /// Downlink NAS transport
    DlNasTransport(DlNasTransport),
    /// Uplink NAS transport
    UlNasTransport(UlNasTransport),
}

impl MmMessage {
    /// The message type octet of this message.
    pub fn message_type(&self) -> MmMessageType {
        match self {
            MmMessage::RegistrationRequest(_) => MmMessageType::RegistrationRequest,
            MmMessage::RegistrationAccept(_) => MmMessageType::RegistrationAccept,
            MmMessage::RegistrationComplete => MmMessageType::RegistrationComplete,
            MmMessage::DeregistrationRequest(_) => MmMessageType::DeregistrationRequestUeOrig,
            MmMessage::DeregistrationAccept => MmMessageType::DeregistrationAcceptUeOrig,
            MmMessage::DeregistrationRequestUeTerm { .. } => {
                MmMessageType::DeregistrationRequestUeTerm
            }
            MmMessage::DeregistrationAcceptUeTerm => MmMessageType::DeregistrationAcceptUeTerm,
            MmMessage::ServiceRequest(_) => MmMessageType::ServiceRequest,
            MmMessage::ServiceAccept => MmMessageType::ServiceAccept,
            MmMessage::AuthenticationRequest(_) => MmMessageType::AuthenticationRequest,
            MmMessage::AuthenticationResponse(_) => MmMessageType::AuthenticationResponse,
            MmMessage::SecurityModeCommand(_) => MmMessageType::SecurityModeCommand,
            MmMessage::SecurityModeComplete => MmMessageType::SecurityModeComplete,
            MmMessage::DlNasTransport(_) => MmMessageType::DlNasTransport,
            MmMessage::UlNasTransport(_) => MmMessageType::UlNasTransport,
        }
    }

    /// Encodes the message with its plain MM header.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(Epd::MobilityManagement as u8);
        buf.put_u8(SecurityHeaderType::Plain as u8);
        buf.put_u8(self.message_type() as u8);
        self.encode_body(&mut buf);
        buf.freeze()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            MmMessage::RegistrationRequest(msg) => {
                buf.put_u8(0x01); // initial registration
                buf.put_u8(msg.ngksi);
                buf.put_u8(msg.suci.len() as u8);
                buf.put_slice(&msg.suci);
                buf.put_slice(&msg.security_capabilities);
                encode_snssai(buf, &msg.snssai);
            }
            MmMessage::RegistrationAccept(msg) => match &msg.guti {
                Some(guti) => {
                    buf.put_u8(0x01);
                    encode_guti(buf, guti);
                }
                None => buf.put_u8(0x00),
            },
            MmMessage::DeregistrationRequest(msg) => {
                // access type 3GPP in the low bits, switch-off in bit 3
                buf.put_u8(0x01 | u8::from(msg.switch_off) << 3);
                buf.put_u8(msg.ngksi);
                encode_guti(buf, &msg.guti);
            }
            MmMessage::DeregistrationRequestUeTerm {
                reregistration_required,
            } => {
                buf.put_u8(0x01 | u8::from(*reregistration_required) << 2);
            }
            MmMessage::ServiceRequest(msg) => {
                buf.put_u8(msg.ngksi);
                buf.put_u8(msg.service_type);
                buf.put_u16(msg.amf_set_id);
                buf.put_u8(msg.amf_pointer);
                buf.put_u32(msg.tmsi);
            }
            MmMessage::AuthenticationRequest(msg) => {
                buf.put_u8(msg.ngksi);
                buf.put_u8(msg.abba.len() as u8);
                buf.put_slice(&msg.abba);
                buf.put_slice(&msg.rand);
                buf.put_slice(&msg.autn);
            }
            MmMessage::AuthenticationResponse(msg) => {
                buf.put_u8(msg.res_star.len() as u8);
                buf.put_slice(&msg.res_star);
            }
            MmMessage::SecurityModeCommand(msg) => {
                buf.put_u8(msg.ciphering_alg << 4 | msg.integrity_alg & 0x0f);
                buf.put_u8(msg.ngksi);
                buf.put_slice(&msg.replayed_capabilities);
            }
            MmMessage::DlNasTransport(msg) => {
                buf.put_u8(0x01); // payload container type: N1 SM information
                buf.put_u16(msg.payload.len() as u16);
                buf.put_slice(&msg.payload);
            }
            MmMessage::UlNasTransport(msg) => {
                buf.put_u8(0x01);
                buf.put_u16(msg.payload.len() as u16);
                buf.put_slice(&msg.payload);
                buf.put_u8(msg.psi);
                buf.put_u8(msg.request_type);
                buf.put_u8(msg.dnn.len() as u8);
                buf.put_slice(msg.dnn.as_bytes());
                encode_snssai(buf, &msg.snssai);
            }
            MmMessage::RegistrationComplete
            | MmMessage::DeregistrationAccept
            | MmMessage::DeregistrationAcceptUeTerm
            | MmMessage::ServiceAccept
            | MmMessage::SecurityModeComplete => {}
        }
    }

    /// Decodes an MM message after the EPD octet has been consumed.
    pub(super) fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        need(buf, 2)?;
        let sht = buf.get_u8();
        if !matches!(
            SecurityHeaderType::try_from(sht),
            Ok(SecurityHeaderType::Plain)
        ) {
            return Err(Error::Decode(format!(
                "expected plain MM message, got security header {sht:#04x}"
            )));
        }
        let mt = buf.get_u8();
        let mt = MmMessageType::try_from(mt)
            .map_err(|_| Error::Decode(format!("unknown MM message type {mt:#04x}")))?;
        Self::decode_body(mt, buf)
    }

    fn decode_body(mt: MmMessageType, buf: &mut Bytes) -> Result<Self, Error> {
        match mt {
            MmMessageType::RegistrationRequest => {
                need(buf, 3)?;
                let _reg_type = buf.get_u8();
                let ngksi = buf.get_u8();
                let suci_len = buf.get_u8() as usize;
                need(buf, suci_len + 2)?;
                let suci = buf.split_to(suci_len).to_vec();
                let mut caps = [0u8; 2];
                buf.copy_to_slice(&mut caps);
                let snssai = decode_snssai(buf)?;
                Ok(MmMessage::RegistrationRequest(RegistrationRequest {
                    ngksi,
                    suci,
                    security_capabilities: caps,
                    snssai,
                }))
            }
            MmMessageType::RegistrationAccept => {
                need(buf, 1)?;
                let guti = if buf.get_u8() == 0x01 {
                    Some(decode_guti(buf)?)
                } else {
                    None
                };
                Ok(MmMessage::RegistrationAccept(RegistrationAccept { guti }))
            }
            MmMessageType::RegistrationComplete => Ok(MmMessage::RegistrationComplete),
            MmMessageType::DeregistrationRequestUeOrig => {
                need(buf, 2)?;
                let dereg_type = buf.get_u8();
                let ngksi = buf.get_u8();
                let guti = decode_guti(buf)?;
                Ok(MmMessage::DeregistrationRequest(DeregistrationRequest {
                    switch_off: dereg_type & 0x08 != 0,
                    ngksi,
                    guti,
                }))
            }
            MmMessageType::DeregistrationAcceptUeOrig => Ok(MmMessage::DeregistrationAccept),
            MmMessageType::DeregistrationRequestUeTerm => {
                need(buf, 1)?;
                let dereg_type = buf.get_u8();
                Ok(MmMessage::DeregistrationRequestUeTerm {
                    reregistration_required: dereg_type & 0x04 != 0,
                })
            }
            MmMessageType::DeregistrationAcceptUeTerm => Ok(MmMessage::DeregistrationAcceptUeTerm),
            MmMessageType::ServiceRequest => {
                need(buf, 9)?;
                Ok(MmMessage::ServiceRequest(ServiceRequest {
                    ngksi: buf.get_u8(),
                    service_type: buf.get_u8(),
                    amf_set_id: buf.get_u16(),
                    amf_pointer: buf.get_u8(),
                    tmsi: buf.get_u32(),
                }))
            }
            MmMessageType::ServiceAccept => Ok(MmMessage::ServiceAccept),
            MmMessageType::AuthenticationRequest => {
                need(buf, 2)?;
                let ngksi = buf.get_u8();
                let abba_len = buf.get_u8() as usize;
                need(buf, abba_len + 32)?;
                let abba = buf.split_to(abba_len).to_vec();
                let mut rand = [0u8; 16];
                buf.copy_to_slice(&mut rand);
                let mut autn = [0u8; 16];
                buf.copy_to_slice(&mut autn);
                Ok(MmMessage::AuthenticationRequest(AuthenticationRequest {
                    ngksi,
                    abba,
                    rand,
                    autn,
                }))
            }
            MmMessageType::AuthenticationResponse => {
                need(buf, 1)?;
                let len = buf.get_u8() as usize;
                if len != 16 {
                    return Err(Error::Decode(format!("unexpected RES* length {len}")));
                }
                need(buf, 16)?;
                let mut res_star = [0u8; 16];
                buf.copy_to_slice(&mut res_star);
                Ok(MmMessage::AuthenticationResponse(AuthenticationResponse {
                    res_star,
                }))
            }
            MmMessageType::SecurityModeCommand => {
                need(buf, 4)?;
                let algs = buf.get_u8();
                let ngksi = buf.get_u8();
                let mut caps = [0u8; 2];
                buf.copy_to_slice(&mut caps);
                Ok(MmMessage::SecurityModeCommand(SecurityModeCommand {
                    ngksi,
                    ciphering_alg: algs >> 4,
                    integrity_alg: algs & 0x0f,
                    replayed_capabilities: caps,
                }))
            }
            MmMessageType::SecurityModeComplete => Ok(MmMessage::SecurityModeComplete),
            MmMessageType::DlNasTransport => {
                need(buf, 3)?;
                let _container_type = buf.get_u8();
                let len = buf.get_u16() as usize;
                need(buf, len)?;
                let payload = buf.split_to(len);
                Ok(MmMessage::DlNasTransport(DlNasTransport { payload }))
            }
            MmMessageType::UlNasTransport => {
                need(buf, 3)?;
                let _container_type = buf.get_u8();
                let len = buf.get_u16() as usize;
                need(buf, len)?;
                let payload = buf.split_to(len);
                need(buf, 3)?;
                let psi = buf.get_u8();
                let request_type = buf.get_u8();
                let dnn_len = buf.get_u8() as usize;
                need(buf, dnn_len)?;
                let dnn = String::from_utf8(buf.split_to(dnn_len).to_vec())
                    .map_err(|_| Error::Decode("DNN is not valid UTF-8".into()))?;
                let snssai = decode_snssai(buf)?;
                Ok(MmMessage::UlNasTransport(UlNasTransport {
                    payload,
                    psi,
                    request_type,
                    dnn,
                    snssai,
                }))
            }
        }
    }
}

fn encode_guti(buf: &mut BytesMut, guti: &Guti5G) {
    buf.put_slice(&guti.plmn.encode());
    buf.put_u8(guti.amf_region_id);
    buf.put_u16(guti.amf_set_id);
    buf.put_u8(guti.amf_pointer);
    buf.put_u32(guti.tmsi);
}

fn decode_guti(buf: &mut Bytes) -> Result<Guti5G, Error> {
    need(buf, 11)?;
    let mut plmn = [0u8; 3];
    buf.copy_to_slice(&mut plmn);
    Ok(Guti5G {
        plmn: Plmn::decode(&plmn),
        amf_region_id: buf.get_u8(),
        amf_set_id: buf.get_u16(),
        amf_pointer: buf.get_u8(),
        tmsi: buf.get_u32(),
    })
}

pub(super) fn encode_snssai(buf: &mut BytesMut, snssai: &Snssai) {
    match snssai.sd {
        Some(sd) => {
            buf.put_u8(4);
            buf.put_u8(snssai.sst);
            buf.put_slice(&sd.to_be_bytes()[1..]);
        }
        None => {
            buf.put_u8(1);
            buf.put_u8(snssai.sst);
        }
    }
}

pub(super) fn decode_snssai(buf: &mut Bytes) -> Result<Snssai, Error> {
    need(buf, 2)?;
    let len = buf.get_u8();
    let sst = buf.get_u8();
    let sd = match len {
        1 => None,
        4 => {
            need(buf, 3)?;
            let mut sd = [0u8; 4];
            buf.copy_to_slice(&mut sd[1..]);
            Some(u32::from_be_bytes(sd))
        }
        other => return Err(Error::Decode(format!("invalid S-NSSAI length {other}"))),
    };
    Ok(Snssai { sst, sd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode_plain, NasMessage};

    fn roundtrip(msg: MmMessage) -> MmMessage {
        let encoded = msg.encode();
        match decode_plain(&encoded).unwrap() {
            NasMessage::Mm(decoded) => decoded,
            other => panic!("expected MM message, got {other:?}"),
        }
    }

    #[test]
    fn test_registration_request_roundtrip() {
        let msg = MmMessage::RegistrationRequest(RegistrationRequest {
            ngksi: 0,
            suci: vec![0x01, 0x02, 0x03, 0x04],
            security_capabilities: [0xa0, 0x20],
            snssai: Snssai {
                sst: 1,
                sd: Some(0x010203),
            },
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_registration_accept_with_guti() {
        let guti = Guti5G {
            plmn: Plmn::new(208, 93),
            amf_region_id: 1,
            amf_set_id: 1,
            amf_pointer: 0,
            tmsi: 0x0000_1234,
        };
        let msg = MmMessage::RegistrationAccept(RegistrationAccept { guti: Some(guti) });
        match roundtrip(msg) {
            MmMessage::RegistrationAccept(acc) => assert_eq!(acc.guti, Some(guti)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_deregistration_request_switch_off_flag() {
        let guti = Guti5G {
            plmn: Plmn::new(208, 93),
            amf_region_id: 1,
            amf_set_id: 1,
            amf_pointer: 0,
            tmsi: 7,
        };
        for switch_off in [false, true] {
            let msg = MmMessage::DeregistrationRequest(DeregistrationRequest {
                switch_off,
                ngksi: 2,
                guti,
            });
            match roundtrip(msg) {
                MmMessage::DeregistrationRequest(req) => {
                    assert_eq!(req.switch_off, switch_off);
                    assert_eq!(req.ngksi, 2);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_ul_nas_transport_carries_sm_payload() {
        let payload = Bytes::from_static(&[0x2e, 0x05, 0x01, 0xc1, 0x01]);
        let msg = MmMessage::UlNasTransport(UlNasTransport {
            payload: payload.clone(),
            psi: 5,
            request_type: 1,
            dnn: "internet".into(),
            snssai: Snssai::default(),
        });
        match roundtrip(msg) {
            MmMessage::UlNasTransport(ul) => {
                assert_eq!(ul.payload, payload);
                assert_eq!(ul.psi, 5);
                assert_eq!(ul.dnn, "internet");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let msg = MmMessage::AuthenticationRequest(AuthenticationRequest {
            ngksi: 0,
            abba: vec![0x00, 0x00],
            rand: [1u8; 16],
            autn: [2u8; 16],
        });
        let encoded = msg.encode();
        assert!(decode_plain(&encoded[..encoded.len() - 4]).is_err());
    }
}
