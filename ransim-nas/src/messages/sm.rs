//! 5GSM messages
//!
//! Session management messages are exchanged inside MM transport containers;
//! their header carries the PDU session id and procedure transaction id.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

use super::need;
use crate::header::{Epd, SmMessageType};
use ransim_common::types::PduSessionType;
use ransim_common::Error;

/// A decoded plain 5GSM message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmMessage {
    /// PDU session establishment request
    EstablishmentRequest {
        /// Requested session id
        psi: u8,
        /// Procedure transaction id
        pti: u8,
        /// Requested session type
        session_type: PduSessionType,
    },
    /// PDU session establishment accept
    EstablishmentAccept {
        /// Network-assigned session id
        psi: u8,
        /// Procedure transaction id
        pti: u8,
        /// Selected session type
        session_type: PduSessionType,
        /// Selected SSC mode
        ssc_mode: u8,
        /// Allocated IPv4 address
        address: Option<Ipv4Addr>,
    },
    /// PDU session establishment reject
    EstablishmentReject {
        /// Rejected session id
        psi: u8,
        /// Procedure transaction id
        pti: u8,
        /// 5GSM cause
        cause: u8,
    },
    /// PDU session release request
    ReleaseRequest {
        /// Session to release
        psi: u8,
        /// Procedure transaction id
        pti: u8,
    },
    /// PDU session release command
    ReleaseCommand {
        /// Session being released
        psi: u8,
        /// Procedure transaction id
        pti: u8,
        /// 5GSM cause
        cause: u8,
    },
    /// PDU session release complete
    ReleaseComplete {
        /// Released session
        psi: u8,
        /// Procedure transaction id
        pti: u8,
    },
}

impl SmMessage {
    /// The session id carried in the SM header.
    pub fn psi(&self) -> u8 {
        match self {
            SmMessage::EstablishmentRequest { psi, .. }
            | SmMessage::EstablishmentAccept { psi, .. }
            | SmMessage::EstablishmentReject { psi, .. }
            | SmMessage::ReleaseRequest { psi, .. }
            | SmMessage::ReleaseCommand { psi, .. }
            | SmMessage::ReleaseComplete { psi, .. } => *psi,
        }
    }

    fn pti(&self) -> u8 {
        match self {
            SmMessage::EstablishmentRequest { pti, .. }
            | SmMessage::EstablishmentAccept { pti, .. }
            | SmMessage::EstablishmentReject { pti, .. }
            | SmMessage::ReleaseRequest { pti, .. }
            | SmMessage::ReleaseCommand { pti, .. }
            | SmMessage::ReleaseComplete { pti, .. } => *pti,
        }
    }

    /// The message type octet of this message.
    pub fn message_type(&self) -> SmMessageType {
        match self {
            SmMessage::EstablishmentRequest { .. } => SmMessageType::PduSessionEstablishmentRequest,
            SmMessage::EstablishmentAccept { .. } => SmMessageType::PduSessionEstablishmentAccept,
            SmMessage::EstablishmentReject { .. } => SmMessageType::PduSessionEstablishmentReject,
            SmMessage::ReleaseRequest { .. } => SmMessageType::PduSessionReleaseRequest,
            SmMessage::ReleaseCommand { .. } => SmMessageType::PduSessionReleaseCommand,
            SmMessage::ReleaseComplete { .. } => SmMessageType::PduSessionReleaseComplete,
        }
    }

    /// Encodes the message with its SM header.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(Epd::SessionManagement as u8);
        buf.put_u8(self.psi());
        buf.put_u8(self.pti());
        buf.put_u8(self.message_type() as u8);
        match self {
            SmMessage::EstablishmentRequest { session_type, .. } => {
                buf.put_u8(session_type.value());
            }
            SmMessage::EstablishmentAccept {
                session_type,
                ssc_mode,
                address,
                ..
            } => {
                buf.put_u8(session_type.value());
                buf.put_u8(*ssc_mode);
                match address {
                    Some(addr) => {
                        buf.put_u8(0x01);
                        buf.put_slice(&addr.octets());
                    }
                    None => buf.put_u8(0x00),
                }
            }
            SmMessage::EstablishmentReject { cause, .. }
            | SmMessage::ReleaseCommand { cause, .. } => {
                buf.put_u8(*cause);
            }
            SmMessage::ReleaseRequest { .. } | SmMessage::ReleaseComplete { .. } => {}
        }
        buf.freeze()
    }

    /// Decodes an SM message after the EPD octet has been consumed.
    pub(super) fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        need(buf, 3)?;
        let psi = buf.get_u8();
        let pti = buf.get_u8();
        let mt = buf.get_u8();
        let mt = SmMessageType::try_from(mt)
            .map_err(|_| Error::Decode(format!("unknown SM message type {mt:#04x}")))?;
        match mt {
            SmMessageType::PduSessionEstablishmentRequest => {
                need(buf, 1)?;
                let st = buf.get_u8();
                let session_type = PduSessionType::from_value(st)
                    .ok_or_else(|| Error::Decode(format!("invalid PDU session type {st}")))?;
                Ok(SmMessage::EstablishmentRequest {
                    psi,
                    pti,
                    session_type,
                })
            }
            SmMessageType::PduSessionEstablishmentAccept => {
                need(buf, 3)?;
                let st = buf.get_u8();
                let session_type = PduSessionType::from_value(st)
                    .ok_or_else(|| Error::Decode(format!("invalid PDU session type {st}")))?;
                let ssc_mode = buf.get_u8();
                let address = if buf.get_u8() == 0x01 {
                    need(buf, 4)?;
                    let mut octets = [0u8; 4];
                    buf.copy_to_slice(&mut octets);
                    Some(Ipv4Addr::from(octets))
                } else {
                    None
                };
                Ok(SmMessage::EstablishmentAccept {
                    psi,
                    pti,
                    session_type,
                    ssc_mode,
                    address,
                })
            }
            SmMessageType::PduSessionEstablishmentReject => {
                need(buf, 1)?;
                Ok(SmMessage::EstablishmentReject {
                    psi,
                    pti,
                    cause: buf.get_u8(),
                })
            }
            SmMessageType::PduSessionReleaseRequest => Ok(SmMessage::ReleaseRequest { psi, pti }),
            SmMessageType::PduSessionReleaseCommand => {
                need(buf, 1)?;
                Ok(SmMessage::ReleaseCommand {
                    psi,
                    pti,
                    cause: buf.get_u8(),
                })
            }
            SmMessageType::PduSessionReleaseComplete => Ok(SmMessage::ReleaseComplete { psi, pti }),
        }
    }
}
