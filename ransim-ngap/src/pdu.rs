//! NGAP PDU structures
//!
//! One struct per procedure message the simulator builds or interprets.
//! Identifier widths follow TS 38.413 (NGAP ids are 0..2^32-1, carried as
//! i64 like the rest of the codebase).

use bytes::Bytes;
use std::net::Ipv4Addr;

use ransim_common::types::{Plmn, Snssai};

/// NG Setup Request, sent once per gNB at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgSetupRequest {
    /// Global gNB id (22 bits used)
    pub gnb_id: u32,
    /// Human-readable RAN node name
    pub ran_node_name: String,
    /// Served PLMN
    pub plmn: Plmn,
    /// Supported tracking area code
    pub tac: u32,
    /// Slices supported in the TA
    pub slices: Vec<Snssai>,
}

/// NG Setup Response from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgSetupResponse {
    /// AMF name
    pub amf_name: String,
    /// Relative AMF capacity
    pub relative_capacity: u8,
}

/// NG Setup Failure from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgSetupFailure {
    /// Cause value
    pub cause: u8,
}

/// Initial UE Message carrying the first uplink NAS PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialUeMessage {
    /// RAN UE NGAP id allocated by the gNB
    pub ran_ue_ngap_id: i64,
    /// NAS PDU
    pub nas_pdu: Bytes,
    /// User location: PLMN
    pub plmn: Plmn,
    /// User location: TAC
    pub tac: u32,
    /// User location: NR cell identity
    pub nci: u64,
    /// RRC establishment cause
    pub establishment_cause: u8,
}

/// Uplink NAS Transport for subsequent NAS messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkNasTransport {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// NAS PDU
    pub nas_pdu: Bytes,
}

/// Downlink NAS Transport from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkNasTransport {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// NAS PDU
    pub nas_pdu: Bytes,
}

/// Initial Context Setup Request from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupRequest {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// Piggybacked NAS PDU (typically the registration accept)
    pub nas_pdu: Option<Bytes>,
}

/// Initial Context Setup Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupResponse {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
}

/// One session in a PDU Session Resource Setup Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionSetupItem {
    /// PDU session id
    pub psi: u8,
    /// Piggybacked NAS PDU (typically the establishment accept)
    pub nas_pdu: Option<Bytes>,
    /// Uplink GTP TEID at the UPF
    pub ul_teid: u32,
    /// UPF transport address
    pub upf_address: Ipv4Addr,
    /// QoS flow identifier
    pub qfi: u8,
}

/// PDU Session Resource Setup Request from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupRequest {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// Sessions to set up
    pub items: Vec<PduSessionSetupItem>,
}

/// One successfully set up session in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduSessionSetupResponseItem {
    /// PDU session id
    pub psi: u8,
    /// Downlink GTP TEID allocated by the gNB
    pub dl_teid: u32,
    /// gNB user-plane transport address
    pub gnb_address: Ipv4Addr,
}

/// One failed session in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduSessionFailedItem {
    /// PDU session id
    pub psi: u8,
    /// Cause value
    pub cause: u8,
}

/// PDU Session Resource Setup Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupResponse {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// Sessions set up successfully
    pub setup_items: Vec<PduSessionSetupResponseItem>,
    /// Sessions that failed to set up
    pub failed_items: Vec<PduSessionFailedItem>,
}

/// PDU Session Resource Release Command from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceReleaseCommand {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// Piggybacked NAS PDU (typically the release command)
    pub nas_pdu: Option<Bytes>,
    /// Sessions to release
    pub psis: Vec<u8>,
}

/// PDU Session Resource Release Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceReleaseResponse {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// Released sessions
    pub psis: Vec<u8>,
}

/// UE Context Release Request, gNB-initiated (AN release).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseRequest {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
    /// PDU sessions still associated with the UE
    pub psis: Vec<u8>,
    /// Cause value (user inactivity)
    pub cause: u8,
}

/// UE Context Release Command from the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseCommand {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id, absent when the AMF identifies the UE by its id alone
    pub ran_ue_ngap_id: Option<i64>,
    /// Cause value
    pub cause: u8,
}

/// UE Context Release Complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseComplete {
    /// AMF UE NGAP id
    pub amf_ue_ngap_id: i64,
    /// RAN UE NGAP id
    pub ran_ue_ngap_id: i64,
}

/// Any NGAP PDU the simulator exchanges with the AMF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NgapPdu {
    /// NG Setup Request
    NgSetupRequest(NgSetupRequest),
    /// NG Setup Response
    NgSetupResponse(NgSetupResponse),
    /// NG Setup Failure
    NgSetupFailure(NgSetupFailure),
    /// Initial UE Message
    InitialUeMessage(InitialUeMessage),
    /// Uplink NAS Transport
    UplinkNasTransport(UplinkNasTransport),
    /// Downlink NAS Transport
    DownlinkNasTransport(DownlinkNasTransport),
    /// Initial Context Setup Request
    InitialContextSetupRequest(InitialContextSetupRequest),
    /// Initial Context Setup Response
    InitialContextSetupResponse(InitialContextSetupResponse),
    /// PDU Session Resource Setup Request
    PduSessionResourceSetupRequest(PduSessionResourceSetupRequest),
    /// PDU Session Resource Setup Response
    PduSessionResourceSetupResponse(PduSessionResourceSetupResponse),
    /// PDU Session Resource Release Command
    PduSessionResourceReleaseCommand(PduSessionResourceReleaseCommand),
    /// PDU Session Resource Release Response
    PduSessionResourceReleaseResponse(PduSessionResourceReleaseResponse),
    /// UE Context Release Request
    UeContextReleaseRequest(UeContextReleaseRequest),
    /// UE Context Release Command
    UeContextReleaseCommand(UeContextReleaseCommand),
    /// UE Context Release Complete
    UeContextReleaseComplete(UeContextReleaseComplete),
}

impl NgapPdu {
    /// The RAN UE NGAP id this PDU addresses, if it is UE-associated.
    ///
    /// Used by the receive dispatcher to route downlink PDUs to the owning
    /// GnbCpUe actor.
    pub fn ran_ue_ngap_id(&self) -> Option<i64> {
        match self {
            NgapPdu::DownlinkNasTransport(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::InitialContextSetupRequest(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::PduSessionResourceSetupRequest(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::PduSessionResourceReleaseCommand(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::UeContextReleaseCommand(pdu) => pdu.ran_ue_ngap_id,
            NgapPdu::InitialUeMessage(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::UplinkNasTransport(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::InitialContextSetupResponse(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::PduSessionResourceSetupResponse(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::PduSessionResourceReleaseResponse(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::UeContextReleaseRequest(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::UeContextReleaseComplete(pdu) => Some(pdu.ran_ue_ngap_id),
            NgapPdu::NgSetupRequest(_) | NgapPdu::NgSetupResponse(_) | NgapPdu::NgSetupFailure(_) => {
                None
            }
        }
    }

    /// Short procedure name for logging.
    pub fn procedure_name(&self) -> &'static str {
        match self {
            NgapPdu::NgSetupRequest(_) => "NGSetupRequest",
            NgapPdu::NgSetupResponse(_) => "NGSetupResponse",
            NgapPdu::NgSetupFailure(_) => "NGSetupFailure",
            NgapPdu::InitialUeMessage(_) => "InitialUEMessage",
            NgapPdu::UplinkNasTransport(_) => "UplinkNASTransport",
            NgapPdu::DownlinkNasTransport(_) => "DownlinkNASTransport",
            NgapPdu::InitialContextSetupRequest(_) => "InitialContextSetupRequest",
            NgapPdu::InitialContextSetupResponse(_) => "InitialContextSetupResponse",
            NgapPdu::PduSessionResourceSetupRequest(_) => "PDUSessionResourceSetupRequest",
            NgapPdu::PduSessionResourceSetupResponse(_) => "PDUSessionResourceSetupResponse",
            NgapPdu::PduSessionResourceReleaseCommand(_) => "PDUSessionResourceReleaseCommand",
            NgapPdu::PduSessionResourceReleaseResponse(_) => "PDUSessionResourceReleaseResponse",
            NgapPdu::UeContextReleaseRequest(_) => "UEContextReleaseRequest",
            NgapPdu::UeContextReleaseCommand(_) => "UEContextReleaseCommand",
            NgapPdu::UeContextReleaseComplete(_) => "UEContextReleaseComplete",
        }
    }
}
