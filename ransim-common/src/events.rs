//! Typed events exchanged between the per-UE actors
//!
//! One mailbox per actor carries heterogeneous message kinds, so every
//! mailbox payload is a proper sum type carrying its parameters. The SimUe
//! coordinator owns a single inbound mailbox fed by the scenario driver, its
//! RealUe and its GnbCpUe; the RealUe mailbox is fed by SimUe and by its own
//! PDU session workers.

use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;

use crate::types::{Guti5G, PduSessionType};

/// High-level procedures the scenario driver can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcedureType {
    /// Initial registration (authentication + security mode + context setup)
    Registration,
    /// UE-initiated PDU session establishment
    PduSessionEstablishment,
    /// Uplink user-data generation over all active sessions
    UserDataTransfer,
    /// UE-initiated PDU session release
    PduSessionRelease,
    /// UE-initiated deregistration
    Deregistration,
    /// AN release (UE context release requested by the RAN)
    AnRelease,
    /// Service request from idle
    ServiceRequest,
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureType::Registration => write!(f, "Registration"),
            ProcedureType::PduSessionEstablishment => write!(f, "PDU Session Establishment"),
            ProcedureType::UserDataTransfer => write!(f, "User Data Transfer"),
            ProcedureType::PduSessionRelease => write!(f, "PDU Session Release"),
            ProcedureType::Deregistration => write!(f, "Deregistration"),
            ProcedureType::AnRelease => write!(f, "AN Release"),
            ProcedureType::ServiceRequest => write!(f, "Service Request"),
        }
    }
}

/// NAS messages the RealUe can be asked to build and protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NasBuildKind {
    /// Initial registration request (plain, carries SUCI)
    RegistrationRequest,
    /// Authentication response to a pending challenge
    AuthenticationResponse,
    /// Security mode complete (new-context secured header)
    SecurityModeComplete,
    /// Registration complete
    RegistrationComplete,
    /// Service request from idle (integrity only)
    ServiceRequest,
    /// UE-initiated deregistration request (requires a GUTI)
    DeregistrationRequest,
    /// Accept for a network-initiated deregistration
    DeregistrationAccept,
    /// PDU session establishment request (UL NAS transport)
    PduSessionEstablishmentRequest,
    /// PDU session release request for an established session
    PduSessionReleaseRequest {
        /// Session to release
        psi: u8,
    },
    /// PDU session release complete answering a release command
    PduSessionReleaseComplete {
        /// Session being released
        psi: u8,
    },
}

/// Outcome of decoding a downlink NAS message, surfaced by RealUe to SimUe.
#[derive(Debug, Clone)]
pub enum NasOutcome {
    /// Authentication request received and verified; a response can be built
    AuthenticationRequested,
    /// Security mode command received; NAS keys are active
    SecurityModeCommanded,
    /// Registration accept processed; GUTI stored if present
    RegistrationAccepted {
        /// GUTI assigned by the network
        guti: Option<Guti5G>,
    },
    /// Service accept received
    ServiceAccepted,
    /// Network accepted a UE-initiated deregistration
    DeregistrationAccepted,
    /// Network requested deregistration of this UE
    DeregistrationRequested,
    /// PDU session establishment accept processed and session actor created
    PduSessionEstablished {
        /// Network-assigned session id
        psi: u8,
        /// Negotiated session type
        session_type: PduSessionType,
        /// Allocated address, if IPv4
        address: Option<Ipv4Addr>,
    },
    /// Network rejected the PDU session establishment
    PduSessionRejected {
        /// Rejected session id
        psi: u8,
        /// 5GSM cause value
        cause: u8,
    },
    /// PDU session release command received; release complete can be built
    PduSessionReleaseCommanded {
        /// Session being released
        psi: u8,
    },
}

/// One PDU session item within a data-bearer setup exchange.
///
/// The gNB seeds the item (and its uplink sender); the UE side fills in the
/// session's downlink sender, or flips `success` off if the session is
/// unknown. Items already failed on the gNB side travel through unchanged so
/// the NGAP response can list them as failed-to-setup.
#[derive(Debug, Clone)]
pub struct DataBearerItem {
    /// PDU session id
    pub psi: u8,
    /// Whether this item is still viable
    pub success: bool,
    /// Sender for uplink user data, session worker → GnbUpUe
    pub ul_tx: Option<mpsc::Sender<Bytes>>,
    /// Sender for downlink user data, GnbUpUe → session worker
    pub dl_tx: Option<mpsc::Sender<Bytes>>,
}

impl DataBearerItem {
    /// Creates a fresh, viable item for a session id.
    pub fn new(psi: u8) -> Self {
        Self {
            psi,
            success: true,
            ul_tx: None,
            dl_tx: None,
        }
    }

    /// Marks the item as failed, dropping any attached channels.
    pub fn fail(&mut self) {
        self.success = false;
        self.ul_tx = None;
        self.dl_tx = None;
    }
}

/// Events consumed by the RealUe NAS engine.
#[derive(Debug)]
pub enum RealUeEvent {
    /// Build, protect and hand back the given NAS message
    BuildNas(NasBuildKind),
    /// Decode and act on a downlink NAS PDU
    DownlinkNas {
        /// Encoded NAS PDU as received over N1
        pdu: Bytes,
    },
    /// Wire up data bearers for the listed sessions, launching their workers
    DataBearerSetup {
        /// Per-session items; failed items degrade individually
        items: Vec<DataBearerItem>,
    },
    /// Generate uplink user data on every active session
    GeneratePackets {
        /// Packets per session
        count: u32,
    },
    /// The signalling connection is gone; release local session resources
    ConnectionRelease,
    /// Result reported by one PDU session worker
    SessionResult {
        /// Reporting session
        psi: u8,
        /// Whether the requested work succeeded
        success: bool,
        /// Failure reason, empty on success
        reason: String,
    },
}

/// Events consumed by the SimUe coordinator.
#[derive(Debug)]
pub enum SimUeEvent {
    /// Scenario driver requests the next procedure
    Procedure(ProcedureType),
    /// RealUe produced an encoded NAS PDU ready for transmission
    NasEncoded {
        /// What was built, used to pick the NGAP carrier and advance state
        kind: NasBuildKind,
        /// Protected NAS bytes
        pdu: Bytes,
    },
    /// RealUe decoded a downlink NAS message
    Nas(NasOutcome),
    /// RealUe finished wiring data bearers; relay the items to the gNB
    DataBearerSetupResult {
        /// Per-session results
        items: Vec<DataBearerItem>,
    },
    /// RealUe reports the outcome of user-data generation
    DataResult {
        /// Whether all sessions generated their packets
        success: bool,
        /// Failure reason, empty on success
        reason: String,
    },
    /// RealUe hit an unrecoverable per-UE error
    UeError {
        /// Human-readable reason
        reason: String,
    },
    /// GnbCpUe delivers a downlink NAS PDU for decoding
    DownlinkNas {
        /// Encoded NAS PDU
        pdu: Bytes,
    },
    /// GnbCpUe requests data-bearer setup for admitted sessions
    DataBearerSetupRequest {
        /// Per-session items seeded by the gNB
        items: Vec<DataBearerItem>,
    },
    /// GnbCpUe confirms a session release completed at the NGAP level
    DataBearerRelease {
        /// Released session
        psi: u8,
    },
    /// GnbCpUe reports the UE context was released by the network
    ConnectionReleased,
}

/// Terminal outcome of one procedure for one UE, reported to the scenario
/// driver.
#[derive(Debug, Clone)]
pub struct ProcedureResult {
    /// Subscriber the result belongs to
    pub supi: String,
    /// The procedure that terminated
    pub procedure: ProcedureType,
    /// PASS or FAIL
    pub pass: bool,
    /// Human-readable reason, empty on PASS
    pub reason: String,
}

impl fmt::Display for ProcedureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pass {
            write!(f, "{} [{}]: PASS", self.supi, self.procedure)
        } else {
            write!(f, "{} [{}]: FAIL ({})", self.supi, self.procedure, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_bearer_item_fail_drops_channels() {
        let (tx, _rx) = mpsc::channel(1);
        let mut item = DataBearerItem::new(5);
        item.ul_tx = Some(tx);
        item.fail();
        assert!(!item.success);
        assert!(item.ul_tx.is_none());
        assert!(item.dl_tx.is_none());
    }

    #[test]
    fn test_procedure_result_display() {
        let pass = ProcedureResult {
            supi: "imsi-208930000000001".into(),
            procedure: ProcedureType::Registration,
            pass: true,
            reason: String::new(),
        };
        assert_eq!(
            pass.to_string(),
            "imsi-208930000000001 [Registration]: PASS"
        );

        let fail = ProcedureResult {
            supi: "imsi-208930000000001".into(),
            procedure: ProcedureType::Deregistration,
            pass: false,
            reason: "guti not allocated".into(),
        };
        assert!(fail.to_string().ends_with("FAIL (guti not allocated)"));
    }
}
