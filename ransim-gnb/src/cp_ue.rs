//! Per-UE control-plane actor
//!
//! Translates SimUe-originated events into NGAP procedures towards the AMF
//! and inbound NGAP procedures into typed events for SimUe. Owns the UE's
//! NGAP id pair and the user-plane workers of its PDU sessions.

use bytes::Bytes;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ransim_common::events::{DataBearerItem, SimUeEvent};
use ransim_common::{Task, TaskHandle, TaskMessage, DEFAULT_CHANNEL_CAPACITY};
use ransim_ngap::{
    InitialContextSetupResponse, InitialUeMessage, NgapPdu, PduSessionFailedItem,
    PduSessionResourceReleaseCommand, PduSessionResourceReleaseResponse,
    PduSessionResourceSetupRequest, PduSessionResourceSetupResponse, PduSessionSetupResponseItem,
    UeContextReleaseComplete, UeContextReleaseRequest, UplinkNasTransport,
};

use crate::gnodeb::GNodeB;
use crate::up_ue::{GnbUpUeTask, UpCommand};

/// RRC establishment cause: mobile-originated signalling.
const CAUSE_MO_SIGNALLING: u8 = 3;

/// NGAP release cause: user inactivity.
const CAUSE_USER_INACTIVITY: u8 = 20;

/// Setup failure cause: requested resource unavailable.
const CAUSE_RESOURCE_UNAVAILABLE: u8 = 30;

/// Events consumed by the per-UE control-plane actor.
#[derive(Debug)]
pub enum GnbCpEvent {
    /// Send a NAS PDU as an Initial UE Message (first message of a
    /// connection)
    InitialNas {
        /// Encoded NAS PDU
        pdu: Bytes,
    },
    /// Send a NAS PDU as Uplink NAS Transport
    UplinkNas {
        /// Encoded NAS PDU
        pdu: Bytes,
    },
    /// The UE finished releasing a session: stop its user-plane worker,
    /// forward the NAS release complete, then acknowledge over NGAP
    ReleaseComplete {
        /// Released session
        psi: u8,
        /// Encoded NAS release complete
        pdu: Bytes,
    },
    /// Relay the UE side's data-bearer setup result as the NGAP response
    DataBearerSetupResult {
        /// Per-session results
        items: Vec<DataBearerItem>,
    },
    /// Request an AN release (UE Context Release Request)
    TriggerAnRelease,
    /// A decoded NGAP PDU from the network receive path
    FromNetwork(NgapPdu),
}

/// Session parameters remembered between the NGAP setup request and the UE
/// side's bearer result.
struct PendingSession {
    ul_teid: u32,
    upf_address: Ipv4Addr,
    ul_rx: mpsc::Receiver<Bytes>,
}

/// A live user-plane worker for one session.
struct UpUeHandle {
    dl_teid: u32,
    cmd_tx: mpsc::Sender<UpCommand>,
}

/// The per-UE control-plane actor.
pub struct GnbCpUeTask {
    gnb: Arc<GNodeB>,
    ran_ue_ngap_id: i64,
    amf_ue_ngap_id: Option<i64>,
    to_simue: TaskHandle<SimUeEvent>,
    pending: HashMap<u8, PendingSession>,
    up_ues: HashMap<u8, UpUeHandle>,
    up_workers: JoinSet<()>,
}

impl GnbCpUeTask {
    /// Creates the actor for a freshly allocated RAN UE NGAP id.
    pub fn new(gnb: Arc<GNodeB>, ran_ue_ngap_id: i64, to_simue: TaskHandle<SimUeEvent>) -> Self {
        Self {
            gnb,
            ran_ue_ngap_id,
            amf_ue_ngap_id: None,
            to_simue,
            pending: HashMap::new(),
            up_ues: HashMap::new(),
            up_workers: JoinSet::new(),
        }
    }

    async fn handle_event(&mut self, event: GnbCpEvent) -> HandlerOutcome {
        match event {
            GnbCpEvent::InitialNas { pdu } => self.handle_initial_nas(pdu).await,
            GnbCpEvent::UplinkNas { pdu } => self.handle_uplink_nas(pdu).await,
            GnbCpEvent::ReleaseComplete { psi, pdu } => self.handle_release_complete(psi, pdu).await,
            GnbCpEvent::DataBearerSetupResult { items } => {
                self.handle_bearer_result(items).await
            }
            GnbCpEvent::TriggerAnRelease => self.handle_an_release().await,
            GnbCpEvent::FromNetwork(pdu) => self.handle_from_network(pdu).await,
        }
    }

    async fn handle_initial_nas(&mut self, pdu: Bytes) -> HandlerOutcome {
        let message = NgapPdu::InitialUeMessage(InitialUeMessage {
            ran_ue_ngap_id: self.ran_ue_ngap_id,
            nas_pdu: pdu,
            plmn: self.gnb.plmn(),
            tac: self.gnb.tac(),
            nci: self.gnb.nci(),
            establishment_cause: CAUSE_MO_SIGNALLING,
        });
        self.send_or_fail(&message).await;
        HandlerOutcome::Continue
    }

    async fn handle_uplink_nas(&mut self, pdu: Bytes) -> HandlerOutcome {
        let Some(amf_ue_ngap_id) = self.amf_ue_ngap_id else {
            warn!(ran_ue = self.ran_ue_ngap_id, "uplink NAS before AMF id is bound");
            let _ = self
                .to_simue
                .send(SimUeEvent::UeError {
                    reason: "no AMF UE NGAP id for uplink NAS".into(),
                })
                .await;
            return HandlerOutcome::Continue;
        };
        let message = NgapPdu::UplinkNasTransport(UplinkNasTransport {
            amf_ue_ngap_id,
            ran_ue_ngap_id: self.ran_ue_ngap_id,
            nas_pdu: pdu,
        });
        self.send_or_fail(&message).await;
        HandlerOutcome::Continue
    }

    /// Stops the session's user-plane worker, forwards the NAS release
    /// complete and only then acknowledges the release over NGAP.
    async fn handle_release_complete(&mut self, psi: u8, pdu: Bytes) -> HandlerOutcome {
        if let Some(up_ue) = self.up_ues.remove(&psi) {
            let _ = up_ue.cmd_tx.send(UpCommand::Quit).await;
            self.gnb.unregister_tunnel(up_ue.dl_teid);
        } else {
            warn!(ran_ue = self.ran_ue_ngap_id, psi, "release for session without worker");
        }

        let outcome = self.handle_uplink_nas(pdu).await;
        if let Some(amf_ue_ngap_id) = self.amf_ue_ngap_id {
            let response =
                NgapPdu::PduSessionResourceReleaseResponse(PduSessionResourceReleaseResponse {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id: self.ran_ue_ngap_id,
                    psis: vec![psi],
                });
            self.send_or_fail(&response).await;
        }
        let _ = self.to_simue.send(SimUeEvent::DataBearerRelease { psi }).await;
        outcome
    }

    /// Builds the NGAP setup response from the UE side's bearer results and
    /// spawns a user-plane worker per admitted session.
    async fn handle_bearer_result(&mut self, items: Vec<DataBearerItem>) -> HandlerOutcome {
        let mut setup_items = Vec::new();
        let mut failed_items = Vec::new();

        for mut item in items {
            let psi = item.psi;
            let pending = self.pending.remove(&psi);
            let viable = item.success && item.dl_tx.is_some() && pending.is_some();
            if !viable {
                debug!(ran_ue = self.ran_ue_ngap_id, psi, "session failed to set up");
                failed_items.push(PduSessionFailedItem {
                    psi,
                    cause: CAUSE_RESOURCE_UNAVAILABLE,
                });
                continue;
            }
            let pending = pending.unwrap_or_else(|| unreachable!("checked above"));
            let session_dl_tx = item
                .dl_tx
                .take()
                .unwrap_or_else(|| unreachable!("checked above"));

            let dl_teid = match self.gnb.allocate_teid() {
                Ok(teid) => teid,
                Err(err) => {
                    warn!(ran_ue = self.ran_ue_ngap_id, psi, %err, "TEID allocation failed");
                    failed_items.push(PduSessionFailedItem {
                        psi,
                        cause: CAUSE_RESOURCE_UNAVAILABLE,
                    });
                    continue;
                }
            };

            let (dl_tx, dl_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
            let (cmd_tx, cmd_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
            self.gnb.register_tunnel(dl_teid, dl_tx);

            let worker = GnbUpUeTask::new(
                Arc::clone(&self.gnb),
                psi,
                pending.ul_teid,
                dl_teid,
                pending.upf_address,
                session_dl_tx,
                pending.ul_rx,
                dl_rx,
                cmd_rx,
            );
            self.up_workers.spawn(worker.run());
            self.up_ues.insert(psi, UpUeHandle { dl_teid, cmd_tx });

            setup_items.push(PduSessionSetupResponseItem {
                psi,
                dl_teid,
                gnb_address: self.gnb.n3_address(),
            });
        }

        if let Some(amf_ue_ngap_id) = self.amf_ue_ngap_id {
            let response = NgapPdu::PduSessionResourceSetupResponse(PduSessionResourceSetupResponse {
                amf_ue_ngap_id,
                ran_ue_ngap_id: self.ran_ue_ngap_id,
                setup_items,
                failed_items,
            });
            self.send_or_fail(&response).await;
        }
        HandlerOutcome::Continue
    }

    async fn handle_an_release(&mut self) -> HandlerOutcome {
        let Some(amf_ue_ngap_id) = self.amf_ue_ngap_id else {
            warn!(ran_ue = self.ran_ue_ngap_id, "AN release without AMF id");
            return HandlerOutcome::Continue;
        };
        let request = NgapPdu::UeContextReleaseRequest(UeContextReleaseRequest {
            amf_ue_ngap_id,
            ran_ue_ngap_id: self.ran_ue_ngap_id,
            psis: self.up_ues.keys().copied().collect(),
            cause: CAUSE_USER_INACTIVITY,
        });
        self.send_or_fail(&request).await;
        HandlerOutcome::Continue
    }

    async fn handle_from_network(&mut self, pdu: NgapPdu) -> HandlerOutcome {
        match pdu {
            NgapPdu::DownlinkNasTransport(transport) => {
                self.bind_amf_id(transport.amf_ue_ngap_id);
                self.forward_nas(transport.nas_pdu).await;
                HandlerOutcome::Continue
            }
            NgapPdu::InitialContextSetupRequest(request) => {
                self.bind_amf_id(request.amf_ue_ngap_id);
                let response =
                    NgapPdu::InitialContextSetupResponse(InitialContextSetupResponse {
                        amf_ue_ngap_id: request.amf_ue_ngap_id,
                        ran_ue_ngap_id: self.ran_ue_ngap_id,
                    });
                self.send_or_fail(&response).await;
                if let Some(nas) = request.nas_pdu {
                    self.forward_nas(nas).await;
                }
                HandlerOutcome::Continue
            }
            NgapPdu::PduSessionResourceSetupRequest(request) => {
                self.handle_session_setup_request(request).await;
                HandlerOutcome::Continue
            }
            NgapPdu::PduSessionResourceReleaseCommand(command) => {
                self.handle_session_release_command(command).await;
                HandlerOutcome::Continue
            }
            NgapPdu::UeContextReleaseCommand(command) => {
                self.handle_context_release_command(command.amf_ue_ngap_id).await;
                HandlerOutcome::Exit
            }
            other => {
                warn!(
                    ran_ue = self.ran_ue_ngap_id,
                    procedure = other.procedure_name(),
                    "unhandled inbound NGAP procedure"
                );
                HandlerOutcome::Continue
            }
        }
    }

    async fn handle_session_setup_request(&mut self, request: PduSessionResourceSetupRequest) {
        self.bind_amf_id(request.amf_ue_ngap_id);
        let mut items = Vec::with_capacity(request.items.len());
        for session in request.items {
            if let Some(nas) = session.nas_pdu {
                self.forward_nas(nas).await;
            }
            let (ul_tx, ul_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
            self.pending.insert(
                session.psi,
                PendingSession {
                    ul_teid: session.ul_teid,
                    upf_address: session.upf_address,
                    ul_rx,
                },
            );
            let mut item = DataBearerItem::new(session.psi);
            item.ul_tx = Some(ul_tx);
            items.push(item);
        }
        let _ = self
            .to_simue
            .send(SimUeEvent::DataBearerSetupRequest { items })
            .await;
    }

    async fn handle_session_release_command(&mut self, command: PduSessionResourceReleaseCommand) {
        self.bind_amf_id(command.amf_ue_ngap_id);
        match command.nas_pdu {
            Some(nas) => self.forward_nas(nas).await,
            None => warn!(
                ran_ue = self.ran_ue_ngap_id,
                psis = ?command.psis,
                "release command without NAS payload"
            ),
        }
    }

    /// UE Context Release Command: stop every user-plane worker, confirm the
    /// release, and tell SimUe the signalling connection is gone.
    async fn handle_context_release_command(&mut self, amf_ue_ngap_id: i64) {
        self.stop_up_workers().await;
        let complete = NgapPdu::UeContextReleaseComplete(UeContextReleaseComplete {
            amf_ue_ngap_id,
            ran_ue_ngap_id: self.ran_ue_ngap_id,
        });
        self.send_or_fail(&complete).await;
        let _ = self.to_simue.send(SimUeEvent::ConnectionReleased).await;
        info!(ran_ue = self.ran_ue_ngap_id, "UE context released");
    }

    async fn stop_up_workers(&mut self) {
        for (_psi, up_ue) in self.up_ues.drain() {
            let _ = up_ue.cmd_tx.send(UpCommand::Quit).await;
            self.gnb.unregister_tunnel(up_ue.dl_teid);
        }
        while self.up_workers.join_next().await.is_some() {}
    }

    fn bind_amf_id(&mut self, amf_ue_ngap_id: i64) {
        if self.amf_ue_ngap_id.is_none() {
            debug!(
                ran_ue = self.ran_ue_ngap_id,
                amf_ue = amf_ue_ngap_id,
                "AMF UE NGAP id bound"
            );
        }
        self.amf_ue_ngap_id = Some(amf_ue_ngap_id);
    }

    async fn forward_nas(&self, pdu: Bytes) {
        let _ = self.to_simue.send(SimUeEvent::DownlinkNas { pdu }).await;
    }

    async fn send_or_fail(&self, pdu: &NgapPdu) {
        if let Err(err) = self.gnb.send_ngap(pdu).await {
            warn!(ran_ue = self.ran_ue_ngap_id, %err, "NGAP send failed");
            let _ = self
                .to_simue
                .send(SimUeEvent::UeError {
                    reason: format!("transport error: {err}"),
                })
                .await;
        }
    }
}

/// Whether the actor loop keeps running after an event.
#[derive(Debug, PartialEq, Eq)]
enum HandlerOutcome {
    Continue,
    Exit,
}

#[async_trait::async_trait]
impl Task for GnbCpUeTask {
    type Message = GnbCpEvent;

    async fn run(mut self, mut rx: mpsc::Receiver<TaskMessage<GnbCpEvent>>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                TaskMessage::Shutdown => break,
                TaskMessage::Message(event) => {
                    if self.handle_event(event).await == HandlerOutcome::Exit {
                        break;
                    }
                }
            }
        }
        self.stop_up_workers().await;
        self.gnb.unregister_ue(self.ran_ue_ngap_id);
        info!(ran_ue = self.ran_ue_ngap_id, "gNB UE actor terminated");
    }
}
