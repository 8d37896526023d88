//! RealUe NAS engine
//!
//! The per-UE NAS actor. It owns the security context, the GUTI and the PDU
//! session map; everything it learns or produces is surfaced to the SimUe
//! coordinator as typed events. It never talks to the network itself: encoded
//! NAS goes up to SimUe, which routes it through the gNB control plane.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use ransim_common::events::{
    DataBearerItem, NasBuildKind, NasOutcome, RealUeEvent, SimUeEvent,
};
use ransim_common::types::{supi_to_suci, Guti5G, PduSessionType, Plmn, Snssai};
use ransim_common::{
    log_nas_message, Direction, Error, Task, TaskHandle, TaskMessage, DEFAULT_CHANNEL_CAPACITY,
};
use ransim_nas::header::SecurityHeaderType;
use ransim_nas::messages::{
    AuthenticationResponse, DeregistrationRequest, MmMessage, NasMessage, RegistrationRequest,
    ServiceRequest, UlNasTransport,
};
use ransim_nas::{decode_plain, SmMessage, UeSecurityContext};

use crate::session::{PduSession, SessionCommand};
use crate::state::MmState;

/// Request type value for an initial PDU session request.
const REQUEST_TYPE_INITIAL: u8 = 0x01;

/// Request type value addressing an existing PDU session.
const REQUEST_TYPE_EXISTING: u8 = 0x02;

/// Static parameters for one simulated UE, drawn from its profile.
#[derive(Debug, Clone)]
pub struct RealUeConfig {
    /// Subscriber identity
    pub supi: String,
    /// Home PLMN
    pub plmn: Plmn,
    /// Permanent key K
    pub key: [u8; 16],
    /// Operator key OPc
    pub opc: [u8; 16],
    /// Initial sequence number
    pub sqn: u64,
    /// Default data network name
    pub dnn: String,
    /// Default slice
    pub snssai: Snssai,
    /// Requested PDU session type
    pub session_type: PduSessionType,
    /// Advertised security capability octets
    pub security_capabilities: [u8; 2],
}

impl RealUeConfig {
    fn serving_network_name(&self) -> String {
        format!(
            "5G:mnc{:03}.mcc{:03}.3gppnetwork.org",
            self.plmn.mnc, self.plmn.mcc
        )
    }
}

/// Aggregation state for an in-flight packet generation request.
struct DataGeneration {
    remaining: usize,
    failures: Vec<String>,
}

/// The RealUe actor.
pub struct RealUeTask {
    config: RealUeConfig,
    security: UeSecurityContext,
    guti: Option<Guti5G>,
    mm_state: MmState,
    sessions: HashMap<u8, PduSession>,
    session_workers: JoinSet<()>,
    to_simue: TaskHandle<SimUeEvent>,
    self_handle: TaskHandle<RealUeEvent>,
    pending_res_star: Option<[u8; 16]>,
    pending_data: Option<DataGeneration>,
    next_psi: u8,
    next_pti: u8,
}

impl RealUeTask {
    /// Creates the actor and its mailbox.
    pub fn new(
        config: RealUeConfig,
        to_simue: TaskHandle<SimUeEvent>,
    ) -> (
        Self,
        TaskHandle<RealUeEvent>,
        mpsc::Receiver<TaskMessage<RealUeEvent>>,
    ) {
        let (handle, rx) = TaskHandle::channel(DEFAULT_CHANNEL_CAPACITY);
        let security = UeSecurityContext::new(
            config.key,
            config.opc,
            config.sqn,
            config.serving_network_name(),
        );
        let task = Self {
            config,
            security,
            guti: None,
            mm_state: MmState::Deregistered,
            sessions: HashMap::new(),
            session_workers: JoinSet::new(),
            to_simue,
            self_handle: handle.clone(),
            pending_res_star: None,
            pending_data: None,
            next_psi: 1,
            next_pti: 1,
        };
        (task, handle, rx)
    }

    /// Spawns the actor, returning its mailbox handle and join handle.
    pub fn spawn(
        config: RealUeConfig,
        to_simue: TaskHandle<SimUeEvent>,
    ) -> (TaskHandle<RealUeEvent>, JoinHandle<()>) {
        let (task, handle, rx) = Self::new(config, to_simue);
        let join = tokio::spawn(task.run(rx));
        (handle, join)
    }

}

#[async_trait::async_trait]
impl Task for RealUeTask {
    type Message = RealUeEvent;

    async fn run(mut self, mut rx: mpsc::Receiver<TaskMessage<RealUeEvent>>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                TaskMessage::Shutdown => break,
                TaskMessage::Message(event) => {
                    if let Err(err) = self.handle_event(event).await {
                        match err {
                            // A malformed payload aborts interpretation of
                            // that message only.
                            Error::Decode(_) => {
                                warn!(supi = %self.config.supi, %err, "dropping NAS message")
                            }
                            other => {
                                warn!(supi = %self.config.supi, err = %other, "NAS step failed");
                                let _ = self
                                    .to_simue
                                    .send(SimUeEvent::UeError {
                                        reason: other.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                }
            }
        }
        self.teardown().await;
        info!(supi = %self.config.supi, "Real UE terminated");
    }
}

impl RealUeTask {
    async fn handle_event(&mut self, event: RealUeEvent) -> Result<(), Error> {
        match event {
            RealUeEvent::BuildNas(kind) => self.handle_build(kind).await,
            RealUeEvent::DownlinkNas { pdu } => self.handle_downlink(pdu).await,
            RealUeEvent::DataBearerSetup { items } => {
                self.handle_data_bearer_setup(items).await;
                Ok(())
            }
            RealUeEvent::GeneratePackets { count } => {
                self.handle_generate_packets(count).await;
                Ok(())
            }
            RealUeEvent::SessionResult {
                psi,
                success,
                reason,
            } => {
                self.handle_session_result(psi, success, reason).await;
                Ok(())
            }
            RealUeEvent::ConnectionRelease => {
                self.release_all_sessions().await;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Outbound NAS construction
    // ========================================================================

    async fn handle_build(&mut self, kind: NasBuildKind) -> Result<(), Error> {
        let pdu = self.build_nas(kind)?;
        log_nas_message(Direction::Tx, &format!("{kind:?}"), &pdu);
        self.to_simue
            .send(SimUeEvent::NasEncoded { kind, pdu })
            .await
            .map_err(|_| Error::PeerNotFound("SimUe mailbox closed".into()))?;
        Ok(())
    }

    fn build_nas(&mut self, kind: NasBuildKind) -> Result<Bytes, Error> {
        match kind {
            NasBuildKind::RegistrationRequest => {
                if self.mm_state != MmState::Deregistered {
                    return Err(Error::InvalidTransition(format!(
                        "registration request in {}",
                        self.mm_state
                    )));
                }
                let suci = supi_to_suci(&self.config.supi, &self.config.plmn)?;
                let msg = MmMessage::RegistrationRequest(RegistrationRequest {
                    ngksi: self.security.ngksi,
                    suci,
                    security_capabilities: self.config.security_capabilities,
                    snssai: self.config.snssai,
                });
                self.mm_state = MmState::RegisteredInitiated;
                debug!(supi = %self.config.supi, "built registration request");
                Ok(msg.encode())
            }
            NasBuildKind::AuthenticationResponse => {
                let res_star = self.pending_res_star.take().ok_or_else(|| {
                    Error::SecurityEncoding("no pending authentication challenge".into())
                })?;
                let msg =
                    MmMessage::AuthenticationResponse(AuthenticationResponse { res_star });
                Ok(msg.encode())
            }
            NasBuildKind::SecurityModeComplete => self.protect(
                MmMessage::SecurityModeComplete.encode(),
                SecurityHeaderType::IntegrityProtectedAndCipheredWithNewContext,
            ),
            NasBuildKind::RegistrationComplete => self.protect(
                MmMessage::RegistrationComplete.encode(),
                SecurityHeaderType::IntegrityProtectedAndCiphered,
            ),
            NasBuildKind::ServiceRequest => {
                let guti = self.guti.ok_or_else(|| {
                    Error::SecurityEncoding("guti not allocated".into())
                })?;
                let msg = MmMessage::ServiceRequest(ServiceRequest {
                    ngksi: self.security.ngksi,
                    service_type: 0x01, // data
                    amf_set_id: guti.amf_set_id,
                    amf_pointer: guti.amf_pointer,
                    tmsi: guti.tmsi,
                });
                self.mm_state = MmState::ServiceRequestInitiated;
                // TS 24.501 4.4.6: initial NAS messages are integrity
                // protected only.
                self.protect(msg.encode(), SecurityHeaderType::IntegrityProtected)
            }
            NasBuildKind::DeregistrationRequest => {
                let guti = self
                    .guti
                    .ok_or_else(|| Error::SecurityEncoding("guti not allocated".into()))?;
                let msg = MmMessage::DeregistrationRequest(DeregistrationRequest {
                    switch_off: false,
                    ngksi: self.security.ngksi,
                    guti,
                });
                self.mm_state = MmState::DeregisteredInitiated;
                self.protect(
                    msg.encode(),
                    SecurityHeaderType::IntegrityProtectedAndCiphered,
                )
            }
            NasBuildKind::DeregistrationAccept => self.protect(
                MmMessage::DeregistrationAcceptUeTerm.encode(),
                SecurityHeaderType::IntegrityProtectedAndCipheredWithNewContext,
            ),
            NasBuildKind::PduSessionEstablishmentRequest => {
                if !self.mm_state.is_registered() {
                    return Err(Error::InvalidTransition(format!(
                        "session establishment in {}",
                        self.mm_state
                    )));
                }
                let psi = self.next_psi;
                self.next_psi = self.next_psi.wrapping_add(1).max(1);
                let pti = self.next_pti;
                self.next_pti = self.next_pti.wrapping_add(1).max(1);
                let sm = SmMessage::EstablishmentRequest {
                    psi,
                    pti,
                    session_type: self.config.session_type,
                };
                let dnn = self.config.dnn.clone();
                let snssai = self.config.snssai;
                self.wrap_sm(sm, psi, REQUEST_TYPE_INITIAL, dnn, snssai)
            }
            NasBuildKind::PduSessionReleaseRequest { psi } => {
                let session = self.sessions.get(&psi).ok_or(Error::SessionNotFound(psi))?;
                let dnn = session.dnn.clone();
                let snssai = session.snssai;
                let pti = self.next_pti;
                self.next_pti = self.next_pti.wrapping_add(1).max(1);
                let sm = SmMessage::ReleaseRequest { psi, pti };
                self.wrap_sm(sm, psi, REQUEST_TYPE_EXISTING, dnn, snssai)
            }
            NasBuildKind::PduSessionReleaseComplete { psi } => {
                // The worker was stopped when the release command arrived;
                // the map entry goes away with the completing message.
                let (dnn, snssai) = match self.sessions.remove(&psi) {
                    Some(session) => (session.dnn, session.snssai),
                    None => (self.config.dnn.clone(), self.config.snssai),
                };
                let sm = SmMessage::ReleaseComplete { psi, pti: 0 };
                self.wrap_sm(sm, psi, REQUEST_TYPE_EXISTING, dnn, snssai)
            }
        }
    }

    /// Wraps an SM message in an uplink transport container and protects it.
    fn wrap_sm(
        &mut self,
        sm: SmMessage,
        psi: u8,
        request_type: u8,
        dnn: String,
        snssai: Snssai,
    ) -> Result<Bytes, Error> {
        let msg = MmMessage::UlNasTransport(UlNasTransport {
            payload: sm.encode(),
            psi,
            request_type,
            dnn,
            snssai,
        });
        self.protect(
            msg.encode(),
            SecurityHeaderType::IntegrityProtectedAndCiphered,
        )
    }

    fn protect(&mut self, plain: Bytes, header: SecurityHeaderType) -> Result<Bytes, Error> {
        let protected = self.security.protect(&plain, header)?;
        Ok(Bytes::from(protected))
    }

    // ========================================================================
    // Inbound NAS handling
    // ========================================================================

    async fn handle_downlink(&mut self, pdu: Bytes) -> Result<(), Error> {
        log_nas_message(Direction::Rx, "downlink", &pdu);
        let plain = self.security.unprotect(&pdu)?;
        let msg = decode_plain(&plain)?;

        // SM messages ride inside an MM transport container; unwrap one
        // level before interpreting.
        let msg = match msg {
            NasMessage::Mm(MmMessage::DlNasTransport(transport)) => {
                decode_plain(&transport.payload)?
            }
            other => other,
        };

        match msg {
            NasMessage::Mm(mm) => self.handle_mm(mm).await,
            NasMessage::Sm(sm) => self.handle_sm(sm).await,
        }
    }

    async fn handle_mm(&mut self, msg: MmMessage) -> Result<(), Error> {
        match msg {
            MmMessage::AuthenticationRequest(req) => {
                let res_star = self.security.authenticate(
                    &self.config.supi,
                    req.ngksi,
                    &req.rand,
                    &req.autn,
                    &req.abba,
                )?;
                self.pending_res_star = Some(res_star);
                self.surface(NasOutcome::AuthenticationRequested).await
            }
            MmMessage::SecurityModeCommand(cmd) => {
                self.security
                    .select_algorithms(cmd.ciphering_alg, cmd.integrity_alg)?;
                self.surface(NasOutcome::SecurityModeCommanded).await
            }
            MmMessage::RegistrationAccept(accept) => {
                self.guti = accept.guti;
                self.mm_state = MmState::Registered;
                if let Some(guti) = &accept.guti {
                    info!(supi = %self.config.supi, %guti, "registered");
                }
                self.surface(NasOutcome::RegistrationAccepted { guti: accept.guti })
                    .await
            }
            MmMessage::ServiceAccept => {
                self.mm_state = MmState::Registered;
                self.surface(NasOutcome::ServiceAccepted).await
            }
            MmMessage::DeregistrationAccept => {
                self.mm_state = MmState::Deregistered;
                self.guti = None;
                self.surface(NasOutcome::DeregistrationAccepted).await
            }
            MmMessage::DeregistrationRequestUeTerm { .. } => {
                self.surface(NasOutcome::DeregistrationRequested).await
            }
            other => {
                warn!(supi = %self.config.supi, msg_type = ?other.message_type(),
                    "unhandled downlink MM message");
                Ok(())
            }
        }
    }

    async fn handle_sm(&mut self, msg: SmMessage) -> Result<(), Error> {
        match msg {
            SmMessage::EstablishmentAccept {
                psi,
                session_type,
                ssc_mode,
                address,
                ..
            } => {
                let session = PduSession::new(
                    psi,
                    session_type,
                    ssc_mode,
                    address,
                    self.config.dnn.clone(),
                    self.config.snssai,
                );
                info!(
                    supi = %self.config.supi, psi, %session_type, ssc_mode,
                    address = ?address, "PDU session established"
                );
                self.sessions.insert(psi, session);
                self.surface(NasOutcome::PduSessionEstablished {
                    psi,
                    session_type,
                    address,
                })
                .await
            }
            SmMessage::EstablishmentReject { psi, cause, .. } => {
                self.surface(NasOutcome::PduSessionRejected { psi, cause })
                    .await
            }
            SmMessage::ReleaseCommand { psi, .. } => {
                let session = self
                    .sessions
                    .get(&psi)
                    .ok_or(Error::SessionNotFound(psi))?;
                // Stop the worker before the release is acknowledged.
                let _ = session.cmd_tx().send(SessionCommand::Release).await;
                self.surface(NasOutcome::PduSessionReleaseCommanded { psi })
                    .await
            }
            other => {
                warn!(supi = %self.config.supi, psi = other.psi(), "unhandled downlink SM message");
                Ok(())
            }
        }
    }

    async fn surface(&self, outcome: NasOutcome) -> Result<(), Error> {
        self.to_simue
            .send(SimUeEvent::Nas(outcome))
            .await
            .map_err(|_| Error::PeerNotFound("SimUe mailbox closed".into()))
    }

    // ========================================================================
    // Data bearers and user data
    // ========================================================================

    /// Wires the data path for each viable item, degrading items whose
    /// session is unknown without failing the rest of the batch.
    async fn handle_data_bearer_setup(&mut self, mut items: Vec<DataBearerItem>) {
        for item in &mut items {
            if !item.success {
                continue;
            }
            let Some(session) = self.sessions.get_mut(&item.psi) else {
                warn!(supi = %self.config.supi, psi = item.psi,
                    "data bearer setup for unknown session");
                item.fail();
                continue;
            };
            if session.launch(self.self_handle.clone(), &mut self.session_workers) {
                debug!(supi = %self.config.supi, psi = item.psi, "launched session worker");
            }
            if let Some(ul_tx) = item.ul_tx.take() {
                let _ = session
                    .cmd_tx()
                    .send(SessionCommand::Activate { ul_tx })
                    .await;
            }
            item.dl_tx = Some(session.dl_tx());
        }
        let _ = self
            .to_simue
            .send(SimUeEvent::DataBearerSetupResult { items })
            .await;
    }

    async fn handle_generate_packets(&mut self, count: u32) {
        if self.sessions.is_empty() {
            let _ = self
                .to_simue
                .send(SimUeEvent::DataResult {
                    success: false,
                    reason: "no PDU sessions".into(),
                })
                .await;
            return;
        }
        self.pending_data = Some(DataGeneration {
            remaining: self.sessions.len(),
            failures: Vec::new(),
        });
        for session in self.sessions.values() {
            let _ = session
                .cmd_tx()
                .send(SessionCommand::GeneratePackets { count })
                .await;
        }
    }

    async fn handle_session_result(&mut self, psi: u8, success: bool, reason: String) {
        let Some(pending) = self.pending_data.as_mut() else {
            debug!(supi = %self.config.supi, psi, "stray session result");
            return;
        };
        if !success {
            pending.failures.push(format!("session {psi}: {reason}"));
        }
        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining == 0 {
            let pending = self.pending_data.take().unwrap_or(DataGeneration {
                remaining: 0,
                failures: Vec::new(),
            });
            let _ = self
                .to_simue
                .send(SimUeEvent::DataResult {
                    success: pending.failures.is_empty(),
                    reason: pending.failures.join("; "),
                })
                .await;
        }
    }

    async fn release_all_sessions(&mut self) {
        for session in self.sessions.values() {
            let _ = session.cmd_tx().send(SessionCommand::Quit).await;
        }
        self.sessions.clear();
    }

    /// Stops every session worker and waits for all of them to exit.
    async fn teardown(&mut self) {
        self.release_all_sessions().await;
        while self.session_workers.join_next().await.is_some() {}
    }
}
