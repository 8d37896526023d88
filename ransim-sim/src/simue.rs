//! SimUe coordinator
//!
//! One coordinator per simulated UE. It owns the forward channels to its
//! RealUe and GnbCpUe actors, routes every inbound event through the
//! procedure state machine, and reports terminal outcomes to the scenario
//! driver. It holds no protocol state of its own beyond the procedure
//! position and the list of active session ids.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ransim_common::events::{
    NasBuildKind, NasOutcome, ProcedureResult, ProcedureType, RealUeEvent, SimUeEvent,
};
use ransim_common::{Error, Task, TaskHandle, TaskMessage, DEFAULT_CHANNEL_CAPACITY};
use ransim_gnb::{GNodeB, GnbCpEvent};
use ransim_ue::{RealUeConfig, RealUeTask};

use crate::fsm::{transition, Action, ProcedureState};
use crate::registry::Registry;

/// The per-UE coordinator actor.
pub struct SimUe {
    supi: String,
    gnb: Arc<GNodeB>,
    registry: Arc<Registry>,
    state: ProcedureState,
    procedure: Option<ProcedureType>,
    active_psis: Vec<u8>,
    data_packets: u32,
    to_realue: Option<TaskHandle<RealUeEvent>>,
    realue_join: Option<JoinHandle<()>>,
    to_gnb: Option<TaskHandle<GnbCpEvent>>,
    gnb_join: Option<JoinHandle<()>>,
    to_scenario: mpsc::Sender<ProcedureResult>,
    self_handle: TaskHandle<SimUeEvent>,
}

impl SimUe {
    /// Creates and spawns a coordinator plus its RealUe actor.
    ///
    /// The UE registers itself in `registry`; a duplicate SUPI is refused
    /// before anything is spawned.
    pub fn create(
        ue_config: RealUeConfig,
        gnb: Arc<GNodeB>,
        registry: Arc<Registry>,
        to_scenario: mpsc::Sender<ProcedureResult>,
        data_packets: u32,
    ) -> Result<(TaskHandle<SimUeEvent>, JoinHandle<()>), Error> {
        let (self_handle, rx) = TaskHandle::channel(DEFAULT_CHANNEL_CAPACITY);
        registry.register(&ue_config.supi, self_handle.clone())?;

        let supi = ue_config.supi.clone();
        let (to_realue, realue_join) = RealUeTask::spawn(ue_config, self_handle.clone());

        let simue = Self {
            supi: supi.clone(),
            gnb,
            registry,
            state: ProcedureState::Idle,
            procedure: None,
            active_psis: Vec::new(),
            data_packets,
            to_realue: Some(to_realue),
            realue_join: Some(realue_join),
            to_gnb: None,
            gnb_join: None,
            to_scenario,
            self_handle: self_handle.clone(),
        };
        debug!(supi = %supi, "SimUe created");
        let join = tokio::spawn(simue.run(rx));
        Ok((self_handle, join))
    }

    async fn handle_event(&mut self, event: SimUeEvent) {
        if let SimUeEvent::Procedure(procedure) = &event {
            info!(supi = %self.supi, %procedure, "starting procedure");
            self.procedure = Some(*procedure);
        }
        if let SimUeEvent::Nas(NasOutcome::PduSessionEstablished { psi, .. }) = &event {
            self.active_psis.push(*psi);
        }

        match transition(self.state, &event) {
            Ok((actions, next_state)) => {
                self.state = next_state;
                let mut event = Some(event);
                for action in actions {
                    self.perform(action, &mut event).await;
                }
            }
            Err(err) => {
                warn!(supi = %self.supi, %err, "rejected event");
                if matches!(event, SimUeEvent::Procedure(_)) {
                    self.report(false, err.to_string()).await;
                }
            }
        }
    }

    async fn perform(&mut self, action: Action, event: &mut Option<SimUeEvent>) {
        match action {
            Action::BuildNas(kind) => self.send_to_realue(RealUeEvent::BuildNas(kind)).await,
            Action::BuildSessionRelease => match self.active_psis.first().copied() {
                Some(psi) => {
                    self.send_to_realue(RealUeEvent::BuildNas(
                        NasBuildKind::PduSessionReleaseRequest { psi },
                    ))
                    .await
                }
                None => {
                    self.state = ProcedureState::Registered;
                    self.report(false, "no active PDU sessions".into()).await;
                }
            },
            Action::SendInitialNas => {
                let Some(SimUeEvent::NasEncoded { pdu, .. }) = event.take() else {
                    return;
                };
                self.send_initial_nas(pdu).await;
            }
            Action::SendUplinkNas => {
                let Some(SimUeEvent::NasEncoded { pdu, .. }) = event.take() else {
                    return;
                };
                self.send_to_gnb(GnbCpEvent::UplinkNas { pdu }).await;
            }
            Action::SendReleaseComplete => {
                let Some(SimUeEvent::NasEncoded {
                    kind: NasBuildKind::PduSessionReleaseComplete { psi },
                    pdu,
                }) = event.take()
                else {
                    return;
                };
                self.active_psis.retain(|active| *active != psi);
                self.send_to_gnb(GnbCpEvent::ReleaseComplete { psi, pdu }).await;
            }
            Action::ForwardNasToUe => {
                let Some(SimUeEvent::DownlinkNas { pdu }) = event.take() else {
                    return;
                };
                self.send_to_realue(RealUeEvent::DownlinkNas { pdu }).await;
            }
            Action::ForwardBearerSetupToUe => {
                let Some(SimUeEvent::DataBearerSetupRequest { items }) = event.take() else {
                    return;
                };
                self.send_to_realue(RealUeEvent::DataBearerSetup { items }).await;
            }
            Action::RelayBearerResultToGnb => {
                let Some(SimUeEvent::DataBearerSetupResult { items }) = event.take() else {
                    return;
                };
                self.send_to_gnb(GnbCpEvent::DataBearerSetupResult { items }).await;
            }
            Action::GeneratePackets => {
                let count = self.data_packets;
                self.send_to_realue(RealUeEvent::GeneratePackets { count }).await;
            }
            Action::TriggerAnRelease => self.send_to_gnb(GnbCpEvent::TriggerAnRelease).await,
            Action::NotifyUeConnectionRelease => {
                self.active_psis.clear();
                self.send_to_realue(RealUeEvent::ConnectionRelease).await;
            }
            Action::DetachGnb => {
                self.to_gnb = None;
                if let Some(join) = self.gnb_join.take() {
                    let _ = join.await;
                }
            }
            Action::ReportPass => self.report(true, String::new()).await,
            Action::ReportFail => {
                let reason = match event.as_ref() {
                    Some(SimUeEvent::UeError { reason }) => reason.clone(),
                    Some(SimUeEvent::DataResult { reason, .. }) => reason.clone(),
                    Some(SimUeEvent::Nas(NasOutcome::PduSessionRejected { psi, cause })) => {
                        format!("session {psi} rejected with cause {cause}")
                    }
                    _ => "procedure failed".into(),
                };
                self.report(false, reason).await;
            }
        }
    }

    /// Routes the first NAS message of a connection, attaching to the gNB if
    /// the UE has no signalling connection yet.
    async fn send_initial_nas(&mut self, pdu: bytes::Bytes) {
        if self.to_gnb.is_none() {
            match self
                .gnb
                .request_connection(self.self_handle.clone(), GnbCpEvent::InitialNas { pdu })
                .await
            {
                Ok((handle, join)) => {
                    self.to_gnb = Some(handle);
                    self.gnb_join = Some(join);
                }
                Err(err) => {
                    warn!(supi = %self.supi, %err, "gNB connection failed");
                    self.report(false, format!("gNB connection failed: {err}")).await;
                }
            }
            return;
        }
        self.send_to_gnb(GnbCpEvent::InitialNas { pdu }).await;
    }

    async fn send_to_realue(&mut self, event: RealUeEvent) {
        match &self.to_realue {
            Some(handle) => {
                if handle.send(event).await.is_err() {
                    warn!(supi = %self.supi, "RealUe mailbox closed");
                    self.to_realue = None;
                }
            }
            None => debug!(supi = %self.supi, "dropping event for detached RealUe"),
        }
    }

    /// Sends to the gNB actor; a detached channel drops the event instead of
    /// blocking.
    async fn send_to_gnb(&mut self, event: GnbCpEvent) {
        match &self.to_gnb {
            Some(handle) => {
                if handle.send(event).await.is_err() {
                    debug!(supi = %self.supi, "gNB actor gone, detaching");
                    self.to_gnb = None;
                }
            }
            None => debug!(supi = %self.supi, "dropping event for detached gNB channel"),
        }
    }

    async fn report(&mut self, pass: bool, reason: String) {
        let Some(procedure) = self.procedure.take() else {
            debug!(supi = %self.supi, pass, "outcome without a running procedure");
            return;
        };
        let result = ProcedureResult {
            supi: self.supi.clone(),
            procedure,
            pass,
            reason,
        };
        info!(supi = %self.supi, "{result}");
        let _ = self.to_scenario.send(result).await;
    }

    /// Ordered teardown: detach the gNB channel first so nothing else is
    /// forwarded, shut down RealUe and wait for it (which transitively joins
    /// every PDU session worker), then leave the registry.
    async fn terminate(&mut self) {
        if let Some(gnb) = self.to_gnb.take() {
            let _ = gnb.shutdown().await;
        }
        if let Some(realue) = self.to_realue.take() {
            let _ = realue.shutdown().await;
        }
        if let Some(join) = self.realue_join.take() {
            let _ = join.await;
        }
        if let Some(join) = self.gnb_join.take() {
            let _ = join.await;
        }
        self.registry.deregister(&self.supi);
        info!(supi = %self.supi, "Sim UE terminated");
    }
}

#[async_trait::async_trait]
impl Task for SimUe {
    type Message = SimUeEvent;

    async fn run(mut self, mut rx: mpsc::Receiver<TaskMessage<SimUeEvent>>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                TaskMessage::Shutdown => break,
                TaskMessage::Message(event) => self.handle_event(event).await,
            }
        }
        self.terminate().await;
    }
}
