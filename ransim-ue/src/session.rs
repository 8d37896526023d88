//! PDU session actor
//!
//! One worker task per established PDU session. The worker services three
//! mailboxes concurrently: commands from the owning RealUe, uplink data
//! injected from the UE side, and downlink data arriving from the gNB user
//! plane. Commands are always checked first so a release or quit stops the
//! loop promptly even while data is flowing.

use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ransim_common::events::RealUeEvent;
use ransim_common::types::{PduSessionType, Snssai};
use ransim_common::{TaskHandle, DEFAULT_CHANNEL_CAPACITY};

/// PDU session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists in the UE's map, no worker yet
    Created,
    /// Worker spawned, waiting for its data path
    Launched,
    /// Data path wired, uplink/downlink flowing
    Active,
    /// Release received, worker winding down
    Releasing,
    /// Worker exited
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "Created"),
            SessionState::Launched => write!(f, "Launched"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Releasing => write!(f, "Releasing"),
            SessionState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Commands delivered on a session's command mailbox.
#[derive(Debug)]
pub enum SessionCommand {
    /// Wire the uplink data path towards the gNB user plane
    Activate {
        /// Sender for uplink packets, session → GnbUpUe
        ul_tx: mpsc::Sender<Bytes>,
    },
    /// Generate uplink packets and report the outcome to the owning UE
    GeneratePackets {
        /// Number of packets to send
        count: u32,
    },
    /// Network-commanded release; stop the loop
    Release,
    /// Owner teardown; stop the loop
    Quit,
}

/// The UE-side handle for one PDU session, owned by the RealUe actor.
///
/// Holds the session parameters negotiated in the establishment accept and
/// the sender ends of the worker's mailboxes. The receiver ends are consumed
/// exactly once when the worker launches.
pub struct PduSession {
    /// Network-assigned session id
    pub psi: u8,
    /// Negotiated session type
    pub session_type: PduSessionType,
    /// Negotiated SSC mode
    pub ssc_mode: u8,
    /// Allocated address
    pub address: Option<Ipv4Addr>,
    /// Data network the session was requested for
    pub dnn: String,
    /// Slice the session was requested on
    pub snssai: Snssai,
    cmd_tx: mpsc::Sender<SessionCommand>,
    dl_tx: mpsc::Sender<Bytes>,
    ul_in_tx: mpsc::Sender<Bytes>,
    worker: Option<WorkerChannels>,
}

struct WorkerChannels {
    cmd_rx: mpsc::Receiver<SessionCommand>,
    dl_rx: mpsc::Receiver<Bytes>,
    ul_in_rx: mpsc::Receiver<Bytes>,
}

impl PduSession {
    /// Creates the session entry and its three mailboxes.
    pub fn new(
        psi: u8,
        session_type: PduSessionType,
        ssc_mode: u8,
        address: Option<Ipv4Addr>,
        dnn: String,
        snssai: Snssai,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (dl_tx, dl_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (ul_in_tx, ul_in_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            psi,
            session_type,
            ssc_mode,
            address,
            dnn,
            snssai,
            cmd_tx,
            dl_tx,
            ul_in_tx,
            worker: Some(WorkerChannels {
                cmd_rx,
                dl_rx,
                ul_in_rx,
            }),
        }
    }

    /// True once the worker has been spawned.
    pub fn launched(&self) -> bool {
        self.worker.is_none()
    }

    /// Spawns the worker into `join_set` if it has not been launched yet.
    ///
    /// Launching is atomic by construction: only the owning RealUe task ever
    /// calls this, and the receiver ends can be taken exactly once. Returns
    /// false when the session was already launched.
    pub fn launch(&mut self, to_ue: TaskHandle<RealUeEvent>, join_set: &mut JoinSet<()>) -> bool {
        let Some(channels) = self.worker.take() else {
            return false;
        };
        let worker = SessionWorker {
            psi: self.psi,
            address: self.address,
            to_ue,
            ul_tx: None,
            cmd_rx: channels.cmd_rx,
            dl_rx: channels.dl_rx,
            ul_in_rx: channels.ul_in_rx,
            state: SessionState::Launched,
        };
        join_set.spawn(worker.run());
        true
    }

    /// Sender for the command mailbox.
    pub fn cmd_tx(&self) -> mpsc::Sender<SessionCommand> {
        self.cmd_tx.clone()
    }

    /// Sender for the downlink data mailbox (handed to the gNB user plane).
    pub fn dl_tx(&self) -> mpsc::Sender<Bytes> {
        self.dl_tx.clone()
    }

    /// Sender for injected uplink data.
    pub fn ul_tx(&self) -> mpsc::Sender<Bytes> {
        self.ul_in_tx.clone()
    }
}

struct SessionWorker {
    psi: u8,
    address: Option<Ipv4Addr>,
    to_ue: TaskHandle<RealUeEvent>,
    ul_tx: Option<mpsc::Sender<Bytes>>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    dl_rx: mpsc::Receiver<Bytes>,
    ul_in_rx: mpsc::Receiver<Bytes>,
    state: SessionState,
}

impl SessionWorker {
    async fn run(mut self) {
        debug!(psi = self.psi, "PDU session worker started");
        loop {
            tokio::select! {
                // Commands win whenever both a command and data are ready,
                // so release/quit is never starved by a busy data path.
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Activate { ul_tx }) => {
                            self.ul_tx = Some(ul_tx);
                            self.state = SessionState::Active;
                            debug!(psi = self.psi, "PDU session active");
                        }
                        Some(SessionCommand::GeneratePackets { count }) => {
                            self.generate_packets(count).await;
                        }
                        Some(SessionCommand::Release) => {
                            self.state = SessionState::Releasing;
                            break;
                        }
                        Some(SessionCommand::Quit) | None => break,
                    }
                }
                Some(packet) = self.ul_in_rx.recv() => {
                    self.forward_uplink(packet).await;
                }
                Some(packet) = self.dl_rx.recv() => {
                    debug!(psi = self.psi, len = packet.len(), "downlink packet");
                }
            }
        }
        self.state = SessionState::Terminated;
        info!(psi = self.psi, "PDU session worker terminated");
    }

    async fn forward_uplink(&mut self, packet: Bytes) {
        match &self.ul_tx {
            Some(tx) => {
                if tx.send(packet).await.is_err() {
                    warn!(psi = self.psi, "uplink peer gone, dropping packet");
                    self.ul_tx = None;
                }
            }
            None => warn!(psi = self.psi, "uplink data before data path is wired"),
        }
    }

    /// Sends `count` synthetic uplink packets and reports the outcome to the
    /// owning UE.
    async fn generate_packets(&mut self, count: u32) {
        let result = self.try_generate(count).await;
        let (success, reason) = match result {
            Ok(()) => (true, String::new()),
            Err(reason) => (false, reason),
        };
        let _ = self
            .to_ue
            .send(RealUeEvent::SessionResult {
                psi: self.psi,
                success,
                reason,
            })
            .await;
    }

    async fn try_generate(&mut self, count: u32) -> Result<(), String> {
        if self.state != SessionState::Active {
            return Err(format!("session {} is not active", self.psi));
        }
        let tx = self
            .ul_tx
            .as_ref()
            .ok_or_else(|| format!("session {} has no uplink path", self.psi))?;
        for seq in 0..count {
            let packet = build_test_packet(self.psi, self.address, seq);
            tx.send(packet)
                .await
                .map_err(|_| format!("uplink peer for session {} is gone", self.psi))?;
        }
        Ok(())
    }
}

/// Builds one synthetic uplink user packet.
fn build_test_packet(psi: u8, address: Option<Ipv4Addr>, seq: u32) -> Bytes {
    let src = address.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let mut packet = Vec::with_capacity(16);
    packet.extend_from_slice(&src.octets());
    packet.push(psi);
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(b"ransim");
    Bytes::from(packet)
}
