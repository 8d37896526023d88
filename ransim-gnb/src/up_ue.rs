//! Per-session user-plane worker
//!
//! Bridges one PDU session's data channels to the GTP-U tunnel: uplink
//! packets from the session worker are wrapped and sent towards the UPF,
//! downlink tunnel packets (demultiplexed by TEID in the gNB receive loop)
//! are forwarded into the session's downlink mailbox. On quit the loop stops
//! immediately without draining in-flight packets.

use bytes::Bytes;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::gnodeb::GNodeB;

/// Commands for a user-plane worker.
#[derive(Debug)]
pub enum UpCommand {
    /// Stop the loop without draining
    Quit,
}

/// The per-session user-plane worker.
pub struct GnbUpUeTask {
    gnb: Arc<GNodeB>,
    psi: u8,
    ul_teid: u32,
    dl_teid: u32,
    upf_address: Ipv4Addr,
    session_dl_tx: mpsc::Sender<Bytes>,
    ul_rx: mpsc::Receiver<Bytes>,
    dl_rx: mpsc::Receiver<Bytes>,
    cmd_rx: mpsc::Receiver<UpCommand>,
}

impl GnbUpUeTask {
    /// Creates the worker for one admitted session.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gnb: Arc<GNodeB>,
        psi: u8,
        ul_teid: u32,
        dl_teid: u32,
        upf_address: Ipv4Addr,
        session_dl_tx: mpsc::Sender<Bytes>,
        ul_rx: mpsc::Receiver<Bytes>,
        dl_rx: mpsc::Receiver<Bytes>,
        cmd_rx: mpsc::Receiver<UpCommand>,
    ) -> Self {
        Self {
            gnb,
            psi,
            ul_teid,
            dl_teid,
            upf_address,
            session_dl_tx,
            ul_rx,
            dl_rx,
            cmd_rx,
        }
    }

    /// Runs the bridge loop until quit.
    pub async fn run(mut self) {
        debug!(psi = self.psi, ul_teid = self.ul_teid, dl_teid = self.dl_teid,
            "user-plane worker started");
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(UpCommand::Quit) | None => break,
                },
                Some(packet) = self.ul_rx.recv() => {
                    if let Err(err) = self
                        .gnb
                        .send_gtp(self.ul_teid, self.upf_address, &packet)
                        .await
                    {
                        warn!(psi = self.psi, %err, "uplink GTP send failed");
                    }
                }
                Some(packet) = self.dl_rx.recv() => {
                    if self.session_dl_tx.send(packet).await.is_err() {
                        warn!(psi = self.psi, "session worker gone, dropping downlink packet");
                    }
                }
            }
        }
        info!(psi = self.psi, "user-plane worker terminated");
    }
}
