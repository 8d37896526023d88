//! GNodeB context
//!
//! Owns the N2 link to the AMF and the N3 GTP-U socket, performs the NG
//! Setup procedure at startup, and runs the two receive-dispatch loops:
//! decoded NGAP PDUs are routed to the owning GnbCpUe actor by RAN UE NGAP
//! id, GTP-U packets to the owning GnbUpUe worker by TEID.

use bytes::Bytes;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ransim_common::config::{AmfConfig, GnbConfig};
use ransim_common::events::SimUeEvent;
use ransim_common::types::{Plmn, Snssai};
use ransim_common::{log_ngap_message, Direction, Error, TaskHandle, UdpTransport};
use ransim_gtp::{decode_gtpu, encode_gpdu, GtpMessageType};
use ransim_ngap::{decode_ngap_pdu, encode_ngap_pdu, NgSetupRequest, NgapPdu};

use crate::cp_ue::{GnbCpEvent, GnbCpUeTask};
use crate::idrange::{range_for_gnb, IdGenerator};

/// How long to wait for the NG Setup response.
const NG_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A simulated gNodeB attached to one AMF.
pub struct GNodeB {
    name: String,
    plmn: Plmn,
    tac: u32,
    nci: u64,
    gnb_id: u32,
    slices: Vec<Snssai>,
    cp: UdpTransport,
    up: UdpTransport,
    n3_address: Ipv4Addr,
    upf_port_override: Mutex<Option<u16>>,
    router: Mutex<HashMap<i64, TaskHandle<GnbCpEvent>>>,
    up_router: Mutex<HashMap<u32, mpsc::Sender<Bytes>>>,
    ran_ids: Mutex<IdGenerator>,
    teids: Mutex<IdGenerator>,
}

impl GNodeB {
    /// Binds the gNB sockets and connects the control plane to the AMF.
    ///
    /// The returned gNB has not performed NG Setup yet; call
    /// [`perform_ng_setup`](Self::perform_ng_setup) before attaching UEs.
    pub async fn connect(
        name: &str,
        config: &GnbConfig,
        amf: &AmfConfig,
        slices: Vec<Snssai>,
    ) -> Result<Arc<Self>, Error> {
        let n2_addr: SocketAddr = config
            .n2_bind_addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid n2BindAddr: {e}")))?;
        let n3_addr: SocketAddr = config
            .n3_bind_addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid n3BindAddr: {e}")))?;

        let cp = UdpTransport::bind(n2_addr).await?;
        let up = UdpTransport::bind(n3_addr).await?;

        let amf_addr = lookup_host((amf.host.as_str(), amf.port))
            .await?
            .next()
            .ok_or_else(|| Error::PeerNotFound(format!("AMF host {} did not resolve", amf.host)))?;
        cp.connect(amf_addr).await?;
        info!(gnb = name, %amf_addr, "control plane connected to AMF");

        let n3_address = match up.local_addr()? {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };

        let (id_start, id_end) = range_for_gnb(config.gnb_index);
        Ok(Arc::new(Self {
            name: name.to_string(),
            plmn: config.plmn,
            tac: config.tac,
            nci: config.nci,
            gnb_id: u32::from(config.gnb_index) + 1,
            slices,
            cp,
            up,
            n3_address,
            upf_port_override: Mutex::new(None),
            router: Mutex::new(HashMap::new()),
            up_router: Mutex::new(HashMap::new()),
            ran_ids: Mutex::new(IdGenerator::new(id_start, id_end)),
            teids: Mutex::new(IdGenerator::new(id_start, id_end)),
        }))
    }

    /// gNB name for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serving PLMN.
    pub fn plmn(&self) -> Plmn {
        self.plmn
    }

    /// Tracking area code.
    pub fn tac(&self) -> u32 {
        self.tac
    }

    /// NR cell identity.
    pub fn nci(&self) -> u64 {
        self.nci
    }

    /// Local N3 (GTP-U) address advertised in setup responses.
    pub fn n3_address(&self) -> Ipv4Addr {
        self.n3_address
    }

    /// Overrides the UPF destination port for user-plane traffic.
    ///
    /// Test deployments run their UPF on an ephemeral port instead of 2152.
    pub fn set_upf_port(&self, port: u16) {
        *lock(&self.upf_port_override) = Some(port);
    }

    fn upf_port(&self) -> u16 {
        lock(&self.upf_port_override).unwrap_or(ransim_gtp::GTP_U_PORT)
    }

    /// Performs the NG Setup procedure. Fatal for this gNB on failure.
    pub async fn perform_ng_setup(&self) -> Result<(), Error> {
        let request = NgapPdu::NgSetupRequest(NgSetupRequest {
            gnb_id: self.gnb_id,
            ran_node_name: self.name.clone(),
            plmn: self.plmn,
            tac: self.tac,
            slices: self.slices.clone(),
        });
        self.send_ngap(&request).await?;

        let raw = tokio::time::timeout(NG_SETUP_TIMEOUT, self.cp.recv())
            .await
            .map_err(|_| Error::Config("NG setup timed out".into()))??;
        match decode_ngap_pdu(&raw)? {
            NgapPdu::NgSetupResponse(response) => {
                info!(gnb = %self.name, amf = %response.amf_name, "NG setup complete");
                Ok(())
            }
            NgapPdu::NgSetupFailure(failure) => Err(Error::Config(format!(
                "NG setup rejected with cause {}",
                failure.cause
            ))),
            other => Err(Error::Config(format!(
                "unexpected {} during NG setup",
                other.procedure_name()
            ))),
        }
    }

    /// Spawns the N2 and N3 receive-dispatch loops.
    pub fn start_receive_loops(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let cp_gnb = Arc::clone(self);
        let cp_loop = tokio::spawn(async move { cp_gnb.run_cp_receive().await });
        let up_gnb = Arc::clone(self);
        let up_loop = tokio::spawn(async move { up_gnb.run_up_receive().await });
        (cp_loop, up_loop)
    }

    async fn run_cp_receive(self: Arc<Self>) {
        loop {
            let raw = match self.cp.recv().await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(gnb = %self.name, %err, "N2 receive failed, stopping dispatch");
                    return;
                }
            };
            let pdu = match decode_ngap_pdu(&raw) {
                Ok(pdu) => pdu,
                Err(err) => {
                    // A malformed PDU aborts interpretation of that message
                    // only.
                    warn!(gnb = %self.name, %err, "dropping undecodable NGAP PDU");
                    continue;
                }
            };
            log_ngap_message(Direction::Rx, pdu.procedure_name(), &raw);

            let Some(ran_ue_ngap_id) = pdu.ran_ue_ngap_id() else {
                warn!(gnb = %self.name, procedure = pdu.procedure_name(),
                    "unexpected non-UE-associated PDU after setup");
                continue;
            };
            let handle = lock(&self.router).get(&ran_ue_ngap_id).cloned();
            match handle {
                Some(handle) => {
                    if handle.send(GnbCpEvent::FromNetwork(pdu)).await.is_err() {
                        debug!(gnb = %self.name, ran_ue_ngap_id, "UE actor gone, dropping PDU");
                    }
                }
                None => {
                    warn!(gnb = %self.name, ran_ue_ngap_id, "no UE context for inbound PDU");
                }
            }
        }
    }

    async fn run_up_receive(self: Arc<Self>) {
        loop {
            let (raw, _src) = match self.up.recv_from().await {
                Ok(received) => received,
                Err(err) => {
                    warn!(gnb = %self.name, %err, "N3 receive failed, stopping dispatch");
                    return;
                }
            };
            let packet = match decode_gtpu(&raw) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(gnb = %self.name, %err, "dropping undecodable GTP packet");
                    continue;
                }
            };
            if packet.message_type != GtpMessageType::GPdu {
                debug!(gnb = %self.name, ?packet.message_type, "ignoring non-G-PDU");
                continue;
            }
            let target = lock(&self.up_router).get(&packet.teid).cloned();
            match target {
                Some(tx) => {
                    let _ = tx.send(packet.payload).await;
                }
                None => debug!(gnb = %self.name, teid = packet.teid, "no tunnel for inbound packet"),
            }
        }
    }

    /// Attaches a new simulated UE to this gNB.
    ///
    /// Allocates a RAN UE NGAP id, spawns the per-UE control-plane actor,
    /// delivers `initial` as its first event, and returns the mailbox handle
    /// plus the actor's join handle.
    pub async fn request_connection(
        self: &Arc<Self>,
        to_simue: TaskHandle<SimUeEvent>,
        initial: GnbCpEvent,
    ) -> Result<(TaskHandle<GnbCpEvent>, JoinHandle<()>), Error> {
        let ran_ue_ngap_id = lock(&self.ran_ids).allocate()?;
        let (handle, rx) = TaskHandle::channel(ransim_common::DEFAULT_CHANNEL_CAPACITY);
        lock(&self.router).insert(ran_ue_ngap_id, handle.clone());

        let task = GnbCpUeTask::new(Arc::clone(self), ran_ue_ngap_id, to_simue);
        let join = tokio::spawn(ransim_common::Task::run(task, rx));

        handle
            .send(initial)
            .await
            .map_err(|_| Error::PeerNotFound("gNB UE actor exited prematurely".into()))?;
        debug!(gnb = %self.name, ran_ue_ngap_id, "UE attached");
        Ok((handle, join))
    }

    /// Encodes and sends an NGAP PDU to the AMF.
    pub async fn send_ngap(&self, pdu: &NgapPdu) -> Result<(), Error> {
        let encoded = encode_ngap_pdu(pdu)?;
        log_ngap_message(Direction::Tx, pdu.procedure_name(), &encoded);
        self.cp.send(&encoded).await
    }

    /// Sends a user packet through the uplink tunnel towards the UPF.
    pub async fn send_gtp(
        &self,
        teid: u32,
        upf_address: Ipv4Addr,
        payload: &[u8],
    ) -> Result<(), Error> {
        let encoded = encode_gpdu(teid, payload);
        let dest = SocketAddr::from((upf_address, self.upf_port()));
        self.up.send_to(&encoded, dest).await
    }

    /// Allocates a downlink TEID.
    pub fn allocate_teid(&self) -> Result<u32, Error> {
        Ok(lock(&self.teids).allocate()? as u32)
    }

    /// Registers the downlink demux target for a TEID.
    pub fn register_tunnel(&self, teid: u32, dl_tx: mpsc::Sender<Bytes>) {
        lock(&self.up_router).insert(teid, dl_tx);
    }

    /// Removes a tunnel's demux entry and returns its TEID to the pool.
    pub fn unregister_tunnel(&self, teid: u32) {
        lock(&self.up_router).remove(&teid);
        lock(&self.teids).release(i64::from(teid));
    }

    /// Removes a UE from the NGAP router and returns its id to the pool.
    pub fn unregister_ue(&self, ran_ue_ngap_id: i64) {
        lock(&self.router).remove(&ran_ue_ngap_id);
        lock(&self.ran_ids).release(ran_ue_ngap_id);
    }

    /// Number of UEs currently routed by this gNB.
    pub fn attached_ues(&self) -> usize {
        lock(&self.router).len()
    }
}

/// Locks a mutex, recovering from poisoning (no lock holder panics while
/// holding simulator state).
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
