//! Test core network: a scripted AMF with an echoing UPF
//!
//! Implements just enough of the core side to carry the simulator's
//! procedures over real sockets: NG Setup, 5G AKA with Milenage, NAS
//! security (NIA2/NEA2 with downlink direction), PDU session setup/release
//! and context release. The UPF side counts uplink G-PDUs and echoes them
//! back down the tunnel.

use bytes::{Buf, Bytes};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use ransim_common::types::{Guti5G, PduSessionType, Plmn};
use ransim_common::UdpTransport;
use ransim_crypto::kdf::{derive_kamf, derive_kausf, derive_knas_key, derive_kseaf, AlgorithmType};
use ransim_crypto::{nea2_cipher, nia2_compute_mac, Milenage};
use ransim_gtp::{decode_gtpu, encode_gpdu};
use ransim_nas::messages::{
    AuthenticationRequest, DlNasTransport, MmMessage, NasMessage, RegistrationAccept,
    SecurityModeCommand,
};
use ransim_nas::{decode_plain, SecurityHeaderType, SmMessage};
use ransim_ngap::*;

/// Identity and key material the test core shares with the UE profile.
#[derive(Clone)]
pub struct CoreConfig {
    pub supi: String,
    pub plmn: Plmn,
    pub key: [u8; 16],
    pub opc: [u8; 16],
    pub sqn: u64,
    /// Session id the core assigns in establishment accepts
    pub assigned_psi: u8,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            supi: "imsi-208930000000001".into(),
            plmn: Plmn::new(208, 93),
            key: [0x11; 16],
            opc: [0x22; 16],
            sqn: 0x20,
            assigned_psi: 5,
        }
    }
}

/// Observable state shared with the test body.
#[derive(Default)]
pub struct CoreObservations {
    /// Uplink NAS message names in arrival order
    pub nas_log: Mutex<Vec<String>>,
    /// Uplink G-PDUs received by the UPF
    pub up_packets: AtomicU32,
    /// Downlink G-PDUs echoed back
    pub echoed: AtomicU32,
}

impl CoreObservations {
    pub fn nas_order(&self) -> Vec<String> {
        self.nas_log.lock().unwrap().clone()
    }
}

struct UeCtx {
    ran_ue_ngap_id: i64,
    amf_ue_ngap_id: i64,
    keys: Option<NasKeys>,
    expected_res_star: Option<[u8; 16]>,
    dl_count: u32,
    rand: [u8; 16],
    autn: [u8; 16],
}

struct NasKeys {
    knas_enc: [u8; 16],
    knas_int: [u8; 16],
}

/// The scripted core network endpoint.
pub struct TestCore {
    pub n2_addr: SocketAddr,
    pub upf_port: u16,
    pub obs: Arc<CoreObservations>,
    _n2_task: JoinHandle<()>,
    _n3_task: JoinHandle<()>,
}

impl TestCore {
    /// Binds the core sockets and starts serving.
    pub async fn start(config: CoreConfig) -> Self {
        let n2 = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind test AMF");
        let n3 = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind test UPF");
        let n2_addr = n2.local_addr().unwrap();
        let upf_port = n3.local_addr().unwrap().port();

        let obs = Arc::new(CoreObservations::default());
        let dl_teid = Arc::new(Mutex::new(None::<u32>));

        let amf = AmfSide {
            config,
            n2,
            obs: Arc::clone(&obs),
            dl_teid: Arc::clone(&dl_teid),
        };
        let n2_task = tokio::spawn(amf.run());
        let n3_task = tokio::spawn(upf_echo(n3, Arc::clone(&obs), dl_teid));

        Self {
            n2_addr,
            upf_port,
            obs,
            _n2_task: n2_task,
            _n3_task: n3_task,
        }
    }
}

/// UPF side: count uplink packets and echo them down the tunnel.
async fn upf_echo(n3: UdpTransport, obs: Arc<CoreObservations>, dl_teid: Arc<Mutex<Option<u32>>>) {
    loop {
        let Ok((raw, src)) = n3.recv_from().await else {
            return;
        };
        let Ok(packet) = decode_gtpu(&raw) else {
            continue;
        };
        obs.up_packets.fetch_add(1, Ordering::SeqCst);
        let teid = *dl_teid.lock().unwrap();
        if let Some(teid) = teid {
            let echo = encode_gpdu(teid, &packet.payload);
            if n3.send_to(&echo, src).await.is_ok() {
                obs.echoed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

struct AmfSide {
    config: CoreConfig,
    n2: UdpTransport,
    obs: Arc<CoreObservations>,
    dl_teid: Arc<Mutex<Option<u32>>>,
}

impl AmfSide {
    async fn run(mut self) {
        let mut ctx: Option<UeCtx> = None;
        loop {
            let Ok((raw, src)) = self.n2.recv_from().await else {
                return;
            };
            let Ok(pdu) = decode_ngap_pdu(&raw) else {
                continue;
            };
            let replies = self.handle(&mut ctx, pdu);
            for reply in replies {
                let encoded = encode_ngap_pdu(&reply).expect("encode test core reply");
                self.n2.send_to(&encoded, src).await.expect("send reply");
            }
        }
    }

    fn handle(&mut self, ctx: &mut Option<UeCtx>, pdu: NgapPdu) -> Vec<NgapPdu> {
        match pdu {
            NgapPdu::NgSetupRequest(_) => vec![NgapPdu::NgSetupResponse(NgSetupResponse {
                amf_name: "test-core".into(),
                relative_capacity: 255,
            })],
            NgapPdu::InitialUeMessage(message) => {
                self.handle_initial(ctx, message.ran_ue_ngap_id, &message.nas_pdu)
            }
            NgapPdu::UplinkNasTransport(transport) => {
                let Some(ctx) = ctx.as_mut() else {
                    return vec![];
                };
                let nas = transport.nas_pdu.to_vec();
                self.handle_uplink_nas(ctx, &nas)
            }
            NgapPdu::PduSessionResourceSetupResponse(response) => {
                if let Some(item) = response.setup_items.first() {
                    *self.dl_teid.lock().unwrap() = Some(item.dl_teid);
                }
                vec![]
            }
            NgapPdu::UeContextReleaseRequest(request) => {
                vec![NgapPdu::UeContextReleaseCommand(UeContextReleaseCommand {
                    amf_ue_ngap_id: request.amf_ue_ngap_id,
                    ran_ue_ngap_id: Some(request.ran_ue_ngap_id),
                    cause: request.cause,
                })]
            }
            NgapPdu::InitialContextSetupResponse(_)
            | NgapPdu::PduSessionResourceReleaseResponse(_)
            | NgapPdu::UeContextReleaseComplete(_) => vec![],
            other => panic!("test core got unexpected {}", other.procedure_name()),
        }
    }

    fn handle_initial(
        &mut self,
        ctx: &mut Option<UeCtx>,
        ran_ue_ngap_id: i64,
        nas: &[u8],
    ) -> Vec<NgapPdu> {
        // An initial message either opens a new UE (registration) or
        // re-attaches a known one (service request after AN release).
        match ctx.as_mut() {
            Some(existing) if existing.keys.is_some() => {
                existing.ran_ue_ngap_id = ran_ue_ngap_id;
                self.handle_uplink_nas(existing, nas)
            }
            _ => {
                let mut new_ctx = self.new_ue_ctx(ran_ue_ngap_id);
                let reply = self.start_authentication(&mut new_ctx, nas);
                *ctx = Some(new_ctx);
                reply
            }
        }
    }

    fn new_ue_ctx(&self, ran_ue_ngap_id: i64) -> UeCtx {
        let rand = [0x5a; 16];
        let sqn_bytes = self.config.sqn.to_be_bytes();
        let mut sqn = [0u8; 6];
        sqn.copy_from_slice(&sqn_bytes[2..]);
        // Advance like a real core would for a fresh challenge.
        sqn[5] = sqn[5].wrapping_add(1);
        let amf_field = [0x80, 0x00];

        let milenage = Milenage::new(&self.config.key, &self.config.opc);
        let (_res, _ck, _ik, ak) = milenage.f2345(&rand);
        let mac = milenage.f1(&rand, &sqn, &amf_field);
        let mut autn = [0u8; 16];
        for i in 0..6 {
            autn[i] = sqn[i] ^ ak[i];
        }
        autn[6..8].copy_from_slice(&amf_field);
        autn[8..16].copy_from_slice(&mac);

        UeCtx {
            ran_ue_ngap_id,
            amf_ue_ngap_id: 1000 + ran_ue_ngap_id,
            keys: None,
            expected_res_star: None,
            dl_count: 0,
            rand,
            autn,
        }
    }

    fn start_authentication(&mut self, ctx: &mut UeCtx, nas: &[u8]) -> Vec<NgapPdu> {
        match decode_plain(nas) {
            Ok(NasMessage::Mm(MmMessage::RegistrationRequest(_))) => {
                self.log_nas("RegistrationRequest");
            }
            other => panic!("expected registration request, got {other:?}"),
        }
        let challenge = MmMessage::AuthenticationRequest(AuthenticationRequest {
            ngksi: 1,
            abba: vec![0x00, 0x00],
            rand: ctx.rand,
            autn: ctx.autn,
        });
        vec![self.downlink_nas(ctx, challenge.encode())]
    }

    fn handle_uplink_nas(&mut self, ctx: &mut UeCtx, nas: &[u8]) -> Vec<NgapPdu> {
        let plain = self.unprotect_ul(ctx, nas);
        let message = decode_plain(&plain).expect("decode uplink NAS");
        match message {
            NasMessage::Mm(MmMessage::AuthenticationResponse(response)) => {
                self.log_nas("AuthenticationResponse");
                self.derive_keys(ctx);
                assert_eq!(
                    Some(response.res_star),
                    ctx.expected_res_star,
                    "RES* mismatch"
                );
                let smc = MmMessage::SecurityModeCommand(SecurityModeCommand {
                    ngksi: 1,
                    ciphering_alg: 2,
                    integrity_alg: 2,
                    replayed_capabilities: [0xa0, 0x20],
                });
                let protected = self.protect_dl(
                    ctx,
                    SecurityHeaderType::IntegrityProtectedWithNewContext,
                    &smc.encode(),
                );
                vec![NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
                    amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                    ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                    nas_pdu: protected,
                })]
            }
            NasMessage::Mm(MmMessage::SecurityModeComplete) => {
                self.log_nas("SecurityModeComplete");
                let accept = MmMessage::RegistrationAccept(RegistrationAccept {
                    guti: Some(Guti5G {
                        plmn: self.config.plmn,
                        amf_region_id: 1,
                        amf_set_id: 1,
                        amf_pointer: 0,
                        tmsi: 0x0000_4242,
                    }),
                });
                let protected = self.protect_dl(
                    ctx,
                    SecurityHeaderType::IntegrityProtectedAndCiphered,
                    &accept.encode(),
                );
                vec![NgapPdu::InitialContextSetupRequest(
                    InitialContextSetupRequest {
                        amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                        ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                        nas_pdu: Some(protected),
                    },
                )]
            }
            NasMessage::Mm(MmMessage::RegistrationComplete) => {
                self.log_nas("RegistrationComplete");
                vec![]
            }
            NasMessage::Mm(MmMessage::ServiceRequest(_)) => {
                self.log_nas("ServiceRequest");
                let protected =
                    self.protect_dl(ctx, SecurityHeaderType::IntegrityProtectedAndCiphered, &MmMessage::ServiceAccept.encode());
                vec![NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
                    amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                    ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                    nas_pdu: protected,
                })]
            }
            NasMessage::Mm(MmMessage::DeregistrationRequest(_)) => {
                self.log_nas("DeregistrationRequest");
                let protected = self.protect_dl(
                    ctx,
                    SecurityHeaderType::IntegrityProtectedAndCiphered,
                    &MmMessage::DeregistrationAccept.encode(),
                );
                vec![
                    NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
                        amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                        ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                        nas_pdu: protected,
                    }),
                    NgapPdu::UeContextReleaseCommand(UeContextReleaseCommand {
                        amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                        ran_ue_ngap_id: Some(ctx.ran_ue_ngap_id),
                        cause: 0,
                    }),
                ]
            }
            NasMessage::Mm(MmMessage::UlNasTransport(transport)) => {
                let inner = decode_plain(&transport.payload).expect("decode SM payload");
                let NasMessage::Sm(sm) = inner else {
                    panic!("expected SM payload, got {inner:?}");
                };
                self.handle_uplink_sm(ctx, sm)
            }
            other => panic!("test core got unexpected NAS {other:?}"),
        }
    }

    fn handle_uplink_sm(&mut self, ctx: &mut UeCtx, sm: SmMessage) -> Vec<NgapPdu> {
        match sm {
            SmMessage::EstablishmentRequest { pti, .. } => {
                self.log_nas("PduSessionEstablishmentRequest");
                let psi = self.config.assigned_psi;
                let accept = SmMessage::EstablishmentAccept {
                    psi,
                    pti,
                    session_type: PduSessionType::Ipv4,
                    ssc_mode: 1,
                    address: Some(Ipv4Addr::new(10, 0, 0, 1)),
                };
                let transport = MmMessage::DlNasTransport(DlNasTransport {
                    payload: accept.encode(),
                });
                let protected = self.protect_dl(
                    ctx,
                    SecurityHeaderType::IntegrityProtectedAndCiphered,
                    &transport.encode(),
                );
                vec![NgapPdu::PduSessionResourceSetupRequest(
                    PduSessionResourceSetupRequest {
                        amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                        ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                        items: vec![PduSessionSetupItem {
                            psi,
                            nas_pdu: Some(protected),
                            ul_teid: 0x100,
                            upf_address: Ipv4Addr::new(127, 0, 0, 1),
                            qfi: 1,
                        }],
                    },
                )]
            }
            SmMessage::ReleaseRequest { psi, pti } => {
                self.log_nas("PduSessionReleaseRequest");
                let command = SmMessage::ReleaseCommand { psi, pti, cause: 36 };
                let transport = MmMessage::DlNasTransport(DlNasTransport {
                    payload: command.encode(),
                });
                let protected = self.protect_dl(
                    ctx,
                    SecurityHeaderType::IntegrityProtectedAndCiphered,
                    &transport.encode(),
                );
                vec![NgapPdu::PduSessionResourceReleaseCommand(
                    PduSessionResourceReleaseCommand {
                        amf_ue_ngap_id: ctx.amf_ue_ngap_id,
                        ran_ue_ngap_id: ctx.ran_ue_ngap_id,
                        nas_pdu: Some(protected),
                        psis: vec![psi],
                    },
                )]
            }
            SmMessage::ReleaseComplete { .. } => {
                self.log_nas("PduSessionReleaseComplete");
                vec![]
            }
            other => panic!("test core got unexpected SM {other:?}"),
        }
    }

    // --------------------------------------------------------------------
    // NAS security, core side
    // --------------------------------------------------------------------

    fn derive_keys(&self, ctx: &mut UeCtx) {
        let snn = format!(
            "5G:mnc{:03}.mcc{:03}.3gppnetwork.org",
            self.config.plmn.mnc, self.config.plmn.mcc
        );
        let milenage = Milenage::new(&self.config.key, &self.config.opc);
        let (res, ck, ik, _ak) = milenage.f2345(&ctx.rand);
        let mut sqn_xor_ak = [0u8; 6];
        sqn_xor_ak.copy_from_slice(&ctx.autn[..6]);

        ctx.expected_res_star = Some(ransim_crypto::kdf::derive_res_star(
            &ck, &ik, &snn, &ctx.rand, &res,
        ));
        let kausf = derive_kausf(&ck, &ik, &snn, &sqn_xor_ak);
        let kseaf = derive_kseaf(&kausf, &snn);
        let kamf = derive_kamf(&kseaf, &self.config.supi, &[0x00, 0x00]);
        ctx.keys = Some(NasKeys {
            knas_enc: derive_knas_key(&kamf, AlgorithmType::NasEnc, 2),
            knas_int: derive_knas_key(&kamf, AlgorithmType::NasInt, 2),
        });
    }

    fn downlink_nas(&self, ctx: &UeCtx, plain: Bytes) -> NgapPdu {
        NgapPdu::DownlinkNasTransport(DownlinkNasTransport {
            amf_ue_ngap_id: ctx.amf_ue_ngap_id,
            ran_ue_ngap_id: ctx.ran_ue_ngap_id,
            nas_pdu: plain,
        })
    }

    fn protect_dl(&self, ctx: &mut UeCtx, header: SecurityHeaderType, plain: &[u8]) -> Bytes {
        let keys = ctx.keys.as_ref().expect("keys derived");
        let count = ctx.dl_count;
        let seq = (count & 0xff) as u8;
        let payload = if header.is_ciphered() {
            nea2_cipher(count, 1, 1, &keys.knas_enc, plain)
        } else {
            plain.to_vec()
        };
        let mut mac_input = vec![seq];
        mac_input.extend_from_slice(&payload);
        let mac = nia2_compute_mac(count, 1, 1, &keys.knas_int, &mac_input);

        let mut pdu = vec![0x7e, header as u8];
        pdu.extend_from_slice(&mac);
        pdu.push(seq);
        pdu.extend_from_slice(&payload);
        ctx.dl_count += 1;
        Bytes::from(pdu)
    }

    fn unprotect_ul(&self, ctx: &UeCtx, pdu: &[u8]) -> Vec<u8> {
        if pdu.len() < 2 || pdu[1] == 0 || pdu[0] == 0x2e {
            return pdu.to_vec();
        }
        let keys = ctx.keys.as_ref().expect("protected uplink before keys");
        let header = SecurityHeaderType::try_from(pdu[1]).expect("valid security header");
        let mut buf = &pdu[2..];
        let mut mac = [0u8; 4];
        buf.copy_to_slice(&mut mac);
        let seq = buf.get_u8();
        let count = u32::from(seq);

        let mut mac_input = vec![seq];
        mac_input.extend_from_slice(buf);
        let expected = nia2_compute_mac(count, 1, 0, &keys.knas_int, &mac_input);
        assert_eq!(expected, mac, "uplink NAS MAC mismatch");

        if header.is_ciphered() {
            nea2_cipher(count, 1, 0, &keys.knas_enc, buf)
        } else {
            buf.to_vec()
        }
    }

    fn log_nas(&self, name: &str) {
        self.obs.nas_log.lock().unwrap().push(name.to_string());
    }
}
