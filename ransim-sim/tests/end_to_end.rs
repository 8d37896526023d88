//! End-to-end procedure tests against the scripted test core
//!
//! Each test brings up a gNB over real UDP sockets, runs a profile through
//! the scenario driver, and asserts on the reported outcomes plus what the
//! core observed at the network boundary.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{CoreConfig, TestCore};
use ransim_common::config::{
    AmfConfig, Config, GnbConfig, ProfileConfig, SecurityCapabilities, UeProfile,
};
use ransim_common::events::ProcedureType;
use ransim_common::types::{PduSessionType, Plmn, Snssai};
use ransim_gnb::GNodeB;
use ransim_sim::{run_profile, ProfileReport, Registry, SimUe};
use ransim_ue::RealUeConfig;

const DATA_PACKETS: u32 = 4;

fn build_config(core: &TestCore, procedures: Vec<ProcedureType>) -> Config {
    let mut gnbs = HashMap::new();
    gnbs.insert(
        "gnb1".to_string(),
        GnbConfig {
            n2_bind_addr: "127.0.0.1:0".into(),
            n3_bind_addr: "127.0.0.1:0".into(),
            plmn: Plmn::new(208, 93),
            tac: 1,
            nci: 0x10,
            gnb_index: 0,
            amf: "amf1".into(),
        },
    );
    let mut amfs = HashMap::new();
    amfs.insert(
        "amf1".to_string(),
        AmfConfig {
            host: core.n2_addr.ip().to_string(),
            port: core.n2_addr.port(),
        },
    );
    let mut ue_profiles = HashMap::new();
    ue_profiles.insert(
        "default".to_string(),
        UeProfile {
            start_supi: "imsi-208930000000001".into(),
            num_ues: 1,
            key: hex::encode([0x11; 16]),
            opc: hex::encode([0x22; 16]),
            sequence_number: "000000000020".into(),
            plmn: Plmn::new(208, 93),
            dnn: "internet".into(),
            snssai: Snssai::default(),
            session_type: PduSessionType::Ipv4,
            security: SecurityCapabilities::default(),
        },
    );
    Config {
        gnbs,
        amfs,
        ue_profiles,
        profiles: vec![ProfileConfig {
            name: "test".into(),
            gnb: "gnb1".into(),
            ue_profile: "default".into(),
            procedures,
            data_packets: DATA_PACKETS,
        }],
        log_level: None,
    }
}

async fn run_scenario(procedures: Vec<ProcedureType>) -> (TestCore, ProfileReport, Arc<Registry>) {
    let core = TestCore::start(CoreConfig::default()).await;
    let config = build_config(&core, procedures);

    let gnb_config = config.gnb("gnb1").unwrap();
    let amf_config = config.amf("amf1").unwrap();
    let gnb = GNodeB::connect("gnb1", gnb_config, amf_config, vec![Snssai::default()])
        .await
        .unwrap();
    gnb.perform_ng_setup().await.unwrap();
    gnb.start_receive_loops();
    gnb.set_upf_port(core.upf_port);

    let registry = Arc::new(Registry::new());
    let report = run_profile(&config, &config.profiles[0], gnb, Arc::clone(&registry))
        .await
        .unwrap();
    (core, report, registry)
}

#[tokio::test]
async fn test_registration_happy_path() {
    let (core, report, _registry) = run_scenario(vec![ProcedureType::Registration]).await;

    assert_eq!(report.results.len(), 1, "results: {:?}", report.results);
    assert!(report.all_passed(), "results: {:?}", report.results);

    // NAS messages at the network boundary appear in procedure order.
    assert_eq!(
        core.obs.nas_order(),
        vec![
            "RegistrationRequest",
            "AuthenticationResponse",
            "SecurityModeComplete",
            "RegistrationComplete",
        ]
    );
}

#[tokio::test]
async fn test_session_lifecycle_with_user_data() {
    let (core, report, _registry) = run_scenario(vec![
        ProcedureType::Registration,
        ProcedureType::PduSessionEstablishment,
        ProcedureType::UserDataTransfer,
        ProcedureType::PduSessionRelease,
    ])
    .await;

    assert_eq!(report.results.len(), 4, "results: {:?}", report.results);
    assert!(report.all_passed(), "results: {:?}", report.results);

    // The uplink packets made it through the GTP tunnel to the UPF.
    assert_eq!(core.obs.up_packets.load(Ordering::SeqCst), DATA_PACKETS);
    // And were echoed back down the allocated tunnel.
    assert_eq!(core.obs.echoed.load(Ordering::SeqCst), DATA_PACKETS);

    let order = core.obs.nas_order();
    assert_eq!(
        &order[4..],
        &[
            "PduSessionEstablishmentRequest".to_string(),
            "PduSessionReleaseRequest".to_string(),
            "PduSessionReleaseComplete".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_deregistration_after_registration() {
    let (core, report, registry) = run_scenario(vec![
        ProcedureType::Registration,
        ProcedureType::Deregistration,
    ])
    .await;

    assert_eq!(report.results.len(), 2, "results: {:?}", report.results);
    assert!(report.all_passed(), "results: {:?}", report.results);
    assert!(core
        .obs
        .nas_order()
        .contains(&"DeregistrationRequest".to_string()));

    // Terminated UEs leave the registry.
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_deregistration_without_guti_fails() {
    let (_core, report, _registry) = run_scenario(vec![ProcedureType::Deregistration]).await;

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert!(!result.pass);
    assert!(
        result.reason.contains("guti not allocated"),
        "reason: {}",
        result.reason
    );
}

#[tokio::test]
async fn test_an_release_then_service_request() {
    let (core, report, _registry) = run_scenario(vec![
        ProcedureType::Registration,
        ProcedureType::AnRelease,
        ProcedureType::ServiceRequest,
    ])
    .await;

    assert_eq!(report.results.len(), 3, "results: {:?}", report.results);
    assert!(report.all_passed(), "results: {:?}", report.results);
    assert!(core.obs.nas_order().contains(&"ServiceRequest".to_string()));
}

#[tokio::test]
async fn test_duplicate_supi_is_refused() {
    let core = TestCore::start(CoreConfig::default()).await;
    let config = build_config(&core, vec![ProcedureType::Registration]);
    let gnb = GNodeB::connect(
        "gnb1",
        config.gnb("gnb1").unwrap(),
        config.amf("amf1").unwrap(),
        vec![],
    )
    .await
    .unwrap();
    gnb.perform_ng_setup().await.unwrap();
    gnb.start_receive_loops();

    let registry = Arc::new(Registry::new());
    let ue_config = RealUeConfig {
        supi: "imsi-208930000000001".into(),
        plmn: Plmn::new(208, 93),
        key: [0x11; 16],
        opc: [0x22; 16],
        sqn: 0x20,
        dnn: "internet".into(),
        snssai: Snssai::default(),
        session_type: PduSessionType::Ipv4,
        security_capabilities: [0xa0, 0x20],
    };
    let (result_tx, _result_rx) = tokio::sync::mpsc::channel(4);

    let (first, first_join) = SimUe::create(
        ue_config.clone(),
        Arc::clone(&gnb),
        Arc::clone(&registry),
        result_tx.clone(),
        DATA_PACKETS,
    )
    .unwrap();

    // A second UE with the same identity must be refused outright.
    let duplicate = SimUe::create(ue_config, gnb, Arc::clone(&registry), result_tx, DATA_PACKETS);
    assert!(duplicate.is_err());
    assert_eq!(registry.len(), 1);

    first.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), first_join)
        .await
        .expect("bounded termination")
        .unwrap();
    assert!(registry.is_empty());
}
