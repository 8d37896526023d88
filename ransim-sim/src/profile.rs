//! Scenario driver
//!
//! Executes a scripted test profile: for every UE drawn from the profile's
//! identity range, creates a SimUe, issues the ordered procedure sequence,
//! and collects the per-procedure PASS/FAIL outcomes. UEs run concurrently;
//! each UE's procedures run strictly in order, and a failed procedure stops
//! that UE's script without affecting the others.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use ransim_common::config::{Config, ProfileConfig};
use ransim_common::events::{ProcedureResult, ProcedureType, SimUeEvent};
use ransim_common::{Error, DEFAULT_CHANNEL_CAPACITY};
use ransim_gnb::GNodeB;
use ransim_ue::RealUeConfig;

use crate::registry::Registry;
use crate::simue::SimUe;

/// How long one procedure may take before the driver declares it failed.
const PROCEDURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregated outcome of one profile run.
#[derive(Debug)]
pub struct ProfileReport {
    /// Profile name
    pub name: String,
    /// Every per-UE, per-procedure result in completion order
    pub results: Vec<ProcedureResult>,
}

impl ProfileReport {
    /// Number of passed procedures.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.pass).count()
    }

    /// Number of failed procedures.
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// True when every procedure passed.
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs one profile against an already set up gNB.
pub async fn run_profile(
    config: &Config,
    profile: &ProfileConfig,
    gnb: Arc<GNodeB>,
    registry: Arc<Registry>,
) -> Result<ProfileReport, Error> {
    let ue_profile = config.ue_profile(&profile.ue_profile)?;
    let key = ue_profile.key_bytes()?;
    let opc = ue_profile.opc_bytes()?;
    let sqn = ue_profile.sqn()?;

    let mut drivers = JoinSet::new();
    for offset in 0..ue_profile.num_ues {
        let supi = ue_profile.supi_at(offset)?;
        let ue_config = RealUeConfig {
            supi,
            plmn: ue_profile.plmn,
            key,
            opc,
            sqn,
            dnn: ue_profile.dnn.clone(),
            snssai: ue_profile.snssai,
            session_type: ue_profile.session_type,
            security_capabilities: ue_profile.security.encode(),
        };
        let procedures = profile.procedures.clone();
        let data_packets = profile.data_packets;
        let gnb = Arc::clone(&gnb);
        let registry = Arc::clone(&registry);
        drivers.spawn(async move {
            drive_ue(ue_config, procedures, data_packets, gnb, registry).await
        });
    }

    let mut results = Vec::new();
    while let Some(ue_results) = drivers.join_next().await {
        match ue_results {
            Ok(ue_results) => results.extend(ue_results),
            Err(err) => warn!(profile = %profile.name, %err, "UE driver panicked"),
        }
    }

    let report = ProfileReport {
        name: profile.name.clone(),
        results,
    };
    info!(
        profile = %report.name,
        passed = report.passed(),
        failed = report.failed(),
        "profile finished"
    );
    Ok(report)
}

/// Drives one UE through the procedure list, then tears it down.
async fn drive_ue(
    ue_config: RealUeConfig,
    procedures: Vec<ProcedureType>,
    data_packets: u32,
    gnb: Arc<GNodeB>,
    registry: Arc<Registry>,
) -> Vec<ProcedureResult> {
    let supi = ue_config.supi.clone();
    let (result_tx, mut result_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

    let (simue, join) = match SimUe::create(ue_config, gnb, registry, result_tx, data_packets) {
        Ok(created) => created,
        Err(err) => {
            warn!(supi = %supi, %err, "failed to create SimUe");
            return vec![ProcedureResult {
                supi,
                procedure: *procedures.first().unwrap_or(&ProcedureType::Registration),
                pass: false,
                reason: err.to_string(),
            }];
        }
    };

    let mut results = Vec::with_capacity(procedures.len());
    for procedure in procedures {
        if simue.send(SimUeEvent::Procedure(procedure)).await.is_err() {
            warn!(supi = %supi, "SimUe exited mid-script");
            break;
        }
        let result = match tokio::time::timeout(PROCEDURE_TIMEOUT, result_rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => break,
            Err(_) => ProcedureResult {
                supi: supi.clone(),
                procedure,
                pass: false,
                reason: "procedure timed out".into(),
            },
        };
        let stop = !result.pass;
        results.push(result);
        if stop {
            break;
        }
    }

    let _ = simue.shutdown().await;
    let _ = join.await;
    results
}
