//! ransim binary
//!
//! Loads the YAML configuration, brings up every configured gNB (NG Setup
//! against its AMF), runs the scripted profiles and reports a summary.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use ransim_common::config::Config;
use ransim_common::{init_logging, LogLevel};
use ransim_gnb::GNodeB;
use ransim_sim::{run_profile, Registry};

/// ransim - scripted 5G RAN/UE simulator
#[derive(Parser, Debug)]
#[command(name = "ransim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(all_passed) => {
            if all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let config = Config::load(&args.config_file)
        .with_context(|| format!("loading {}", args.config_file))?;

    let level = args
        .log_level
        .or_else(|| config.log_level.as_deref().and_then(|s| s.parse().ok()))
        .unwrap_or_default();
    init_logging(level);

    // Bring up every configured gNB before any UE attaches. NG Setup
    // failure is fatal for the run.
    let mut gnbs: HashMap<String, Arc<GNodeB>> = HashMap::new();
    for (name, gnb_config) in &config.gnbs {
        let amf_config = config.amf(&gnb_config.amf)?;
        let slices = config
            .ue_profiles
            .values()
            .map(|profile| profile.snssai)
            .collect();
        let gnb = GNodeB::connect(name, gnb_config, amf_config, slices)
            .await
            .with_context(|| format!("connecting gnb {name}"))?;
        gnb.perform_ng_setup()
            .await
            .with_context(|| format!("NG setup for gnb {name}"))?;
        gnb.start_receive_loops();
        gnbs.insert(name.clone(), gnb);
    }
    info!(count = gnbs.len(), "gNB(s) ready");

    let registry = Arc::new(Registry::new());
    let mut all_passed = true;
    for profile in &config.profiles {
        let gnb = gnbs
            .get(&profile.gnb)
            .unwrap_or_else(|| unreachable!("validated at load time"));
        let report = run_profile(&config, profile, Arc::clone(gnb), Arc::clone(&registry))
            .await
            .with_context(|| format!("running profile {}", profile.name))?;
        for result in &report.results {
            println!("{result}");
        }
        println!(
            "Profile {}: {} passed, {} failed",
            report.name,
            report.passed(),
            report.failed()
        );
        all_passed &= report.all_passed();
    }

    Ok(all_passed)
}
