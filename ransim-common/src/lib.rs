//! Common types and utilities for ransim
//!
//! This crate provides the shared foundation used across all ransim crates:
//! the error taxonomy, configuration structures, logging setup, the actor
//! task framework (message envelopes and handles) and the typed event model
//! exchanged between the simulated UE and gNB actors.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod tasks;
pub mod transport;
pub mod types;

pub use config::{AmfConfig, Config, GnbConfig, SecurityCapabilities, UeProfile};
pub use error::Error;
pub use events::{
    DataBearerItem, NasBuildKind, NasOutcome, ProcedureResult, ProcedureType, RealUeEvent,
    SimUeEvent,
};
pub use logging::{init_logging, log_nas_message, log_ngap_message, Direction, LogLevel};
pub use tasks::{Task, TaskHandle, TaskMessage, DEFAULT_CHANNEL_CAPACITY};
pub use transport::UdpTransport;
pub use types::{Guti5G, PduSessionType, Plmn, Snssai};
