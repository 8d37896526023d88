//! Simulated UE actors
//!
//! The RealUe task is the UE's NAS engine: it builds and protects outbound
//! NAS messages, decodes downlink NAS, owns the security context and the set
//! of PDU session workers. Each PDU session runs as its own actor with
//! uplink, downlink and command mailboxes.

pub mod realue;
pub mod session;
pub mod state;

pub use realue::{RealUeConfig, RealUeTask};
pub use session::{PduSession, SessionCommand, SessionState};
pub use state::MmState;
