//! Simulated gNodeB
//!
//! A [`GNodeB`](gnodeb::GNodeB) owns the N2 link to its AMF and the N3
//! user-plane socket. Per attached UE it runs one control-plane actor
//! ([`cp_ue::GnbCpUeTask`]) translating SimUe events to NGAP procedures and
//! back, and one user-plane worker per PDU session
//! ([`up_ue::GnbUpUeTask`]) bridging GTP-U tunnels to the session actors.

pub mod cp_ue;
pub mod gnodeb;
pub mod idrange;
pub mod up_ue;

pub use cp_ue::{GnbCpEvent, GnbCpUeTask};
pub use gnodeb::GNodeB;
pub use idrange::{range_for_gnb, IdGenerator};
pub use up_ue::{GnbUpUeTask, UpCommand};
