//! Error types for ransim

use thiserror::Error;

/// Error types shared across the ransim workspace.
///
/// The propagation policy is: errors are handled at the smallest enclosing
/// scope that can still make forward progress (one PDU session, one UE).
/// Only [`Error::Config`] and [`Error::IdExhausted`] are fatal to the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network I/O errors on the control or user plane.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// NAS protection could not be applied, typically missing key material.
    #[error("Security encoding error: {0}")]
    SecurityEncoding(String),

    /// A PDU session id was not found in the owning UE's session map.
    #[error("PDU session {0} not found")]
    SessionNotFound(u8),

    /// A peer (UE context, AMF) lookup missed.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Malformed or unexpected NAS/NGAP/GTP payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The bounded NGAP id range is exhausted. Fatal.
    #[error("Id range exhausted")]
    IdExhausted,

    /// An event arrived that is not valid in the current procedure state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Subscriber registry insert/remove failure (e.g. duplicate SUPI).
    #[error("Registry error: {0}")]
    Registry(String),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::SessionNotFound(5).to_string(),
            "PDU session 5 not found"
        );
        assert_eq!(Error::IdExhausted.to_string(), "Id range exhausted");
        assert_eq!(
            Error::SecurityEncoding("keys absent".into()).to_string(),
            "Security encoding error: keys absent"
        );
    }
}
