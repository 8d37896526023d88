//! NAS header enumerations (TS 24.501 Section 9)

use num_enum::TryFromPrimitive;

/// Extended protocol discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Epd {
    /// 5GS mobility management messages
    MobilityManagement = 0x7e,
    /// 5GS session management messages
    SessionManagement = 0x2e,
}

/// Security header type (TS 24.501 9.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SecurityHeaderType {
    /// Plain NAS message, no security applied
    Plain = 0x00,
    /// Integrity protected
    IntegrityProtected = 0x01,
    /// Integrity protected and ciphered
    IntegrityProtectedAndCiphered = 0x02,
    /// Integrity protected with a new 5G NAS security context
    IntegrityProtectedWithNewContext = 0x03,
    /// Integrity protected and ciphered with a new 5G NAS security context
    IntegrityProtectedAndCipheredWithNewContext = 0x04,
}

impl SecurityHeaderType {
    /// True when the message carries a MAC.
    pub fn is_protected(self) -> bool {
        self != SecurityHeaderType::Plain
    }

    /// True when the payload is ciphered.
    pub fn is_ciphered(self) -> bool {
        matches!(
            self,
            SecurityHeaderType::IntegrityProtectedAndCiphered
                | SecurityHeaderType::IntegrityProtectedAndCipheredWithNewContext
        )
    }

    /// True when the header announces a fresh security context.
    pub fn is_new_context(self) -> bool {
        matches!(
            self,
            SecurityHeaderType::IntegrityProtectedWithNewContext
                | SecurityHeaderType::IntegrityProtectedAndCipheredWithNewContext
        )
    }
}

/// 5GMM message types (TS 24.501 Table 9.7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MmMessageType {
    /// Registration request
    RegistrationRequest = 0x41,
    /// Registration accept
    RegistrationAccept = 0x42,
    /// Registration complete
    RegistrationComplete = 0x43,
    /// UE-originating deregistration request
    DeregistrationRequestUeOrig = 0x45,
    /// UE-originating deregistration accept
    DeregistrationAcceptUeOrig = 0x46,
    /// UE-terminated deregistration request
    DeregistrationRequestUeTerm = 0x47,
    /// UE-terminated deregistration accept
    DeregistrationAcceptUeTerm = 0x48,
    /// Service request
    ServiceRequest = 0x4c,
    /// Service accept
    ServiceAccept = 0x4e,
    /// Authentication request
    AuthenticationRequest = 0x56,
    /// Authentication response
    AuthenticationResponse = 0x57,
    /// Security mode command
    SecurityModeCommand = 0x5d,
    /// Security mode complete
    SecurityModeComplete = 0x5e,
    /// Downlink NAS transport
    DlNasTransport = 0x68,
    /// Uplink NAS transport
    UlNasTransport = 0x67,
}

/// 5GSM message types (TS 24.501 Table 9.7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SmMessageType {
    /// PDU session establishment request
    PduSessionEstablishmentRequest = 0xc1,
    /// PDU session establishment accept
    PduSessionEstablishmentAccept = 0xc2,
    /// PDU session establishment reject
    PduSessionEstablishmentReject = 0xc3,
    /// PDU session release request
    PduSessionReleaseRequest = 0xd1,
    /// PDU session release command
    PduSessionReleaseCommand = 0xd3,
    /// PDU session release complete
    PduSessionReleaseComplete = 0xd4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_header_type_predicates() {
        assert!(!SecurityHeaderType::Plain.is_protected());
        assert!(SecurityHeaderType::IntegrityProtected.is_protected());
        assert!(!SecurityHeaderType::IntegrityProtected.is_ciphered());
        assert!(SecurityHeaderType::IntegrityProtectedAndCiphered.is_ciphered());
        assert!(SecurityHeaderType::IntegrityProtectedAndCipheredWithNewContext.is_new_context());
        assert!(!SecurityHeaderType::IntegrityProtectedAndCiphered.is_new_context());
    }

    #[test]
    fn test_try_from_primitive() {
        assert_eq!(Epd::try_from(0x7e).unwrap(), Epd::MobilityManagement);
        assert_eq!(
            MmMessageType::try_from(0x41).unwrap(),
            MmMessageType::RegistrationRequest
        );
        assert!(MmMessageType::try_from(0xff).is_err());
        assert_eq!(
            SmMessageType::try_from(0xc2).unwrap(),
            SmMessageType::PduSessionEstablishmentAccept
        );
    }
}
