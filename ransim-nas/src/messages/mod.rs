//! NAS message model and plain-message codec
//!
//! Plain (unprotected) encoding only; security wrapping lives in
//! [`crate::security`]. MM messages carry the `EPD | SHT | type` header, SM
//! messages the `EPD | PSI | PTI | type` header.

pub mod mm;
pub mod sm;

use bytes::{Buf, Bytes};

use crate::header::Epd;
use ransim_common::Error;

pub use mm::{
    AuthenticationRequest, AuthenticationResponse, DeregistrationRequest, DlNasTransport,
    MmMessage, RegistrationAccept, RegistrationRequest, SecurityModeCommand, ServiceRequest,
    UlNasTransport,
};
pub use sm::SmMessage;

/// A decoded plain NAS message of either protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NasMessage {
    /// 5GMM message
    Mm(MmMessage),
    /// 5GSM message
    Sm(SmMessage),
}

impl NasMessage {
    /// Encodes the plain message including its NAS header.
    pub fn encode(&self) -> Bytes {
        match self {
            NasMessage::Mm(msg) => msg.encode(),
            NasMessage::Sm(msg) => msg.encode(),
        }
    }
}

/// Decodes a plain NAS message, dispatching on the extended protocol
/// discriminator.
pub fn decode_plain(bytes: &[u8]) -> Result<NasMessage, Error> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if !buf.has_remaining() {
        return Err(Error::Decode("empty NAS PDU".into()));
    }
    let epd = Epd::try_from(buf[0]).map_err(|_| Error::Decode(format!("unknown EPD {:#04x}", buf[0])))?;
    match epd {
        Epd::MobilityManagement => {
            buf.advance(1);
            Ok(NasMessage::Mm(MmMessage::decode(&mut buf)?))
        }
        Epd::SessionManagement => {
            buf.advance(1);
            Ok(NasMessage::Sm(SmMessage::decode(&mut buf)?))
        }
    }
}

/// Fails with a decode error unless `buf` still holds `n` bytes.
pub(crate) fn need(buf: &impl Buf, n: usize) -> Result<(), Error> {
    if buf.remaining() < n {
        Err(Error::Decode(format!(
            "truncated NAS message: need {n} bytes, have {}",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_empty_and_unknown_epd() {
        assert!(decode_plain(&[]).is_err());
        assert!(decode_plain(&[0x99, 0x00]).is_err());
    }
}
