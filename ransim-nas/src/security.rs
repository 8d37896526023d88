//! UE NAS security context and message protection
//!
//! The context owns everything the UE needs to run 5G AKA and protect NAS
//! traffic: the permanent key material, the sequence number, the derived key
//! chain (present only after a successful authentication) and the uplink /
//! downlink NAS COUNTs.
//!
//! Protection levels follow the simulator's procedure rules: nothing before
//! authentication, integrity-only for the initial service request, integrity
//! plus ciphering afterwards, and the new-context header variants for
//! messages that install a fresh security context (security mode complete,
//! deregistration accept).

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::header::{Epd, SecurityHeaderType};
use ransim_crypto::kdf::{
    derive_kamf, derive_kausf, derive_knas_key, derive_kseaf, derive_res_star, AlgorithmType,
};
use ransim_crypto::{nea2_cipher, nia2_compute_mac, Milenage};

/// Secured NAS header: EPD, security header type, MAC, sequence number.
pub const SECURED_HEADER_LEN: usize = 7;

/// NAS bearer id used for 3GPP access.
const BEARER_3GPP: u8 = 0x01;

/// Uplink direction bit.
const DIR_UPLINK: u8 = 0;

/// Downlink direction bit.
const DIR_DOWNLINK: u8 = 1;

/// Errors raised while applying or validating NAS protection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// Protection requested before the key chain exists
    #[error("NAS keys absent, authentication has not completed")]
    KeysAbsent,
    /// Integrity check failed on a downlink message
    #[error("NAS MAC mismatch")]
    MacMismatch,
    /// The AUTN could not be verified against the stored SQN
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),
    /// The peer selected an algorithm the simulator does not implement
    #[error("unsupported algorithm id {0}")]
    UnsupportedAlgorithm(u8),
    /// A secured PDU was structurally invalid
    #[error("malformed secured PDU: {0}")]
    Malformed(String),
}

impl From<SecurityError> for ransim_common::Error {
    fn from(err: SecurityError) -> Self {
        ransim_common::Error::SecurityEncoding(err.to_string())
    }
}

/// The key chain derived from a successful 5G AKA run.
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    /// KAUSF
    pub kausf: [u8; 32],
    /// KSEAF
    pub kseaf: [u8; 32],
    /// KAMF
    pub kamf: [u8; 32],
    /// NAS encryption key
    pub knas_enc: [u8; 16],
    /// NAS integrity key
    pub knas_int: [u8; 16],
}

/// Per-UE NAS security context, owned exclusively by the RealUe actor.
pub struct UeSecurityContext {
    /// Selected ciphering algorithm id (NEA)
    pub ciphering_alg: u8,
    /// Selected integrity algorithm id (NIA)
    pub integrity_alg: u8,
    /// NAS key set identifier from the last authentication
    pub ngksi: u8,
    key: [u8; 16],
    opc: [u8; 16],
    sqn: u64,
    snn: String,
    keys: Option<DerivedKeys>,
    ul_count: u32,
    dl_count: u32,
}

impl UeSecurityContext {
    /// Creates a fresh context from the profile's key material.
    ///
    /// `snn` is the serving network name used throughout the derivation
    /// chain (e.g. `5G:mnc093.mcc208.3gppnetwork.org`).
    pub fn new(key: [u8; 16], opc: [u8; 16], sqn: u64, snn: String) -> Self {
        Self {
            ciphering_alg: 2,
            integrity_alg: 2,
            ngksi: 0,
            key,
            opc,
            sqn,
            snn,
            keys: None,
            ul_count: 0,
            dl_count: 0,
        }
    }

    /// True once a key chain has been derived.
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// The derived keys, if authentication has completed.
    pub fn keys(&self) -> Option<&DerivedKeys> {
        self.keys.as_ref()
    }

    /// Runs the UE side of 5G AKA for a received challenge.
    ///
    /// Verifies the AUTN MAC with Milenage, derives the full key chain and
    /// returns the RES* to send back. The stored SQN advances to the value
    /// the network used.
    pub fn authenticate(
        &mut self,
        supi: &str,
        ngksi: u8,
        rand: &[u8; 16],
        autn: &[u8; 16],
        abba: &[u8],
    ) -> Result<[u8; 16], SecurityError> {
        let milenage = Milenage::new(&self.key, &self.opc);
        let (res, ck, ik, ak) = milenage.f2345(rand);

        let mut sqn = [0u8; 6];
        for i in 0..6 {
            sqn[i] = autn[i] ^ ak[i];
        }
        let amf: [u8; 2] = [autn[6], autn[7]];
        let xmac = milenage.f1(rand, &sqn, &amf);
        if xmac != autn[8..16] {
            return Err(SecurityError::AuthenticationFailure(
                "AUTN MAC verification failed".into(),
            ));
        }

        let mut sqn_xor_ak = [0u8; 6];
        sqn_xor_ak.copy_from_slice(&autn[..6]);

        let res_star = derive_res_star(&ck, &ik, &self.snn, rand, &res);
        let kausf = derive_kausf(&ck, &ik, &self.snn, &sqn_xor_ak);
        let kseaf = derive_kseaf(&kausf, &self.snn);
        let kamf = derive_kamf(&kseaf, supi, abba);
        let knas_enc = derive_knas_key(&kamf, AlgorithmType::NasEnc, self.ciphering_alg);
        let knas_int = derive_knas_key(&kamf, AlgorithmType::NasInt, self.integrity_alg);

        self.keys = Some(DerivedKeys {
            kausf,
            kseaf,
            kamf,
            knas_enc,
            knas_int,
        });
        self.ngksi = ngksi;
        self.sqn = u64::from_be_bytes([0, 0, sqn[0], sqn[1], sqn[2], sqn[3], sqn[4], sqn[5]]);
        self.ul_count = 0;
        self.dl_count = 0;
        Ok(res_star)
    }

    /// Re-derives the NAS keys for the algorithms the network selected in
    /// the security mode command.
    pub fn select_algorithms(&mut self, ciphering: u8, integrity: u8) -> Result<(), SecurityError> {
        if !matches!(ciphering, 0 | 2) {
            return Err(SecurityError::UnsupportedAlgorithm(ciphering));
        }
        if !matches!(integrity, 0 | 2) {
            return Err(SecurityError::UnsupportedAlgorithm(integrity));
        }
        let keys = self.keys.as_mut().ok_or(SecurityError::KeysAbsent)?;
        keys.knas_enc = derive_knas_key(&keys.kamf, AlgorithmType::NasEnc, ciphering);
        keys.knas_int = derive_knas_key(&keys.kamf, AlgorithmType::NasInt, integrity);
        self.ciphering_alg = ciphering;
        self.integrity_alg = integrity;
        Ok(())
    }

    /// Wraps a plain NAS message in the requested protection.
    ///
    /// Fails with [`SecurityError::KeysAbsent`] whenever the key chain is
    /// missing, regardless of the requested header type: a caller that wants
    /// to send an unprotected message sends the plain encoding directly.
    pub fn protect(
        &mut self,
        plain: &[u8],
        header: SecurityHeaderType,
    ) -> Result<Vec<u8>, SecurityError> {
        let keys = self.keys.as_ref().ok_or(SecurityError::KeysAbsent)?;
        if header == SecurityHeaderType::Plain {
            return Ok(plain.to_vec());
        }

        let count = self.ul_count;
        let seq = (count & 0xff) as u8;

        let payload = if header.is_ciphered() {
            self.cipher(&keys.knas_enc, count, DIR_UPLINK, plain)?
        } else {
            plain.to_vec()
        };

        let mut mac_input = Vec::with_capacity(1 + payload.len());
        mac_input.push(seq);
        mac_input.extend_from_slice(&payload);
        let mac = self.compute_mac(&keys.knas_int, count, DIR_UPLINK, &mac_input)?;

        let mut buf = BytesMut::with_capacity(SECURED_HEADER_LEN + payload.len());
        buf.put_u8(Epd::MobilityManagement as u8);
        buf.put_u8(header as u8);
        buf.put_slice(&mac);
        buf.put_u8(seq);
        buf.put_slice(&payload);

        self.ul_count = self.ul_count.wrapping_add(1);
        Ok(buf.to_vec())
    }

    /// Validates and unwraps a downlink NAS PDU.
    ///
    /// Plain PDUs pass through unchanged. Protected PDUs have their MAC
    /// verified and their payload deciphered; the downlink COUNT follows the
    /// received sequence number.
    pub fn unprotect(&mut self, pdu: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let header = peek_security_header(pdu)?;
        if header == SecurityHeaderType::Plain {
            return Ok(pdu.to_vec());
        }

        let keys = self.keys.as_ref().ok_or(SecurityError::KeysAbsent)?;
        let mut buf = &pdu[2..];
        if buf.remaining() < 5 {
            return Err(SecurityError::Malformed("truncated secured header".into()));
        }
        let mut mac = [0u8; 4];
        buf.copy_to_slice(&mut mac);
        let seq = buf.get_u8();
        let payload = buf;

        // Advance the downlink COUNT to the received SEQ, carrying the
        // overflow counter across wrap-around.
        let mut count = (self.dl_count & 0xffff_ff00) | u32::from(seq);
        if count < self.dl_count {
            count = count.wrapping_add(0x100);
        }

        let mut mac_input = Vec::with_capacity(1 + payload.len());
        mac_input.push(seq);
        mac_input.extend_from_slice(payload);
        let expected = self.compute_mac(&keys.knas_int, count, DIR_DOWNLINK, &mac_input)?;
        if expected != mac {
            return Err(SecurityError::MacMismatch);
        }

        let plain = if header.is_ciphered() {
            self.cipher(&keys.knas_enc, count, DIR_DOWNLINK, payload)?
        } else {
            payload.to_vec()
        };

        self.dl_count = count.wrapping_add(1);
        Ok(plain)
    }

    fn compute_mac(
        &self,
        key: &[u8; 16],
        count: u32,
        direction: u8,
        data: &[u8],
    ) -> Result<[u8; 4], SecurityError> {
        match self.integrity_alg {
            0 => Ok([0u8; 4]),
            2 => Ok(nia2_compute_mac(count, BEARER_3GPP, direction, key, data)),
            other => Err(SecurityError::UnsupportedAlgorithm(other)),
        }
    }

    fn cipher(
        &self,
        key: &[u8; 16],
        count: u32,
        direction: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, SecurityError> {
        match self.ciphering_alg {
            0 => Ok(data.to_vec()),
            2 => Ok(nea2_cipher(count, BEARER_3GPP, direction, key, data)),
            other => Err(SecurityError::UnsupportedAlgorithm(other)),
        }
    }
}

/// Reads the security header type of an encoded NAS PDU without consuming it.
///
/// SM messages are never security-wrapped at the outer level by this
/// simulator, so a session management EPD reports `Plain`.
pub fn peek_security_header(pdu: &[u8]) -> Result<SecurityHeaderType, SecurityError> {
    if pdu.len() < 2 {
        return Err(SecurityError::Malformed("PDU shorter than NAS header".into()));
    }
    if pdu[0] == Epd::SessionManagement as u8 {
        return Ok(SecurityHeaderType::Plain);
    }
    SecurityHeaderType::try_from(pdu[1])
        .map_err(|_| SecurityError::Malformed(format!("unknown security header {:#04x}", pdu[1])))
}
