//! Key derivation chain for 5G AKA (3GPP TS 33.501 Annex A)
//!
//! All derivations use the TS 33.220 generic KDF: HMAC-SHA256 over
//! `S = FC || P0 || L0 || P1 || L1 || ...` with each Li the big-endian
//! 2-octet length of Pi.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// 256-bit key size in bytes.
pub const KEY_256_SIZE: usize = 32;

/// 128-bit key size in bytes.
pub const KEY_128_SIZE: usize = 16;

/// Algorithm type distinguisher for NAS key derivation (TS 33.501 A.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlgorithmType {
    /// NAS encryption key
    NasEnc = 0x01,
    /// NAS integrity key
    NasInt = 0x02,
}

/// Computes HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], input: &[u8]) -> [u8; KEY_256_SIZE] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts keys of any size"));
    mac.update(input);
    let mut out = [0u8; KEY_256_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Generic TS 33.220 KDF.
fn kdf(key: &[u8], fc: u8, params: &[&[u8]]) -> [u8; KEY_256_SIZE] {
    let mut s = Vec::with_capacity(1 + params.iter().map(|p| p.len() + 2).sum::<usize>());
    s.push(fc);
    for p in params {
        s.extend_from_slice(p);
        s.extend_from_slice(&(p.len() as u16).to_be_bytes());
    }
    hmac_sha256(key, &s)
}

/// Derives KAUSF from CK || IK (TS 33.501 A.2).
///
/// `sqn_xor_ak` is the 6-octet SQN ⊕ AK from the AUTN.
pub fn derive_kausf(ck: &[u8; 16], ik: &[u8; 16], snn: &str, sqn_xor_ak: &[u8; 6]) -> [u8; KEY_256_SIZE] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(ck);
    key[16..].copy_from_slice(ik);
    kdf(&key, 0x6a, &[snn.as_bytes(), sqn_xor_ak])
}

/// Derives RES* from CK || IK (TS 33.501 A.4).
///
/// Returns the trailing 16 octets of the KDF output, which is the RES* value
/// sent in the authentication response.
pub fn derive_res_star(
    ck: &[u8; 16],
    ik: &[u8; 16],
    snn: &str,
    rand: &[u8; 16],
    res: &[u8],
) -> [u8; KEY_128_SIZE] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(ck);
    key[16..].copy_from_slice(ik);
    let out = kdf(&key, 0x6b, &[snn.as_bytes(), rand, res]);
    let mut res_star = [0u8; KEY_128_SIZE];
    res_star.copy_from_slice(&out[16..]);
    res_star
}

/// Derives KSEAF from KAUSF (TS 33.501 A.6).
pub fn derive_kseaf(kausf: &[u8; KEY_256_SIZE], snn: &str) -> [u8; KEY_256_SIZE] {
    kdf(kausf, 0x6c, &[snn.as_bytes()])
}

/// Derives KAMF from KSEAF (TS 33.501 A.7).
///
/// `supi` is the subscriber identity string, `abba` the ABBA parameter from
/// the authentication request (0x0000 for this release).
pub fn derive_kamf(kseaf: &[u8; KEY_256_SIZE], supi: &str, abba: &[u8]) -> [u8; KEY_256_SIZE] {
    kdf(kseaf, 0x6d, &[supi.as_bytes(), abba])
}

/// Derives a 128-bit NAS key (KNASenc or KNASint) from KAMF (TS 33.501 A.8).
///
/// The 256-bit KDF output is truncated to its trailing 128 bits.
pub fn derive_knas_key(
    kamf: &[u8; KEY_256_SIZE],
    algorithm_type: AlgorithmType,
    algorithm_id: u8,
) -> [u8; KEY_128_SIZE] {
    let out = kdf(kamf, 0x69, &[&[algorithm_type as u8], &[algorithm_id]]);
    let mut knas = [0u8; KEY_128_SIZE];
    knas.copy_from_slice(&out[16..]);
    knas
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNN: &str = "5G:mnc093.mcc208.3gppnetwork.org";

    #[test]
    fn test_kdf_length_encoding() {
        // S for FC=0x6c with one 3-byte parameter must be fc || p || 0x0003
        let key = [0u8; 32];
        let direct = hmac_sha256(&key, &[0x6c, b'a', b'b', b'c', 0x00, 0x03]);
        assert_eq!(kdf(&key, 0x6c, &[b"abc"]), direct);
    }

    #[test]
    fn test_chain_is_deterministic() {
        let ck = [1u8; 16];
        let ik = [2u8; 16];
        let sqn_xor_ak = [3u8; 6];
        let kausf = derive_kausf(&ck, &ik, SNN, &sqn_xor_ak);
        let kseaf = derive_kseaf(&kausf, SNN);
        let kamf = derive_kamf(&kseaf, "imsi-208930000000001", &[0x00, 0x00]);
        let knas_int = derive_knas_key(&kamf, AlgorithmType::NasInt, 2);
        let knas_enc = derive_knas_key(&kamf, AlgorithmType::NasEnc, 2);

        assert_eq!(kausf, derive_kausf(&ck, &ik, SNN, &sqn_xor_ak));
        assert_ne!(knas_int, knas_enc);
    }

    #[test]
    fn test_res_star_depends_on_rand() {
        let ck = [1u8; 16];
        let ik = [2u8; 16];
        let res = [9u8; 8];
        let a = derive_res_star(&ck, &ik, SNN, &[4u8; 16], &res);
        let b = derive_res_star(&ck, &ik, SNN, &[5u8; 16], &res);
        assert_ne!(a, b);
    }
}
