//! 5G security primitives for ransim
//!
//! Implements the minimum cryptographic surface the simulator needs to hold
//! a real authentication and NAS security exchange with a core network:
//!
//! - Milenage (TS 35.206) for the authentication challenge
//! - The HMAC-SHA256 key derivation chain (TS 33.501 Annex A)
//! - NIA2 integrity (AES-CMAC) and NEA2 ciphering (AES-CTR)

pub mod aes128;
pub mod kdf;
pub mod milenage;

pub use aes128::{nea2_cipher, nia2_compute_mac, Aes128Block, MAC_SIZE};
pub use kdf::{
    derive_kamf, derive_kausf, derive_knas_key, derive_kseaf, derive_res_star, hmac_sha256,
    AlgorithmType, KEY_128_SIZE, KEY_256_SIZE,
};
pub use milenage::Milenage;
