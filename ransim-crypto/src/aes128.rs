//! AES-128 primitives for 5G NAS protection
//!
//! Single-block encryption (Milenage), AES-CMAC (NIA2 integrity) and
//! AES-CTR (NEA2 ciphering), per 3GPP TS 33.501 Annex D.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// NAS MAC size in bytes (32 bits).
pub const MAC_SIZE: usize = 4;

/// AES-128 block cipher for single-block operations.
#[derive(Clone)]
pub struct Aes128Block {
    cipher: Aes128,
}

impl Aes128Block {
    /// Creates the cipher from a 128-bit key.
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
        }
    }

    /// Encrypts one 16-byte block in place.
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut ga = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
    }

    /// Encrypts one 16-byte block, returning the result.
    pub fn encrypt_block_copy(&self, block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut out = *block;
        self.encrypt_block(&mut out);
        out
    }
}

/// XOR of two 16-byte blocks, in place.
#[inline]
pub fn xor_block(a: &mut [u8; BLOCK_SIZE], b: &[u8; BLOCK_SIZE]) {
    for i in 0..BLOCK_SIZE {
        a[i] ^= b[i];
    }
}

/// Builds the 64-bit NAS protection header: COUNT, BEARER, DIRECTION.
fn protection_header(count: u32, bearer: u8, direction: u8) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&count.to_be_bytes());
    header[4] = ((bearer & 0x1f) << 3) | ((direction & 0x01) << 2);
    header
}

/// NIA2 (128-EIA2): AES-CMAC based NAS integrity.
///
/// The CMAC input is `COUNT || BEARER || DIRECTION || padding || MESSAGE`;
/// the MAC is the leading 32 bits of the CMAC output.
pub fn nia2_compute_mac(
    count: u32,
    bearer: u8,
    direction: u8,
    key: &[u8; 16],
    data: &[u8],
) -> [u8; MAC_SIZE] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("CMAC accepts 16-byte keys"));
    mac.update(&protection_header(count, bearer, direction));
    mac.update(data);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&full[..MAC_SIZE]);
    out
}

/// NEA2 (128-EA2): AES-CTR based NAS ciphering.
///
/// The initial counter block is `COUNT || BEARER || DIRECTION || 0...0`;
/// subsequent blocks increment the full 128-bit counter. Encryption and
/// decryption are the same operation.
pub fn nea2_cipher(count: u32, bearer: u8, direction: u8, key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let cipher = Aes128Block::new(key);

    let mut counter = [0u8; BLOCK_SIZE];
    counter[..8].copy_from_slice(&protection_header(count, bearer, direction));

    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        let keystream = cipher.encrypt_block_copy(&counter);
        for (i, byte) in chunk.iter().enumerate() {
            out.push(byte ^ keystream[i]);
        }
        increment_counter(&mut counter);
    }
    out
}

fn increment_counter(counter: &mut [u8; BLOCK_SIZE]) {
    for byte in counter.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nea2_roundtrip() {
        let key = [0x42u8; 16];
        let plain = b"nas payload with some length to cross a block boundary";
        let ciphered = nea2_cipher(7, 1, 0, &key, plain);
        assert_ne!(&ciphered[..], &plain[..]);
        let deciphered = nea2_cipher(7, 1, 0, &key, &ciphered);
        assert_eq!(&deciphered[..], &plain[..]);
    }

    #[test]
    fn test_nea2_depends_on_count_and_direction() {
        let key = [0x42u8; 16];
        let plain = b"payload";
        let a = nea2_cipher(1, 1, 0, &key, plain);
        let b = nea2_cipher(2, 1, 0, &key, plain);
        let c = nea2_cipher(1, 1, 1, &key, plain);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nia2_mac_is_stable_and_keyed() {
        let key = [0x11u8; 16];
        let other_key = [0x22u8; 16];
        let data = b"registration complete";
        let mac = nia2_compute_mac(3, 1, 0, &key, data);
        assert_eq!(mac, nia2_compute_mac(3, 1, 0, &key, data));
        assert_ne!(mac, nia2_compute_mac(3, 1, 0, &other_key, data));
        assert_ne!(mac, nia2_compute_mac(4, 1, 0, &key, data));
    }

    #[test]
    fn test_counter_increment_carries() {
        let mut counter = [0xffu8; BLOCK_SIZE];
        increment_counter(&mut counter);
        assert_eq!(counter, [0u8; BLOCK_SIZE]);
    }
}
