//! Milenage authentication algorithm (3GPP TS 35.206)
//!
//! Provides the f1–f5* functions the UE side needs to verify a network
//! authentication challenge and derive CK/IK/AK, plus OPc computation.

use crate::aes128::{xor_block, Aes128Block, BLOCK_SIZE};

/// SQN size in bytes (48 bits).
pub const SQN_SIZE: usize = 6;

/// AMF field size in bytes.
pub const AMF_SIZE: usize = 2;

/// MAC-A/MAC-S size in bytes (64 bits).
pub const MAC_SIZE: usize = 8;

/// RES size in bytes (64 bits).
pub const RES_SIZE: usize = 8;

/// AK size in bytes (48 bits).
pub const AK_SIZE: usize = 6;

/// Rotation amount and constant for each output function. The constants
/// c1..c5 differ only in their last octet (0, 1, 2, 4, 8).
const OUT_PARAMS: [(usize, u8); 5] = [(64, 0x00), (0, 0x01), (32, 0x02), (64, 0x04), (96, 0x08)];

fn rotate_left(block: &[u8; BLOCK_SIZE], bits: usize) -> [u8; BLOCK_SIZE] {
    if bits == 0 {
        return *block;
    }
    let byte_shift = bits / 8;
    let bit_shift = bits % 8;
    let mut out = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        let src = (i + byte_shift) % BLOCK_SIZE;
        let next = (i + byte_shift + 1) % BLOCK_SIZE;
        out[i] = if bit_shift == 0 {
            block[src]
        } else {
            (block[src] << bit_shift) | (block[next] >> (8 - bit_shift))
        };
    }
    out
}

/// Computes OPc = OP ⊕ E_K(OP).
pub fn compute_opc(k: &[u8; 16], op: &[u8; 16]) -> [u8; 16] {
    let mut opc = Aes128Block::new(k).encrypt_block_copy(op);
    xor_block(&mut opc, op);
    opc
}

/// Milenage context holding the subscriber key cipher and OPc.
pub struct Milenage {
    cipher: Aes128Block,
    opc: [u8; 16],
}

impl Milenage {
    /// Creates a Milenage instance from K and a pre-computed OPc.
    pub fn new(k: &[u8; 16], opc: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128Block::new(k),
            opc: *opc,
        }
    }

    /// TEMP = E_K(RAND ⊕ OPc)
    fn temp(&self, rand: &[u8; 16]) -> [u8; BLOCK_SIZE] {
        let mut t = *rand;
        xor_block(&mut t, &self.opc);
        self.cipher.encrypt_block(&mut t);
        t
    }

    /// OUTn = E_K(rot(TEMP ⊕ OPc, rn) ⊕ cn) ⊕ OPc for n in 2..=5.
    fn out_n(&self, rand: &[u8; 16], n: usize) -> [u8; BLOCK_SIZE] {
        let (rot, c_last) = OUT_PARAMS[n - 1];
        let mut block = self.temp(rand);
        xor_block(&mut block, &self.opc);
        let mut block = rotate_left(&block, rot);
        block[BLOCK_SIZE - 1] ^= c_last;
        self.cipher.encrypt_block(&mut block);
        xor_block(&mut block, &self.opc);
        block
    }

    /// OUT1 = E_K(TEMP ⊕ rot(IN1 ⊕ OPc, r1) ⊕ c1) ⊕ OPc where
    /// IN1 = SQN || AMF || SQN || AMF.
    fn out_1(
        &self,
        rand: &[u8; 16],
        sqn: &[u8; SQN_SIZE],
        amf: &[u8; AMF_SIZE],
    ) -> [u8; BLOCK_SIZE] {
        let temp = self.temp(rand);

        let mut in1 = [0u8; BLOCK_SIZE];
        in1[0..6].copy_from_slice(sqn);
        in1[6..8].copy_from_slice(amf);
        in1[8..14].copy_from_slice(sqn);
        in1[14..16].copy_from_slice(amf);

        xor_block(&mut in1, &self.opc);
        let (rot, c_last) = OUT_PARAMS[0];
        let mut block = rotate_left(&in1, rot);
        xor_block(&mut block, &temp);
        block[BLOCK_SIZE - 1] ^= c_last;
        self.cipher.encrypt_block(&mut block);
        xor_block(&mut block, &self.opc);
        block
    }

    /// f1: network authentication code MAC-A.
    pub fn f1(&self, rand: &[u8; 16], sqn: &[u8; SQN_SIZE], amf: &[u8; AMF_SIZE]) -> [u8; MAC_SIZE] {
        let out = self.out_1(rand, sqn, amf);
        out[..MAC_SIZE].try_into().unwrap_or_else(|_| unreachable!())
    }

    /// f2: user response RES.
    pub fn f2(&self, rand: &[u8; 16]) -> [u8; RES_SIZE] {
        let out = self.out_n(rand, 2);
        out[8..16].try_into().unwrap_or_else(|_| unreachable!())
    }

    /// f3: cipher key CK.
    pub fn f3(&self, rand: &[u8; 16]) -> [u8; 16] {
        self.out_n(rand, 3)
    }

    /// f4: integrity key IK.
    pub fn f4(&self, rand: &[u8; 16]) -> [u8; 16] {
        self.out_n(rand, 4)
    }

    /// f5: anonymity key AK.
    pub fn f5(&self, rand: &[u8; 16]) -> [u8; AK_SIZE] {
        let out = self.out_n(rand, 2);
        out[..AK_SIZE].try_into().unwrap_or_else(|_| unreachable!())
    }

    /// f5*: anonymity key for re-synchronization.
    pub fn f5_star(&self, rand: &[u8; 16]) -> [u8; AK_SIZE] {
        let out = self.out_n(rand, 5);
        out[..AK_SIZE].try_into().unwrap_or_else(|_| unreachable!())
    }

    /// Computes (RES, CK, IK, AK) in one pass for a challenge.
    pub fn f2345(&self, rand: &[u8; 16]) -> ([u8; RES_SIZE], [u8; 16], [u8; 16], [u8; AK_SIZE]) {
        (self.f2(rand), self.f3(rand), self.f4(rand), self.f5(rand))
    }
}
