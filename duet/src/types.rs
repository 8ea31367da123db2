//! Words exchanged and kept during the OT-based preprocessing.

use std::ops::BitXor;

use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

pub(crate) type Block = u128;

/// Computational security parameter, in bits.
pub(crate) const K: usize = Block::BITS as usize;

/// What the receiver of a correlated OT learns: `K_j ⊕ r_j·Δ` for its choice bit `r_j`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReceiverMac(pub(crate) Block);

/// What the sender of a correlated OT keeps for the OT with index `j`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SenderKey(pub(crate) Block);

impl BitXor for ReceiverMac {
    type Output = Self;

    fn bitxor(self, other: Self) -> Self {
        ReceiverMac(self.0 ^ other.0)
    }
}

impl BitXor for SenderKey {
    type Output = Self;

    fn bitxor(self, other: Self) -> Self {
        SenderKey(self.0 ^ other.0)
    }
}

impl From<ReceiverMac> for SenderKey {
    fn from(mac: ReceiverMac) -> Self {
        SenderKey(mac.0)
    }
}

/// Correlation shared by every OT a party sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delta(pub(crate) Block);

impl Delta {
    pub(crate) fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Delta(rng.gen())
    }

    /// Bit `i` of `Δ`, which is also the choice bit of base OT `i`.
    #[inline]
    pub(crate) fn bit(&self, i: usize) -> bool {
        (self.0 >> i) & 1 == 1
    }

    #[inline]
    pub(crate) fn xor(&self, key: SenderKey) -> SenderKey {
        SenderKey(self.0 ^ key.0)
    }
}

/// A party's share of a multiplication triple `(a, b, c)` with `c = a ∧ b` once both shares are
/// XORed together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BeaverTriple {
    pub(crate) a: bool,
    pub(crate) b: bool,
    pub(crate) c: bool,
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn xor_is_bitwise() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..16 {
            let (x, y): (Block, Block) = (rng.gen(), rng.gen());
            assert_eq!(SenderKey(x) ^ SenderKey(y), SenderKey(x ^ y));
            assert_eq!(ReceiverMac(x) ^ ReceiverMac(y), ReceiverMac(x ^ y));
            assert_eq!(Delta(x).xor(SenderKey(y)), SenderKey(x ^ y));
        }
    }

    #[test]
    fn delta_bits_are_lsb_first() {
        let delta = Delta(0b101);
        assert!(delta.bit(0));
        assert!(!delta.bit(1));
        assert!(delta.bit(2));
        assert!(!delta.bit(K - 1));
    }
}
