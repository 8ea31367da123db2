//! XOR secret shares of booleans and fixed-width integers.

use std::{fmt, ops::BitXor};

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

/// Values that can be split into 2 XOR shares.
pub trait ShareValue: Copy + BitXor<Output = Self> + private::Sealed {
    /// Samples a uniformly random value.
    fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self;
}

impl ShareValue for bool {
    fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        rng.gen()
    }
}

impl ShareValue for u32 {
    fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        rng.gen()
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for u32 {}
}

/// One party's XOR share of a secret value.
///
/// A single share is indistinguishable from random noise; only the XOR of the 2 shares held by
/// the Publisher and the Partner reconstructs the value. The [`fmt::Debug`] implementation never
/// prints the share itself so that shares do not end up in logs by accident.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Share<T>(T);

impl<T: ShareValue> Share<T> {
    /// Splits `value` into the share kept by its owner and the share sent to the other party.
    ///
    /// The peer's share is uniformly random, the owner keeps `value ⊕ peer`.
    pub fn split<R: Rng + CryptoRng>(value: T, rng: &mut R) -> (Share<T>, Share<T>) {
        let mask = T::random(rng);
        (Share(value ^ mask), Share(mask))
    }

    /// Reconstructs the secret value from both parties' shares.
    pub fn combine(self, other: Share<T>) -> T {
        self.0 ^ other.0
    }

    /// XORs 2 shares held by the same party, yielding a share of the XOR of the 2 secrets.
    pub fn xor(self, other: Share<T>) -> Share<T> {
        Share(self.0 ^ other.0)
    }

    pub(crate) fn from_raw(raw: T) -> Self {
        Share(raw)
    }

    pub(crate) fn into_raw(self) -> T {
        self.0
    }
}

impl Share<u32> {
    /// Assembles a share of an integer from shares of its bits, least significant bit first.
    pub fn from_bit_shares(bits: &[Share<bool>]) -> Self {
        Share(
            bits.iter()
                .take(u32::BITS as usize)
                .enumerate()
                .fold(0, |acc, (i, b)| acc | (u32::from(b.0) << i)),
        )
    }
}

impl<T> fmt::Debug for Share<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Share(<redacted>)")
    }
}

/// Packs bits into bytes, least significant bit first.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (bits.len() + 7) / 8];
    for (i, &b) in bits.iter().enumerate() {
        bytes[i / 8] |= u8::from(b) << (i % 8);
    }
    bytes
}

/// Unpacks exactly `len` bits packed by [`pack_bits`], or `None` if `bytes` has the wrong size.
pub(crate) fn unpack_bits(bytes: &[u8], len: usize) -> Option<Vec<bool>> {
    if bytes.len() != (len + 7) / 8 {
        return None;
    }
    Some((0..len).map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1).collect())
}
