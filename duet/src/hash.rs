//! Non-optimized hashing based on [`blake3::Hasher`].
use crate::types::SenderKey;

/// Hashes a correlated OT key down to a single random bit.
///
/// The `tweak` keeps the random OTs derived from different correlated OTs independent even if two
/// keys happen to collide.
pub(crate) fn hash_to_bit(tweak: u64, key: SenderKey) -> bool {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&tweak.to_le_bytes());
    hasher.update(&key.0.to_le_bytes());
    hasher.finalize().as_bytes()[0] & 1 == 1
}

/// Derives a base OT key from the OT index and the 2 curve points of the exchange.
pub(crate) fn hash_ot_key(
    index: usize,
    sender_key: &[u8; 32],
    shared_point: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(sender_key);
    hasher.update(shared_point);
    *hasher.finalize().as_bytes()
}

#[test]
fn randomized_hashing() {
    let r: [u8; 32] = rand::random();
    let mut input = 7u64.to_le_bytes().to_vec();
    input.extend(r);
    input.extend([0u8; 32]);
    assert_eq!(blake3::hash(&input).as_bytes(), &hash_ot_key(7, &r, &[0u8; 32]));
}

#[test]
fn tweak_changes_bit_distribution() {
    let key = SenderKey(rand::random());
    let bits: Vec<bool> = (0..64).map(|tweak| hash_to_bit(tweak, key)).collect();
    assert!(bits.iter().any(|b| *b));
    assert!(bits.iter().any(|b| !*b));
}

#[test]
fn ot_key_depends_on_index() {
    let a = [1u8; 32];
    let b = [2u8; 32];
    assert_ne!(hash_ot_key(0, &a, &b), hash_ot_key(1, &a, &b));
    assert_eq!(hash_ot_key(3, &a, &b), hash_ot_key(3, &a, &b));
}
