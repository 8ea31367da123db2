//! Beaver triples from correlated OTs in both directions.
//!
//! Every party is the [`CotSender`] of one direction and the receiver of the other. Hashing the
//! correlated OTs turns them into random OTs `(m_0, m_1)` / `(c, m_c)`, and 2 random OTs running in
//! opposite directions yield one triple: with `a = a_0 ⊕ a_1` (the choice bits) and
//! `b = b_0 ⊕ b_1` (the sender's `m_0 ⊕ m_1`), each party sets
//! `c_i = a_i·b_i ⊕ m_0 ⊕ m_{c}` which XORs to `a·b`.

use crate::{
    cot::ReceivedOts,
    hash::hash_to_bit,
    types::{BeaverTriple, Delta, SenderKey},
    Role,
};

/// Tweak separating the OT `j` of the direction in which `sender` holds the delta.
fn tweak(j: usize, sender: Role) -> u64 {
    let dir = match sender {
        Role::Publisher => 0,
        Role::Partner => 1,
    };
    2 * j as u64 + dir
}

/// Derives the local share of `count` triples.
///
/// `delta` and `keys` are this party's side of the OTs it sent, `received` its side of the OTs
/// sent by the other party.
pub(crate) fn derive_triples(
    role: Role,
    delta: &Delta,
    keys: &[SenderKey],
    received: &ReceivedOts,
    count: usize,
) -> Vec<BeaverTriple> {
    debug_assert!(keys.len() >= count);
    debug_assert!(received.macs.len() >= count);
    let mut triples = Vec::with_capacity(count);
    for j in 0..count {
        let sent_tweak = tweak(j, role);
        let m0 = hash_to_bit(sent_tweak, keys[j]);
        let m1 = hash_to_bit(sent_tweak, delta.xor(keys[j]));

        let a = received.choices[j];
        let m_c = hash_to_bit(tweak(j, role.peer()), SenderKey::from(received.macs[j]));

        let b = m0 ^ m1;
        let c = (a & b) ^ m0 ^ m_c;
        triples.push(BeaverTriple { a, b, c });
    }
    triples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReceiverMac;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    /// Correlated OTs as produced by an ideal functionality.
    fn ideal_cot(
        rng: &mut ChaCha20Rng,
        delta: &Delta,
        count: usize,
    ) -> (Vec<SenderKey>, ReceivedOts) {
        let mut keys = vec![];
        let mut received = ReceivedOts::default();
        for _ in 0..count {
            let key = SenderKey(rng.gen());
            let choice: bool = rng.gen();
            let mac = if choice { delta.xor(key) } else { key };
            keys.push(key);
            received.choices.push(choice);
            received.macs.push(ReceiverMac(mac.0));
        }
        (keys, received)
    }

    #[test]
    fn triples_are_correct() {
        let mut rng = ChaCha20Rng::from_seed([9; 32]);
        let delta_publisher = Delta::random(&mut rng);
        let delta_partner = Delta::random(&mut rng);
        let count = 300;
        let (keys_publisher, recv_partner) = ideal_cot(&mut rng, &delta_publisher, count);
        let (keys_partner, recv_publisher) = ideal_cot(&mut rng, &delta_partner, count);

        let t0 = derive_triples(
            Role::Publisher,
            &delta_publisher,
            &keys_publisher,
            &recv_publisher,
            count,
        );
        let t1 = derive_triples(
            Role::Partner,
            &delta_partner,
            &keys_partner,
            &recv_partner,
            count,
        );
        let mut products = 0;
        for (x, y) in t0.iter().zip(&t1) {
            let (a, b, c) = (x.a ^ y.a, x.b ^ y.b, x.c ^ y.c);
            assert_eq!(a & b, c);
            products += usize::from(c);
        }
        assert!(products > 0);
    }
}
