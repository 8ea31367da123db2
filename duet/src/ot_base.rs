//! Batched random OT based on the Chou Orlandi Simplest OT protocol, as described in [ABKLX21].
//!
//! A single [`Sender`] key pair is reused for a whole batch of OTs, each OT being separated by its
//! index in the key derivation. Both messages of every OT are random and derived from the shared
//! curve points, so that no reply from the sender is required.
//!
//! [ABKLX21]: https://eprint.iacr.org/2021/1218.pdf
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::{hash::hash_ot_key, Error};

pub(crate) const MSG_LEN: usize = 32;

/// The type of (random) message obtained via the Base OT Protocol.
pub(crate) type OtMessage = [u8; MSG_LEN];

/// The party offering 2 random messages per OT of which the [`Receiver`] learns only 1.
#[derive(Clone)]
pub(crate) struct Sender {
    secret: Scalar,
    point: RistrettoPoint,
    shared_base: RistrettoPoint,
}

/// The party choosing 1-out-of-2 messages per OT w/o the [`Sender`] knowing which it was.
#[derive(Clone)]
pub(crate) struct Receiver {
    sender_point: RistrettoPoint,
    secrets: Vec<Scalar>,
}

/// The kind of messages exchanged between a [`Sender`] and a [`Receiver`].
pub(crate) mod message {
    use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
    use serde::{Deserialize, Serialize};

    use crate::Error;

    /// The public key of the [`super::Sender`], opening the protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct SenderSetup(pub(super) [u8; 32]);

    /// One blinded public key per OT, sent by the [`super::Receiver`].
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct ReceiverChoices(pub(super) Vec<[u8; 32]>);

    impl ReceiverChoices {
        pub(crate) fn len(&self) -> usize {
            self.0.len()
        }
    }

    pub(super) fn decompress(bytes: &[u8; 32]) -> Result<RistrettoPoint, Error> {
        CompressedRistretto(*bytes)
            .decompress()
            .ok_or(Error::InvalidOtPoint)
    }
}

impl Sender {
    /// Samples a fresh key pair, reused for every OT of the batch.
    pub(crate) fn new<RNG>(rng: &mut RNG) -> Self
    where
        RNG: rand::RngCore + rand::CryptoRng,
    {
        let secret = Scalar::random::<RNG>(rng);
        let point = RISTRETTO_BASEPOINT_TABLE * &secret;
        let shared_base = point * secret;

        Self {
            secret,
            point,
            shared_base,
        }
    }

    /// Creates a [`message::SenderSetup`] message suitable for exchange with a [`Receiver`].
    pub(crate) fn setup_message(&self) -> message::SenderSetup {
        message::SenderSetup(self.point.compress().to_bytes())
    }

    /// Derives both random messages of every OT chosen by the [`Receiver`].
    ///
    /// Computation of `k_b := H(i, A, R_i^y B^{−b})` with
    ///   - `A := self.point`
    ///   - `R_i := choices.0[i]`
    ///   - `B := self.shared_base`
    ///   - `b := choice bit [false, true]`
    pub(crate) fn send(
        &self,
        choices: &message::ReceiverChoices,
    ) -> Result<Vec<[OtMessage; 2]>, Error> {
        let own_point_bytes = self.point.compress().to_bytes();
        let mut keys = Vec::with_capacity(choices.0.len());
        for (i, bytes) in choices.0.iter().enumerate() {
            let shared = message::decompress(bytes)? * self.secret;
            let key0 = hash_ot_key(i, &own_point_bytes, &shared.compress().to_bytes());
            let key1 = hash_ot_key(
                i,
                &own_point_bytes,
                &(shared - self.shared_base).compress().to_bytes(),
            );
            keys.push([key0, key1]);
        }
        Ok(keys)
    }
}

impl Receiver {
    /// Chooses one message per OT, implementing step 2 of protocol CO (Figure 4) of ABKLX21 for
    /// every choice bit.
    pub(crate) fn choose<RNG>(
        rng: &mut RNG,
        setup: &message::SenderSetup,
        choices: impl IntoIterator<Item = bool>,
    ) -> Result<(Receiver, message::ReceiverChoices), Error>
    where
        RNG: rand::RngCore + rand::CryptoRng,
    {
        let sender_point = message::decompress(&setup.0)?;
        let mut secrets = vec![];
        let mut points = vec![];
        for choice in choices {
            let secret = Scalar::random(rng);
            let own_point = RISTRETTO_BASEPOINT_TABLE * &secret;
            let blinded = if choice {
                sender_point + own_point
            } else {
                own_point
            };
            secrets.push(secret);
            points.push(blinded.compress().to_bytes());
        }
        let receiver = Receiver {
            sender_point,
            secrets,
        };
        Ok((receiver, message::ReceiverChoices(points)))
    }

    /// Computes the chosen message of every OT as `k_{c_i} := H(i, A, A^{x_i})`.
    pub(crate) fn recv(&self) -> Vec<OtMessage> {
        let sender_bytes = self.sender_point.compress().to_bytes();
        self.secrets
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let shared = (self.sender_point * x).compress().to_bytes();
                hash_ot_key(i, &sender_bytes, &shared)
            })
            .collect()
    }
}

#[test]
fn test_abklx21() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng_send = ChaCha20Rng::from_entropy();
    let mut rng_recv = ChaCha20Rng::from_entropy();

    let choices = [false, true, true, false];
    let s = Sender::new(&mut rng_send);
    let setup = s.setup_message();
    let (r, msg) = Receiver::choose(&mut rng_recv, &setup, choices).unwrap();
    let sent = s.send(&msg).unwrap();
    let received = r.recv();

    assert_eq!(sent.len(), choices.len());
    for ((keys, key), choice) in sent.iter().zip(received).zip(choices) {
        assert_eq!(key, keys[choice as usize]);
        assert_ne!(key, keys[!choice as usize]);
    }
}

#[test]
fn test_invalid_point() {
    use curve25519_dalek::ristretto::CompressedRistretto;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_seed([0; 32]);
    let s = Sender::new(&mut rng);
    let invalid = message::ReceiverChoices(vec![[0xFF; 32]]);
    assert!(matches!(s.send(&invalid), Err(Error::InvalidOtPoint)));
    assert!(CompressedRistretto([0xFF; 32]).decompress().is_none());
}
