//! Implements Correlated OT extension from [ALSZ13].
//!
//! Correlated OT uses Base OT to initialize [`K`] many pairs of RNGs. Each batch then yields
//! [`BLOCK_SIZE`] correlated OTs, i.e. a [`CotSender`] holding `Δ` obtains keys `K_j` while the
//! [`CotReceiver`] obtains a random choice bit `r_j` and `M_j = K_j ⊕ r_j·Δ`.
//!
//! [ALSZ13]: <https://eprint.iacr.org/2013/552.pdf>

use crate::{
    ot_base::{
        message::{ReceiverChoices, SenderSetup},
        Receiver as BaseReceiver, Sender as BaseSender,
    },
    types::{Delta, ReceiverMac, SenderKey, K},
    Error,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Number of OTs produced in a single run of the OT protocol (i.e. "batch size").
pub(crate) const BLOCK_SIZE: usize = K;

/// Number of batches needed for `count` correlated OTs.
pub(crate) fn batches(count: usize) -> usize {
    (count + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Initial state of a Receiver in Correlated OT terms, acting as the sender of the base OTs.
#[derive(Clone)]
pub(crate) struct ReceiverInitializer {
    sender: BaseSender,
}

/// Initial state of a Sender in Correlated OT terms, acting as the receiver of the base OTs.
#[derive(Clone)]
pub(crate) struct SenderInitializer {
    delta: Delta,
    receiver: BaseReceiver,
}

/// A Receiver in Correlated OT protocol terms.
#[derive(Debug, Clone)]
pub(crate) struct CotReceiver {
    otg0: Vec<ChaCha20Rng>,
    otg1: Vec<ChaCha20Rng>,
}

/// A Sender in Correlated OT protocol terms.
#[derive(Debug, Clone)]
pub(crate) struct CotSender {
    delta: Delta,
    otg: Vec<ChaCha20Rng>,
}

/// The receiver's side of a run of correlated OTs.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReceivedOts {
    pub(crate) choices: Vec<bool>,
    pub(crate) macs: Vec<ReceiverMac>,
}

impl ReceiverInitializer {
    /// Starts a new OT extension receiver session.
    ///
    /// Returns the message to be sent upstream plus an intermediate struct to create a
    /// [`CotReceiver`].
    pub(crate) fn init(rng: &mut ChaCha20Rng) -> (Self, SenderSetup) {
        let sender = BaseSender::new(rng);
        let msg = sender.setup_message();
        (Self { sender }, msg)
    }

    /// Called after the respective [`ReceiverChoices`] message was received from an upstream
    /// [`SenderInitializer`].
    pub(crate) fn recv(&self, m: &ReceiverChoices) -> Result<CotReceiver, Error> {
        if m.len() != K {
            return Err(Error::InvalidMessageLength("BaseOtSetup"));
        }
        let seeds = self.sender.send(m)?;
        let otg0 = seeds.iter().map(|s| ChaCha20Rng::from_seed(s[0])).collect();
        let otg1 = seeds.iter().map(|s| ChaCha20Rng::from_seed(s[1])).collect();
        Ok(CotReceiver { otg0, otg1 })
    }
}

impl SenderInitializer {
    /// Starts a new OT extension sender session, choosing the base OTs according to the bits of
    /// `delta`.
    pub(crate) fn init(
        rng: &mut ChaCha20Rng,
        delta: Delta,
        m: &SenderSetup,
    ) -> Result<(Self, ReceiverChoices), Error> {
        let (receiver, msg) = BaseReceiver::choose(rng, m, (0..K).map(|i| delta.bit(i)))?;
        Ok((Self { delta, receiver }, msg))
    }

    /// Returns a new [`CotSender`] seeded with the chosen base OT messages.
    pub(crate) fn finish(self) -> CotSender {
        let otg = self
            .receiver
            .recv()
            .into_iter()
            .map(ChaCha20Rng::from_seed)
            .collect();
        CotSender {
            delta: self.delta,
            otg,
        }
    }
}

impl CotSender {
    /// "Sends" data in correlated OT sense; that is after receiving `ot_rx` from a
    /// [`CotReceiver`].
    ///
    /// Stores the resulting keys in `keys_out`.
    pub(crate) fn send(&mut self, ot_rx: &[u128], keys_out: &mut [SenderKey]) {
        let mut q_i = [0u128; BLOCK_SIZE];
        for (i, q_i) in q_i.iter_mut().enumerate() {
            *q_i = self.otg[i].gen::<u128>() ^ if self.delta.bit(i) { ot_rx[i] } else { 0 };
        }

        matrix_transpose(keys_out, &q_i, SenderKey);
    }

    /// Derives the keys of `count` correlated OTs from the columns of the [`CotReceiver`].
    pub(crate) fn extend(
        &mut self,
        columns: &[u128],
        count: usize,
    ) -> Result<Vec<SenderKey>, Error> {
        if columns.len() != batches(count) * BLOCK_SIZE {
            return Err(Error::InvalidMessageLength("OtExtension"));
        }
        let mut keys = vec![SenderKey::default(); batches(count) * BLOCK_SIZE];
        for (ot_rx, keys_out) in columns
            .chunks(BLOCK_SIZE)
            .zip(keys.chunks_mut(BLOCK_SIZE))
        {
            self.send(ot_rx, keys_out);
        }
        keys.truncate(count);
        Ok(keys)
    }

    pub(crate) fn delta(&self) -> &Delta {
        &self.delta
    }
}

impl CotReceiver {
    /// Called to create a new batch of OT data.
    ///
    /// A batch is [`BLOCK_SIZE`]-many MACs exchanged in 1 round of OT.
    ///
    /// - `random_bits` are the choice bits of the batch
    /// - `macs_out` is the batch of derived MACs of length [`BLOCK_SIZE`]
    /// - `ot_out` is the data to be sent upstream of length [`BLOCK_SIZE`]
    pub(crate) fn new_batch(
        &mut self,
        random_bits: u128,
        macs_out: &mut [ReceiverMac],
        ot_out: &mut [u128],
    ) {
        assert!(ot_out.len() >= BLOCK_SIZE);
        assert!(macs_out.len() >= BLOCK_SIZE);

        let mut t_i = [0u128; BLOCK_SIZE];
        for (i, t_i) in t_i.iter_mut().enumerate() {
            *t_i = self.otg0[i].gen::<u128>();
        }

        for i in 0..BLOCK_SIZE {
            ot_out[i] = t_i[i] ^ self.otg1[i].gen::<u128>() ^ random_bits;
        }

        matrix_transpose(macs_out, &t_i, ReceiverMac);
    }

    /// Runs as many batches as needed for `count` correlated OTs with random choice bits.
    ///
    /// Returns the receiver's OTs and the columns that must be sent to the [`CotSender`].
    pub(crate) fn extend(
        &mut self,
        rng: &mut ChaCha20Rng,
        count: usize,
    ) -> (ReceivedOts, Vec<u128>) {
        let n = batches(count) * BLOCK_SIZE;
        let mut choices = Vec::with_capacity(n);
        let mut macs = vec![ReceiverMac::default(); n];
        let mut columns = vec![0u128; n];
        for (macs_out, ot_out) in macs
            .chunks_mut(BLOCK_SIZE)
            .zip(columns.chunks_mut(BLOCK_SIZE))
        {
            let random_bits: u128 = rng.gen();
            choices.extend((0..BLOCK_SIZE).map(|j| (random_bits >> j) & 1 == 1));
            self.new_batch(random_bits, macs_out, ot_out);
        }
        choices.truncate(count);
        macs.truncate(count);
        (ReceivedOts { choices, macs }, columns)
    }
}

#[inline]
fn matrix_transpose<T>(out: &mut [T], rows: &[u128], wrap: impl Fn(u128) -> T) {
    for (j, out) in out.iter_mut().enumerate().take(BLOCK_SIZE) {
        *out = wrap(transpose_column(rows, 1 << j));
    }
}

#[inline]
fn transpose_column(rows: &[u128], test_bit: u128) -> u128 {
    let mut column = 0;

    for (i, row) in rows.iter().enumerate().take(BLOCK_SIZE) {
        let bit = u128::from((row & test_bit) != 0);
        column |= bit << i;
    }
    column
}

#[test]
fn test_correlation() {
    let mut rng_recv = ChaCha20Rng::from_seed([42; 32]);
    let mut rng_send = ChaCha20Rng::from_seed([43; 32]);
    let delta = Delta::random(&mut rng_send);

    let (r_init, setup) = ReceiverInitializer::init(&mut rng_recv);
    let (s_init, choices) = SenderInitializer::init(&mut rng_send, delta.clone(), &setup).unwrap();
    let mut receiver = r_init.recv(&choices).unwrap();
    let mut sender = s_init.finish();

    let count = BLOCK_SIZE + 5;
    let (received, columns) = receiver.extend(&mut rng_recv, count);
    assert_eq!(columns.len(), 2 * BLOCK_SIZE);
    let keys = sender.extend(&columns, count).unwrap();

    assert_eq!(keys.len(), count);
    assert_eq!(received.macs.len(), count);
    assert!(received.choices.iter().any(|c| *c));
    assert!(received.choices.iter().any(|c| !*c));
    for ((key, mac), choice) in keys.iter().zip(&received.macs).zip(&received.choices) {
        let expected = if *choice { delta.xor(*key) } else { *key };
        assert_eq!(SenderKey::from(*mac), expected);
    }
    assert_eq!(
        sender.extend(&columns[1..], count),
        Err(Error::InvalidMessageLength("OtExtension"))
    );
}
