//! Construction of circuits from fixed-width words.

use crate::{Circuit, Gate, GateIndex};

/// Generate and propagate bits of a group of adjacent bits.
type Carry = (GateIndex, GateIndex);

/// A fixed-width integer in a circuit, as a list of wires ordered least significant bit first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word(Vec<GateIndex>);

impl Word {
    /// Creates a word from wires ordered least significant bit first.
    pub fn new(bits: Vec<GateIndex>) -> Self {
        Self(bits)
    }

    /// The wires of the word, least significant bit first.
    pub fn bits(&self) -> &[GateIndex] {
        &self.0
    }

    /// The width of the word in bits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the word has no bits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates two words, `self` becoming the low bits of the result.
    pub fn concat(&self, high: &Word) -> Word {
        let mut bits = self.0.clone();
        bits.extend_from_slice(&high.0);
        Word(bits)
    }
}

/// Appends gates to a circuit under construction.
///
/// Every operation returns the index of the gate holding its result, so that the gates always
/// only refer to earlier gates and the resulting circuit is acyclic by construction. Comparisons
/// and additions combine (generate, propagate) pairs in a balanced tree, so their AND depth, and
/// with it the number of communication rounds, grows logarithmically in the width of the words.
#[derive(Clone, Debug, Default)]
pub struct CircuitBuilder {
    gates: Vec<Gate>,
    constants: [Option<GateIndex>; 2],
}

impl CircuitBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, gate: Gate) -> GateIndex {
        self.gates.push(gate);
        // past the index range the circuit is rejected by `Circuit::validate` anyway
        GateIndex::try_from(self.gates.len() - 1).unwrap_or(GateIndex::MAX)
    }

    /// Adds `bits` input wires provided by the Publisher.
    pub fn publisher_input(&mut self, bits: usize) -> Word {
        Word((0..bits).map(|_| self.push(Gate::InPublisher)).collect())
    }

    /// Adds `bits` input wires provided by the Partner.
    pub fn partner_input(&mut self, bits: usize) -> Word {
        Word((0..bits).map(|_| self.push(Gate::InPartner)).collect())
    }

    /// A wire with a fixed value, shared between all users of the same constant.
    pub fn constant(&mut self, value: bool) -> GateIndex {
        match self.constants[usize::from(value)] {
            Some(w) => w,
            None => {
                let w = self.push(Gate::Const(value));
                self.constants[usize::from(value)] = Some(w);
                w
            }
        }
    }

    /// The lowest `bits` bits of `value` as a constant word.
    pub fn constant_word(&mut self, value: u64, bits: usize) -> Word {
        Word(
            (0..bits)
                .map(|i| self.constant(i < 64 && (value >> i) & 1 == 1))
                .collect(),
        )
    }

    /// `a ⊕ b`, evaluated locally by both parties.
    pub fn xor(&mut self, a: GateIndex, b: GateIndex) -> GateIndex {
        self.push(Gate::Xor(a, b))
    }

    /// `a ∧ b`, which consumes one Beaver triple and one round of communication.
    pub fn and(&mut self, a: GateIndex, b: GateIndex) -> GateIndex {
        self.push(Gate::And(a, b))
    }

    /// `¬a`.
    pub fn not(&mut self, a: GateIndex) -> GateIndex {
        self.push(Gate::Not(a))
    }

    /// `a ∨ b`, computed as `a ⊕ b ⊕ (a ∧ b)`.
    pub fn or(&mut self, a: GateIndex, b: GateIndex) -> GateIndex {
        let x = self.xor(a, b);
        let y = self.and(a, b);
        self.xor(x, y)
    }

    /// `if cond { then } else { otherwise }` without branching on `cond`.
    pub fn select(
        &mut self,
        cond: GateIndex,
        then: GateIndex,
        otherwise: GateIndex,
    ) -> GateIndex {
        let diff = self.xor(then, otherwise);
        let masked = self.and(cond, diff);
        self.xor(otherwise, masked)
    }

    /// Bitwise [`CircuitBuilder::select`] of 2 words of equal width.
    pub fn select_word(&mut self, cond: GateIndex, then: &Word, otherwise: &Word) -> Word {
        assert_eq!(then.len(), otherwise.len());
        Word(
            then.0
                .iter()
                .zip(otherwise.0.iter())
                .map(|(&t, &e)| self.select(cond, t, e))
                .collect(),
        )
    }

    /// Bitwise negation of a word.
    pub fn not_word(&mut self, a: &Word) -> Word {
        Word(a.0.iter().map(|&w| self.not(w)).collect())
    }

    /// `a == b`, using a balanced tree of AND gates over the bitwise XNORs.
    pub fn eq(&mut self, a: &Word, b: &Word) -> GateIndex {
        assert_eq!(a.len(), b.len());
        let mut level: Vec<GateIndex> = a
            .0
            .iter()
            .zip(b.0.iter())
            .map(|(&x, &y)| {
                let diff = self.xor(x, y);
                self.not(diff)
            })
            .collect();
        if level.is_empty() {
            return self.constant(true);
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
            for pair in level.chunks(2) {
                if let [x, y] = *pair {
                    next.push(self.and(x, y));
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }
        level[0]
    }

    /// Merges the (generate, propagate) pairs of 2 adjacent bit groups, `high` above `low`.
    ///
    /// `p_low` is the propagate bit of `low`. It is `None` if `low` contains bit 0, because such
    /// a group never needs its propagate bit.
    fn merge(
        &mut self,
        (g_high, p_high): Carry,
        (g_low, _): Carry,
        p_low: Option<GateIndex>,
    ) -> Carry {
        // generate and propagate of a group are never both set, so the XOR acts as an OR
        let carried = self.and(p_high, g_low);
        let g = self.xor(g_high, carried);
        let p = match p_low {
            Some(p_low) => self.and(p_high, p_low),
            None => p_high,
        };
        (g, p)
    }

    /// Generate bit of the whole word, reducing adjacent groups pairwise.
    fn carry_tree(&mut self, mut level: Vec<Carry>) -> GateIndex {
        if level.is_empty() {
            return self.constant(false);
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
            for (i, pair) in level.chunks(2).enumerate() {
                if let [low, high] = *pair {
                    let p_low = (i > 0).then_some(low.1);
                    next.push(self.merge(high, low, p_low));
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }
        level[0].0
    }

    /// Generate bit of every prefix `0..=i` of the word, in Sklansky order.
    fn prefix_carries(&mut self, mut groups: Vec<Carry>) -> Vec<GateIndex> {
        let n = groups.len();
        let mut span = 1;
        while span < n {
            for i in (0..n).filter(|i| i & span != 0) {
                let start = i & !(2 * span - 1);
                let low = groups[start + span - 1];
                let p_low = (start > 0).then_some(low.1);
                groups[i] = self.merge(groups[i], low, p_low);
            }
            span *= 2;
        }
        groups.into_iter().map(|(g, _)| g).collect()
    }

    /// Unsigned `a < b`.
    ///
    /// Bit `i` generates if `b` has a 1 where `a` has a 0 and propagates if both bits are equal,
    /// so the generate bit of the whole word is set iff `a < b`.
    pub fn lt(&mut self, a: &Word, b: &Word) -> GateIndex {
        assert_eq!(a.len(), b.len());
        let bits = a
            .0
            .iter()
            .zip(b.0.iter())
            .map(|(&x, &y)| {
                let not_x = self.not(x);
                let diff = self.xor(x, y);
                (self.and(not_x, y), self.not(diff))
            })
            .collect();
        self.carry_tree(bits)
    }

    /// Unsigned `a > b`.
    pub fn gt(&mut self, a: &Word, b: &Word) -> GateIndex {
        self.lt(b, a)
    }

    /// `a + b` without overflow: the result is one bit wider than the operands.
    pub fn add(&mut self, a: &Word, b: &Word) -> Word {
        assert_eq!(a.len(), b.len());
        let bits: Vec<Carry> = a
            .0
            .iter()
            .zip(b.0.iter())
            .map(|(&x, &y)| (self.and(x, y), self.xor(x, y)))
            .collect();
        let halves: Vec<GateIndex> = bits.iter().map(|&(_, p)| p).collect();
        let carries = self.prefix_carries(bits);

        let mut sum = Vec::with_capacity(a.len() + 1);
        let mut carry = self.constant(false);
        for (&half, &carry_out) in halves.iter().zip(carries.iter()) {
            sum.push(self.xor(half, carry));
            carry = carry_out;
        }
        sum.push(carry);
        Word(sum)
    }

    /// Pads `a` with constant zeros up to `bits` bits.
    pub fn zero_extend(&mut self, a: &Word, bits: usize) -> Word {
        assert!(bits >= a.len());
        let zero = self.constant(false);
        let mut extended = a.0.clone();
        extended.resize(bits, zero);
        Word(extended)
    }

    /// Number of gates added so far.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Returns `true` if no gates have been added yet.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Finishes the circuit, exposing the given wires as outputs.
    pub fn build(self, outputs: Vec<GateIndex>) -> Circuit {
        Circuit::new(self.gates, outputs)
    }
}
