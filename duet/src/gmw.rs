//! Layer-by-layer evaluation of a circuit on XOR shares (GMW).
//!
//! XOR gates are computed locally by both parties, NOT gates and constants only by the
//! Publisher. An AND gate `x ∧ y` consumes a Beaver triple `(a, b, c)`: both parties open
//! `d = x ⊕ a` and `e = y ⊕ b`, after which the share of the result is
//! `c ⊕ d·b ⊕ e·a` (plus `d·e` for the Publisher).

use crate::{
    circuit::Layer,
    types::BeaverTriple,
    Circuit, Error, Gate, Role,
};

/// The wire shares of one party during the secure evaluation.
pub(crate) struct WireShares {
    role: Role,
    layers: Vec<Layer>,
    /// Index of the first triple used by each layer.
    triple_offsets: Vec<usize>,
    wires: Vec<bool>,
    triples: Vec<BeaverTriple>,
}

impl WireShares {
    /// Assigns the input shares to the input wires and evaluates everything that does not depend
    /// on an AND gate.
    pub(crate) fn new(
        circuit: &Circuit,
        role: Role,
        publisher_shares: &[bool],
        partner_shares: &[bool],
    ) -> Result<Self, Error> {
        circuit.validate_input(Role::Publisher, publisher_shares.len())?;
        circuit.validate_input(Role::Partner, partner_shares.len())?;

        let layers = circuit.layers();
        let mut triple_offsets = Vec::with_capacity(layers.len());
        let mut offset = 0;
        for layer in layers.iter() {
            triple_offsets.push(offset);
            offset += layer.ands.len();
        }

        let mut wires = vec![false; circuit.gates().len()];
        let mut publisher_shares = publisher_shares.iter();
        let mut partner_shares = partner_shares.iter();
        for (w, gate) in wires.iter_mut().zip(circuit.gates()) {
            match gate {
                Gate::InPublisher => {
                    *w = *publisher_shares.next().ok_or(Error::InsufficientInput)?
                }
                Gate::InPartner => *w = *partner_shares.next().ok_or(Error::InsufficientInput)?,
                _ => {}
            }
        }

        let mut shares = Self {
            role,
            layers,
            triple_offsets,
            wires,
            triples: vec![],
        };
        shares.eval_locals(circuit, 0);
        Ok(shares)
    }

    /// Number of AND layers, i.e. rounds of openings needed to finish the evaluation.
    pub(crate) fn and_depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Number of AND gates in `layer`.
    pub(crate) fn layer_width(&self, layer: usize) -> usize {
        self.layers.get(layer).map_or(0, |l| l.ands.len())
    }

    pub(crate) fn set_triples(&mut self, triples: Vec<BeaverTriple>) {
        self.triples = triples;
    }

    /// Masks the inputs of all AND gates of `layer`, returning `d_0, e_0, d_1, e_1, ...`.
    pub(crate) fn open_layer(&self, circuit: &Circuit, layer: usize) -> Result<Vec<bool>, Error> {
        let ands = &self.layers[layer].ands;
        let offset = self.triple_offsets[layer];
        let triples = self
            .triples
            .get(offset..offset + ands.len())
            .ok_or(Error::InvalidCircuit)?;
        let mut openings = Vec::with_capacity(2 * ands.len());
        for (&gate, t) in ands.iter().zip(triples) {
            if let Gate::And(x, y) = circuit.gates()[gate as usize] {
                openings.push(self.wires[x as usize] ^ t.a);
                openings.push(self.wires[y as usize] ^ t.b);
            }
        }
        Ok(openings)
    }

    /// Computes the AND gates of `layer` from both parties' openings and evaluates the local gates
    /// that depend on them.
    pub(crate) fn close_layer(
        &mut self,
        circuit: &Circuit,
        layer: usize,
        own: &[bool],
        peer: &[bool],
    ) -> Result<(), Error> {
        let ands = &self.layers[layer].ands;
        if own.len() != 2 * ands.len() || peer.len() != 2 * ands.len() {
            return Err(Error::InvalidMessageLength("AndLayer"));
        }
        let offset = self.triple_offsets[layer];
        let triples = self
            .triples
            .get(offset..offset + ands.len())
            .ok_or(Error::InvalidCircuit)?;
        let publisher = self.role == Role::Publisher;
        for (i, (&gate, t)) in ands.iter().zip(triples).enumerate() {
            let d = own[2 * i] ^ peer[2 * i];
            let e = own[2 * i + 1] ^ peer[2 * i + 1];
            self.wires[gate as usize] = t.c ^ (d & t.b) ^ (e & t.a) ^ (publisher & d & e);
        }
        self.eval_locals(circuit, layer);
        Ok(())
    }

    fn eval_locals(&mut self, circuit: &Circuit, layer: usize) {
        let publisher = self.role == Role::Publisher;
        for &gate in self.layers[layer].locals.iter() {
            let w = match circuit.gates()[gate as usize] {
                Gate::InPublisher | Gate::InPartner | Gate::And(_, _) => continue,
                Gate::Const(b) => publisher & b,
                Gate::Xor(x, y) => self.wires[x as usize] ^ self.wires[y as usize],
                Gate::Not(x) => self.wires[x as usize] ^ publisher,
            };
            self.wires[gate as usize] = w;
        }
    }

    /// The shares of the output wires, only meaningful once every layer was closed.
    pub(crate) fn outputs(&self, circuit: &Circuit) -> Vec<bool> {
        circuit
            .output_gates()
            .iter()
            .map(|&o| self.wires[o as usize])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitBuilder;

    /// Triples with `a ∧ b = c`, split with fixed masks.
    fn dealt_triples(n: usize) -> (Vec<BeaverTriple>, Vec<BeaverTriple>) {
        let mut t0 = vec![];
        let mut t1 = vec![];
        for i in 0..n {
            let (a, b) = (i % 2 == 0, i % 3 == 0);
            let mask = BeaverTriple {
                a: i % 5 == 0,
                b: true,
                c: i % 7 == 0,
            };
            t0.push(mask);
            t1.push(BeaverTriple {
                a: a ^ mask.a,
                b: b ^ mask.b,
                c: (a & b) ^ mask.c,
            });
        }
        (t0, t1)
    }

    #[test]
    fn evaluates_with_dealt_triples() {
        let mut b = CircuitBuilder::new();
        let x = b.publisher_input(8);
        let y = b.partner_input(8);
        let lt = b.lt(&x, &y);
        let eq = b.eq(&x, &y);
        let not_lt = b.not(lt);
        let one = b.constant(true);
        let circuit = b.build(vec![lt, eq, not_lt, one]);

        let x_bits = [true, false, true, false, false, false, false, false];
        let y_bits = [false, true, true, false, false, false, false, false];
        let x_mask = [true, true, false, false, true, false, true, false];
        let y_mask = [false, true, true, true, false, false, false, true];
        let x_own: Vec<bool> = x_bits.iter().zip(x_mask).map(|(v, m)| v ^ m).collect();
        let y_own: Vec<bool> = y_bits.iter().zip(y_mask).map(|(v, m)| v ^ m).collect();

        let mut p0 = WireShares::new(&circuit, Role::Publisher, &x_own, &y_mask).unwrap();
        let mut p1 = WireShares::new(&circuit, Role::Partner, &x_mask, &y_own).unwrap();
        let (t0, t1) = dealt_triples(circuit.and_gates());
        p0.set_triples(t0);
        p1.set_triples(t1);

        for layer in 1..=p0.and_depth() {
            let o0 = p0.open_layer(&circuit, layer).unwrap();
            let o1 = p1.open_layer(&circuit, layer).unwrap();
            p0.close_layer(&circuit, layer, &o0, &o1).unwrap();
            p1.close_layer(&circuit, layer, &o1, &o0).unwrap();
        }
        let out: Vec<bool> = p0
            .outputs(&circuit)
            .iter()
            .zip(p1.outputs(&circuit))
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(out, circuit.eval(&x_bits, &y_bits).unwrap());
        assert_eq!(out, vec![true, false, false, true]);
    }

    #[test]
    fn rejects_openings_of_wrong_length() {
        let mut b = CircuitBuilder::new();
        let x = b.publisher_input(1).bits()[0];
        let y = b.partner_input(1).bits()[0];
        let z = b.and(x, y);
        let circuit = b.build(vec![z]);
        let mut p0 = WireShares::new(&circuit, Role::Publisher, &[true], &[false]).unwrap();
        p0.set_triples(vec![BeaverTriple::default()]);
        let own = p0.open_layer(&circuit, 1).unwrap();
        assert_eq!(
            p0.close_layer(&circuit, 1, &own, &[true]),
            Err(Error::InvalidMessageLength("AndLayer"))
        );
    }
}
