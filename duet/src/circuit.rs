//! Boolean circuits evaluated by the two parties.

use blake3::Hasher;

use crate::{Error, Role};

/// Position of a gate in [`Circuit::gates`], which also names the wire carrying its output.
pub type GateIndex = u32;

/// Digest identifying a circuit, see [`Circuit::blake3_hash`].
pub type CircuitBlake3Hash = [u8; 32];

const MAX_GATES: usize = (u32::MAX >> 4) as usize;
const MAX_AND_GATES: usize = (u32::MAX >> 8) as usize;

/// A circuit of AND, XOR and NOT gates that can be evaluated on secret shares.
///
/// Gates may only read wires of gates listed before them, so the order of the gates is also a
/// valid evaluation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Circuit {
    gates: Vec<Gate>,
    output_gates: Vec<GateIndex>,
    and_gates: usize,
    and_depth: usize,
    publisher_inputs: usize,
    partner_inputs: usize,
}

/// The gates that become computable once all previous layers have been evaluated.
///
/// The AND gates of a layer only depend on gates of earlier layers and can thus be opened in a
/// single message. The local gates of a layer depend on earlier layers or on the AND gates of the
/// same layer and are listed in circuit order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Layer {
    pub(crate) ands: Vec<GateIndex>,
    pub(crate) locals: Vec<GateIndex>,
}

impl Circuit {
    /// Wraps the gates and the wires exposed as outputs, without validating them.
    pub fn new(gates: Vec<Gate>, output_gates: Vec<GateIndex>) -> Self {
        let count = |pred: fn(&Gate) -> bool| gates.iter().filter(|g| pred(g)).count();
        let and_gates = count(Gate::is_and);
        let publisher_inputs = count(|g| matches!(g, Gate::InPublisher));
        let partner_inputs = count(|g| matches!(g, Gate::InPartner));
        let and_depth = gate_depths(&gates).into_iter().max().unwrap_or(0) as usize;
        Circuit {
            gates,
            output_gates,
            and_gates,
            and_depth,
            publisher_inputs,
            partner_inputs,
        }
    }

    /// All gates, in evaluation order.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Wires revealed (as shares) at the end of the evaluation.
    pub fn output_gates(&self) -> &[GateIndex] {
        &self.output_gates
    }

    /// How many Beaver triples an evaluation consumes.
    pub fn and_gates(&self) -> usize {
        self.and_gates
    }

    /// Length of the longest chain of AND gates, i.e. the number of opening rounds.
    pub fn and_depth(&self) -> usize {
        self.and_depth
    }

    /// Input bits contributed by the Publisher.
    pub fn publisher_inputs(&self) -> usize {
        self.publisher_inputs
    }

    /// Input bits contributed by the Partner.
    pub fn partner_inputs(&self) -> usize {
        self.partner_inputs
    }

    /// Digest over the gates and outputs, used to make sure both parties evaluate the same circuit.
    pub fn blake3_hash(&self) -> CircuitBlake3Hash {
        let mut hasher = Hasher::new();
        for gate in &self.gates {
            gate.hash_into(&mut hasher);
        }
        for output in &self.output_gates {
            hasher.update(&output.to_be_bytes());
        }
        hasher.finalize().into()
    }

    /// Checks the wiring and the size of the circuit.
    ///
    /// Fails with [`Error::InvalidCircuit`] if a gate reads its own or a later wire or if an output
    /// names a wire that does not exist, and with [`Error::MaxCircuitSizeExceeded`] if the circuit
    /// is too large to be evaluated. A circuit without outputs is valid, attributing zero
    /// conversions produces one.
    pub fn validate(&self) -> Result<(), Error> {
        check_size(self.gates.len(), self.and_gates)?;
        let wired_backwards = self
            .gates
            .iter()
            .enumerate()
            .all(|(i, g)| g.operands().all(|w| (w as usize) < i));
        let outputs_exist = self
            .output_gates
            .iter()
            .all(|&o| (o as usize) < self.gates.len());
        if wired_backwards && outputs_exist {
            Ok(())
        } else {
            Err(Error::InvalidCircuit)
        }
    }

    /// Fails unless `bits` holds exactly one bit per input gate of `role`.
    pub(crate) fn validate_input(&self, role: Role, bits: usize) -> Result<(), Error> {
        let expected = match role {
            Role::Publisher => self.publisher_inputs,
            Role::Partner => self.partner_inputs,
        };
        if bits == expected {
            Ok(())
        } else {
            Err(Error::InsufficientInput)
        }
    }

    /// Groups the gates by their AND depth, starting with the layer of depth 0.
    ///
    /// Must only be called on a validated circuit.
    pub(crate) fn layers(&self) -> Vec<Layer> {
        let depths = gate_depths(&self.gates);
        let mut layers = vec![Layer::default(); self.and_depth + 1];
        for (i, (gate, depth)) in self.gates.iter().zip(depths).enumerate() {
            let layer = &mut layers[depth as usize];
            if gate.is_and() {
                layer.ands.push(i as GateIndex);
            } else {
                layer.locals.push(i as GateIndex);
            }
        }
        layers
    }

    /// Evaluates the circuit in plaintext.
    ///
    /// Used to check the secure evaluation against, never as part of the protocol.
    pub fn eval(&self, publisher: &[bool], partner: &[bool]) -> Result<Vec<bool>, Error> {
        self.validate()?;
        self.validate_input(Role::Publisher, publisher.len())?;
        self.validate_input(Role::Partner, partner.len())?;

        let mut publisher = publisher.iter();
        let mut partner = partner.iter();
        let mut wires: Vec<bool> = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let w = match *gate {
                Gate::InPublisher => *publisher.next().ok_or(Error::InsufficientInput)?,
                Gate::InPartner => *partner.next().ok_or(Error::InsufficientInput)?,
                Gate::Const(b) => b,
                Gate::Xor(x, y) => wires[x as usize] ^ wires[y as usize],
                Gate::And(x, y) => wires[x as usize] & wires[y as usize],
                Gate::Not(x) => !wires[x as usize],
            };
            wires.push(w);
        }
        Ok(self.output_gates.iter().map(|&o| wires[o as usize]).collect())
    }
}

/// Fails with [`Error::MaxCircuitSizeExceeded`] if a circuit of this size cannot be evaluated.
pub(crate) fn check_size(gates: usize, and_gates: usize) -> Result<(), Error> {
    if gates > MAX_GATES || and_gates > MAX_AND_GATES {
        Err(Error::MaxCircuitSizeExceeded)
    } else {
        Ok(())
    }
}

/// Computes the AND depth of every gate; dangling references count as depth 0.
fn gate_depths(gates: &[Gate]) -> Vec<u32> {
    let mut depths: Vec<u32> = Vec::with_capacity(gates.len());
    for gate in gates {
        let deepest = gate
            .operands()
            .map(|w| depths.get(w as usize).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        depths.push(deepest + u32::from(gate.is_and()));
    }
    depths
}

/// A single gate in a larger [`Circuit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Next input bit of the Publisher.
    InPublisher,
    /// Next input bit of the Partner.
    InPartner,
    /// A bit known to both parties.
    Const(bool),
    /// `x ⊕ y`, computed locally.
    Xor(GateIndex, GateIndex),
    /// `x ∧ y`, consumes a Beaver triple.
    And(GateIndex, GateIndex),
    /// `¬x`, computed locally.
    Not(GateIndex),
}

impl Gate {
    #[inline]
    pub(crate) fn is_and(&self) -> bool {
        matches!(self, Gate::And(..))
    }

    /// The wires this gate reads.
    fn operands(&self) -> impl Iterator<Item = GateIndex> {
        let (x, y) = match *self {
            Gate::InPublisher | Gate::InPartner | Gate::Const(_) => (None, None),
            Gate::Xor(x, y) | Gate::And(x, y) => (Some(x), Some(y)),
            Gate::Not(x) => (Some(x), None),
        };
        x.into_iter().chain(y)
    }

    fn hash_into(&self, hasher: &mut Hasher) {
        let tag: u8 = match self {
            Gate::InPublisher => 0,
            Gate::InPartner => 1,
            Gate::Xor(..) => 2,
            Gate::And(..) => 3,
            Gate::Not(_) => 4,
            Gate::Const(b) => {
                hasher.update(&[u8::from(*b)]);
                5
            }
        };
        for w in self.operands() {
            hasher.update(&w.to_be_bytes());
        }
        hasher.update(&[tag]);
    }
}

#[test]
fn test_layers_follow_and_depth() {
    let circuit = Circuit::new(
        vec![
            Gate::InPublisher,
            Gate::InPartner,
            Gate::And(0, 1),
            Gate::Not(2),
            Gate::Xor(0, 1),
            Gate::And(3, 4),
            Gate::Xor(5, 0),
        ],
        vec![6],
    );
    assert_eq!(circuit.and_depth(), 2);
    assert_eq!(circuit.and_gates(), 2);
    let layers = circuit.layers();
    assert_eq!(
        layers,
        vec![
            Layer {
                ands: vec![],
                locals: vec![0, 1, 4]
            },
            Layer {
                ands: vec![2],
                locals: vec![3]
            },
            Layer {
                ands: vec![5],
                locals: vec![6]
            },
        ]
    );
}

#[test]
fn test_validate_rejects_forward_references() {
    let circuit = Circuit::new(vec![Gate::InPublisher, Gate::Xor(0, 2), Gate::InPartner], vec![1]);
    assert_eq!(circuit.validate(), Err(Error::InvalidCircuit));

    let circuit = Circuit::new(vec![Gate::InPublisher, Gate::Not(1)], vec![1]);
    assert_eq!(circuit.validate(), Err(Error::InvalidCircuit));

    let circuit = Circuit::new(vec![Gate::InPublisher], vec![1]);
    assert_eq!(circuit.validate(), Err(Error::InvalidCircuit));

    let circuit = Circuit::new(vec![Gate::InPublisher], vec![]);
    assert_eq!(circuit.validate(), Ok(()));
}

#[test]
fn test_hash_distinguishes_constants() {
    let zero = Circuit::new(vec![Gate::Const(false)], vec![0]);
    let one = Circuit::new(vec![Gate::Const(true)], vec![0]);
    assert_ne!(zero.blake3_hash(), one.blake3_hash());

    let xor = Circuit::new(vec![Gate::InPublisher, Gate::InPartner, Gate::Xor(0, 1)], vec![2]);
    let and = Circuit::new(vec![Gate::InPublisher, Gate::InPartner, Gate::And(0, 1)], vec![2]);
    assert_ne!(xor.blake3_hash(), and.blake3_hash());
}
