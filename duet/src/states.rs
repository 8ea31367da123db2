//! The different states of the Publisher and the Partner in the attribution protocol.
//!
//! At each step in the protocol, each party ([`Publisher`] and [`Partner`]) always expects a single
//! message from the other party. Based on the message each party either finishes with its share of
//! the output or transitions into a new state, returning a message for the other party. The
//! Publisher sends the first message and the parties then strictly alternate.
//!
//! The parties are deliberately communication-agnostic and expect the sending and receiving of
//! messages to be handled by the user of this crate. As a result, the crate works both in sync and
//! async environments.
//!
//! The number of steps only depends on the circuit, never on the inputs: after exchanging input
//! shares, the parties run the OT-based preprocessing in 2 steps and then need one step per AND
//! layer of the circuit.

use std::borrow::Borrow;

use bincode::{deserialize, serialize};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    cot::{ReceivedOts, ReceiverInitializer, SenderInitializer},
    gmw::WireShares,
    ot_base::message::{ReceiverChoices, SenderSetup},
    shares::{pack_bits, unpack_bits},
    triples::derive_triples,
    types::Delta,
    Circuit, Error, Role, Share,
};

/// The type of messages exchanged between [`Publisher`] and [`Partner`].
pub type Msg = Vec<u8>;

/// Number of steps before the first AND layer: input sharing, base OTs and OT extension.
const SETUP_STEPS: u32 = 3;

/// The part of the protocol a party is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The parties exchange the shares of their inputs.
    InputEncoding,
    /// The parties generate Beaver triples and evaluate the circuit layer by layer.
    SecureEvaluation,
    /// The evaluation is complete and the output shares are available.
    ShareOutput,
}

#[derive(Debug, Serialize, Deserialize)]
enum Message {
    InputShares(Vec<u8>),
    BaseOtSetup {
        setup: SenderSetup,
        choices: Option<ReceiverChoices>,
    },
    OtExtension {
        choices: Option<ReceiverChoices>,
        columns: Vec<u128>,
    },
    AndLayer {
        layer: u32,
        openings: Vec<u8>,
    },
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::InputShares(_) => "InputShares",
            Message::BaseOtSetup { .. } => "BaseOtSetup",
            Message::OtExtension { .. } => "OtExtension",
            Message::AndLayer { .. } => "AndLayer",
        }
    }

    fn encode(&self) -> Result<Msg, Error> {
        let msg = serialize(self)?;
        trace!(kind = self.kind(), bytes = msg.len(), "encoded message");
        Ok(msg)
    }

    fn decode(msg: &[u8]) -> Result<Self, Error> {
        Ok(deserialize(msg)?)
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        Error::UnexpectedMessage {
            expected,
            received: self.kind(),
        }
    }
}

/// The party holding the touchpoints, always sending the first message.
pub struct Publisher<C: Borrow<Circuit>> {
    state: Box<PubState>,
    circuit: C,
}

/// The party holding the conversions, always replying to the [`Publisher`].
pub struct Partner<C: Borrow<Circuit>, I: Borrow<[bool]>> {
    state: Box<PartnerState>,
    circuit: C,
    input: I,
}

enum PubState {
    AwaitInputShares {
        rng: ChaCha20Rng,
        own_shares: Vec<bool>,
    },
    AwaitBaseOt {
        rng: ChaCha20Rng,
        wires: WireShares,
        r_init: ReceiverInitializer,
    },
    AwaitExtension {
        wires: WireShares,
        s_init: SenderInitializer,
        received: ReceivedOts,
    },
    Evaluating {
        wires: WireShares,
        layer: usize,
        openings: Vec<bool>,
    },
    Done(Vec<Share<bool>>),
}

enum PartnerState {
    AwaitInputShares {
        rng: ChaCha20Rng,
    },
    AwaitBaseOt {
        rng: ChaCha20Rng,
        wires: WireShares,
    },
    AwaitExtension {
        rng: ChaCha20Rng,
        wires: WireShares,
        s_init: SenderInitializer,
        r_init: ReceiverInitializer,
    },
    Evaluating {
        wires: WireShares,
        layer: usize,
    },
    Done(Vec<Share<bool>>),
}

impl<C: Borrow<Circuit>> Publisher<C> {
    /// Initializes the Publisher, returning a state and an initial message for the [`Partner`].
    ///
    /// The initial message contains the random shares of the Publisher's input that are handed to
    /// the Partner.
    pub fn new(circuit: C, input: &[bool], mut rng: ChaCha20Rng) -> Result<(Self, Msg), Error> {
        let c = circuit.borrow();
        c.validate()?;
        c.validate_input(Role::Publisher, input.len())?;

        let (own_shares, peer_shares) = split_input(input, &mut rng);
        let msg = Message::InputShares(pack_bits(&peer_shares)).encode()?;
        debug!(
            inputs = input.len(),
            and_gates = c.and_gates(),
            and_depth = c.and_depth(),
            "publisher sent its input shares"
        );
        let publisher = Self {
            state: Box::new(PubState::AwaitInputShares { rng, own_shares }),
            circuit,
        };
        Ok((publisher, msg))
    }

    /// Returns the number of messages the Publisher needs to receive before the protocol is
    /// completed.
    pub fn steps(&self) -> u32 {
        SETUP_STEPS + self.circuit.borrow().and_depth() as u32
    }

    /// The phase of the protocol the Publisher is currently in.
    pub fn phase(&self) -> Phase {
        match *self.state {
            PubState::AwaitInputShares { .. } => Phase::InputEncoding,
            PubState::Done(_) => Phase::ShareOutput,
            _ => Phase::SecureEvaluation,
        }
    }

    /// Executes a single step in the protocol, based on the message received from the [`Partner`].
    ///
    /// Returns the message for the Partner, or `None` if the protocol is completed and the output
    /// shares are available.
    pub fn run(self, msg: &[u8]) -> Result<(Publisher<C>, Option<Msg>), Error> {
        let circuit = self.circuit.borrow();
        let msg = Message::decode(msg)?;
        let (state, reply) = match *self.state {
            PubState::AwaitInputShares { mut rng, own_shares } => {
                let peer_shares = match msg {
                    Message::InputShares(shares) => unpack_bits(&shares, circuit.partner_inputs())
                        .ok_or(Error::InvalidMessageLength("InputShares"))?,
                    msg => return Err(msg.unexpected("InputShares")),
                };
                let wires = WireShares::new(circuit, Role::Publisher, &own_shares, &peer_shares)?;
                let (r_init, setup) = ReceiverInitializer::init(&mut rng);
                let reply = Message::BaseOtSetup {
                    setup,
                    choices: None,
                };
                debug!("publisher received input shares, starting base OTs");
                let state = PubState::AwaitBaseOt { rng, wires, r_init };
                (state, Some(reply))
            }
            PubState::AwaitBaseOt {
                mut rng,
                wires,
                r_init,
            } => {
                let (setup, choices) = match msg {
                    Message::BaseOtSetup {
                        setup,
                        choices: Some(choices),
                    } => (setup, choices),
                    Message::BaseOtSetup { choices: None, .. } => {
                        return Err(Error::InvalidMessageLength("BaseOtSetup"))
                    }
                    msg => return Err(msg.unexpected("BaseOtSetup")),
                };
                let mut receiver = r_init.recv(&choices)?;
                let (received, columns) = receiver.extend(&mut rng, circuit.and_gates());
                let delta = Delta::random(&mut rng);
                let (s_init, choices) = SenderInitializer::init(&mut rng, delta, &setup)?;
                let reply = Message::OtExtension {
                    choices: Some(choices),
                    columns,
                };
                let state = PubState::AwaitExtension {
                    wires,
                    s_init,
                    received,
                };
                (state, Some(reply))
            }
            PubState::AwaitExtension {
                mut wires,
                s_init,
                received,
            } => {
                let columns = match msg {
                    Message::OtExtension {
                        choices: None,
                        columns,
                    } => columns,
                    Message::OtExtension { choices: Some(_), .. } => {
                        return Err(Error::InvalidMessageLength("OtExtension"))
                    }
                    msg => return Err(msg.unexpected("OtExtension")),
                };
                let n = circuit.and_gates();
                let mut sender = s_init.finish();
                let keys = sender.extend(&columns, n)?;
                wires.set_triples(derive_triples(
                    Role::Publisher,
                    sender.delta(),
                    &keys,
                    &received,
                    n,
                ));
                debug!(triples = n, "publisher finished preprocessing");
                open_next_layer(circuit, wires, 1)?
            }
            PubState::Evaluating {
                mut wires,
                layer,
                openings,
            } => {
                let peer = match msg {
                    Message::AndLayer {
                        layer: received,
                        openings,
                    } => expect_layer(&wires, layer, received, &openings)?,
                    msg => return Err(msg.unexpected("AndLayer")),
                };
                wires.close_layer(circuit, layer, &openings, &peer)?;
                trace!(layer, "publisher closed AND layer");
                open_next_layer(circuit, wires, layer + 1)?
            }
            PubState::Done(_) => return Err(Error::ProtocolEnded),
        };
        let reply = match reply {
            Some(reply) => Some(reply.encode()?),
            None => None,
        };
        let next_state = Publisher {
            state: Box::new(state),
            circuit: self.circuit,
        };
        Ok((next_state, reply))
    }

    /// Returns the Publisher's shares of the output bits once the protocol has ended.
    pub fn output(&self) -> Result<Vec<Share<bool>>, Error> {
        match &*self.state {
            PubState::Done(output) => Ok(output.clone()),
            _ => Err(Error::ProtocolStillInProgress),
        }
    }
}

/// Opens `layer` if the circuit has that many AND layers, otherwise finishes the evaluation.
fn open_next_layer(
    circuit: &Circuit,
    wires: WireShares,
    layer: usize,
) -> Result<(PubState, Option<Message>), Error> {
    if layer > wires.and_depth() {
        debug!("publisher evaluated all AND layers");
        return Ok((PubState::Done(output_shares(circuit, &wires)), None));
    }
    let openings = wires.open_layer(circuit, layer)?;
    let reply = Message::AndLayer {
        layer: layer as u32,
        openings: pack_bits(&openings),
    };
    let state = PubState::Evaluating {
        wires,
        layer,
        openings,
    };
    Ok((state, Some(reply)))
}

impl<C: Borrow<Circuit>, I: Borrow<[bool]>> Partner<C, I> {
    /// Initializes the Partner, returning its initial state.
    pub fn new(circuit: C, input: I, rng: ChaCha20Rng) -> Result<Self, Error> {
        let c = circuit.borrow();
        c.validate()?;
        c.validate_input(Role::Partner, input.borrow().len())?;
        Ok(Self {
            state: Box::new(PartnerState::AwaitInputShares { rng }),
            circuit,
            input,
        })
    }

    /// Returns the number of messages the Partner needs to receive before the protocol is
    /// completed.
    ///
    /// The reply to the last message is the last message the [`Publisher`] needs to finish.
    pub fn steps(&self) -> u32 {
        SETUP_STEPS + self.circuit.borrow().and_depth() as u32
    }

    /// The phase of the protocol the Partner is currently in.
    pub fn phase(&self) -> Phase {
        match *self.state {
            PartnerState::AwaitInputShares { .. } => Phase::InputEncoding,
            PartnerState::Done(_) => Phase::ShareOutput,
            _ => Phase::SecureEvaluation,
        }
    }

    /// Executes a single step in the protocol, based on the message received from the
    /// [`Publisher`].
    pub fn run(self, msg: &[u8]) -> Result<(Partner<C, I>, Msg), Error> {
        let circuit = self.circuit.borrow();
        let msg = Message::decode(msg)?;
        let (state, reply) = match *self.state {
            PartnerState::AwaitInputShares { mut rng } => {
                let peer_shares = match msg {
                    Message::InputShares(shares) => {
                        unpack_bits(&shares, circuit.publisher_inputs())
                            .ok_or(Error::InvalidMessageLength("InputShares"))?
                    }
                    msg => return Err(msg.unexpected("InputShares")),
                };
                let (own_shares, for_publisher) = split_input(self.input.borrow(), &mut rng);
                let wires = WireShares::new(circuit, Role::Partner, &peer_shares, &own_shares)?;
                let reply = Message::InputShares(pack_bits(&for_publisher));
                debug!(
                    inputs = own_shares.len(),
                    "partner received input shares and sent its own"
                );
                (PartnerState::AwaitBaseOt { rng, wires }, reply)
            }
            PartnerState::AwaitBaseOt { mut rng, wires } => {
                let setup = match msg {
                    Message::BaseOtSetup {
                        setup,
                        choices: None,
                    } => setup,
                    Message::BaseOtSetup { choices: Some(_), .. } => {
                        return Err(Error::InvalidMessageLength("BaseOtSetup"))
                    }
                    msg => return Err(msg.unexpected("BaseOtSetup")),
                };
                let delta = Delta::random(&mut rng);
                let (s_init, choices) = SenderInitializer::init(&mut rng, delta, &setup)?;
                let (r_init, setup) = ReceiverInitializer::init(&mut rng);
                let reply = Message::BaseOtSetup {
                    setup,
                    choices: Some(choices),
                };
                let state = PartnerState::AwaitExtension {
                    rng,
                    wires,
                    s_init,
                    r_init,
                };
                (state, reply)
            }
            PartnerState::AwaitExtension {
                mut rng,
                mut wires,
                s_init,
                r_init,
            } => {
                let (choices, columns) = match msg {
                    Message::OtExtension {
                        choices: Some(choices),
                        columns,
                    } => (choices, columns),
                    Message::OtExtension { choices: None, .. } => {
                        return Err(Error::InvalidMessageLength("OtExtension"))
                    }
                    msg => return Err(msg.unexpected("OtExtension")),
                };
                let n = circuit.and_gates();
                let mut sender = s_init.finish();
                let keys = sender.extend(&columns, n)?;
                let mut receiver = r_init.recv(&choices)?;
                let (received, columns) = receiver.extend(&mut rng, n);
                wires.set_triples(derive_triples(
                    Role::Partner,
                    sender.delta(),
                    &keys,
                    &received,
                    n,
                ));
                debug!(triples = n, "partner finished preprocessing");
                let reply = Message::OtExtension {
                    choices: None,
                    columns,
                };
                let state = if wires.and_depth() == 0 {
                    PartnerState::Done(output_shares(circuit, &wires))
                } else {
                    PartnerState::Evaluating { wires, layer: 1 }
                };
                (state, reply)
            }
            PartnerState::Evaluating { mut wires, layer } => {
                let peer = match msg {
                    Message::AndLayer {
                        layer: received,
                        openings,
                    } => expect_layer(&wires, layer, received, &openings)?,
                    msg => return Err(msg.unexpected("AndLayer")),
                };
                let openings = wires.open_layer(circuit, layer)?;
                wires.close_layer(circuit, layer, &openings, &peer)?;
                trace!(layer, "partner closed AND layer");
                let reply = Message::AndLayer {
                    layer: layer as u32,
                    openings: pack_bits(&openings),
                };
                let state = if layer == wires.and_depth() {
                    debug!("partner evaluated all AND layers");
                    PartnerState::Done(output_shares(circuit, &wires))
                } else {
                    PartnerState::Evaluating {
                        wires,
                        layer: layer + 1,
                    }
                };
                (state, reply)
            }
            PartnerState::Done(_) => return Err(Error::ProtocolEnded),
        };
        let reply = reply.encode()?;
        let next_state = Partner {
            state: Box::new(state),
            circuit: self.circuit,
            input: self.input,
        };
        Ok((next_state, reply))
    }

    /// Returns the Partner's shares of the output bits once the protocol has ended.
    pub fn output(&self) -> Result<Vec<Share<bool>>, Error> {
        match &*self.state {
            PartnerState::Done(output) => Ok(output.clone()),
            _ => Err(Error::ProtocolStillInProgress),
        }
    }
}

/// Splits every input bit into the share kept by its owner and the share for the other party.
fn split_input(input: &[bool], rng: &mut ChaCha20Rng) -> (Vec<bool>, Vec<bool>) {
    input
        .iter()
        .map(|&bit| {
            let (own, peer) = Share::split(bit, rng);
            (own.into_raw(), peer.into_raw())
        })
        .unzip()
}

/// Checks that the other party sent the openings of the layer that is currently evaluated.
fn expect_layer(
    wires: &WireShares,
    layer: usize,
    received: u32,
    openings: &[u8],
) -> Result<Vec<bool>, Error> {
    if received as usize != layer {
        return Err(Error::UnexpectedLayer {
            expected: layer as u32,
            received,
        });
    }
    unpack_bits(openings, 2 * wires.layer_width(layer))
        .ok_or(Error::InvalidMessageLength("AndLayer"))
}

fn output_shares(circuit: &Circuit, wires: &WireShares) -> Vec<Share<bool>> {
    wires
        .outputs(circuit)
        .into_iter()
        .map(Share::from_raw)
        .collect()
}
