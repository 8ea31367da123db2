//! The session state machine driving one party through the attribution protocol.

use std::fmt;

use duet::{
    reveal::{reveal, AttributionShares, Output, RevealMode},
    rules::{attribution_circuit, AttributionRule},
    states::{Partner, Phase, Publisher},
    Event, PartyInput, Role,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{channel::Channel, SessionConfig, SessionError};

/// Version of the messages exchanged by sessions, checked during setup.
pub const PROTOCOL_VERSION: u32 = 1;

/// The phases a session moves through, in this order unless it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Both parties agree on the rule, the record counts and the reveal mode.
    Setup,
    /// Both parties exchange the shares of their inputs.
    InputEncoding,
    /// The attribution circuit is evaluated on shares.
    SecureEvaluation,
    /// The output shares are available and, if requested, revealed.
    ShareOutput,
    /// The session was aborted.
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Setup => "setup",
            SessionPhase::InputEncoding => "input encoding",
            SessionPhase::SecureEvaluation => "secure evaluation",
            SessionPhase::ShareOutput => "share output",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl From<Phase> for SessionPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::InputEncoding => SessionPhase::InputEncoding,
            Phase::SecureEvaluation => SessionPhase::SecureEvaluation,
            Phase::ShareOutput => SessionPhase::ShareOutput,
        }
    }
}

/// The first message of each party, describing its local setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// The [`PROTOCOL_VERSION`] of the sender.
    pub version: u32,
    /// The role of the sender.
    pub role: Role,
    /// The rule of the sender, if configured.
    pub rule: Option<AttributionRule>,
    /// The number of touchpoints the sender expects.
    pub touchpoints: u64,
    /// The number of conversions the sender expects.
    pub conversions: u64,
    /// The reveal mode of the sender.
    pub reveal_mode: RevealMode,
}

impl Hello {
    /// Describes the local setup.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            role: config.role,
            rule: config.rule,
            touchpoints: config.touchpoints as u64,
            conversions: config.conversions as u64,
            reveal_mode: config.reveal_mode,
        }
    }

    /// Checks that the setup of the other party matches, returning the rule both parties use.
    pub fn agree(&self, peer: &Hello) -> Result<AttributionRule, SessionError> {
        if self.version != peer.version {
            return Err(SessionError::Configuration(format!(
                "protocol version {} does not match the peer's version {}",
                self.version, peer.version
            )));
        }
        if self.role != peer.role.peer() {
            return Err(SessionError::Configuration(format!(
                "both parties are configured as {}",
                self.role
            )));
        }
        if (self.touchpoints, self.conversions) != (peer.touchpoints, peer.conversions) {
            return Err(SessionError::Configuration(format!(
                "expected {} touchpoints and {} conversions, but the peer expects {} and {}",
                self.touchpoints, self.conversions, peer.touchpoints, peer.conversions
            )));
        }
        if self.reveal_mode != peer.reveal_mode {
            return Err(SessionError::Configuration(format!(
                "reveal mode {} does not match the peer's reveal mode {}",
                self.reveal_mode, peer.reveal_mode
            )));
        }
        match (self.rule, peer.rule) {
            (Some(own), Some(theirs)) if own == theirs => Ok(own),
            (Some(own), Some(theirs)) => Err(SessionError::Configuration(format!(
                "rule {own} does not match the peer's rule {theirs}"
            ))),
            (Some(rule), None) | (None, Some(rule)) => Ok(rule),
            (None, None) => Err(SessionError::config(
                "neither party specified an attribution rule",
            )),
        }
    }
}

/// Number of messages and bytes that were exchanged in a single phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Messages sent to the other party.
    pub sent: usize,
    /// Messages received from the other party.
    pub received: usize,
    /// Total size of the sent messages.
    pub bytes_sent: usize,
    /// Total size of the received messages.
    pub bytes_received: usize,
}

/// The traffic of a session, per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Traffic during [`SessionPhase::Setup`].
    pub setup: Traffic,
    /// Traffic during [`SessionPhase::InputEncoding`].
    pub input_encoding: Traffic,
    /// Traffic during [`SessionPhase::SecureEvaluation`].
    pub secure_evaluation: Traffic,
    /// Traffic during [`SessionPhase::ShareOutput`].
    pub share_output: Traffic,
}

impl Transcript {
    /// The number of messages received during the secure evaluation.
    ///
    /// Only depends on the rule and the record counts, never on the records themselves.
    pub fn rounds(&self) -> usize {
        self.secure_evaluation.received
    }

    fn traffic_mut(&mut self, phase: SessionPhase) -> Option<&mut Traffic> {
        match phase {
            SessionPhase::Setup => Some(&mut self.setup),
            SessionPhase::InputEncoding => Some(&mut self.input_encoding),
            SessionPhase::SecureEvaluation => Some(&mut self.secure_evaluation),
            SessionPhase::ShareOutput => Some(&mut self.share_output),
            SessionPhase::Failed => None,
        }
    }
}

/// The result of a successful session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The role of the local party.
    pub role: Role,
    /// The rule both parties used.
    pub rule: AttributionRule,
    /// The revealed results or the local party's shares.
    pub output: Output,
    /// The messages exchanged per phase.
    pub transcript: Transcript,
}

/// One party's side of an attribution session over a [`Channel`].
pub struct Session<C: Channel> {
    config: SessionConfig,
    channel: C,
    phase: SessionPhase,
    transcript: Transcript,
}

impl<C: Channel> Session<C> {
    /// Creates a session in [`SessionPhase::Setup`], validating the local configuration.
    pub fn new(config: SessionConfig, channel: C) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            channel,
            phase: SessionPhase::Setup,
            transcript: Transcript::default(),
        })
    }

    /// The current phase of the session.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The messages exchanged so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Runs the whole session on the local party's events.
    ///
    /// The channel is closed when the session ends, successfully or not. Any error moves the
    /// session to [`SessionPhase::Failed`].
    pub async fn run(&mut self, events: Vec<Event>) -> Result<SessionOutcome, SessionError> {
        let role = self.config.role;
        let result = self.execute(events).await;
        if let Err(e) = self.channel.close().await {
            debug!(%role, "could not close channel: {e}");
        }
        match result {
            Ok(outcome) => {
                info!(
                    %role,
                    rounds = outcome.transcript.rounds(),
                    "session completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(%role, phase = %self.phase, "session failed: {e}");
                self.phase = SessionPhase::Failed;
                Err(e)
            }
        }
    }

    async fn execute(&mut self, events: Vec<Event>) -> Result<SessionOutcome, SessionError> {
        let role = self.config.role;
        let rule = self.setup().await?;
        let input = PartyInput::from_events(role, events, self.config.expected_records())?;

        let circuit = attribution_circuit(rule, self.config.touchpoints, self.config.conversions)?;
        info!(
            %role,
            %rule,
            and_gates = circuit.and_gates(),
            and_depth = circuit.and_depth(),
            "built attribution circuit"
        );
        let bits = input.encode();
        let rng = ChaCha20Rng::from_entropy();
        self.enter(SessionPhase::InputEncoding);
        let output = match role {
            Role::Publisher => {
                let (mut publisher, msg) = Publisher::new(&circuit, &bits, rng)?;
                self.send(msg).await?;
                for _ in 0..publisher.steps() {
                    let msg = self.recv().await?;
                    let (next, reply) = publisher.run(&msg)?;
                    publisher = next;
                    self.enter(publisher.phase().into());
                    if let Some(reply) = reply {
                        self.send(reply).await?;
                    }
                }
                publisher.output()?
            }
            Role::Partner => {
                let mut partner = Partner::new(&circuit, bits, rng)?;
                for _ in 0..partner.steps() {
                    let msg = self.recv().await?;
                    let (next, reply) = partner.run(&msg)?;
                    partner = next;
                    self.send(reply).await?;
                    self.enter(partner.phase().into());
                }
                partner.output()?
            }
        };
        self.enter(SessionPhase::ShareOutput);

        let own = AttributionShares::from_output_shares(role, &output)?;
        let peer = if self.config.reveal_mode.exchanges_shares() {
            Some(self.exchange_shares(&own).await?)
        } else {
            None
        };
        let output = reveal(self.config.reveal_mode, own, peer.as_ref())?;
        Ok(SessionOutcome {
            role,
            rule,
            output,
            transcript: self.transcript,
        })
    }

    /// Exchanges [`Hello`] messages, the Publisher speaking first.
    async fn setup(&mut self) -> Result<AttributionRule, SessionError> {
        let hello = Hello::new(&self.config);
        let peer: Hello = match self.config.role {
            Role::Publisher => {
                self.send_msg(&hello).await?;
                self.recv_msg().await?
            }
            Role::Partner => {
                let peer = self.recv_msg().await?;
                self.send_msg(&hello).await?;
                peer
            }
        };
        let rule = hello.agree(&peer)?;
        if hello.rule.is_none() {
            info!(%rule, "adopted the rule of the peer");
        }
        Ok(rule)
    }

    async fn exchange_shares(
        &mut self,
        own: &AttributionShares,
    ) -> Result<AttributionShares, SessionError> {
        let peer: AttributionShares = match self.config.role {
            Role::Publisher => {
                self.send_msg(own).await?;
                self.recv_msg().await?
            }
            Role::Partner => {
                let peer = self.recv_msg().await?;
                self.send_msg(own).await?;
                peer
            }
        };
        if peer.role != own.role.peer() || peer.len() != own.len() {
            return Err(SessionError::ProtocolDesync(
                "the peer's output shares do not match the local shares".into(),
            ));
        }
        Ok(peer)
    }

    fn enter(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            info!(role = %self.config.role, from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
        }
    }

    async fn send(&mut self, msg: Vec<u8>) -> Result<(), SessionError> {
        let bytes = msg.len();
        self.channel.send_bytes(msg).await?;
        if let Some(traffic) = self.transcript.traffic_mut(self.phase) {
            traffic.sent += 1;
            traffic.bytes_sent += bytes;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        let msg = self.channel.recv_bytes().await?;
        if let Some(traffic) = self.transcript.traffic_mut(self.phase) {
            traffic.received += 1;
            traffic.bytes_received += msg.len();
        }
        Ok(msg)
    }

    async fn send_msg(&mut self, msg: &impl Serialize) -> Result<(), SessionError> {
        let msg = bincode::serialize(msg)?;
        self.send(msg).await
    }

    async fn recv_msg<T: DeserializeOwned>(&mut self) -> Result<T, SessionError> {
        let msg = self.recv().await?;
        Ok(bincode::deserialize(&msg)?)
    }
}
