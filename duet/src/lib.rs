//! Privacy-preserving ad attribution between 2 parties using XOR secret sharing.
//!
//! A Publisher holds ad touchpoints (clicks and views), a Partner holds conversions. This crate
//! lets both parties find out which touchpoint each conversion is attributed to, under a
//! [`rules::AttributionRule`] such as "last click within 1 day", without either party learning the
//! other party's events.
//!
//! The attribution logic is compiled into a boolean [`Circuit`] whose shape only depends on the
//! number of touchpoints, the number of conversions and the rule. The circuit is evaluated on XOR
//! shares following the GMW protocol: XOR and NOT gates are computed locally, AND gates consume
//! Beaver triples that are generated upfront from correlated oblivious transfers. The result of
//! the computation is a [`Share`] for every output bit, which can either be revealed right away
//! or persisted for a later, separate [`reveal`] step.
//!
//! This crate does not open any sockets. The [`states`] module
//! exposes the two parties as state machines exchanging opaque messages, and the caller decides how
//! these messages travel between the Publisher and the Partner.
//!
//! The protocol is secure against semi-honest adversaries only.
//!
//! # Examples
//!
//! ```
//! use duet::{
//!     reveal::{combine, AttributionResult},
//!     rules::AttributionRule,
//!     simulate_attribution, Conversion, Error, Touchpoint, TouchpointKind,
//! };
//!
//! fn main() -> Result<(), Error> {
//!     let rule: AttributionRule = "last_click_1d".parse()?;
//!     let touchpoints = vec![
//!         Touchpoint::new(1, 1_000, 7, TouchpointKind::Click),
//!         Touchpoint::new(2, 2_000, 7, TouchpointKind::View),
//!     ];
//!     let conversions = vec![Conversion::new(10, 5_000, 7)];
//!
//!     let (publisher, partner) = simulate_attribution(rule, &touchpoints, &conversions)?;
//!     let results = combine(&publisher, &partner)?;
//!     assert_eq!(results, vec![AttributionResult::Attributed { touchpoint_id: 1 }]);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod builder;
mod circuit;
mod cot;
mod events;
mod gmw;
mod hash;
mod ot_base;
pub mod reveal;
pub mod rules;
mod shares;
mod simulator;
pub mod states;
mod triples;
mod types;

pub use builder::*;
pub use circuit::*;
pub use events::*;
pub use shares::*;
pub use simulator::*;

/// Errors of the attribution engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The local setup does not allow the protocol to start.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The peer sent a message of a different kind than the current step needs.
    #[error("expected a `{expected}` message, but received `{received}`")]
    UnexpectedMessage {
        /// The kind of message this party was waiting for.
        expected: &'static str,
        /// The kind of message that actually arrived.
        received: &'static str,
    },
    /// An AND layer message arrived out of order.
    #[error("expected the openings of AND layer {expected}, but received layer {received}")]
    UnexpectedLayer {
        /// The AND layer this party is currently evaluating.
        expected: u32,
        /// The AND layer the other party sent openings for.
        received: u32,
    },
    /// A message had the right kind, but the wrong number of elements.
    #[error("the `{0}` message does not have the expected length")]
    InvalidMessageLength(&'static str),
    /// A message is not valid bincode for the protocol's message type.
    #[error("the message is not a valid protocol message")]
    BincodeError,
    /// A base OT message contained bytes that are not a valid curve point.
    #[error("the message contained an invalid curve point")]
    InvalidOtPoint,
    /// The number of input bits differs from the number of input gates of the party.
    #[error("the input does not match the input gates of the circuit")]
    InsufficientInput,
    /// A gate reads a wire that is not computed before it, or an output wire does not exist.
    #[error("the circuit is not wired correctly")]
    InvalidCircuit,
    /// The circuit has more gates or AND gates than can be evaluated.
    #[error("the circuit is too large to be evaluated")]
    MaxCircuitSizeExceeded,
    /// A finished party was asked to process another message.
    #[error("the protocol has already finished")]
    ProtocolEnded,
    /// The output of a party was requested before its last step.
    #[error("the protocol has not finished yet")]
    ProtocolStillInProgress,
    /// Two sets of shares cannot be combined with each other.
    #[error("the shares cannot be combined: {0}")]
    ShareMismatch(&'static str),
    /// The reveal mode and the available shares contradict each other.
    #[error("cannot reveal: {0}")]
    RevealMode(&'static str),
}

impl Error {
    /// Returns `true` if the error was caused by a message the protocol did not expect.
    ///
    /// Such errors indicate a bug or a misbehaving peer and can never be recovered from.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedMessage { .. }
                | Error::UnexpectedLayer { .. }
                | Error::InvalidMessageLength(_)
                | Error::BincodeError
                | Error::InvalidOtPoint
                | Error::ProtocolEnded
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(_: bincode::Error) -> Self {
        Self::BincodeError
    }
}

/// Errors in the local setup, detected before any private data is processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The number of records does not match the number agreed with the other party.
    #[error("expected {expected} records, but found {actual}")]
    RecordCountMismatch {
        /// The number of records both parties agreed on.
        expected: usize,
        /// The number of records that were actually supplied.
        actual: usize,
    },
    /// A party was given an event that only the other party can hold.
    #[error("event {id} is a {kind}, which cannot be an input of the {role}")]
    UnexpectedEventKind {
        /// The id of the offending event.
        id: u32,
        /// The kind of the offending event.
        kind: &'static str,
        /// The party that was given the event.
        role: Role,
    },
    /// The attribution rule could not be parsed.
    #[error("unknown attribution rule `{0}`")]
    InvalidRule(String),
}
