//! Reconstruction of attribution results from the output shares of both parties.
//!
//! At the end of the secure evaluation each party holds one [`AttributionShare`] per conversion.
//! Depending on the [`RevealMode`], the shares are either exchanged right away and combined into
//! [`AttributionResult`]s, or kept as an opaque [`AttributionShares`] blob that can be combined
//! later with the other party's blob, in a separately authorized step.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{rules::OUTPUT_BITS, Error, Role, Share};

/// The attribution of a single conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttributionResult {
    /// The conversion is credited to the touchpoint with this id.
    Attributed {
        /// The id of the winning touchpoint.
        touchpoint_id: u32,
    },
    /// No touchpoint qualified for the conversion.
    Unattributed,
}

impl AttributionResult {
    /// The id of the attributed touchpoint, if any.
    pub fn touchpoint_id(&self) -> Option<u32> {
        match self {
            AttributionResult::Attributed { touchpoint_id } => Some(*touchpoint_id),
            AttributionResult::Unattributed => None,
        }
    }
}

/// One party's share of the attribution of a single conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionShare {
    /// Share of the flag that is set iff a touchpoint qualified.
    pub found: Share<bool>,
    /// Share of the id of the attributed touchpoint, `0` if none qualified.
    pub touchpoint_id: Share<u32>,
}

/// All output shares of one party, in conversion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionShares {
    /// The party holding these shares.
    pub role: Role,
    /// One share per conversion.
    pub shares: Vec<AttributionShare>,
}

impl AttributionShares {
    /// Groups the output bit shares of the attribution circuit by conversion.
    pub fn from_output_shares(role: Role, bits: &[Share<bool>]) -> Result<Self, Error> {
        if bits.len() % OUTPUT_BITS != 0 {
            return Err(Error::InsufficientInput);
        }
        let shares = bits
            .chunks(OUTPUT_BITS)
            .map(|chunk| AttributionShare {
                found: chunk[0],
                touchpoint_id: Share::from_bit_shares(&chunk[1..]),
            })
            .collect();
        Ok(Self { role, shares })
    }

    /// Number of conversions.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Returns `true` if there are no conversions.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// When the attribution results are reconstructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealMode {
    /// Both parties exchange their shares at the end of the session and learn the results.
    #[default]
    Immediate,
    /// Each party keeps its own shares; the results are reconstructed later by [`combine`].
    Deferred,
}

impl RevealMode {
    /// Whether the parties exchange their output shares at the end of the session.
    pub fn exchanges_shares(&self) -> bool {
        matches!(self, RevealMode::Immediate)
    }
}

impl fmt::Display for RevealMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevealMode::Immediate => f.write_str("immediate"),
            RevealMode::Deferred => f.write_str("deferred"),
        }
    }
}

impl FromStr for RevealMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(RevealMode::Immediate),
            "deferred" => Ok(RevealMode::Deferred),
            _ => Err(format!("unknown reveal mode `{s}`")),
        }
    }
}

/// What a party ends up with after the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    /// The reconstructed attribution of every conversion.
    Revealed(Vec<AttributionResult>),
    /// The party's own shares, to be combined later.
    Deferred(AttributionShares),
}

/// Produces the final output of a party according to the reveal mode.
///
/// In [`RevealMode::Immediate`] the peer's shares are required and combined with the own shares,
/// in [`RevealMode::Deferred`] the peer's shares must not be present and the own shares are
/// returned untouched.
pub fn reveal(
    mode: RevealMode,
    own: AttributionShares,
    peer: Option<&AttributionShares>,
) -> Result<Output, Error> {
    match (mode, peer) {
        (RevealMode::Immediate, Some(peer)) => Ok(Output::Revealed(combine(&own, peer)?)),
        (RevealMode::Immediate, None) => Err(Error::RevealMode(
            "immediate reveal requires the shares of the other party",
        )),
        (RevealMode::Deferred, None) => Ok(Output::Deferred(own)),
        (RevealMode::Deferred, Some(_)) => Err(Error::RevealMode(
            "the shares of the other party must not be received in deferred mode",
        )),
    }
}

/// Reconstructs the attribution results from the shares of the Publisher and of the Partner.
///
/// The order of the arguments does not matter, but one set of shares must belong to each party
/// and both must cover the same number of conversions.
pub fn combine(
    a: &AttributionShares,
    b: &AttributionShares,
) -> Result<Vec<AttributionResult>, Error> {
    if a.role == b.role {
        return Err(Error::ShareMismatch("both share sets belong to the same party"));
    }
    if a.len() != b.len() {
        return Err(Error::ShareMismatch("the share sets differ in length"));
    }
    a.shares
        .iter()
        .zip(b.shares.iter())
        .map(|(x, y)| {
            let found = x.found.combine(y.found);
            let touchpoint_id = x.touchpoint_id.combine(y.touchpoint_id);
            match (found, touchpoint_id) {
                (true, touchpoint_id) => Ok(AttributionResult::Attributed { touchpoint_id }),
                (false, 0) => Ok(AttributionResult::Unattributed),
                (false, _) => Err(Error::ShareMismatch(
                    "the shares do not stem from the same computation",
                )),
            }
        })
        .collect()
}

/// Decodes plaintext output bits of the attribution circuit.
#[cfg(test)]
pub(crate) fn results_from_bits(bits: &[bool]) -> Vec<AttributionResult> {
    use crate::events::read_u32;

    bits.chunks(OUTPUT_BITS)
        .map(|chunk| {
            if chunk[0] {
                AttributionResult::Attributed {
                    touchpoint_id: read_u32(&chunk[1..]),
                }
            } else {
                AttributionResult::Unattributed
            }
        })
        .collect()
}
