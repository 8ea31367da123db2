//! Attribution rules, as an oblivious circuit and as a plaintext reference.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    circuit::check_size, reveal::AttributionResult, Circuit, CircuitBuilder, ConfigError,
    Conversion, Error, GateIndex, Touchpoint, Word, FIELD_BITS,
};

/// Number of output bits per conversion: the `found` flag followed by the touchpoint id.
pub const OUTPUT_BITS: usize = 1 + FIELD_BITS;

const HOUR: u32 = 60 * 60;
const DAY: u32 = 24 * HOUR;

/// Decides which touchpoint (if any) a conversion is credited to.
///
/// A touchpoint qualifies for a conversion if both refer to the same ad and the touchpoint
/// happened before the conversion, at most `window` seconds earlier. Among the qualifying
/// touchpoints the most recent one wins. Ties on the timestamp go to the lowest touchpoint id,
/// and among touchpoints with equal timestamp and id the one supplied first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributionRule {
    /// Only clicks qualify.
    LastClick {
        /// Lookback window in seconds.
        window: u32,
    },
    /// Clicks and views qualify.
    LastTouch {
        /// Lookback window in seconds.
        window: u32,
    },
}

impl AttributionRule {
    /// The lookback window in seconds.
    pub fn window(&self) -> u32 {
        match self {
            AttributionRule::LastClick { window } | AttributionRule::LastTouch { window } => {
                *window
            }
        }
    }

    /// Whether views qualify in addition to clicks.
    pub fn counts_views(&self) -> bool {
        matches!(self, AttributionRule::LastTouch { .. })
    }

    /// Whether `tp` may be credited with `conv` under this rule.
    pub fn qualifies(&self, tp: &Touchpoint, conv: &Conversion) -> bool {
        let deadline = u64::from(tp.timestamp) + u64::from(self.window());
        tp.ad_id == conv.ad_id
            && tp.timestamp < conv.timestamp
            && u64::from(conv.timestamp) <= deadline
            && (self.counts_views() || tp.is_click())
    }
}

impl fmt::Display for AttributionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributionRule::LastClick { .. } => "last_click",
            AttributionRule::LastTouch { .. } => "last_touch",
        };
        let window = self.window();
        if window % DAY == 0 {
            write!(f, "{name}_{}d", window / DAY)
        } else if window % HOUR == 0 {
            write!(f, "{name}_{}h", window / HOUR)
        } else {
            write!(f, "{name}_{window}s")
        }
    }
}

impl FromStr for AttributionRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRule(s.to_string());
        let (kind, window) = s.rsplit_once('_').ok_or_else(invalid)?;
        if window.len() < 2 {
            return Err(invalid());
        }
        let (amount, unit) = window.split_at(window.len() - 1);
        let unit = match unit {
            "d" => DAY,
            "h" => HOUR,
            "s" => 1,
            _ => return Err(invalid()),
        };
        let window = amount
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_mul(unit))
            .filter(|w| *w > 0)
            .ok_or_else(invalid)?;
        match kind {
            "last_click" => Ok(AttributionRule::LastClick { window }),
            "last_touch" => Ok(AttributionRule::LastTouch { window }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for AttributionRule {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AttributionRule> for String {
    fn from(rule: AttributionRule) -> Self {
        rule.to_string()
    }
}

/// Attributes every conversion in plaintext.
///
/// This is the reference the secure computation is checked against and must never be used on
/// the private data of both parties at once outside of tests.
pub fn attribute(
    rule: AttributionRule,
    touchpoints: &[Touchpoint],
    conversions: &[Conversion],
) -> Vec<AttributionResult> {
    conversions
        .iter()
        .map(|conv| {
            let mut best: Option<&Touchpoint> = None;
            for tp in touchpoints.iter().filter(|tp| rule.qualifies(tp, conv)) {
                let better = match best {
                    None => true,
                    Some(b) => match tp.timestamp.cmp(&b.timestamp) {
                        Ordering::Greater => true,
                        Ordering::Equal => tp.id < b.id,
                        Ordering::Less => false,
                    },
                };
                if better {
                    best = Some(tp);
                }
            }
            match best {
                Some(tp) => AttributionResult::Attributed {
                    touchpoint_id: tp.id,
                },
                None => AttributionResult::Unattributed,
            }
        })
        .collect()
}

/// The input wires of a single touchpoint.
struct TouchpointWires {
    timestamp: Word,
    ad_id: Word,
    is_click: GateIndex,
    /// `timestamp + window`, one bit wider than the timestamp.
    deadline: Word,
    /// `!id ‖ timestamp`: a larger key is a more recent touchpoint or, for equal timestamps, a
    /// lower id.
    key: Word,
}

/// Builds the circuit attributing `conversions` conversions to `touchpoints` touchpoints.
///
/// The Publisher supplies the touchpoints and the Partner the conversions, encoded by
/// [`PartyInput::encode`](crate::PartyInput::encode). The shape of the circuit, and thus the number
/// of AND gates and of communication rounds, only depends on the rule and the 2 counts.
///
/// For every conversion, every touchpoint is turned into a candidate `(found, key)`, where `found`
/// is set iff the touchpoint qualifies. The candidates are then reduced pairwise in a balanced
/// tournament, the later candidate replacing the earlier one via [`CircuitBuilder::select`] only
/// if it is strictly better. The outputs are, for every conversion, the `found` bit followed by
/// the 32 bits of the attributed touchpoint id, which are all zero if nothing was found.
///
/// Fails with [`Error::MaxCircuitSizeExceeded`] before allocating any gates if the circuit would
/// be too large, see [`check_attribution_size`].
pub fn attribution_circuit(
    rule: AttributionRule,
    touchpoints: usize,
    conversions: usize,
) -> Result<Circuit, Error> {
    check_attribution_size(rule, touchpoints, conversions)?;
    Ok(build_attribution_circuit(rule, touchpoints, conversions))
}

/// Number of gates and of AND gates of the [`attribution_circuit`] for the given counts.
///
/// Once a count is non-zero, every further touchpoint or conversion adds the same gates, so the
/// size is extrapolated from circuits with at most 2 touchpoints and 2 conversions. Saturates at
/// `usize::MAX`.
pub fn attribution_circuit_size(
    rule: AttributionRule,
    touchpoints: usize,
    conversions: usize,
) -> (usize, usize) {
    let (t0, c0) = (touchpoints.min(1), conversions.min(1));
    let size = |t, c| {
        let circuit = build_attribution_circuit(rule, t, c);
        [circuit.gates().len(), circuit.and_gates()]
    };
    let (f00, f10, f01, f11) = (
        size(t0, c0),
        size(t0 + 1, c0),
        size(t0, c0 + 1),
        size(t0 + 1, c0 + 1),
    );
    let (dt, dc) = (touchpoints - t0, conversions - c0);
    let extrapolate = |i: usize| {
        let per_touchpoint = f10[i].saturating_sub(f00[i]);
        let per_conversion = f01[i].saturating_sub(f00[i]);
        let per_pair = f11[i].saturating_sub(f01[i]).saturating_sub(per_touchpoint);
        f00[i]
            .saturating_add(dt.saturating_mul(per_touchpoint))
            .saturating_add(dc.saturating_mul(per_conversion))
            .saturating_add(dt.saturating_mul(dc).saturating_mul(per_pair))
    };
    (extrapolate(0), extrapolate(1))
}

/// Fails with [`Error::MaxCircuitSizeExceeded`] if the [`attribution_circuit`] for the given
/// counts would exceed the size limits of [`Circuit::validate`].
pub fn check_attribution_size(
    rule: AttributionRule,
    touchpoints: usize,
    conversions: usize,
) -> Result<(), Error> {
    let (gates, and_gates) = attribution_circuit_size(rule, touchpoints, conversions);
    check_size(gates, and_gates)
}

/// A candidate of the tournament: whether a touchpoint was found and its key.
type Candidate = (GateIndex, Word);

fn build_attribution_circuit(
    rule: AttributionRule,
    touchpoints: usize,
    conversions: usize,
) -> Circuit {
    let mut b = CircuitBuilder::new();
    let window = b.constant_word(u64::from(rule.window()), FIELD_BITS);

    let mut tps = Vec::with_capacity(touchpoints);
    for _ in 0..touchpoints {
        let id = b.publisher_input(FIELD_BITS);
        let timestamp = b.publisher_input(FIELD_BITS);
        let ad_id = b.publisher_input(FIELD_BITS);
        let is_click = b.publisher_input(1).bits()[0];
        let deadline = b.add(&timestamp, &window);
        let key = b.not_word(&id).concat(&timestamp);
        tps.push(TouchpointWires {
            timestamp,
            ad_id,
            is_click,
            deadline,
            key,
        });
    }

    let mut convs = Vec::with_capacity(conversions);
    for _ in 0..conversions {
        let timestamp = b.partner_input(FIELD_BITS);
        let ad_id = b.partner_input(FIELD_BITS);
        convs.push((timestamp, ad_id));
    }

    let mut outputs = Vec::with_capacity(conversions * OUTPUT_BITS);
    for (conv_timestamp, conv_ad_id) in convs.iter() {
        let conv_timestamp_wide = b.zero_extend(conv_timestamp, FIELD_BITS + 1);
        let mut candidates: Vec<Candidate> = Vec::with_capacity(tps.len());
        for tp in tps.iter() {
            let same_ad = b.eq(&tp.ad_id, conv_ad_id);
            let before = b.lt(&tp.timestamp, conv_timestamp);
            let expired = b.lt(&tp.deadline, &conv_timestamp_wide);
            let in_window = b.not(expired);
            let mut valid = b.and(same_ad, before);
            valid = b.and(valid, in_window);
            if !rule.counts_views() {
                valid = b.and(valid, tp.is_click);
            }
            candidates.push((valid, tp.key.clone()));
        }

        let (found, best) = match tournament(&mut b, candidates) {
            Some(winner) => winner,
            None => (b.constant(false), b.constant_word(0, 2 * FIELD_BITS)),
        };
        outputs.push(found);
        for &bit in best.bits().iter().take(FIELD_BITS) {
            let id_bit = b.not(bit);
            outputs.push(b.and(id_bit, found));
        }
    }
    b.build(outputs)
}

/// Reduces the candidates pairwise until a single one is left.
///
/// A later candidate only wins over an earlier one if its key is strictly larger, so among equal
/// keys the first candidate survives, exactly as in a left to right scan.
fn tournament(b: &mut CircuitBuilder, mut round: Vec<Candidate>) -> Option<Candidate> {
    while round.len() > 1 {
        let mut next = Vec::with_capacity(round.len() / 2 + 1);
        let mut pairs = round.into_iter();
        while let Some(earlier) = pairs.next() {
            match pairs.next() {
                Some(later) => next.push(play(b, earlier, later)),
                None => next.push(earlier),
            }
        }
        round = next;
    }
    round.pop()
}

fn play(
    b: &mut CircuitBuilder,
    (earlier_found, earlier_key): Candidate,
    (later_found, later_key): Candidate,
) -> Candidate {
    let newer = b.gt(&later_key, &earlier_key);
    let vacant = b.not(earlier_found);
    let preferred = b.or(vacant, newer);
    let better = b.and(later_found, preferred);
    let key = b.select_word(better, &later_key, &earlier_key);
    let found = b.or(earlier_found, better);
    (found, key)
}
