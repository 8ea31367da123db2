//! Touchpoints, conversions and their fixed-width circuit encoding.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Bits used to encode a single integer field of an event.
pub const FIELD_BITS: usize = u32::BITS as usize;

/// Bits used to encode a single touchpoint as circuit input.
pub const TOUCHPOINT_BITS: usize = 3 * FIELD_BITS + 1;

/// Bits used to encode a single conversion as circuit input.
pub const CONVERSION_BITS: usize = 2 * FIELD_BITS;

/// One of the 2 parties taking part in the protocol.
///
/// The roles are fixed by convention: the Publisher always acts as the server and speaks first, the
/// Partner always acts as the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds the touchpoints.
    Publisher,
    /// Holds the conversions.
    Partner,
}

impl Role {
    /// The role of the other party.
    pub fn peer(self) -> Role {
        match self {
            Role::Publisher => Role::Partner,
            Role::Partner => Role::Publisher,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Partner => f.write_str("partner"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(Role::Publisher),
            "partner" => Ok(Role::Partner),
            _ => Err(format!("unknown role `{s}`, expected publisher or partner")),
        }
    }
}

/// The kind of ad exposure a touchpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointKind {
    /// The user clicked on the ad.
    Click,
    /// The user was shown the ad.
    View,
}

/// Distinguishes Publisher-side from Partner-side events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An ad exposure, held by the Publisher.
    Touchpoint(TouchpointKind),
    /// A purchase or other action, held by the Partner.
    Conversion,
}

impl EventKind {
    fn name(&self) -> &'static str {
        match self {
            EventKind::Touchpoint(TouchpointKind::Click) => "click",
            EventKind::Touchpoint(TouchpointKind::View) => "view",
            EventKind::Conversion => "conversion",
        }
    }
}

/// A single event as loaded from a party's private input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier of the event, unique within the party's input.
    pub id: u32,
    /// Seconds since the epoch.
    pub timestamp: u32,
    /// The ad (or campaign) the event belongs to.
    pub ad_id: u32,
    /// Touchpoint or conversion.
    pub kind: EventKind,
}

/// A Publisher-side ad exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touchpoint {
    /// Identifier reported when a conversion is attributed to this touchpoint.
    pub id: u32,
    /// Seconds since the epoch.
    pub timestamp: u32,
    /// The ad that was clicked or viewed.
    pub ad_id: u32,
    /// Click or view.
    pub kind: TouchpointKind,
}

/// A Partner-side conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Identifier of the conversion, only known to the Partner.
    pub id: u32,
    /// Seconds since the epoch.
    pub timestamp: u32,
    /// The ad the conversion is reported for.
    pub ad_id: u32,
}

impl Touchpoint {
    /// Creates a new touchpoint.
    pub fn new(id: u32, timestamp: u32, ad_id: u32, kind: TouchpointKind) -> Self {
        Self {
            id,
            timestamp,
            ad_id,
            kind,
        }
    }

    /// Whether the touchpoint is a click (as opposed to a view).
    pub fn is_click(&self) -> bool {
        self.kind == TouchpointKind::Click
    }

    /// Appends the fixed-width encoding `id ‖ timestamp ‖ ad_id ‖ is_click` to `bits`.
    pub fn encode_into(&self, bits: &mut Vec<bool>) {
        push_u32(bits, self.id);
        push_u32(bits, self.timestamp);
        push_u32(bits, self.ad_id);
        bits.push(self.is_click());
    }
}

impl Conversion {
    /// Creates a new conversion.
    pub fn new(id: u32, timestamp: u32, ad_id: u32) -> Self {
        Self {
            id,
            timestamp,
            ad_id,
        }
    }

    /// Appends the fixed-width encoding `timestamp ‖ ad_id` to `bits`.
    pub fn encode_into(&self, bits: &mut Vec<bool>) {
        push_u32(bits, self.timestamp);
        push_u32(bits, self.ad_id);
    }
}

impl From<Touchpoint> for Event {
    fn from(t: Touchpoint) -> Self {
        Event {
            id: t.id,
            timestamp: t.timestamp,
            ad_id: t.ad_id,
            kind: EventKind::Touchpoint(t.kind),
        }
    }
}

impl From<Conversion> for Event {
    fn from(c: Conversion) -> Self {
        Event {
            id: c.id,
            timestamp: c.timestamp,
            ad_id: c.ad_id,
            kind: EventKind::Conversion,
        }
    }
}

/// The private input of one party, in the order it was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyInput {
    /// The touchpoints of the Publisher.
    Publisher(Vec<Touchpoint>),
    /// The conversions of the Partner.
    Partner(Vec<Conversion>),
}

impl PartyInput {
    /// Splits the loaded events of a party into its typed input.
    ///
    /// Fails if the party holds an event of the wrong kind or if the number of events differs from
    /// the number agreed with the other party, since the circuit is built for exactly that many.
    pub fn from_events(
        role: Role,
        events: Vec<Event>,
        expected_len: usize,
    ) -> Result<Self, ConfigError> {
        if events.len() != expected_len {
            return Err(ConfigError::RecordCountMismatch {
                expected: expected_len,
                actual: events.len(),
            });
        }
        match role {
            Role::Publisher => {
                let mut touchpoints = Vec::with_capacity(events.len());
                for e in events {
                    match e.kind {
                        EventKind::Touchpoint(kind) => {
                            touchpoints.push(Touchpoint::new(e.id, e.timestamp, e.ad_id, kind))
                        }
                        kind => return Err(unexpected(e.id, kind, role)),
                    }
                }
                Ok(PartyInput::Publisher(touchpoints))
            }
            Role::Partner => {
                let mut conversions = Vec::with_capacity(events.len());
                for e in events {
                    match e.kind {
                        EventKind::Conversion => {
                            conversions.push(Conversion::new(e.id, e.timestamp, e.ad_id))
                        }
                        kind => return Err(unexpected(e.id, kind, role)),
                    }
                }
                Ok(PartyInput::Partner(conversions))
            }
        }
    }

    /// The party owning this input.
    pub fn role(&self) -> Role {
        match self {
            PartyInput::Publisher(_) => Role::Publisher,
            PartyInput::Partner(_) => Role::Partner,
        }
    }

    /// Number of records in the input.
    pub fn len(&self) -> usize {
        match self {
            PartyInput::Publisher(t) => t.len(),
            PartyInput::Partner(c) => c.len(),
        }
    }

    /// Returns `true` if the party has no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes all records as circuit input bits, preserving their order.
    pub fn encode(&self) -> Vec<bool> {
        match self {
            PartyInput::Publisher(touchpoints) => {
                let mut bits = Vec::with_capacity(touchpoints.len() * TOUCHPOINT_BITS);
                for t in touchpoints {
                    t.encode_into(&mut bits);
                }
                bits
            }
            PartyInput::Partner(conversions) => {
                let mut bits = Vec::with_capacity(conversions.len() * CONVERSION_BITS);
                for c in conversions {
                    c.encode_into(&mut bits);
                }
                bits
            }
        }
    }
}

fn unexpected(id: u32, kind: EventKind, role: Role) -> ConfigError {
    ConfigError::UnexpectedEventKind {
        id,
        kind: kind.name(),
        role,
    }
}

/// Appends `value` least significant bit first.
pub(crate) fn push_u32(bits: &mut Vec<bool>, value: u32) {
    for i in 0..FIELD_BITS {
        bits.push((value >> i) & 1 == 1);
    }
}

/// Reads a value written by [`push_u32`].
#[cfg(test)]
pub(crate) fn read_u32(bits: &[bool]) -> u32 {
    bits.iter()
        .take(FIELD_BITS)
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (u32::from(b) << i))
}

#[test]
fn test_encoding_is_lsb_first() {
    let t = Touchpoint::new(1, 2, 0x8000_0000, TouchpointKind::Click);
    let mut bits = vec![];
    t.encode_into(&mut bits);
    assert_eq!(bits.len(), TOUCHPOINT_BITS);
    assert!(bits[0]);
    assert!(bits[FIELD_BITS + 1]);
    assert!(bits[3 * FIELD_BITS - 1]);
    assert!(bits[3 * FIELD_BITS]);
    assert_eq!(read_u32(&bits[FIELD_BITS..]), 2);
}

#[test]
fn test_party_input_rejects_foreign_events() {
    let events = vec![
        Event::from(Touchpoint::new(1, 10, 3, TouchpointKind::View)),
        Event::from(Conversion::new(2, 20, 3)),
    ];
    let err = PartyInput::from_events(Role::Publisher, events.clone(), 2).unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnexpectedEventKind {
            id: 2,
            kind: "conversion",
            role: Role::Publisher
        }
    );
    let err = PartyInput::from_events(Role::Partner, events, 2).unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnexpectedEventKind {
            id: 1,
            kind: "view",
            role: Role::Partner
        }
    );
}

#[test]
fn test_party_input_checks_record_count() {
    let events = vec![Event::from(Conversion::new(2, 20, 3))];
    assert_eq!(
        PartyInput::from_events(Role::Partner, events.clone(), 3),
        Err(ConfigError::RecordCountMismatch {
            expected: 3,
            actual: 1
        })
    );
    let input = PartyInput::from_events(Role::Partner, events, 1).unwrap();
    assert_eq!(input.role(), Role::Partner);
    assert_eq!(input.encode().len(), CONVERSION_BITS);
}
