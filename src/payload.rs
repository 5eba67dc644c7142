//! The subscribe payload a session sends once per second.
//!
//! On the wire this is the JSON object `{"m":1,"i":[..]}` the tick server
//! expects: `m` is the message tag (1 = subscribe) and `i` lists the
//! instrument ids the session wants quotes for.

use rand::Rng;
use serde::Serialize;

use crate::error::Result;

/// Message tag for a subscribe request.
pub const SUBSCRIBE_TAG: u32 = 1;

/// Number of instrument slots in a subscribe request.
pub const INSTRUMENT_SLOTS: usize = 5;

/// Lowest instrument id drawn after the seed send.
pub const INSTRUMENT_MIN: u32 = 1;

/// Highest instrument id drawn after the seed send (inclusive).
pub const INSTRUMENT_MAX: u32 = 100;

const SEED_INSTRUMENTS: [u32; INSTRUMENT_SLOTS] = [1, 2, 3, 4, 5];

/// A subscribe request owned by one session.
///
/// The first send of every session carries the literal seed instruments
/// `[1,2,3,4,5]`; [`reroll`](Subscription::reroll) replaces them with fresh
/// random ids for the next send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    #[serde(rename = "m")]
    tag: u32,
    #[serde(rename = "i")]
    instruments: [u32; INSTRUMENT_SLOTS],
}

impl Subscription {
    /// The seed subscription every session starts from.
    #[must_use]
    pub const fn seed() -> Self {
        Self {
            tag: SUBSCRIBE_TAG,
            instruments: SEED_INSTRUMENTS,
        }
    }

    /// Current instrument ids.
    #[must_use]
    pub const fn instruments(&self) -> &[u32; INSTRUMENT_SLOTS] {
        &self.instruments
    }

    /// Serialize to the wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`](crate::Error::Payload) if serialization
    /// fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Replace every instrument slot with an independently drawn uniform id
    /// in `[INSTRUMENT_MIN, INSTRUMENT_MAX]`.
    pub fn reroll(&mut self, rng: &mut impl Rng) {
        for slot in &mut self.instruments {
            *slot = rng.random_range(INSTRUMENT_MIN..=INSTRUMENT_MAX);
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::seed()
    }
}
