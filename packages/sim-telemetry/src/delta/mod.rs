// Delta synchronization between a producer and its consumers
//
// Every simulation tick the sender packages what changed since the previous
// tick into a `DeltaMessage`; receivers accumulate those messages into
// per-channel time series.
//
// Wire shape (an ordered sequence, never a map):
//
//   [sim_time, [[channel, [[t, v], ...]], ...]]
//   [sim_time, [[channel, [[t, v], ...]], ...], [[channel, [[index, [t, ...]], ...]], ...]]
//
// The third element is omitted entirely on ticks without events.

mod receiver;
mod sender;

pub use receiver::{DeltaOutcome, DeltaReceiver, TruncateReport};
pub use sender::DeltaSender;

use crate::types::Sample;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Samples of one continuous channel gathered during a tick
pub type ContinuousUpdate = (String, Vec<Sample>);

/// Event times of one event port, grouped by buffer index. Only indices
/// with at least one event are listed.
pub type EventUpdate = (String, Vec<(usize, Vec<f64>)>);

/// Everything one producer tick changed
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMessage {
    pub sim_time: f64,
    pub continuous: Vec<ContinuousUpdate>,
    pub events: Option<Vec<EventUpdate>>,
}

impl DeltaMessage {
    pub fn new(sim_time: f64) -> Self {
        Self {
            sim_time,
            continuous: Vec::new(),
            events: None,
        }
    }

    /// First tick, sample or event time that is NaN or infinite
    pub fn non_finite_time(&self) -> Option<f64> {
        let samples = self
            .continuous
            .iter()
            .flat_map(|(_, samples)| samples.iter().map(|s| s.time));
        let events = self
            .events
            .iter()
            .flatten()
            .flat_map(|(_, per_index)| per_index.iter())
            .flat_map(|(_, times)| times.iter().copied());
        std::iter::once(self.sim_time)
            .chain(samples)
            .chain(events)
            .find(|t| !t.is_finite())
    }

    pub fn event_count(&self) -> usize {
        self.events
            .iter()
            .flatten()
            .flat_map(|(_, per_index)| per_index.iter())
            .map(|(_, times)| times.len())
            .sum()
    }
}

impl Serialize for DeltaMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let len = if self.events.is_some() { 3 } else { 2 };
        let mut tuple = serializer.serialize_tuple(len)?;
        tuple.serialize_element(&self.sim_time)?;
        tuple.serialize_element(&self.continuous)?;
        if let Some(events) = &self.events {
            tuple.serialize_element(events)?;
        }
        tuple.end()
    }
}

struct DeltaMessageVisitor;

impl<'de> Visitor<'de> for DeltaMessageVisitor {
    type Value = DeltaMessage;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a sequence of [sim_time, continuous] or [sim_time, continuous, events]")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let sim_time = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let continuous = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let events = seq.next_element()?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &self));
        }
        let msg = DeltaMessage {
            sim_time,
            continuous,
            events,
        };
        // a NaN or infinite time would poison the receiver's time bounds
        if let Some(time) = msg.non_finite_time() {
            return Err(de::Error::custom(format!(
                "delta at sim time {} carries non-finite time {}",
                msg.sim_time, time
            )));
        }
        Ok(msg)
    }
}

impl<'de> Deserialize<'de> for DeltaMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(DeltaMessageVisitor)
    }
}
