use super::{ContinuousUpdate, DeltaMessage, EventUpdate};
use crate::buffer::SharedBuffer;
use crate::types::{StreamError, StreamResult};
use std::collections::HashSet;

/// Producer-side view onto the live buffers.
///
/// Holds no samples of its own; `dump_delta` reads whatever the buffers
/// accumulated since the owning single-step manager last cleared them.
#[derive(Default)]
pub struct DeltaSender {
    continuous: Vec<(String, SharedBuffer)>,
    events: Vec<(String, Vec<SharedBuffer>)>,
    names: HashSet<String>,
}

impl DeltaSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, name: &str) -> StreamResult<()> {
        if !self.names.insert(name.to_string()) {
            return Err(StreamError::InvalidConfig(format!(
                "channel '{}' is mapped twice",
                name
            )));
        }
        Ok(())
    }

    /// Map one key per continuous buffer, in order
    pub fn map_cont_buffers<K: AsRef<str>>(
        &mut self,
        keys: &[K],
        buffers: Vec<SharedBuffer>,
    ) -> StreamResult<()> {
        if keys.len() != buffers.len() {
            return Err(StreamError::InvalidConfig(format!(
                "{} continuous keys for {} buffers",
                keys.len(),
                buffers.len()
            )));
        }
        for key in keys {
            self.claim(key.as_ref())?;
        }
        self.continuous.extend(
            keys.iter()
                .map(|key| key.as_ref().to_string())
                .zip(buffers),
        );
        Ok(())
    }

    /// Map all event buffers of one port under a single channel name; buffer
    /// position becomes the sub-index on the wire.
    pub fn map_event_buffers(&mut self, channel: &str, buffers: Vec<SharedBuffer>) -> StreamResult<()> {
        self.claim(channel)?;
        self.events.push((channel.to_string(), buffers));
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.continuous.len() + self.events.len()
    }

    /// Package the current buffer contents as the delta for tick `now`.
    ///
    /// Continuous channels are always included. Event buffers are included
    /// only when non-empty, and the event section is left out when no port
    /// had any events.
    pub fn dump_delta(&self, now: f64) -> DeltaMessage {
        let continuous: Vec<ContinuousUpdate> = self
            .continuous
            .iter()
            .map(|(key, buffer)| (key.clone(), buffer.read().samples()))
            .collect();

        let events: Vec<EventUpdate> = self
            .events
            .iter()
            .filter_map(|(channel, buffers)| {
                let per_index: Vec<(usize, Vec<f64>)> = buffers
                    .iter()
                    .enumerate()
                    .filter_map(|(index, buffer)| {
                        let buffer = buffer.read();
                        (!buffer.is_empty()).then(|| (index, buffer.times().collect()))
                    })
                    .collect();
                (!per_index.is_empty()).then(|| (channel.clone(), per_index))
            })
            .collect();

        DeltaMessage {
            sim_time: now,
            continuous,
            events: (!events.is_empty()).then_some(events),
        }
    }
}
