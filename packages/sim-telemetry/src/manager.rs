// Per-tick buffer management
//
// The manager owns every buffer created through its factory methods and is
// driven by the simulation loop once per tick: `pre_cycle` samples bound
// continuous sources, `post_cycle` prunes (windowed) or clears (single step).

use crate::buffer::{Pruning, SampleBuffer, SharedBuffer};
use crate::types::StreamResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fixed-width array of instantaneous continuous values, written by the
/// simulation middleware and sampled by the manager.
pub type SharedArray = Arc<RwLock<Vec<f64>>>;

/// What happens to buffered samples at the end of every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep a sliding window of `window` time units
    Windowed { window: f64 },
    /// Keep only what arrived since the previous tick
    SingleStep,
}

/// Owns the buffers of one process and drives them through each tick
pub struct BufferManager {
    policy: RetentionPolicy,
    /// Retention of every created buffer, validated once in `new`
    pruning: Pruning,
    continuous: Vec<(Vec<SharedBuffer>, SharedArray)>,
    all_buffers: Vec<SharedBuffer>,
}

impl BufferManager {
    pub fn new(policy: RetentionPolicy) -> StreamResult<Self> {
        let pruning = match policy {
            RetentionPolicy::Windowed { window } => Pruning::sliding(window)?,
            RetentionPolicy::SingleStep => Pruning::Retain,
        };
        Ok(Self {
            policy,
            pruning,
            continuous: Vec::new(),
            all_buffers: Vec::new(),
        })
    }

    pub fn windowed(window: f64) -> StreamResult<Self> {
        Self::new(RetentionPolicy::Windowed { window })
    }

    pub fn single_step() -> Self {
        Self {
            policy: RetentionPolicy::SingleStep,
            pruning: Pruning::Retain,
            continuous: Vec::new(),
            all_buffers: Vec::new(),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    fn create_value_buffer(&self) -> SharedBuffer {
        SampleBuffer::value_buffer(self.pruning).into_shared()
    }

    fn create_event_buffer(&self) -> SharedBuffer {
        SampleBuffer::event_buffer(self.pruning).into_shared()
    }

    /// Create one value buffer per element of `source`.
    ///
    /// Every `pre_cycle` appends the element's current value to its buffer.
    pub fn buffer_continuous(&mut self, source: SharedArray) -> Vec<SharedBuffer> {
        let width = source.read().len();
        let buffers: Vec<SharedBuffer> = (0..width).map(|_| self.create_value_buffer()).collect();
        self.all_buffers.extend(buffers.iter().cloned());
        self.continuous.push((buffers.clone(), source));
        buffers
    }

    /// Create `n_sources` event buffers, filled externally
    pub fn buffer_events(&mut self, n_sources: usize) -> Vec<SharedBuffer> {
        let buffers: Vec<SharedBuffer> =
            (0..n_sources).map(|_| self.create_event_buffer()).collect();
        self.all_buffers.extend(buffers.iter().cloned());
        buffers
    }

    /// Capture the instantaneous value of every bound continuous source
    pub fn pre_cycle(&self, now: f64) {
        for (buffers, source) in &self.continuous {
            let values = source.read();
            for (buffer, &value) in buffers.iter().zip(values.iter()) {
                buffer.write().append_value(now, value);
            }
        }
    }

    /// Prune or clear every owned buffer
    pub fn post_cycle(&self, now: f64) {
        match self.policy {
            RetentionPolicy::Windowed { .. } => {
                for buffer in &self.all_buffers {
                    buffer.write().update(now);
                }
            }
            RetentionPolicy::SingleStep => {
                for buffer in &self.all_buffers {
                    buffer.write().clear();
                }
            }
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.all_buffers.len()
    }
}
