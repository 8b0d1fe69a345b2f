// Per-channel sample buffers with optional sliding-window retention
//
// A buffer is a (storage, pruning) pair: storage keeps either bare event
// times or times with a parallel value store, and pruning either retains
// everything or drops samples that fall out of a sliding time window.

use crate::types::{Sample, StreamError, StreamResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Buffer handle shared between the manager that drives it and the
/// components that fill or read it.
pub type SharedBuffer = Arc<RwLock<SampleBuffer>>;

/// Retention policy of a single buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Pruning {
    /// Never prune; the owner clears the buffer explicitly
    Retain,
    /// Keep only samples with `time >= now - window`
    SlidingWindow(f64),
}

impl Pruning {
    /// Sliding window of `window` time units; rejects non-positive and
    /// non-finite windows.
    pub fn sliding(window: f64) -> StreamResult<Self> {
        if !(window.is_finite() && window > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "time window must be positive and finite, got {}",
                window
            )));
        }
        Ok(Pruning::SlidingWindow(window))
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Times,
    TimedValues(VecDeque<f64>),
}

/// Counters for buffer monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub total_appended: u64,
    pub total_pruned: u64,
    pub current_size: usize,
}

/// Time-ordered store of event times or `(time, value)` samples
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    times: VecDeque<f64>,
    storage: Storage,
    pruning: Pruning,
    total_appended: u64,
    total_pruned: u64,
}

impl SampleBuffer {
    fn with(storage: Storage, pruning: Pruning) -> Self {
        Self {
            times: VecDeque::new(),
            storage,
            pruning,
            total_appended: 0,
            total_pruned: 0,
        }
    }

    /// Event-time buffer with the given retention
    pub fn event_buffer(pruning: Pruning) -> Self {
        Self::with(Storage::Times, pruning)
    }

    /// `(time, value)` buffer with the given retention
    pub fn value_buffer(pruning: Pruning) -> Self {
        Self::with(Storage::TimedValues(VecDeque::new()), pruning)
    }

    /// Unbounded event-time buffer
    pub fn events() -> Self {
        Self::event_buffer(Pruning::Retain)
    }

    /// Event-time buffer keeping only the last `window` time units
    pub fn windowed_events(window: f64) -> StreamResult<Self> {
        Ok(Self::event_buffer(Pruning::sliding(window)?))
    }

    /// Unbounded `(time, value)` buffer
    pub fn timed_values() -> Self {
        Self::value_buffer(Pruning::Retain)
    }

    /// `(time, value)` buffer keeping only the last `window` time units
    pub fn windowed_values(window: f64) -> StreamResult<Self> {
        Ok(Self::value_buffer(Pruning::sliding(window)?))
    }

    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(RwLock::new(self))
    }

    pub fn pruning(&self) -> Pruning {
        self.pruning
    }

    pub fn holds_values(&self) -> bool {
        matches!(self.storage, Storage::TimedValues(_))
    }

    /// Append an event time.
    ///
    /// Times are expected in non-decreasing order. On a value buffer the
    /// time is paired with `0.0` to keep both stores the same length.
    pub fn append(&mut self, time: f64) {
        self.append_value(time, 0.0);
    }

    /// Append a `(time, value)` sample. The value is ignored by event buffers.
    pub fn append_value(&mut self, time: f64, value: f64) {
        debug_assert!(
            self.times.back().map_or(true, |&last| last <= time),
            "samples must arrive in time order ({:?} > {})",
            self.times.back(),
            time
        );
        self.times.push_back(time);
        if let Storage::TimedValues(values) = &mut self.storage {
            values.push_back(value);
        }
        self.total_appended += 1;
    }

    /// Drop every sample strictly older than `now - window`.
    ///
    /// Only expired samples at the front are visited, so the cost is
    /// proportional to what gets removed. A no-op for `Pruning::Retain`.
    pub fn update(&mut self, now: f64) -> usize {
        let window = match self.pruning {
            Pruning::Retain => return 0,
            Pruning::SlidingWindow(window) => window,
        };
        let threshold = now - window;

        let mut removed = 0;
        while let Some(&front) = self.times.front() {
            if front < threshold {
                self.times.pop_front();
                removed += 1;
            } else {
                break;
            }
        }

        if let Storage::TimedValues(values) = &mut self.storage {
            values.drain(..removed);
        }
        self.total_pruned += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.times.clear();
        if let Storage::TimedValues(values) = &mut self.storage {
            values.clear();
        }
    }

    /// Events per time unit over the configured window.
    ///
    /// `None` for buffers without a window, since there is no fixed
    /// denominator to divide by.
    pub fn rate(&self) -> Option<f64> {
        match self.pruning {
            Pruning::SlidingWindow(window) => Some(self.times.len() as f64 / window),
            Pruning::Retain => None,
        }
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().copied()
    }

    /// Stored values, empty for event buffers
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let values = match &self.storage {
            Storage::TimedValues(values) => Some(values.iter().copied()),
            Storage::Times => None,
        };
        values.into_iter().flatten()
    }

    /// Time-paired values, empty for event buffers
    pub fn samples(&self) -> Vec<Sample> {
        self.times
            .iter()
            .zip(self.values())
            .map(|(&time, value)| Sample::new(time, value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            total_appended: self.total_appended,
            total_pruned: self.total_pruned,
            current_size: self.times.len(),
        }
    }
}
