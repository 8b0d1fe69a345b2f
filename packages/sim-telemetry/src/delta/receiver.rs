use super::DeltaMessage;
use crate::types::{EventKey, Sample, TimeWindow};
use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, Instant};

/// Result of applying one delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaOutcome {
    Applied,
    /// The producer clock went backwards; all history was dropped before
    /// the delta was applied.
    Restarted { previous_max: f64 },
}

/// Summary of one `truncate` call
#[derive(Debug, Clone, PartialEq)]
pub struct TruncateReport {
    pub discarded: usize,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub elapsed: Duration,
}

/// Consumer-side accumulation of deltas into per-channel time series
#[derive(Debug, Default)]
pub struct DeltaReceiver {
    continuous: HashMap<String, Vec<Sample>>,
    events: HashMap<EventKey, Vec<f64>>,
    min_time: Option<f64>,
    max_time: Option<f64>,
    messages: u64,
    restarts: u64,
}

/// Index range of the samples with `lower <= time < upper`
fn window_range<T>(series: &[T], time: impl Fn(&T) -> f64, lower: f64, upper: f64) -> Range<usize> {
    let start = series.partition_point(|item| time(item) < lower);
    let end = series.partition_point(|item| time(item) < upper).max(start);
    start..end
}

/// Drop everything outside `[lower, upper)` in place; returns the number of
/// removed elements.
fn truncate_series<T>(
    series: &mut Vec<T>,
    time: impl Fn(&T) -> f64,
    lower: Option<f64>,
    upper: Option<f64>,
) -> usize {
    let before = series.len();
    let end = upper.map_or(before, |upper| series.partition_point(|item| time(item) < upper));
    series.truncate(end);
    let start = lower.map_or(0, |lower| series.partition_point(|item| time(item) < lower));
    series.drain(..start);
    before - series.len()
}

/// Which samples `truncate` drops, for the log: `time < lower` and
/// `time >= upper`.
fn discarded_span(lower: Option<f64>, upper: Option<f64>) -> String {
    let parts: Vec<String> = [
        lower.map(|l| format!("older than {:.2}s", l)),
        upper.map(|u| format!("not older than {:.2}s", u)),
    ]
    .into_iter()
    .flatten()
    .collect();
    parts.join(" and ")
}

impl DeltaReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta.
    ///
    /// A tick time below the previously seen maximum is taken as a producer
    /// restart: accumulated series are cleared and `min_time` restarts at the
    /// new tick.
    ///
    /// # Panics
    ///
    /// Panics if `min_time <= max_time` does not hold afterwards.
    pub fn read_delta(&mut self, msg: DeltaMessage) -> DeltaOutcome {
        let now = msg.sim_time;
        let mut outcome = DeltaOutcome::Applied;

        if self.min_time.is_none() {
            self.min_time = Some(now);
        }
        if let Some(previous_max) = self.max_time.filter(|&max| now < max) {
            log::info!(
                "Simulation reset detected ({} -> {}). Resetting buffers.",
                previous_max,
                now
            );
            self.reset();
            self.min_time = Some(now);
            self.restarts += 1;
            outcome = DeltaOutcome::Restarted { previous_max };
        }
        self.max_time = Some(now);
        if let (Some(min), Some(max)) = (self.min_time, self.max_time) {
            assert!(min <= max, "{} should be <= {}", min, max);
        }

        for (key, samples) in msg.continuous {
            self.continuous.entry(key).or_default().extend(samples);
        }
        for (channel, per_index) in msg.events.into_iter().flatten() {
            for (index, times) in per_index {
                self.events
                    .entry(EventKey::new(channel.clone(), index))
                    .or_default()
                    .extend(times);
            }
        }
        self.messages += 1;
        outcome
    }

    fn check_window(&self, (lower, upper): TimeWindow) {
        let (min, max) = match (self.min_time, self.max_time) {
            (Some(min), Some(max)) => (min, max),
            _ => panic!("window [{}, {}) requested before any delta arrived", lower, upper),
        };
        assert!(lower >= min, "window lower bound {} precedes min time {}", lower, min);
        assert!(upper <= max, "window upper bound {} exceeds max time {}", upper, max);
    }

    /// Continuous samples per key, restricted to `[lower, upper)` when a
    /// window is given. Unknown keys yield empty slices.
    ///
    /// # Panics
    ///
    /// Panics if the window is not within `[min_time, max_time]`.
    pub fn get_cont_data<K: AsRef<str>>(&self, keys: &[K], window: Option<TimeWindow>) -> Vec<&[Sample]> {
        if let Some(window) = window {
            self.check_window(window);
        }
        keys.iter()
            .map(|key| {
                let series = self
                    .continuous
                    .get(key.as_ref())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                match window {
                    Some((lower, upper)) => &series[window_range(series, |s| s.time, lower, upper)],
                    None => series,
                }
            })
            .collect()
    }

    /// Event times per key, restricted to `[lower, upper)` when a window is
    /// given. Unknown keys yield empty slices.
    ///
    /// # Panics
    ///
    /// Panics if the window is not within `[min_time, max_time]`.
    pub fn get_event_data(&self, keys: &[EventKey], window: Option<TimeWindow>) -> Vec<&[f64]> {
        if let Some(window) = window {
            self.check_window(window);
        }
        keys.iter()
            .map(|key| {
                let series = self.events.get(key).map(Vec::as_slice).unwrap_or_default();
                match window {
                    Some((lower, upper)) => &series[window_range(series, |&t| t, lower, upper)],
                    None => series,
                }
            })
            .collect()
    }

    /// Drop stored samples outside `[lower, upper)` on every channel.
    ///
    /// # Panics
    ///
    /// Panics if neither bound is given or if `lower > upper`.
    pub fn truncate(&mut self, lower: Option<f64>, upper: Option<f64>) -> TruncateReport {
        assert!(
            lower.is_some() || upper.is_some(),
            "truncate needs at least one bound"
        );
        if let (Some(lower), Some(upper)) = (lower, upper) {
            assert!(lower <= upper, "truncate bounds out of order: {} > {}", lower, upper);
        }

        let started = Instant::now();
        let mut discarded = 0;
        for series in self.continuous.values_mut() {
            discarded += truncate_series(series, |s| s.time, lower, upper);
        }
        for series in self.events.values_mut() {
            discarded += truncate_series(series, |&t| t, lower, upper);
        }
        let elapsed = started.elapsed();

        log::info!(
            "Clearing buffers: discarding {} elements which are {} [sim-time]; took {:?} [real-time].",
            discarded,
            discarded_span(lower, upper),
            elapsed
        );

        TruncateReport {
            discarded,
            lower,
            upper,
            elapsed,
        }
    }

    fn reset(&mut self) {
        self.continuous.clear();
        self.events.clear();
    }

    pub fn min_time(&self) -> Option<f64> {
        self.min_time
    }

    pub fn max_time(&self) -> Option<f64> {
        self.max_time
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts
    }

    pub fn message_count(&self) -> u64 {
        self.messages
    }

    pub fn continuous_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.continuous.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn event_keys(&self) -> Vec<&EventKey> {
        let mut keys: Vec<&EventKey> = self.events.keys().collect();
        keys.sort_unstable();
        keys
    }

    /// Total number of stored samples and event times
    pub fn sample_count(&self) -> usize {
        self.continuous.values().map(Vec::len).sum::<usize>()
            + self.events.values().map(Vec::len).sum::<usize>()
    }
}
