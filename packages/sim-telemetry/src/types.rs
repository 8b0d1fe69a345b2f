// Common types for the telemetry subsystem

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for telemetry operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while binding, buffering or transporting telemetry
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Port '{0}' is not connected")]
    UnconnectedPort(String),

    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Channel index {index} out of range for port '{port}' ({buffers} buffers)")]
    ChannelIndexOutOfRange {
        port: String,
        index: usize,
        buffers: usize,
    },

    #[error("Port '{port}' has width {expected}, got {actual} values")]
    WidthMismatch {
        port: String,
        expected: usize,
        actual: usize,
    },

    #[error("Serialization error ({codec}): {message}")]
    Serialization { codec: &'static str, message: String },

    #[error("Deserialization error ({codec}): {message}")]
    Deserialization { codec: &'static str, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Configuration errors are fatal at setup and never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidConfig(_) | StreamError::UnconnectedPort(_)
        )
    }
}

/// A single continuous sample. Travels on the wire as a `[time, value]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

impl From<(f64, f64)> for Sample {
    fn from((time, value): (f64, f64)) -> Self {
        Self { time, value }
    }
}

impl From<Sample> for (f64, f64) {
    fn from(sample: Sample) -> Self {
        (sample.time, sample.value)
    }
}

/// Receiver-side key of one event train: the port name plus the sub-index
/// of the buffer within that port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub channel: String,
    pub index: usize,
}

impl EventKey {
    pub fn new(channel: impl Into<String>, index: usize) -> Self {
        Self {
            channel: channel.into(),
            index,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.channel, self.index)
    }
}

/// Half-open simulation-time window `[lower, upper)`
pub type TimeWindow = (f64, f64);
