// JSON configuration for producer and consumer processes
//
// Configs are loaded and validated once at startup and handed to the
// constructors of `ProducerNode` / `ConsumerLoop`; nothing reads them after
// that. Every setup-time check lives in `validate` so that a bad file is
// rejected before any socket is opened.

use crate::binder::{
    ContinuousInputBinding, EventInputBinding, IndexMapping, PortParams, UnconnectedPolicy,
};
use crate::codec::Serializer;
use crate::transport::Endpoint;
use crate::types::{StreamError, StreamResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_format() -> String {
    Serializer::default().name().to_string()
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn invalid(message: String) -> StreamError {
    StreamError::InvalidConfig(message)
}

fn check_positive(name: &str, value: f64) -> StreamResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid(format!("{} must be positive, got {}", name, value)));
    }
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> StreamResult<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Where and how deltas are published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix put in front of every published message
    #[serde(default)]
    pub topic: String,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            transport: default_transport(),
            host: default_host(),
            port: default_port(),
            topic: String::new(),
        }
    }
}

impl CommunicationConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.transport.clone(), self.host.clone(), self.port)
    }

    pub fn serializer(&self) -> StreamResult<Serializer> {
        Serializer::from_name(&self.format)
    }
}

/// A continuous input port: one channel key per element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousPortConfig {
    pub keys: Vec<String>,
    /// Must equal `keys.len()` when given
    #[serde(default)]
    pub fallback_width: Option<usize>,
    #[serde(default)]
    pub initial_value: Option<Vec<f64>>,
    /// Overrides merged over `continuous_defaults`
    #[serde(default)]
    pub params: PortParams,
}

impl ContinuousPortConfig {
    pub fn binding(&self, port: &str, defaults: &PortParams) -> ContinuousInputBinding {
        ContinuousInputBinding {
            port: port.to_string(),
            fallback_width: Some(self.keys.len()),
            initial_value: self.initial_value.clone(),
            params: merge_params(defaults, &self.params),
        }
    }
}

/// An event input port; events are keyed by `(port, index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPortConfig {
    /// Number of event indices on the port
    pub keys: usize,
    #[serde(default)]
    pub fallback_width: Option<usize>,
    /// Merge this many consecutive indices into one buffer
    #[serde(default)]
    pub aggregate: Option<usize>,
    #[serde(default)]
    pub params: PortParams,
}

impl EventPortConfig {
    pub fn binding(&self, port: &str, defaults: &PortParams) -> EventInputBinding {
        EventInputBinding {
            port: port.to_string(),
            fallback_width: Some(self.keys),
            mapping: self
                .aggregate
                .map_or(IndexMapping::Identity, IndexMapping::Aggregate),
            params: merge_params(defaults, &self.params),
        }
    }
}

fn merge_params(defaults: &PortParams, overrides: &PortParams) -> PortParams {
    let mut params = defaults.clone();
    params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
}

/// Configuration of the producer node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default)]
    pub communication: CommunicationConfig,
    /// Simulation time between ticks
    pub timestep: f64,
    /// Last tick to process; unbounded when absent
    #[serde(default)]
    pub total_time: Option<f64>,
    #[serde(default)]
    pub unconnected: UnconnectedPolicy,
    #[serde(default)]
    pub continuous: BTreeMap<String, ContinuousPortConfig>,
    #[serde(default)]
    pub events: BTreeMap<String, EventPortConfig>,
    #[serde(default)]
    pub continuous_defaults: PortParams,
    #[serde(default)]
    pub event_defaults: PortParams,
}

impl ProducerConfig {
    /// Read and validate a producer config file
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StreamResult<()> {
        self.communication.serializer()?;
        check_positive("timestep", self.timestep)?;
        if let Some(total_time) = self.total_time {
            if !(total_time.is_finite() && total_time >= 0.0) {
                return Err(invalid(format!("total_time must be >= 0, got {}", total_time)));
            }
        }

        for (port, config) in &self.continuous {
            if config.keys.is_empty() {
                return Err(invalid(format!("continuous port '{}' has no keys", port)));
            }
            if let Some(width) = config.fallback_width.filter(|&w| w != config.keys.len()) {
                return Err(invalid(format!(
                    "continuous port '{}': fallback_width {} does not match {} keys",
                    port,
                    width,
                    config.keys.len()
                )));
            }
            if let Some(initial) = config.initial_value.as_ref().filter(|v| v.len() != config.keys.len()) {
                return Err(invalid(format!(
                    "continuous port '{}': initial_value has {} elements for {} keys",
                    port,
                    initial.len(),
                    config.keys.len()
                )));
            }
        }

        for (port, config) in &self.events {
            if config.keys == 0 {
                return Err(invalid(format!("event port '{}' has no keys", port)));
            }
            if let Some(width) = config.fallback_width.filter(|&w| w != config.keys) {
                return Err(invalid(format!(
                    "event port '{}': fallback_width {} does not match {} keys",
                    port, width, config.keys
                )));
            }
            if config.aggregate == Some(0) {
                return Err(invalid(format!("event port '{}': aggregate must be >= 1", port)));
            }
        }

        // channel keys share one namespace with event port names
        let mut seen = std::collections::HashSet::new();
        let names = self
            .continuous
            .values()
            .flat_map(|config| config.keys.iter())
            .chain(self.events.keys());
        for name in names {
            if !seen.insert(name) {
                return Err(invalid(format!("channel '{}' is configured twice", name)));
            }
        }
        Ok(())
    }

    /// Number of channels on the wire
    pub fn channel_count(&self) -> usize {
        self.continuous.values().map(|c| c.keys.len()).sum::<usize>() + self.events.len()
    }
}

/// One producer to subscribe to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl SubscriptionConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.transport.clone(), self.host.clone(), self.port)
    }

    pub fn serializer(&self) -> StreamResult<Serializer> {
        Serializer::from_name(&self.format)
    }
}

fn default_display_window() -> f64 {
    10.0
}

fn default_redraw_interval_ms() -> u64 {
    50
}

fn default_truncate_interval_ms() -> u64 {
    5000
}

fn default_truncate_slack() -> f64 {
    1.0
}

fn default_idle_backoff_ms() -> u64 {
    1
}

/// Configuration of a consumer process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub subscriptions: Vec<SubscriptionConfig>,
    /// Simulation time shown by the display; older data is truncated
    #[serde(default = "default_display_window")]
    pub display_window: f64,
    #[serde(default = "default_redraw_interval_ms")]
    pub redraw_interval_ms: u64,
    #[serde(default = "default_truncate_interval_ms")]
    pub truncate_interval_ms: u64,
    /// Extra simulation time kept beyond the display window
    #[serde(default = "default_truncate_slack")]
    pub truncate_slack: f64,
    /// Per-source wait in every poll cycle
    #[serde(default)]
    pub poll_timeout_us: u64,
    /// Sleep after a tick that delivered nothing
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

impl ConsumerConfig {
    /// Read and validate a consumer config file
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.subscriptions.is_empty() {
            return Err(invalid("at least one subscription is required".to_string()));
        }
        for subscription in &self.subscriptions {
            subscription.serializer()?;
        }
        check_positive("display_window", self.display_window)?;
        if !(self.truncate_slack.is_finite() && self.truncate_slack >= 0.0) {
            return Err(invalid(format!(
                "truncate_slack must be >= 0, got {}",
                self.truncate_slack
            )));
        }
        if self.redraw_interval_ms == 0 || self.truncate_interval_ms == 0 {
            return Err(invalid("task intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_micros(self.poll_timeout_us)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Data older than this (relative to the newest tick) is dropped
    pub fn retention(&self) -> f64 {
        self.display_window + self.truncate_slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRODUCER: &str = r#"{
        "communication": { "format": "msgpack", "port": 8001 },
        "timestep": 0.015,
        "total_time": 20.0,
        "continuous_defaults": { "maxBuffered": 1, "interpolate": false },
        "event_defaults": { "maxBuffered": 1, "base": 0 },
        "continuous": {
            "activity_rates_in": { "keys": ["activity_rate_0", "activity_rate_1"] },
            "curr_reward_in": { "keys": ["curr"], "params": { "maxBuffered": 4 } }
        },
        "events": {
            "activity_in": { "keys": 20 },
            "pattern_in": { "keys": 50, "aggregate": 10 }
        }
    }"#;

    fn producer() -> ProducerConfig {
        serde_json::from_str(PRODUCER).unwrap()
    }

    #[test]
    fn test_producer_config_parses_with_defaults() {
        let config = producer();
        config.validate().unwrap();

        assert_eq!(config.communication.serializer().unwrap(), Serializer::MessagePack);
        assert_eq!(config.communication.endpoint().to_string(), "tcp://127.0.0.1:8001");
        assert_eq!(config.unconnected, UnconnectedPolicy::Warn);
        assert_eq!(config.channel_count(), 5);
    }

    #[test]
    fn test_port_params_merge_over_defaults() {
        let config = producer();
        let binding = config.continuous["curr_reward_in"]
            .binding("curr_reward_in", &config.continuous_defaults);
        assert_eq!(binding.params["maxBuffered"], 4);
        assert_eq!(binding.params["interpolate"], false);
        assert_eq!(binding.fallback_width, Some(1));

        let events = config.events["pattern_in"].binding("pattern_in", &config.event_defaults);
        assert_eq!(events.mapping, IndexMapping::Aggregate(10));
        assert_eq!(events.params["base"], 0);
    }

    #[test]
    fn test_producer_validation_errors() {
        let mut config = producer();
        config.communication.format = "ujson".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = producer();
        config
            .continuous
            .get_mut("curr_reward_in")
            .unwrap()
            .fallback_width = Some(3);
        assert!(config.validate().is_err());

        let mut config = producer();
        config.timestep = 0.0;
        assert!(config.validate().is_err());

        let mut config = producer();
        config.continuous.insert(
            "duplicate".to_string(),
            ContinuousPortConfig {
                keys: vec!["activity_in".to_string()],
                fallback_width: None,
                initial_value: None,
                params: PortParams::new(),
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_consumer_config_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "subscriptions": [{{ "port": 9001, "format": "simd-json" }}], "display_window": 5.0 }}"#
        )
        .unwrap();

        let config = ConsumerConfig::load(file.path()).unwrap();
        assert_eq!(config.subscriptions[0].endpoint().to_string(), "tcp://127.0.0.1:9001");
        assert_eq!(config.redraw_interval_ms, 50);
        assert_eq!(config.retention(), 6.0);
        assert_eq!(config.poll_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_consumer_config_rejects_missing_subscriptions() {
        let config: ConsumerConfig = serde_json::from_str(r#"{ "subscriptions": [] }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            ProducerConfig::load(file.path()),
            Err(StreamError::Json(_))
        ));
        assert!(matches!(
            ProducerConfig::load("/nonexistent/producer.json"),
            Err(StreamError::Io(_))
        ));
    }
}
