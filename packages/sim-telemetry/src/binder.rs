// Binding of simulation ports onto manager-owned buffers
//
// Ports are published once at setup time, before the tick loop starts. The
// binder resolves each port's width (peer-negotiated or fallback), allocates
// the arrays and buffers behind it, and keeps a dispatch table so that the
// middleware adapter can route incoming events by `(port, index)`.

use crate::buffer::SharedBuffer;
use crate::manager::{BufferManager, SharedArray};
use crate::types::{StreamError, StreamResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Middleware-specific port parameters (`maxBuffered`, `accLatency`, ...),
/// passed through to the [`PortDirectory`] untouched.
pub type PortParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    ContinuousInput,
    ContinuousOutput,
    EventInput,
    EventOutput,
}

/// What the middleware reports when a port is published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortLink {
    Connected { width: usize },
    Unconnected,
}

/// Effective width of a bound port and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortWidth {
    /// Width negotiated with a live peer
    Connected(usize),
    /// Caller-supplied width used because no peer is attached
    Fallback(usize),
}

impl PortWidth {
    pub fn get(self) -> usize {
        match self {
            PortWidth::Connected(width) | PortWidth::Fallback(width) => width,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, PortWidth::Connected(_))
    }
}

/// How to react to a port without a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnconnectedPolicy {
    /// Log a warning and continue with the fallback width
    #[default]
    Warn,
    /// Abort setup
    Fail,
}

/// Seam to the simulation coupling middleware.
///
/// Implementations publish the named port on the middleware side and report
/// whether a peer is attached and with which width.
pub trait PortDirectory: Send {
    fn publish(&mut self, name: &str, kind: PortKind, params: &PortParams) -> PortLink;
}

/// Directory in which no port has a peer; every port runs on its fallback
/// width. Used for standalone runs.
#[derive(Debug, Default, Clone)]
pub struct UnconnectedDirectory;

impl PortDirectory for UnconnectedDirectory {
    fn publish(&mut self, _name: &str, _kind: PortKind, _params: &PortParams) -> PortLink {
        PortLink::Unconnected
    }
}

/// Directory with a fixed topology known ahead of time
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    widths: HashMap<String, usize>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, name: impl Into<String>, width: usize) -> Self {
        self.widths.insert(name.into(), width);
        self
    }
}

impl PortDirectory for StaticDirectory {
    fn publish(&mut self, name: &str, _kind: PortKind, _params: &PortParams) -> PortLink {
        match self.widths.get(name) {
            Some(&width) => PortLink::Connected { width },
            None => PortLink::Unconnected,
        }
    }
}

/// Mapping of physical event indices onto logical buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMapping {
    /// One buffer per physical index
    #[default]
    Identity,
    /// `group` consecutive physical indices share one buffer
    Aggregate(usize),
}

impl IndexMapping {
    fn validate(self, port: &str) -> StreamResult<()> {
        match self {
            IndexMapping::Aggregate(0) => Err(StreamError::InvalidConfig(format!(
                "aggregation group of port '{}' must be at least 1",
                port
            ))),
            _ => Ok(()),
        }
    }

    /// Number of buffers needed for a port of `width` indices
    pub fn buffer_count(self, width: usize) -> usize {
        match self {
            IndexMapping::Identity => width,
            IndexMapping::Aggregate(group) => width.div_ceil(group),
        }
    }

    pub fn map(self, index: usize) -> usize {
        match self {
            IndexMapping::Identity => index,
            IndexMapping::Aggregate(group) => index / group,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContinuousInputBinding {
    pub port: String,
    pub fallback_width: Option<usize>,
    pub initial_value: Option<Vec<f64>>,
    pub params: PortParams,
}

impl ContinuousInputBinding {
    pub fn new(port: impl Into<String>, fallback_width: usize) -> Self {
        Self {
            port: port.into(),
            fallback_width: Some(fallback_width),
            initial_value: None,
            params: PortParams::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContinuousOutputBinding {
    pub port: String,
    pub fallback_width: Option<usize>,
    pub initial_value: Option<Vec<f64>>,
    pub params: PortParams,
}

impl ContinuousOutputBinding {
    pub fn new(port: impl Into<String>, fallback_width: usize) -> Self {
        Self {
            port: port.into(),
            fallback_width: Some(fallback_width),
            initial_value: None,
            params: PortParams::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventInputBinding {
    pub port: String,
    pub fallback_width: Option<usize>,
    pub mapping: IndexMapping,
    pub params: PortParams,
}

impl EventInputBinding {
    pub fn new(port: impl Into<String>, fallback_width: usize) -> Self {
        Self {
            port: port.into(),
            fallback_width: Some(fallback_width),
            mapping: IndexMapping::Identity,
            params: PortParams::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventOutputBinding {
    pub port: String,
    pub params: PortParams,
}

impl EventOutputBinding {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            params: PortParams::new(),
        }
    }
}

/// Receiver of routed samples; one per event input port
pub trait SampleHandler: Send + Sync {
    fn on_sample(&self, index: usize, time: f64) -> StreamResult<()>;
}

/// Routes event times of one port into its buffers
struct EventRoute {
    port: String,
    buffers: Vec<SharedBuffer>,
    mapping: IndexMapping,
}

impl SampleHandler for EventRoute {
    fn on_sample(&self, index: usize, time: f64) -> StreamResult<()> {
        let slot = self.mapping.map(index);
        let buffer = self
            .buffers
            .get(slot)
            .ok_or_else(|| StreamError::ChannelIndexOutOfRange {
                port: self.port.clone(),
                index,
                buffers: self.buffers.len(),
            })?;
        buffer.write().append(time);
        Ok(())
    }
}

/// An outgoing event waiting to be picked up by the middleware
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutgoingEvent {
    pub time: f64,
    pub index: usize,
}

/// Event output port; events inserted into an unconnected port are dropped
#[derive(Debug)]
pub struct EventOutput {
    port: String,
    width: usize,
    connected: bool,
    pending: Vec<OutgoingEvent>,
}

impl EventOutput {
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn insert_event(&mut self, time: f64, index: usize) -> StreamResult<()> {
        if !self.connected {
            return Ok(());
        }
        if index >= self.width {
            return Err(StreamError::ChannelIndexOutOfRange {
                port: self.port.clone(),
                index,
                buffers: self.width,
            });
        }
        self.pending.push(OutgoingEvent { time, index });
        Ok(())
    }

    /// Hand queued events over to the middleware
    pub fn drain_pending(&mut self) -> Vec<OutgoingEvent> {
        std::mem::take(&mut self.pending)
    }
}

/// Binds ports to buffers and dispatches incoming events
pub struct ChannelBinder {
    directory: Box<dyn PortDirectory>,
    policy: UnconnectedPolicy,
    ports: BTreeMap<String, PortWidth>,
    routes: HashMap<String, Box<dyn SampleHandler>>,
    arrays: HashMap<String, SharedArray>,
}

impl ChannelBinder {
    pub fn new(directory: Box<dyn PortDirectory>, policy: UnconnectedPolicy) -> Self {
        Self {
            directory,
            policy,
            ports: BTreeMap::new(),
            routes: HashMap::new(),
            arrays: HashMap::new(),
        }
    }

    fn claim_name(&self, port: &str) -> StreamResult<()> {
        if self.ports.contains_key(port) {
            return Err(StreamError::InvalidConfig(format!(
                "a port name may only be published once: '{}'",
                port
            )));
        }
        Ok(())
    }

    fn handle_unconnected(&self, port: &str, kind: PortKind) -> StreamResult<()> {
        match self.policy {
            UnconnectedPolicy::Fail => Err(StreamError::UnconnectedPort(port.to_string())),
            UnconnectedPolicy::Warn => {
                log::warn!("{:?} port {} is not connected", kind, port);
                Ok(())
            }
        }
    }

    fn resolve_width(
        &mut self,
        port: &str,
        kind: PortKind,
        fallback_width: Option<usize>,
        params: &PortParams,
    ) -> StreamResult<PortWidth> {
        self.claim_name(port)?;
        let fallback = fallback_width.ok_or_else(|| {
            StreamError::InvalidConfig(format!("missing fallback width for port '{}'", port))
        })?;

        let width = match self.directory.publish(port, kind, params) {
            PortLink::Connected { width } => PortWidth::Connected(width),
            PortLink::Unconnected => {
                self.handle_unconnected(port, kind)?;
                PortWidth::Fallback(fallback)
            }
        };
        self.ports.insert(port.to_string(), width);
        Ok(width)
    }

    fn init_array(
        port: &str,
        width: usize,
        initial_value: Option<&[f64]>,
    ) -> StreamResult<SharedArray> {
        let values = match initial_value {
            Some(initial) if initial.len() != width => {
                return Err(StreamError::InvalidConfig(format!(
                    "initial value of port '{}' has {} elements, port width is {}",
                    port,
                    initial.len(),
                    width
                )))
            }
            Some(initial) => initial.to_vec(),
            None => vec![0.0; width],
        };
        Ok(Arc::new(RwLock::new(values)))
    }

    /// Publish a continuous input port and buffer each of its elements.
    ///
    /// The middleware writes into the port array (see [`Self::write_continuous`]);
    /// the manager samples it on every `pre_cycle`.
    pub fn bind_continuous_input(
        &mut self,
        binding: &ContinuousInputBinding,
        manager: &mut BufferManager,
    ) -> StreamResult<Vec<SharedBuffer>> {
        let width = self.resolve_width(
            &binding.port,
            PortKind::ContinuousInput,
            binding.fallback_width,
            &binding.params,
        )?;
        let array = Self::init_array(&binding.port, width.get(), binding.initial_value.as_deref())?;
        self.arrays.insert(binding.port.clone(), array.clone());
        Ok(manager.buffer_continuous(array))
    }

    /// Publish a continuous output port; the returned array is read by the
    /// middleware whenever it samples the port.
    pub fn bind_continuous_output(
        &mut self,
        binding: &ContinuousOutputBinding,
    ) -> StreamResult<SharedArray> {
        let width = self.resolve_width(
            &binding.port,
            PortKind::ContinuousOutput,
            binding.fallback_width,
            &binding.params,
        )?;
        let array = Self::init_array(&binding.port, width.get(), binding.initial_value.as_deref())?;
        self.arrays.insert(binding.port.clone(), array.clone());
        Ok(array)
    }

    /// Publish an event input port and route its indices into event buffers
    pub fn bind_event_input(
        &mut self,
        binding: &EventInputBinding,
        manager: &mut BufferManager,
    ) -> StreamResult<Vec<SharedBuffer>> {
        binding.mapping.validate(&binding.port)?;
        let width = self.resolve_width(
            &binding.port,
            PortKind::EventInput,
            binding.fallback_width,
            &binding.params,
        )?;
        let buffers = manager.buffer_events(binding.mapping.buffer_count(width.get()));
        self.routes.insert(
            binding.port.clone(),
            Box::new(EventRoute {
                port: binding.port.clone(),
                buffers: buffers.clone(),
                mapping: binding.mapping,
            }),
        );
        Ok(buffers)
    }

    pub fn bind_event_output(&mut self, binding: &EventOutputBinding) -> StreamResult<EventOutput> {
        self.claim_name(&binding.port)?;
        let output = match self
            .directory
            .publish(&binding.port, PortKind::EventOutput, &binding.params)
        {
            PortLink::Connected { width } => {
                self.ports
                    .insert(binding.port.clone(), PortWidth::Connected(width));
                EventOutput {
                    port: binding.port.clone(),
                    width,
                    connected: true,
                    pending: Vec::new(),
                }
            }
            PortLink::Unconnected => {
                self.handle_unconnected(&binding.port, PortKind::EventOutput)?;
                self.ports
                    .insert(binding.port.clone(), PortWidth::Fallback(0));
                EventOutput {
                    port: binding.port.clone(),
                    width: 0,
                    connected: false,
                    pending: Vec::new(),
                }
            }
        };
        Ok(output)
    }

    /// Route one incoming event through the dispatch table
    pub fn deliver_event(&self, port: &str, index: usize, time: f64) -> StreamResult<()> {
        self.routes
            .get(port)
            .ok_or_else(|| StreamError::UnknownPort(port.to_string()))?
            .on_sample(index, time)
    }

    /// Overwrite the instantaneous values of a continuous port
    pub fn write_continuous(&self, port: &str, values: &[f64]) -> StreamResult<()> {
        let array = self
            .arrays
            .get(port)
            .ok_or_else(|| StreamError::UnknownPort(port.to_string()))?;
        let mut array = array.write();
        if array.len() != values.len() {
            return Err(StreamError::WidthMismatch {
                port: port.to_string(),
                expected: array.len(),
                actual: values.len(),
            });
        }
        array.copy_from_slice(values);
        Ok(())
    }

    pub fn continuous_array(&self, port: &str) -> Option<SharedArray> {
        self.arrays.get(port).cloned()
    }

    pub fn port_width(&self, port: &str) -> Option<PortWidth> {
        self.ports.get(port).copied()
    }

    pub fn port_names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenient() -> ChannelBinder {
        ChannelBinder::new(Box::new(UnconnectedDirectory), UnconnectedPolicy::Warn)
    }

    #[test]
    fn test_connected_width_wins_over_fallback() {
        let directory = StaticDirectory::new().with_port("rates_in", 3);
        let mut binder = ChannelBinder::new(Box::new(directory), UnconnectedPolicy::Fail);
        let mut manager = BufferManager::single_step();

        let buffers = binder
            .bind_continuous_input(&ContinuousInputBinding::new("rates_in", 1), &mut manager)
            .unwrap();

        assert_eq!(buffers.len(), 3);
        assert_eq!(binder.port_width("rates_in"), Some(PortWidth::Connected(3)));
    }

    #[test]
    fn test_unconnected_port_uses_fallback_when_lenient() {
        let mut binder = lenient();
        let mut manager = BufferManager::single_step();

        let buffers = binder
            .bind_event_input(&EventInputBinding::new("activity_in", 4), &mut manager)
            .unwrap();

        assert_eq!(buffers.len(), 4);
        assert_eq!(binder.port_width("activity_in"), Some(PortWidth::Fallback(4)));
    }

    #[test]
    fn test_unconnected_port_fails_fast() {
        let mut binder =
            ChannelBinder::new(Box::new(UnconnectedDirectory), UnconnectedPolicy::Fail);
        let mut manager = BufferManager::single_step();

        let err = binder
            .bind_event_input(&EventInputBinding::new("activity_in", 4), &mut manager)
            .unwrap_err();
        assert!(matches!(err, StreamError::UnconnectedPort(ref p) if p == "activity_in"));
    }

    #[test]
    fn test_duplicate_port_name_rejected_at_bind_time() {
        let mut binder = lenient();
        let mut manager = BufferManager::single_step();

        binder
            .bind_continuous_input(&ContinuousInputBinding::new("reward", 1), &mut manager)
            .unwrap();
        let err = binder
            .bind_event_input(&EventInputBinding::new("reward", 1), &mut manager)
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_missing_fallback_width_is_config_error() {
        let mut binder = lenient();
        let mut manager = BufferManager::single_step();
        let mut binding = EventInputBinding::new("pattern_in", 1);
        binding.fallback_width = None;

        let err = binder.bind_event_input(&binding, &mut manager).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }

    #[test]
    fn test_initial_value_length_checked() {
        let mut binder = lenient();
        let mut binding = ContinuousOutputBinding::new("reward_out", 2);
        binding.initial_value = Some(vec![1.0]);

        assert!(binder.bind_continuous_output(&binding).is_err());

        let mut binding = ContinuousOutputBinding::new("mean_out", 2);
        binding.initial_value = Some(vec![0.5, 0.25]);
        let array = binder.bind_continuous_output(&binding).unwrap();
        assert_eq!(*array.read(), vec![0.5, 0.25]);
    }

    #[test]
    fn test_dispatch_routes_events_with_aggregation() {
        let mut binder = lenient();
        let mut manager = BufferManager::single_step();
        let mut binding = EventInputBinding::new("activity_in", 5);
        binding.mapping = IndexMapping::Aggregate(2);

        let buffers = binder.bind_event_input(&binding, &mut manager).unwrap();
        assert_eq!(buffers.len(), 3);

        binder.deliver_event("activity_in", 0, 0.1).unwrap();
        binder.deliver_event("activity_in", 1, 0.2).unwrap();
        binder.deliver_event("activity_in", 4, 0.3).unwrap();

        assert_eq!(buffers[0].read().times().collect::<Vec<_>>(), vec![0.1, 0.2]);
        assert!(buffers[1].read().is_empty());
        assert_eq!(buffers[2].read().len(), 1);

        let err = binder.deliver_event("activity_in", 6, 0.4).unwrap_err();
        assert!(matches!(err, StreamError::ChannelIndexOutOfRange { .. }));
        assert!(matches!(
            binder.deliver_event("nope", 0, 0.4),
            Err(StreamError::UnknownPort(_))
        ));
    }

    #[test]
    fn test_write_continuous_flows_into_buffers() {
        let mut binder = lenient();
        let mut manager = BufferManager::single_step();
        let buffers = binder
            .bind_continuous_input(&ContinuousInputBinding::new("reward_in", 2), &mut manager)
            .unwrap();

        binder.write_continuous("reward_in", &[0.5, 1.5]).unwrap();
        manager.pre_cycle(0.02);

        assert_eq!(buffers[1].read().values().collect::<Vec<_>>(), vec![1.5]);
        assert!(matches!(
            binder.write_continuous("reward_in", &[0.5]),
            Err(StreamError::WidthMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_unconnected_event_output_discards() {
        let mut binder = lenient();
        let mut output = binder
            .bind_event_output(&EventOutputBinding::new("pattern_out"))
            .unwrap();

        assert!(!output.is_connected());
        output.insert_event(1.0, 7).unwrap();
        assert!(output.drain_pending().is_empty());
    }

    #[test]
    fn test_connected_event_output_queues() {
        let directory = StaticDirectory::new().with_port("pattern_out", 2);
        let mut binder = ChannelBinder::new(Box::new(directory), UnconnectedPolicy::Warn);
        let mut output = binder
            .bind_event_output(&EventOutputBinding::new("pattern_out"))
            .unwrap();

        output.insert_event(1.0, 1).unwrap();
        assert!(output.insert_event(1.0, 2).is_err());
        assert_eq!(
            output.drain_pending(),
            vec![OutgoingEvent { time: 1.0, index: 1 }]
        );
        assert_eq!(binder.port_names().collect::<Vec<_>>(), vec!["pattern_out"]);
    }
}
