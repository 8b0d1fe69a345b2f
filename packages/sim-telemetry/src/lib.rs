// Telemetry buffering and delta synchronization for long-running simulations
//
// A producer node buffers the ports of an externally clocked simulation and
// publishes, once per tick, only what changed since the previous tick. Any
// number of consumers subscribe, rebuild per-channel time series from those
// deltas, and keep memory bounded with sliding windows and truncation.
//
// Architecture:
// - `buffer`: Sample buffers composed from storage and pruning policy
// - `manager`: Per-tick driving of buffers (windowed or single step)
// - `binder`: Port binding, fallback widths and event dispatch
// - `delta`: Delta wire message, sender and receiver
// - `codec`: Named serializers (json, simd-json, msgpack)
// - `transport`: Pub/sub sources and sinks plus the draining multiplexer
// - `scheduler`: Soft-interval periodic tasks
// - `config`: JSON configuration files
// - `producer` / `consumer`: The two process main loops

pub mod binder;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod delta;
pub mod manager;
pub mod producer;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use binder::{ChannelBinder, PortDirectory, PortWidth, UnconnectedPolicy};
pub use buffer::{SampleBuffer, SharedBuffer};
pub use codec::Serializer;
pub use config::{ConsumerConfig, ProducerConfig};
pub use consumer::{ConsumerLoop, SharedReceiver};
pub use delta::{DeltaMessage, DeltaReceiver, DeltaSender};
pub use manager::{BufferManager, RetentionPolicy};
pub use producer::{ProducerNode, ProducerStats};
pub use scheduler::TaskScheduler;
pub use transport::{Endpoint, Multiplexer};
pub use types::{EventKey, Sample, StreamError, StreamResult, TimeWindow};
