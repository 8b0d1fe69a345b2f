// Producer side of the telemetry stream
//
// A `ProducerNode` sits next to the simulation: the middleware adapter feeds
// port data into it through `deliver_event` / `write_continuous`, and calls
// `step` once per simulation tick. Each step samples the continuous ports,
// packages everything since the previous tick into one delta, publishes it,
// and only then clears the buffers. Events delivered between two steps thus
// travel with the later step exactly once.

use crate::binder::{ChannelBinder, PortDirectory};
use crate::codec::Serializer;
use crate::config::ProducerConfig;
use crate::delta::DeltaSender;
use crate::manager::BufferManager;
use crate::transport::MessageSink;
use crate::types::StreamResult;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Restrict a middleware clock to the ticks a node should process.
///
/// Ticks before the first `timestep` are skipped; iteration stops before
/// `total_time + timestep`, or never when `total_time` is `None`.
pub fn tick_times<I>(times: I, timestep: f64, total_time: Option<f64>) -> impl Iterator<Item = f64>
where
    I: IntoIterator<Item = f64>,
{
    let max_time = total_time.map(|total| total + timestep);
    times
        .into_iter()
        .skip_while(move |&t| t < timestep)
        .take_while(move |&t| max_time.map_or(true, |max| t < max))
}

/// Ticks `0, timestep, 2 * timestep, ...`
pub fn simulation_clock(timestep: f64) -> impl Iterator<Item = f64> {
    (0u64..).map(move |step| step as f64 * timestep)
}

/// Throughput and cycle-time counters of a producer
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProducerStats {
    pub ticks: u64,
    pub bytes_sent: u64,
    pub events_sent: u64,
    pub last_sim_time: Option<f64>,
    pub last_cycle: Duration,
    pub max_cycle: Duration,
    pub total_cycle: Duration,
}

impl ProducerStats {
    pub fn mean_cycle(&self) -> Duration {
        match u32::try_from(self.ticks) {
            Ok(ticks) if ticks > 0 => self.total_cycle / ticks,
            _ => Duration::ZERO,
        }
    }

    fn record(&mut self, sim_time: f64, bytes: usize, events: usize, cycle: Duration) {
        self.ticks += 1;
        self.bytes_sent += bytes as u64;
        self.events_sent += events as u64;
        self.last_sim_time = Some(sim_time);
        self.last_cycle = cycle;
        self.max_cycle = self.max_cycle.max(cycle);
        self.total_cycle += cycle;
    }
}

/// Buffers simulation ports and publishes one delta per tick
pub struct ProducerNode {
    manager: BufferManager,
    binder: ChannelBinder,
    sender: DeltaSender,
    serializer: Serializer,
    sink: Box<dyn MessageSink>,
    timestep: f64,
    total_time: Option<f64>,
    stats: ProducerStats,
}

impl ProducerNode {
    /// Publish every configured port through `directory` and wire its
    /// buffers into the delta sender.
    pub fn from_config(
        config: &ProducerConfig,
        directory: Box<dyn PortDirectory>,
        sink: Box<dyn MessageSink>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let serializer = config.communication.serializer()?;

        log::info!("Opening buffered ports...");
        let mut manager = BufferManager::single_step();
        let mut binder = ChannelBinder::new(directory, config.unconnected);
        let mut sender = DeltaSender::new();

        for (port, port_config) in &config.continuous {
            let binding = port_config.binding(port, &config.continuous_defaults);
            let buffers = binder.bind_continuous_input(&binding, &mut manager)?;
            sender.map_cont_buffers(&port_config.keys, buffers)?;
        }
        for (port, port_config) in &config.events {
            let binding = port_config.binding(port, &config.event_defaults);
            let buffers = binder.bind_event_input(&binding, &mut manager)?;
            sender.map_event_buffers(port, buffers)?;
        }

        log::info!(
            "Producer ready: {} ports, {} channels, {} buffers, codec {}, publishing on {}",
            config.continuous.len() + config.events.len(),
            sender.channel_count(),
            manager.buffer_count(),
            serializer,
            sink.address()
        );

        Ok(Self {
            manager,
            binder,
            sender,
            serializer,
            sink,
            timestep: config.timestep,
            total_time: config.total_time,
            stats: ProducerStats::default(),
        })
    }

    /// Route one incoming simulation event into its buffer
    pub fn deliver_event(&self, port: &str, index: usize, time: f64) -> StreamResult<()> {
        self.binder.deliver_event(port, index, time)
    }

    /// Overwrite the instantaneous values of a continuous port
    pub fn write_continuous(&self, port: &str, values: &[f64]) -> StreamResult<()> {
        self.binder.write_continuous(port, values)
    }

    /// Process one tick; returns the size of the published payload.
    ///
    /// The buffers are cleared even when publishing fails, so a failed tick
    /// never leaks its events into the next one.
    pub async fn step(&mut self, now: f64) -> StreamResult<usize> {
        self.manager.pre_cycle(now);
        let started = Instant::now();

        let published = self.publish(now).await;

        self.manager.post_cycle(now);
        let (bytes, events) = published?;
        self.stats.record(now, bytes, events, started.elapsed());
        Ok(bytes)
    }

    async fn publish(&mut self, now: f64) -> StreamResult<(usize, usize)> {
        let msg = self.sender.dump_delta(now);
        let payload = self.serializer.serialize(&msg)?;
        let bytes = payload.len();
        self.sink.send(payload).await?;
        Ok((bytes, msg.event_count()))
    }

    /// Step through every tick of `times` that falls within the configured
    /// runtime.
    pub async fn run<I>(&mut self, times: I) -> StreamResult<ProducerStats>
    where
        I: IntoIterator<Item = f64>,
    {
        log::info!("Dropping to runtime with timestep {}...", self.timestep);
        for now in tick_times(times, self.timestep, self.total_time) {
            self.step(now).await?;
        }
        log::info!(
            "Producer finished after {} ticks ({} bytes, mean cycle {:?}, max cycle {:?})",
            self.stats.ticks,
            self.stats.bytes_sent,
            self.stats.mean_cycle(),
            self.stats.max_cycle
        );
        Ok(self.stats.clone())
    }

    pub async fn close(&mut self) -> StreamResult<()> {
        self.sink.close().await
    }

    pub fn binder(&self) -> &ChannelBinder {
        &self.binder
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn total_time(&self) -> Option<f64> {
        self.total_time
    }

    pub fn address(&self) -> &str {
        self.sink.address()
    }
}
