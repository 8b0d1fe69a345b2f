// Consumer main loop
//
// Single cooperative loop alternating two steps until cancelled:
// - drain every subscription into the shared `DeltaReceiver`
// - run periodic tasks (truncation, redraw) that are due
//
// Nothing here may block; a stalled task stalls ingestion. Cancellation goes
// through a `CancellationToken`, after which all sockets are closed.

use crate::codec::Serializer;
use crate::config::ConsumerConfig;
use crate::delta::{DeltaOutcome, DeltaReceiver};
use crate::scheduler::{TaskCallback, TaskId, TaskScheduler};
use crate::transport::{MessageSource, Multiplexer, Payload, TickReport, ZmqSubscriber};
use crate::types::StreamResult;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Receiver shared between the subscription handlers and periodic tasks
pub type SharedReceiver = Arc<RwLock<DeltaReceiver>>;

/// Counters of a consumer run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumerStats {
    pub ticks: u64,
    pub messages: u64,
    pub filtered: u64,
    pub failures: u64,
    pub tasks_run: u64,
}

impl ConsumerStats {
    fn record(&mut self, report: &TickReport, tasks_run: usize) {
        self.ticks += 1;
        self.messages += report.delivered as u64;
        self.filtered += report.filtered as u64;
        self.failures += report.failures.len() as u64;
        self.tasks_run += tasks_run as u64;
    }
}

pub struct ConsumerLoop {
    multiplexer: Multiplexer,
    scheduler: TaskScheduler,
    receiver: SharedReceiver,
    cancel_token: CancellationToken,
    idle_backoff: Duration,
    stats: ConsumerStats,
}

impl ConsumerLoop {
    pub fn new(poll_timeout: Duration, idle_backoff: Duration) -> Self {
        Self {
            multiplexer: Multiplexer::new(poll_timeout),
            scheduler: TaskScheduler::new(),
            receiver: Arc::new(RwLock::new(DeltaReceiver::new())),
            cancel_token: CancellationToken::new(),
            idle_backoff,
            stats: ConsumerStats::default(),
        }
    }

    /// Connect every configured subscription and schedule truncation of
    /// data older than the display window plus slack.
    pub async fn from_config(config: &ConsumerConfig) -> StreamResult<Self> {
        config.validate()?;
        let mut consumer = Self::new(config.poll_timeout(), config.idle_backoff());

        for subscription in &config.subscriptions {
            let codec = subscription.serializer()?;
            let endpoint = subscription.endpoint().to_string();
            let source = ZmqSubscriber::connect(&endpoint, &subscription.topic).await?;
            consumer.subscribe(Box::new(source), subscription.topic.as_str(), codec);
        }
        consumer.add_truncate_task(config.retention(), config.truncate_interval_ms);

        Ok(consumer)
    }

    /// Feed deltas arriving on `source` into the shared receiver
    pub fn subscribe(
        &mut self,
        source: Box<dyn MessageSource>,
        topic: impl Into<Vec<u8>>,
        codec: Serializer,
    ) {
        let receiver = self.receiver.clone();
        let handler = move |payload: Payload| -> StreamResult<()> {
            if let Payload::Delta(msg) = payload {
                if let DeltaOutcome::Restarted { .. } = receiver.write().read_delta(msg) {
                    log::debug!("Receiver history reset by producer restart");
                }
            }
            Ok(())
        };
        self.multiplexer
            .add_subscription(source, topic, Some(codec), Box::new(handler));
    }

    /// Drop everything older than `retention` simulation time units behind
    /// the newest tick, every `interval_ms`.
    pub fn add_truncate_task(&mut self, retention: f64, interval_ms: u64) -> TaskId {
        let receiver = self.receiver.clone();
        let callback: TaskCallback = Box::new(move || {
            let newest = receiver.read().max_time();
            if let Some(max_time) = newest {
                receiver.write().truncate(Some(max_time - retention), None);
            }
        });
        self.scheduler.add_handle("truncate", callback, interval_ms)
    }

    pub fn add_task(&mut self, name: &str, callback: TaskCallback, interval_ms: u64) -> TaskId {
        self.scheduler.add_handle(name, callback, interval_ms)
    }

    pub fn receiver(&self) -> SharedReceiver {
        self.receiver.clone()
    }

    /// Token that stops `run` when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn subscription_count(&self) -> usize {
        self.multiplexer.subscription_count()
    }

    /// One iteration: drain all subscriptions, then run due tasks
    pub async fn tick(&mut self, now_ms: u64) -> TickReport {
        let report = self.multiplexer.tick().await;
        let tasks_run = self.scheduler.tick(now_ms);
        self.stats.record(&report, tasks_run);
        report
    }

    /// Loop until the cancel token fires, then close every socket
    pub async fn run(&mut self) -> StreamResult<ConsumerStats> {
        log::info!(
            "Consumer running with {} subscriptions and {} periodic tasks",
            self.multiplexer.subscription_count(),
            self.scheduler.len()
        );
        let started = Instant::now();

        while !self.cancel_token.is_cancelled() {
            let now_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let report = self.tick(now_ms).await;
            if report.is_idle() {
                tokio::select! {
                    biased;

                    _ = self.cancel_token.cancelled() => {
                        log::info!("Consumer loop cancelled");
                    }

                    _ = tokio::time::sleep(self.idle_backoff) => {}
                }
            }
        }

        self.multiplexer.close().await;
        log::info!(
            "Consumer stopped after {} ticks ({} messages, {} failures)",
            self.stats.ticks,
            self.stats.messages,
            self.stats.failures
        );
        Ok(self.stats.clone())
    }
}
