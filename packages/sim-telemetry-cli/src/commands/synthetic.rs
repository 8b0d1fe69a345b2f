use crate::cli::SyntheticArgs;
use crate::exit_codes;
use crate::output;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sim_telemetry::binder::UnconnectedDirectory;
use sim_telemetry::producer::{simulation_clock, tick_times};
use sim_telemetry::transport::ZmqPublisher;
use sim_telemetry::{ProducerConfig, ProducerNode, StreamResult, UnconnectedPolicy};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Random walks for continuous ports and Bernoulli events per index
struct SyntheticSource {
    rng: StdRng,
    walks: BTreeMap<String, Vec<f64>>,
    event_ports: Vec<(String, usize)>,
    event_probability: f64,
    timestep: f64,
}

impl SyntheticSource {
    fn new(config: &ProducerConfig, rng: StdRng, event_probability: f64) -> Self {
        let walks = config
            .continuous
            .iter()
            .map(|(port, c)| {
                let start = c.initial_value.clone().unwrap_or_else(|| vec![0.0; c.keys.len()]);
                (port.clone(), start)
            })
            .collect();
        let event_ports = config
            .events
            .iter()
            .map(|(port, e)| (port.clone(), e.keys))
            .collect();
        Self {
            rng,
            walks,
            event_ports,
            event_probability,
            timestep: config.timestep,
        }
    }

    /// Feed one tick's worth of data ending at `now` into the producer
    fn feed(&mut self, producer: &ProducerNode, now: f64) -> StreamResult<()> {
        for (port, values) in self.walks.iter_mut() {
            for value in values.iter_mut() {
                *value += self.rng.random_range(-1.0_f64..1.0);
            }
            producer.write_continuous(port, values)?;
        }

        // aggregated indices share a buffer, so deliver in time order
        let mut events = Vec::new();
        for (port, width) in &self.event_ports {
            for index in 0..*width {
                if self.rng.random_bool(self.event_probability) {
                    let offset: f64 = self.rng.random();
                    events.push((now - offset * self.timestep, port.as_str(), index));
                }
            }
        }
        events.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (time, port, index) in events {
            producer.deliver_event(port, index, time)?;
        }
        Ok(())
    }
}

fn fail(e: sim_telemetry::StreamError) -> i32 {
    eprintln!("Error: {}", e);
    exit_codes::for_error(&e)
}

pub async fn execute(args: SyntheticArgs) -> i32 {
    if !(0.0..=1.0).contains(&args.event_probability) {
        eprintln!(
            "Error: --event-probability must be within [0, 1], got {}",
            args.event_probability
        );
        return exit_codes::INPUT_ERROR;
    }

    let mut config = match ProducerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };
    // no simulation peers here; every port runs on its configured width
    config.unconnected = UnconnectedPolicy::Warn;

    let endpoint = config.communication.endpoint().to_string();
    let publisher = match ZmqPublisher::bind(&endpoint, &config.communication.topic).await {
        Ok(publisher) => publisher,
        Err(e) => return fail(e),
    };
    let mut producer =
        match ProducerNode::from_config(&config, Box::new(UnconnectedDirectory), Box::new(publisher)) {
            Ok(producer) => producer,
            Err(e) => return fail(e),
        };

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut source = SyntheticSource::new(&config, rng, args.event_probability);

    let limit = args.ticks.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    let times = tick_times(simulation_clock(config.timestep), config.timestep, config.total_time).take(limit);

    let mut pacing = tokio::time::interval(Duration::from_secs_f64(config.timestep));
    pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("Publishing synthetic telemetry on {}", producer.address());
    let mut code = exit_codes::SUCCESS;
    for now in times {
        let interrupted = tokio::select! {
            biased;

            _ = &mut ctrl_c => true,

            _ = pacing.tick(), if !args.no_pacing => false,

            _ = tokio::task::yield_now(), if args.no_pacing => false,
        };
        if interrupted {
            log::info!("Interrupted at t = {}", now);
            break;
        }

        if let Err(e) = source.feed(&producer, now) {
            code = fail(e);
            break;
        }
        if let Err(e) = producer.step(now).await {
            code = fail(e);
            break;
        }
    }

    if let Err(e) = producer.close().await {
        log::warn!("Failed to close publisher: {}", e);
    }

    let stats = producer.stats();
    println!(
        "Published {} ticks ({} bytes, {} events), mean cycle {:?}",
        stats.ticks,
        stats.bytes_sent,
        stats.events_sent,
        stats.mean_cycle()
    );
    if let Some(ref path) = args.stats_out {
        if let Err(e) = output::emit_json(stats, Some(path.as_str())) {
            return e;
        }
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_telemetry::transport::inproc_channel;

    fn config() -> ProducerConfig {
        serde_json::from_str(
            r#"{
                "timestep": 0.1,
                "continuous": { "reward_in": { "keys": ["curr", "mean"], "initial_value": [1.0, 2.0] } },
                "events": { "pattern_in": { "keys": 16, "aggregate": 4 } }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_feed_keeps_aggregated_events_in_order() {
        let config = config();
        let (sink, _source) = inproc_channel("inproc://synthetic");
        let mut producer =
            ProducerNode::from_config(&config, Box::new(UnconnectedDirectory), Box::new(sink)).unwrap();
        let mut source = SyntheticSource::new(&config, StdRng::seed_from_u64(7), 1.0);

        for step in 1..=3 {
            let now = step as f64 * 0.1;
            source.feed(&producer, now).unwrap();
            producer.step(now).await.unwrap();
        }
        assert_eq!(producer.stats().ticks, 3);
        assert_eq!(producer.stats().events_sent, 3 * 16);
    }

    #[test]
    fn test_walk_starts_from_initial_value() {
        let source = SyntheticSource::new(&config(), StdRng::seed_from_u64(1), 0.0);
        assert_eq!(source.walks["reward_in"], vec![1.0, 2.0]);
        assert_eq!(source.event_ports, vec![("pattern_in".to_string(), 16)]);
    }
}
