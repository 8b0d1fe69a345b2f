use crate::cli::MonitorArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use sim_telemetry::consumer::ConsumerStats;
use sim_telemetry::delta::DeltaReceiver;
use sim_telemetry::{ConsumerConfig, ConsumerLoop, EventKey};
use std::time::Duration;

#[derive(Serialize)]
struct MonitorOutput {
    consumer: ConsumerStats,
    restarts: u64,
    min_time: Option<f64>,
    max_time: Option<f64>,
    retained_samples: usize,
}

/// Print the newest value of every continuous channel and the event rate of
/// every event channel over the last `window` time units.
fn redraw(receiver: &DeltaReceiver, window: f64) {
    let (Some(min_time), Some(max_time)) = (receiver.min_time(), receiver.max_time()) else {
        println!("-- waiting for data --");
        return;
    };
    let lower = (max_time - window).max(min_time);
    let span = max_time - lower;

    println!("-- t = {:.3} ({} restarts) --", max_time, receiver.restart_count());
    let keys = receiver.continuous_keys();
    for (key, samples) in keys.iter().zip(receiver.get_cont_data(&keys, None)) {
        match samples.last() {
            Some(sample) => println!("  {:<24} {:>12.4}", key, sample.value),
            None => println!("  {:<24} {:>12}", key, "-"),
        }
    }

    let event_keys: Vec<EventKey> = receiver.event_keys().into_iter().cloned().collect();
    let rows = receiver.get_event_data(&event_keys, Some((lower, max_time)));
    for (key, times) in event_keys.iter().zip(rows) {
        if span > 0.0 {
            println!("  {:<24} {:>12.2}/t", key.to_string(), times.len() as f64 / span);
        } else {
            println!("  {:<24} {:>12}", key.to_string(), times.len());
        }
    }
}

pub async fn execute(args: MonitorArgs) -> i32 {
    if let Some(duration) = args.duration.filter(|d| !(d.is_finite() && *d >= 0.0)) {
        eprintln!("Error: --duration must be a non-negative number of seconds, got {}", duration);
        return exit_codes::INPUT_ERROR;
    }

    let config = match ConsumerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let mut consumer = match ConsumerLoop::from_config(&config).await {
        Ok(consumer) => consumer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let receiver = consumer.receiver();
    let window = config.display_window;
    consumer.add_task(
        "redraw",
        Box::new(move || redraw(&receiver.read(), window)),
        config.redraw_interval_ms,
    );

    let token = consumer.cancel_token();
    let duration = args.duration.map(Duration::from_secs_f64);
    tokio::spawn(async move {
        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(duration) => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        token.cancel();
    });

    let stats = match consumer.run().await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let receiver = consumer.receiver();
    let receiver = receiver.read();
    let result = MonitorOutput {
        consumer: stats,
        restarts: receiver.restart_count(),
        min_time: receiver.min_time(),
        max_time: receiver.max_time(),
        retained_samples: receiver.sample_count(),
    };

    println!(
        "Received {} deltas ({} filtered, {} failures, {} restarts)",
        result.consumer.messages, result.consumer.filtered, result.consumer.failures, result.restarts
    );
    if let Some(ref path) = args.stats_out {
        if let Err(code) = output::emit_json(&result, Some(path.as_str())) {
            return code;
        }
    }

    exit_codes::SUCCESS
}
