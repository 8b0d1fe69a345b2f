use crate::cli::CheckArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use sim_telemetry::{ConsumerConfig, ProducerConfig, StreamResult};

#[derive(Serialize)]
struct PortSummary {
    name: String,
    kind: &'static str,
    width: usize,
    /// Buffers after index aggregation
    buffers: usize,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ConfigSummary {
    Producer {
        endpoint: String,
        format: String,
        timestep: f64,
        total_time: Option<f64>,
        channels: usize,
        ports: Vec<PortSummary>,
    },
    Consumer {
        subscriptions: Vec<String>,
        display_window: f64,
        redraw_interval_ms: u64,
        truncate_interval_ms: u64,
    },
}

#[derive(Serialize)]
struct CheckOutput {
    file: String,
    valid: bool,
    #[serde(flatten)]
    summary: Option<ConfigSummary>,
    error: Option<String>,
}

fn producer_summary(config: &ProducerConfig) -> ConfigSummary {
    let continuous = config.continuous.iter().map(|(name, port)| PortSummary {
        name: name.clone(),
        kind: "continuous",
        width: port.keys.len(),
        buffers: port.keys.len(),
    });
    let events = config.events.iter().map(|(name, port)| PortSummary {
        name: name.clone(),
        kind: "event",
        width: port.keys,
        buffers: port.keys.div_ceil(port.aggregate.unwrap_or(1)),
    });
    ConfigSummary::Producer {
        endpoint: config.communication.endpoint().to_string(),
        format: config.communication.format.clone(),
        timestep: config.timestep,
        total_time: config.total_time,
        channels: config.channel_count(),
        ports: continuous.chain(events).collect(),
    }
}

fn consumer_summary(config: &ConsumerConfig) -> ConfigSummary {
    ConfigSummary::Consumer {
        subscriptions: config
            .subscriptions
            .iter()
            .map(|s| format!("{} ({})", s.endpoint(), s.format))
            .collect(),
        display_window: config.display_window,
        redraw_interval_ms: config.redraw_interval_ms,
        truncate_interval_ms: config.truncate_interval_ms,
    }
}

fn print_summary(file: &str, summary: &ConfigSummary) {
    println!("Configuration '{}' is valid", file);
    match summary {
        ConfigSummary::Producer {
            endpoint,
            format,
            timestep,
            total_time,
            channels,
            ports,
        } => {
            println!("Publishing on {} ({}), timestep {}", endpoint, format, timestep);
            match total_time {
                Some(total) => println!("Runtime: {} (simulation time)", total),
                None => println!("Runtime: unbounded"),
            }
            println!("{} channels on {} ports:", channels, ports.len());
            for port in ports {
                println!(
                    "  {:<24} {:<10} width {:>4}, {:>4} buffers",
                    port.name, port.kind, port.width, port.buffers
                );
            }
        }
        ConfigSummary::Consumer {
            subscriptions,
            display_window,
            redraw_interval_ms,
            truncate_interval_ms,
        } => {
            println!("Subscriptions:");
            for subscription in subscriptions {
                println!("  {}", subscription);
            }
            println!(
                "Display window {}, redraw every {} ms, truncate every {} ms",
                display_window, redraw_interval_ms, truncate_interval_ms
            );
        }
    }
}

pub fn execute(args: CheckArgs) -> i32 {
    let (file, loaded): (String, StreamResult<ConfigSummary>) =
        match (&args.producer, &args.consumer) {
            (Some(path), _) => (
                path.clone(),
                ProducerConfig::load(path).map(|config| producer_summary(&config)),
            ),
            (None, Some(path)) => (
                path.clone(),
                ConsumerConfig::load(path).map(|config| consumer_summary(&config)),
            ),
            (None, None) => {
                eprintln!("Error: either --producer or --consumer is required");
                return exit_codes::INPUT_ERROR;
            }
        };

    let (summary, error, code) = match loaded {
        Ok(summary) => (Some(summary), None, exit_codes::SUCCESS),
        Err(e) => (None, Some(e.to_string()), exit_codes::for_error(&e)),
    };

    if args.json {
        let result = CheckOutput {
            file,
            valid: error.is_none(),
            summary,
            error,
        };
        if let Err(code) = output::emit_json(&result, None) {
            return code;
        }
    } else if let Some(ref err) = error {
        eprintln!("Error: {}", err);
    } else if let Some(ref summary) = summary {
        print_summary(&file, summary);
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_summary_counts_aggregated_buffers() {
        let config: ProducerConfig = serde_json::from_str(
            r#"{
                "timestep": 0.015,
                "continuous": { "reward_in": { "keys": ["curr", "mean"] } },
                "events": { "pattern_in": { "keys": 50, "aggregate": 8 } }
            }"#,
        )
        .unwrap();

        match producer_summary(&config) {
            ConfigSummary::Producer { channels, ports, .. } => {
                assert_eq!(channels, 3);
                assert_eq!(ports[1].buffers, 7);
                assert_eq!(ports[0].kind, "continuous");
            }
            ConfigSummary::Consumer { .. } => panic!("expected producer summary"),
        }
    }
}
