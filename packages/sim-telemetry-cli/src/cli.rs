use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "simtel",
    version,
    about = "Simulation telemetry publishing and monitoring tool",
    long_about = "Publish per-tick telemetry deltas of a simulation over ZeroMQ and monitor them.\n\
                  Producers and consumers are configured through JSON files."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a producer or consumer configuration file
    Check(CheckArgs),
    /// List the available wire codecs
    Codecs(CodecsArgs),
    /// Subscribe to producers and print a live summary of the received channels
    Monitor(MonitorArgs),
    /// Publish synthetic telemetry for every configured port
    Synthetic(SyntheticArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("config").required(true).args(["producer", "consumer"])))]
pub struct CheckArgs {
    /// Producer configuration file
    #[arg(long)]
    pub producer: Option<String>,

    /// Consumer configuration file
    #[arg(long)]
    pub consumer: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct CodecsArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct MonitorArgs {
    /// Consumer configuration file
    #[arg(long, env = "SIMTEL_CONSUMER_CONFIG")]
    pub config: String,

    /// Stop after this many seconds (default: run until interrupted)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Write final statistics as JSON to this file
    #[arg(long)]
    pub stats_out: Option<String>,
}

#[derive(Args)]
pub struct SyntheticArgs {
    /// Producer configuration file
    #[arg(long, env = "SIMTEL_PRODUCER_CONFIG")]
    pub config: String,

    /// Number of ticks to publish (default: until total_time or interrupted)
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Seed for the random generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Probability of an event per index and tick
    #[arg(long, default_value_t = 0.05)]
    pub event_probability: f64,

    /// Publish as fast as possible instead of one tick per timestep of wall time
    #[arg(long, default_value_t = false)]
    pub no_pacing: bool,

    /// Write final statistics as JSON to this file
    #[arg(long)]
    pub stats_out: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_requires_exactly_one_config() {
        assert!(Cli::try_parse_from(["simtel", "check"]).is_err());
        assert!(Cli::try_parse_from([
            "simtel", "check", "--producer", "p.json", "--consumer", "c.json"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["simtel", "check", "--consumer", "c.json"]).is_ok());
    }

    #[test]
    fn test_synthetic_defaults() {
        let cli = Cli::try_parse_from(["simtel", "-vv", "synthetic", "--config", "p.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Synthetic(args) => {
                assert_eq!(args.event_probability, 0.05);
                assert!(!args.no_pacing);
                assert!(args.ticks.is_none());
            }
            _ => panic!("expected synthetic subcommand"),
        }
    }
}
