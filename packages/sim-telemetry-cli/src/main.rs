use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod output;

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let exit_code = match cli.command {
        cli::Command::Check(args) => commands::check::execute(args),
        cli::Command::Codecs(args) => commands::codecs::execute(args),
        cli::Command::Monitor(args) => commands::monitor::execute(args).await,
        cli::Command::Synthetic(args) => commands::synthetic::execute(args).await,
    };

    std::process::exit(exit_code);
}
