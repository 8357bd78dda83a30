use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rpmrepo::cli::{self, Commands};
use rpmrepo::config::Config;

#[derive(Parser)]
#[command(name = "rpmrepo")]
#[command(author, version, about = "Maintain signed RPM repositories with delta packages", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "RPMREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    cli::execute(cli.command, &config)
}
