mod config;
mod dump;
mod feed;
mod lifecycle;
mod poll;
mod session;
mod signals;
mod stop;
mod worker;

use clap::Parser;
use config::{RunMode, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Follow a remote directory service: catch up once and exit, or stay
/// connected for live updates until a termination signal arrives.
#[derive(Parser, Debug)]
#[command(name = "syncfeed", version, about)]
struct Cli {
    /// Directory service connection URL (host, host:port, or syncfeed://host[:port])
    url: String,

    /// Local data-file path prefix; state persists at <prefix>.json
    prefix: PathBuf,

    /// Stay connected for live updates instead of a one-shot catch-up
    #[arg(short, long)]
    persist: bool,

    /// Trace verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress the end-of-refresh directory dump
    #[arg(long)]
    no_dump: bool,

    /// Upgrade the connection before authenticating
    #[arg(long)]
    upgrade: bool,

    /// Seconds to wait for graceful shutdown after a stop request before
    /// aborting the worker (0 waits indefinitely)
    #[arg(long, default_value_t = 30)]
    grace: u64,
}

fn build_config(cli: &Cli) -> Result<SyncConfig, config::ConfigError> {
    let (host, port) = config::parse_endpoint(&cli.url)?;
    Ok(SyncConfig {
        host,
        port,
        prefix: cli.prefix.clone(),
        mode: if cli.persist {
            RunMode::Persistent
        } else {
            RunMode::OneShot
        },
        suppress_dump: cli.no_dump,
        upgrade: cli.upgrade,
        shutdown_grace: match cli.grace {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    };
    tracing::debug!(?config, "resolved configuration");

    if let Err(e) = lifecycle::run(&config).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
