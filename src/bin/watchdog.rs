use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use watchdog_ping::{Watchdog, WatchdogConfigBuilder};

/// Standalone heartbeat watchdog for better-ping
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Local endpoint to accept heartbeat connections on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    /// Seconds without a reply after which the watchdog fires
    #[arg(long, default_value_t = 10)]
    timeout: u64,
    /// Name of the supervised target, used in the timeout report
    #[arg(long)]
    target: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = WatchdogConfigBuilder::new()
        .with_bind_addr(args.bind)
        .with_timeout(Duration::from_secs(args.timeout));
    if let Some(target) = &args.target {
        config = config.with_target_label(target);
    }

    let watchdog = match Watchdog::bind(config.build()).await {
        Ok(watchdog) => watchdog,
        Err(err) => {
            eprintln!("failed to start watchdog: {}", err);
            return ExitCode::FAILURE;
        }
    };
    match watchdog.serve().await {
        Ok(exit) => ExitCode::from(exit.exit_code()),
        Err(err) => {
            eprintln!("watchdog failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
