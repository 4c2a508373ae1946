use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use futures::StreamExt;
use log::info;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use watchdog_ping::{
    heartbeat, resolve_ipv4, Error, IcmpSocket, ProbeOutcome, Prober, ProberConfigBuilder,
    Result, Watchdog, WatchdogConfigBuilder, WatchdogExit, WatchdogHandle,
};

/// Ping a host once per cycle while a heartbeat watchdog guards the run
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Hostname or IPv4 address to probe
    target: String,
    /// Endpoint of the heartbeat watchdog
    #[arg(long, default_value = "127.0.0.1:3000")]
    watchdog_addr: SocketAddr,
    /// Seconds without a reply after which the watchdog ends the run
    #[arg(long, default_value_t = 10)]
    watchdog_timeout: u64,
    /// Report to an already running `watchdog` service instead of spawning one
    #[arg(long)]
    external_watchdog: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let target = resolve_ipv4(&args.target).await?;
    let watchdog_timeout = Duration::from_secs(args.watchdog_timeout);

    let watchdog = if args.external_watchdog {
        None
    } else {
        let config = WatchdogConfigBuilder::new()
            .with_bind_addr(args.watchdog_addr)
            .with_timeout(watchdog_timeout)
            .with_target_label(&args.target)
            .build();
        Some(Watchdog::bind(config).await?.spawn())
    };
    let heartbeat = heartbeat::connect(args.watchdog_addr).await?;
    info!("better-ping connected to watchdog at {}", args.watchdog_addr);

    let socket = IcmpSocket::new()?;

    let interrupt = CancellationToken::new();
    let interrupt_clone = interrupt.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        interrupt_clone.cancel();
    });

    let watchdog_done = watchdog
        .as_ref()
        .map(WatchdogHandle::done_token)
        .unwrap_or_else(CancellationToken::new);
    let prober = Prober::new(socket, target, ProberConfigBuilder::new().build(), heartbeat);

    println!("PING {}", target);
    let outcomes = prober.into_stream(watchdog_done, interrupt.clone());
    futures::pin_mut!(outcomes);
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            ProbeOutcome::Success {
                sequence,
                rtt,
                ttl,
                byte_count,
                source,
            } => println!(
                "{} bytes from {} icmp_seq={} ttl={} time={:.3} ms",
                byte_count,
                source,
                sequence,
                ttl,
                rtt.as_secs_f64() * 1000.0
            ),
            ProbeOutcome::Timeout => println!("Request timed out."),
            ProbeOutcome::Unreachable { source } => {
                println!("Destination {} is unreachable", source)
            }
            ProbeOutcome::Error { reason } => {
                eprintln!("Error sending/receiving data: {}", reason);
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    if interrupt.is_cancelled() {
        println!("Ping stopped by Ctrl-c");
    }

    match watchdog {
        Some(handle) => {
            let status = in_process_status(handle.join().await?, watchdog_timeout)?;
            Ok(ExitCode::from(status))
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

/// A stop reported to our own watchdog is the Ctrl-C path and exits cleanly.
fn in_process_status(exit: WatchdogExit, timeout: Duration) -> Result<u8> {
    match exit {
        WatchdogExit::TimedOut => Err(Error::WatchdogTimeout(timeout)),
        WatchdogExit::Stopped => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_run_exits_cleanly() {
        let timeout = Duration::from_secs(10);
        assert_eq!(in_process_status(WatchdogExit::Stopped, timeout).unwrap(), 0);
        assert!(matches!(
            in_process_status(WatchdogExit::TimedOut, timeout),
            Err(Error::WatchdogTimeout(t)) if t == timeout
        ));
    }
}
