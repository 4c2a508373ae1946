use std::{net::Ipv4Addr, time::Duration};

use futures::{stream, Sink, SinkExt, Stream};
use log::{debug, error, info};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProberConfig,
    error::Error,
    heartbeat::HeartbeatEvent,
    packet::{self, EchoRequest, IcmpMessage},
    socket::EchoTransport,
};

/// Result of a single probe cycle.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum ProbeOutcome {
    Success {
        sequence: u16,
        rtt: Duration,
        ttl: u8,
        byte_count: usize,
        source: Ipv4Addr,
    },
    Timeout,
    Unreachable {
        source: Ipv4Addr,
    },
    /// Socket-level failure. Ends the run.
    Error {
        reason: String,
    },
}

impl ProbeOutcome {
    fn fatal(err: Error) -> Self {
        ProbeOutcome::Error {
            reason: err.to_string(),
        }
    }

    /// Heartbeat reporting this outcome to the watchdog, if any.
    pub fn heartbeat(&self) -> Option<HeartbeatEvent> {
        match self {
            ProbeOutcome::Success { .. } | ProbeOutcome::Unreachable { .. } => {
                Some(HeartbeatEvent::ReplyReceived)
            }
            ProbeOutcome::Timeout => Some(HeartbeatEvent::NoReply),
            ProbeOutcome::Error { .. } => None,
        }
    }
}

/// Sends one echo request with `sequence` and waits for its reply.
///
/// The wait is bounded by a deadline computed once, right after sending. Packets that
/// do not answer this request (including undecodable ones) are skipped without
/// extending it.
pub async fn run_cycle<T: EchoTransport>(
    transport: &T,
    target: Ipv4Addr,
    sequence: u16,
    config: &ProberConfig,
) -> ProbeOutcome {
    let request = EchoRequest::new(config.identifier, sequence, &config.payload).encode();
    if let Err(err) = transport.send_to(&request, target).await {
        return ProbeOutcome::fatal(Error::TransientIo(err));
    }
    let sent_at = Instant::now();
    let deadline = sent_at + config.reply_timeout;

    let mut buf = vec![0; config.recv_buffer_len];
    loop {
        let len = match time::timeout_at(deadline, transport.recv(&mut buf)).await {
            Err(_elapsed) => return ProbeOutcome::Timeout,
            Ok(Err(err)) => return ProbeOutcome::fatal(Error::TransientIo(err)),
            Ok(Ok(len)) => len,
        };
        match packet::decode_at(&buf[..len], Instant::now().into_std()) {
            Ok(IcmpMessage::EchoReply(reply)) if reply.answers(config.identifier, sequence) => {
                return ProbeOutcome::Success {
                    sequence,
                    rtt: reply.received_at.duration_since(sent_at.into_std()),
                    ttl: reply.ttl,
                    byte_count: reply.byte_count,
                    source: reply.source,
                };
            }
            Ok(IcmpMessage::Unreachable(notice)) => {
                return ProbeOutcome::Unreachable {
                    source: notice.source,
                };
            }
            Ok(IcmpMessage::EchoReply(reply)) => debug!(
                "ignoring reply id={} seq={} while waiting for seq={}",
                reply.identifier, reply.sequence, sequence
            ),
            Err(err) => debug!("ignoring packet: {}", err),
        }
    }
}

/// Drives probe cycles against one target and reports each to the watchdog.
///
/// The prober exclusively owns its transport and its end of the heartbeat channel;
/// both are released on every exit path of the run.
#[derive(Debug)]
pub struct Prober<T, H> {
    transport: Option<T>,
    heartbeat: Option<H>,
    target: Ipv4Addr,
    config: ProberConfig,
    sequence: u16,
}

impl<T, H> Prober<T, H>
where
    T: EchoTransport,
    H: Sink<HeartbeatEvent, Error = Error> + Unpin,
{
    pub fn new(transport: T, target: Ipv4Addr, config: ProberConfig, heartbeat: H) -> Self {
        Self {
            transport: Some(transport),
            heartbeat: Some(heartbeat),
            target,
            config,
            sequence: 1,
        }
    }

    /// Turns the prober into an unending stream of outcomes, one per cycle.
    ///
    /// The stream ends when `watchdog_done` is cancelled (the supervisor is gone), when
    /// `interrupt` is cancelled (a `Stopped` heartbeat is sent first), or right after
    /// yielding a [`ProbeOutcome::Error`].
    pub fn into_stream(
        self,
        watchdog_done: CancellationToken,
        interrupt: CancellationToken,
    ) -> impl Stream<Item = ProbeOutcome> {
        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let run = ProbeRun {
            prober: self,
            ticker,
            watchdog_done,
            interrupt,
        };
        stream::unfold(run, |mut run| async move {
            let outcome = run.next_outcome().await?;
            Some((outcome, run))
        })
    }

    async fn emit(&mut self, event: HeartbeatEvent) -> Result<(), Error> {
        match self.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.send(event).await,
            None => Ok(()),
        }
    }

    async fn release(&mut self, farewell: Option<HeartbeatEvent>) {
        if let Some(event) = farewell {
            if let Err(err) = self.emit(event).await {
                error!("failed to send {:?} heartbeat, reason: {}", event, err);
            }
        }
        if let Some(mut heartbeat) = self.heartbeat.take() {
            if let Err(err) = heartbeat.close().await {
                debug!("failed to close heartbeat connection, reason: {}", err);
            }
        }
        if self.transport.take().is_some() {
            debug!("raw socket released");
        }
    }
}

enum Step {
    Cycle(ProbeOutcome),
    Interrupted,
    WatchdogGone,
}

struct ProbeRun<T, H> {
    prober: Prober<T, H>,
    ticker: Interval,
    watchdog_done: CancellationToken,
    interrupt: CancellationToken,
}

impl<T, H> ProbeRun<T, H>
where
    T: EchoTransport,
    H: Sink<HeartbeatEvent, Error = Error> + Unpin,
{
    async fn next_outcome(&mut self) -> Option<ProbeOutcome> {
        let Self {
            prober,
            ticker,
            watchdog_done,
            interrupt,
        } = self;
        let transport = prober.transport.as_ref()?;
        let (target, sequence) = (prober.target, prober.sequence);
        let config = &prober.config;

        let step = if watchdog_done.is_cancelled() {
            Step::WatchdogGone
        } else {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => Step::Interrupted,
                _ = watchdog_done.cancelled() => Step::WatchdogGone,
                outcome = async {
                    ticker.tick().await;
                    run_cycle(transport, target, sequence, config).await
                } => Step::Cycle(outcome),
            }
        };

        match step {
            Step::Interrupted => {
                info!("probing stopped by user");
                prober.release(Some(HeartbeatEvent::Stopped)).await;
                None
            }
            Step::WatchdogGone => {
                info!("watchdog is no longer alive, stopping");
                prober.release(None).await;
                None
            }
            Step::Cycle(outcome) => {
                let Some(event) = outcome.heartbeat() else {
                    error!("probe to {} failed: {:?}", target, outcome);
                    prober.release(None).await;
                    return Some(outcome);
                };
                if let Err(err) = prober.emit(event).await {
                    error!("failed to send {:?} heartbeat, reason: {}", event, err);
                    prober.release(None).await;
                    return Some(ProbeOutcome::fatal(err));
                }
                debug!("cycle seq={} reported as {:?}", sequence, event);
                prober.sequence = sequence.wrapping_add(1);
                Some(outcome)
            }
        }
    }
}
