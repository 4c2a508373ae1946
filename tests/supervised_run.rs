//! A prober against an in-memory host, supervised by a real watchdog over loopback TCP.

use std::{io, net::Ipv4Addr, time::Duration};

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use watchdog_ping::{
    heartbeat, packet, EchoTransport, ProbeOutcome, Prober, ProberConfigBuilder, Watchdog,
    WatchdogConfigBuilder, WatchdogExit,
};

const TARGET: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Answers every echo request instantly, unless muted.
struct LoopbackHost {
    answer: bool,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl LoopbackHost {
    fn new(answer: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            answer,
            tx,
            rx: Mutex::new(rx),
        }
    }
}

fn echo_reply(request: &[u8], source: Ipv4Addr) -> Vec<u8> {
    let mut icmp = request.to_vec();
    icmp[0] = 0;
    icmp[2..4].copy_from_slice(&[0, 0]);
    let sum = packet::checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());

    let mut datagram = vec![0; 20];
    datagram[0] = 0x45;
    datagram[2..4].copy_from_slice(&((20 + icmp.len()) as u16).to_be_bytes());
    datagram[8] = 64;
    datagram[9] = 1;
    datagram[12..16].copy_from_slice(&source.octets());
    datagram[16..20].copy_from_slice(&Ipv4Addr::LOCALHOST.octets());
    datagram.extend_from_slice(&icmp);
    datagram
}

impl EchoTransport for LoopbackHost {
    async fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        if self.answer {
            let _ = self.tx.send(echo_reply(packet, target));
        }
        Ok(packet.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let packet = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }
}

async fn supervised(
    host: LoopbackHost,
    watchdog_timeout: Duration,
) -> (
    impl futures::Stream<Item = ProbeOutcome>,
    watchdog_ping::WatchdogHandle,
    CancellationToken,
) {
    let config = WatchdogConfigBuilder::new()
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_timeout(watchdog_timeout)
        .build();
    let watchdog = Watchdog::bind(config).await.unwrap();
    let addr = watchdog.local_addr().unwrap();
    let handle = watchdog.spawn();

    let prober = Prober::new(
        host,
        TARGET,
        ProberConfigBuilder::new()
            .with_reply_timeout(Duration::from_millis(50))
            .with_interval(Duration::from_millis(100))
            .build(),
        heartbeat::connect(addr).await.unwrap(),
    );
    let interrupt = CancellationToken::new();
    let outcomes = prober.into_stream(handle.done_token(), interrupt.clone());
    (outcomes, handle, interrupt)
}

#[tokio::test]
async fn test_replying_host_outlives_watchdog_timeout() {
    const CYCLES: usize = 10;
    // ten cycles, 100ms apart, span well beyond the 400ms window
    let (outcomes, handle, interrupt) =
        supervised(LoopbackHost::new(true), Duration::from_millis(400)).await;
    futures::pin_mut!(outcomes);

    for expected in 1..=CYCLES as u16 {
        match outcomes.next().await {
            Some(ProbeOutcome::Success {
                sequence, source, ..
            }) => {
                assert_eq!(sequence, expected);
                assert_eq!(source, TARGET);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!(handle.is_alive());

    interrupt.cancel();
    assert_eq!(outcomes.next().await, None);
    let exit = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, WatchdogExit::Stopped);
}

#[tokio::test]
async fn test_silent_host_is_ended_by_watchdog() {
    let (outcomes, handle, _interrupt) =
        supervised(LoopbackHost::new(false), Duration::from_millis(400)).await;

    let outcomes = tokio::time::timeout(Duration::from_secs(5), outcomes.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(!outcomes.is_empty());
    assert!(outcomes.iter().all(|outcome| *outcome == ProbeOutcome::Timeout));
    assert_eq!(handle.join().await.unwrap(), WatchdogExit::TimedOut);
}
