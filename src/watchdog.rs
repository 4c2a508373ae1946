use std::{net::SocketAddr, time::Duration};

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::{
    io::AsyncRead,
    net::{TcpListener, TcpSocket},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use crate::{
    config::WatchdogConfig,
    error::{Error, Result},
    heartbeat::{HeartbeatCodec, HeartbeatEvent},
};

/// Deadline bookkeeping of one heartbeat session.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct WatchdogSession {
    pub last_activity_at: Instant,
    pub deadline: Instant,
    timeout: Duration,
}

impl WatchdogSession {
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_activity_at: now,
            deadline: now + timeout,
            timeout,
        }
    }

    /// Pushes the deadline back. Only a received reply counts as activity.
    pub fn record_reply(&mut self) {
        self.last_activity_at = Instant::now();
        self.deadline = self.last_activity_at + self.timeout;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum SessionEnd {
    TimedOut,
    Stopped,
    ConnectionClosed,
}

/// Reason the watchdog service terminated.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum WatchdogExit {
    TimedOut,
    Stopped,
}

impl WatchdogExit {
    /// Exit status of the standalone watchdog. Both ways out of it are failures.
    pub fn exit_code(self) -> u8 {
        match self {
            WatchdogExit::TimedOut | WatchdogExit::Stopped => 1,
        }
    }
}

/// Supervises one heartbeat connection until it times out, stops or closes.
///
/// The read itself has no timeout; it is raced against the session deadline, which
/// moves only on [`HeartbeatEvent::ReplyReceived`].
pub async fn run_session<R>(stream: R, timeout: Duration) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    let mut session = WatchdogSession::new(timeout);
    resume_session(stream, &mut session).await
}

/// Like [`run_session`], but keeps counting down an existing session deadline.
pub async fn resume_session<R>(stream: R, session: &mut WatchdogSession) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stream, HeartbeatCodec);
    let sleep = time::sleep_until(session.deadline);
    tokio::pin!(sleep);

    loop {
        if session.is_expired(Instant::now()) {
            return SessionEnd::TimedOut;
        }
        let event = tokio::select! {
            biased;
            _ = &mut sleep => return SessionEnd::TimedOut,
            frame = frames.next() => match frame {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    warn!("error in watchdog socket receiving data: {}", err);
                    HeartbeatEvent::ConnectionError
                }
                None => return SessionEnd::ConnectionClosed,
            },
        };
        match event {
            HeartbeatEvent::ReplyReceived => {
                session.record_reply();
                sleep.as_mut().reset(session.deadline);
            }
            HeartbeatEvent::NoReply => debug!("prober alive, no reply this cycle"),
            HeartbeatEvent::Stopped => return SessionEnd::Stopped,
            HeartbeatEvent::ConnectionError => {
                // FramedRead is fused after an error. The codec never holds a partial tag.
                frames = FramedRead::new(frames.into_inner(), HeartbeatCodec);
            }
        }
    }
}

/// Dead-man's switch for a prober, accepting heartbeat connections one at a time.
#[derive(Debug)]
pub struct Watchdog {
    listener: TcpListener,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Binds the listening endpoint with `SO_REUSEADDR` and a backlog of one.
    pub async fn bind(config: WatchdogConfig) -> Result<Self> {
        let socket = match config.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.bind_addr)?;
        let listener = socket.listen(1)?;
        info!("watchdog listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs sessions until one of them times out or is stopped.
    ///
    /// The deadline starts on the first accepted connection. When a connection closes,
    /// it keeps running while the next connection is awaited, so a prober that dies
    /// still trips the watchdog.
    ///
    /// # Errors
    /// Returns an error if accepting a connection fails.
    pub async fn serve(self) -> Result<WatchdogExit> {
        let (mut stream, mut peer) = self.listener.accept().await?;
        let mut session = WatchdogSession::new(self.config.timeout);
        loop {
            info!("watchdog connected to {}", peer);
            match resume_session(stream, &mut session).await {
                SessionEnd::TimedOut => return Ok(self.timed_out()),
                SessionEnd::Stopped => {
                    info!("prober stopped, closing watchdog");
                    return Ok(WatchdogExit::Stopped);
                }
                SessionEnd::ConnectionClosed => {
                    info!("heartbeat connection from {} closed", peer);
                    tokio::select! {
                        biased;
                        _ = time::sleep_until(session.deadline) => return Ok(self.timed_out()),
                        accepted = self.listener.accept() => (stream, peer) = accepted?,
                    }
                }
            }
        }
    }

    fn timed_out(&self) -> WatchdogExit {
        if let Some(target) = &self.config.target_label {
            error!("server {} cannot be reached", target);
        }
        error!(
            "watchdog timeout ({:?} without a reply), closing sockets",
            self.config.timeout
        );
        WatchdogExit::TimedOut
    }

    /// Runs [`Watchdog::serve`] as a background task.
    pub fn spawn(self) -> WatchdogHandle {
        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        let handle = tokio::task::spawn(async move {
            let _guard = guard;
            self.serve().await
        });
        WatchdogHandle {
            done,
            handle: Some(handle),
        }
    }
}

/// Handle to a spawned watchdog. Dropping it aborts the task.
#[derive(Debug)]
pub struct WatchdogHandle {
    done: CancellationToken,
    handle: Option<JoinHandle<Result<WatchdogExit>>>,
}

impl WatchdogHandle {
    /// Token cancelled as soon as the watchdog task has ended, for whatever reason.
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.done.is_cancelled()
    }

    pub async fn join(mut self) -> Result<WatchdogExit> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|err| Error::Opaque(Box::new(err)))?,
            None => Err(Error::Opaque("watchdog task already joined".into())),
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::SinkExt;
    use tokio::io::{duplex, DuplexStream};
    use tokio_util::codec::FramedWrite;

    use super::*;
    use crate::constants::TAG_STOPPED;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn prober_end(io: DuplexStream) -> FramedWrite<DuplexStream, HeartbeatCodec> {
        FramedWrite::new(io, HeartbeatCodec)
    }

    /// Sends `events` at the given offsets from now, then keeps the connection open.
    fn spawn_prober(io: DuplexStream, events: Vec<(u64, HeartbeatEvent)>) {
        tokio::spawn(async move {
            let start = Instant::now();
            let mut sink = prober_end(io);
            for (at, event) in events {
                time::sleep_until(start + Duration::from_secs(at)).await;
                sink.send(event).await.unwrap();
            }
            time::sleep(Duration::from_secs(3600)).await;
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_times_out_at_deadline() {
        let (client, server) = duplex(64);
        let start = Instant::now();
        let end = run_session(server, TIMEOUT).await;
        assert_eq!(end, SessionEnd::TimedOut);
        assert_eq!(start.elapsed(), TIMEOUT);
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_ends_session_immediately() {
        let (client, server) = duplex(64);
        spawn_prober(client, vec![(3, HeartbeatEvent::Stopped)]);
        let start = Instant::now();
        assert_eq!(run_session(server, TIMEOUT).await, SessionEnd::Stopped);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_keep_session_alive() {
        let (client, server) = duplex(64);
        let events = (1..=8)
            .map(|cycle| (2 * cycle, HeartbeatEvent::ReplyReceived))
            .collect();
        spawn_prober(client, events);
        let start = Instant::now();
        assert_eq!(run_session(server, TIMEOUT).await, SessionEnd::TimedOut);
        // last reply at 16s
        assert_eq!(start.elapsed(), Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_does_not_reset_deadline() {
        let (client, server) = duplex(64);
        let events = (1..=8)
            .map(|cycle| (cycle, HeartbeatEvent::NoReply))
            .collect();
        spawn_prober(client, events);
        let start = Instant::now();
        assert_eq!(run_session(server, TIMEOUT).await, SessionEnd::TimedOut);
        assert_eq!(start.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_bytes_do_not_reset_deadline() {
        let (mut client, server) = duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            time::sleep(Duration::from_secs(5)).await;
            client.write_all(b"got_reply").await.unwrap();
            time::sleep(Duration::from_secs(3600)).await;
        });
        let start = Instant::now();
        assert_eq!(run_session(server, TIMEOUT).await, SessionEnd::TimedOut);
        assert_eq!(start.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_ends_session() {
        let (client, server) = duplex(64);
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(4)).await;
            drop(client);
        });
        let start = Instant::now();
        assert_eq!(
            run_session(server, TIMEOUT).await,
            SessionEnd::ConnectionClosed
        );
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_is_followed_by_another_read() {
        let stream = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .read(&[TAG_STOPPED])
            .build();
        let start = Instant::now();
        assert_eq!(run_session(stream, TIMEOUT).await, SessionEnd::Stopped);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_session_keeps_deadline() {
        let mut session = WatchdogSession::new(TIMEOUT);
        let start = Instant::now();

        let (client, server) = duplex(64);
        tokio::spawn(async move {
            let mut sink = prober_end(client);
            time::sleep(Duration::from_secs(4)).await;
            sink.send(HeartbeatEvent::ReplyReceived).await.unwrap();
            time::sleep(Duration::from_secs(2)).await;
        });
        assert_eq!(
            resume_session(server, &mut session).await,
            SessionEnd::ConnectionClosed
        );
        assert_eq!(start.elapsed(), Duration::from_secs(6));

        let (_client, server) = duplex(64);
        assert_eq!(
            resume_session(server, &mut session).await,
            SessionEnd::TimedOut
        );
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_deadline_bookkeeping() {
        let mut session = WatchdogSession::new(TIMEOUT);
        assert_eq!(session.deadline, session.last_activity_at + TIMEOUT);
        time::advance(Duration::from_secs(4)).await;
        assert!(!session.is_expired(Instant::now()));
        session.record_reply();
        time::advance(Duration::from_secs(9)).await;
        assert!(!session.is_expired(Instant::now()));
        time::advance(Duration::from_secs(1)).await;
        assert!(session.is_expired(Instant::now()));
    }

    #[test]
    fn test_exit_codes_are_failures() {
        assert_ne!(WatchdogExit::TimedOut.exit_code(), 0);
        assert_ne!(WatchdogExit::Stopped.exit_code(), 0);
    }
}
