//! ICMP echo prober supervised by a heartbeat watchdog.
//!
//! The [`prober::Prober`] sends one echo request per cycle and reports every cycle to a
//! [`watchdog::Watchdog`] over a TCP heartbeat channel. The watchdog acts as a dead-man's
//! switch: when no reply has been reported for its whole timeout window it terminates,
//! which in turn ends the probe run.
//!
//! ## Example
//! ```no_run
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//! use watchdog_ping::{
//!     heartbeat, IcmpSocket, Prober, ProberConfigBuilder, Watchdog, WatchdogConfigBuilder,
//! };
//!
//! tokio_test::block_on(async {
//!     let watchdog = Watchdog::bind(WatchdogConfigBuilder::new().build()).await.unwrap();
//!     let addr = watchdog.local_addr().unwrap();
//!     let handle = watchdog.spawn();
//!
//!     let prober = Prober::new(
//!         IcmpSocket::new().unwrap(),
//!         "192.0.2.1".parse().unwrap(),
//!         ProberConfigBuilder::new().build(),
//!         heartbeat::connect(addr).await.unwrap(),
//!     );
//!     let outcomes = prober.into_stream(handle.done_token(), CancellationToken::new());
//!     futures::pin_mut!(outcomes);
//!     while let Some(outcome) = outcomes.next().await {
//!         println!("{:?}", outcome);
//!     }
//! })
//! ```

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod packet;
pub mod prober;
pub mod resolve;
pub mod socket;
pub mod watchdog;

pub(crate) mod constants;

pub use config::{ProberConfig, ProberConfigBuilder, WatchdogConfig, WatchdogConfigBuilder};
pub use error::{DecodeError, Error, Result};
pub use heartbeat::{HeartbeatCodec, HeartbeatEvent, HeartbeatSender};
pub use prober::{run_cycle, ProbeOutcome, Prober};
pub use resolve::resolve_ipv4;
pub use socket::{EchoTransport, IcmpSocket};
pub use watchdog::{
    resume_session, run_session, SessionEnd, Watchdog, WatchdogExit, WatchdogHandle,
    WatchdogSession,
};
