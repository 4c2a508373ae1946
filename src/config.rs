use std::{net::SocketAddr, time::Duration};

use crate::constants::{
    DEFAULT_PAYLOAD, DEFAULT_PROBE_INTERVAL, DEFAULT_RECV_BUFFER_LEN, DEFAULT_REPLY_TIMEOUT,
    DEFAULT_WATCHDOG_ADDR, DEFAULT_WATCHDOG_TIMEOUT,
};

/// Settings of a single prober run.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Upper bound on the wait for a matching reply within one cycle.
    pub reply_timeout: Duration,
    /// Time between the starts of two consecutive cycles.
    pub interval: Duration,
    /// ICMP identifier stamped on every request of the run.
    pub identifier: u16,
    pub payload: Vec<u8>,
    pub recv_buffer_len: usize,
}

#[derive(Debug, Clone)]
pub struct ProberConfigBuilder {
    reply_timeout: Duration,
    interval: Duration,
    identifier: u16,
    payload: Vec<u8>,
    recv_buffer_len: usize,
}

impl Default for ProberConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProberConfigBuilder {
    pub fn new() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            interval: DEFAULT_PROBE_INTERVAL,
            // truncation is fine, the identifier only has to be stable for the run
            identifier: std::process::id() as u16,
            payload: DEFAULT_PAYLOAD.to_vec(),
            recv_buffer_len: DEFAULT_RECV_BUFFER_LEN,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn with_recv_buffer_len(mut self, len: usize) -> Self {
        self.recv_buffer_len = len;
        self
    }

    pub fn build(self) -> ProberConfig {
        ProberConfig {
            reply_timeout: self.reply_timeout,
            interval: self.interval,
            identifier: self.identifier,
            payload: self.payload,
            recv_buffer_len: self.recv_buffer_len,
        }
    }
}

/// Settings of the watchdog service.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub bind_addr: SocketAddr,
    /// Window without a `ReplyReceived` heartbeat after which the watchdog fires.
    pub timeout: Duration,
    /// Name of the supervised target, used in the timeout report.
    pub target_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfigBuilder {
    bind_addr: SocketAddr,
    timeout: Duration,
    target_label: Option<String>,
}

impl Default for WatchdogConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogConfigBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_WATCHDOG_ADDR,
            timeout: DEFAULT_WATCHDOG_TIMEOUT,
            target_label: None,
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_target_label(mut self, label: &str) -> Self {
        self.target_label = Some(label.into());
        self
    }

    pub fn build(self) -> WatchdogConfig {
        WatchdogConfig {
            bind_addr: self.bind_addr,
            timeout: self.timeout,
            target_label: self.target_label,
        }
    }
}
