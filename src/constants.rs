use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

pub(crate) const IPV4_HEADER_LEN: usize = 20;
pub(crate) const ICMP_HEADER_LEN: usize = 8;
pub(crate) const MIN_PACKET_LEN: usize = IPV4_HEADER_LEN + ICMP_HEADER_LEN;

pub(crate) const ICMP_ECHO_REPLY: u8 = 0;
pub(crate) const ICMP_DEST_UNREACHABLE: u8 = 3;
pub(crate) const ICMP_ECHO_REQUEST: u8 = 8;

pub(crate) const DEFAULT_PAYLOAD: &[u8] = b"Data";
pub(crate) const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);
pub(crate) const DEFAULT_RECV_BUFFER_LEN: usize = 1024;

pub(crate) const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_WATCHDOG_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000));

// heartbeat wire tags, one byte per event
pub(crate) const TAG_REPLY_RECEIVED: u8 = 0x01;
pub(crate) const TAG_NO_REPLY: u8 = 0x02;
pub(crate) const TAG_STOPPED: u8 = 0x03;
