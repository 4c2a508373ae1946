use std::{
    future::Future,
    io::{self, Read},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::{Error, Result};

/// Datagram transport used by the prober to exchange ICMP messages.
///
/// `recv` hands back whole IPv4 datagrams (header included), the way a raw socket does.
pub trait EchoTransport {
    fn send_to(
        &self,
        packet: &[u8],
        target: Ipv4Addr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Raw IPv4 ICMP socket driven by the tokio reactor.
///
/// Creating it usually requires elevated privileges (`CAP_NET_RAW` on Linux).
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
}

impl IcmpSocket {
    /// # Errors
    /// Returns [`Error::SocketCreation`] if the socket cannot be opened, most commonly
    /// because of insufficient privileges. Must be called within a tokio runtime.
    pub fn new() -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(Error::SocketCreation)?;
        socket.set_nonblocking(true).map_err(Error::SocketCreation)?;
        let inner = AsyncFd::new(socket).map_err(Error::SocketCreation)?;
        Ok(Self { inner })
    }
}

impl EchoTransport for IcmpSocket {
    async fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        // the port is ignored for raw sockets
        let addr = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(target, 0)));
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(packet, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
