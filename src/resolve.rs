use std::net::{IpAddr, Ipv4Addr};

use log::debug;

use crate::error::{Error, Result};

/// Resolves `host` (a name or a dotted-quad literal) to its first IPv4 address.
pub async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|_| Error::Resolution { host: host.into() })?;
    let addr = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::NoIpv4Address { host: host.into() })?;
    debug!("resolved {} to {}", host, addr);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_address() {
        assert_eq!(
            resolve_ipv4("192.0.2.7").await.unwrap(),
            Ipv4Addr::new(192, 0, 2, 7)
        );
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let err = resolve_ipv4("no-such-host.invalid").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution { .. } | Error::NoIpv4Address { .. }
        ));
    }
}
