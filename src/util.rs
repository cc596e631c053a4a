// Host resolution helpers for the prober.

use std::net::IpAddr;
use anyhow::Result;

pub async fn resolve_host_to_ip(host: &str) -> Result<IpAddr> {
    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    // If parsing fails, resolve via DNS
    let mut addrs = tokio::net::lookup_host((host, 0)).await?;
    Ok(addrs
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve hostname: {}", host))?
        .ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn literal_addresses_skip_dns() {
        let v4 = resolve_host_to_ip("10.1.2.3").await.unwrap();
        assert_eq!(v4, IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));

        let v6 = resolve_host_to_ip("::1").await.unwrap();
        assert_eq!(v6, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn reserved_tld_does_not_resolve() {
        // A resolver that never answers is as good as a failure here.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            resolve_host_to_ip("not-a-real-host.invalid"),
        )
        .await;
        assert!(!matches!(result, Ok(Ok(_))));
    }
}
