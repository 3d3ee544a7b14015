//! URL and resolved-address validation.
//!
//! Grounded on `decision-gate-providers`'s HTTP evidence provider: resolve
//! the hostname once, check every candidate peer IP against
//! private/loopback/link-local/multicast/reserved ranges, and pin the
//! outbound connection to the exact IP that was checked so a second DNS
//! lookup performed later by the HTTP client can't rebind past the check.

use std::net::{IpAddr, SocketAddr};
use watchdog_core::{Error, Result};

/// A validated request target: the URL to send and the single IP the
/// connection must be pinned to.
pub struct ResolvedTarget {
    pub url: url::Url,
    pub host: String,
    pub pinned_addr: SocketAddr,
}

pub fn validate_scheme_and_shape(url: &url::Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
    if url.fragment().is_some() {
        return Err(Error::InvalidUrl("fragments are not allowed".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(Error::InvalidUrl("embedded credentials are not allowed".to_string()));
    }
    Ok(())
}

/// Resolves `url`'s host and validates every candidate address, returning
/// the first address that passes policy, pinned for the actual connection.
///
/// Resolution happens exactly once here; callers must reuse `pinned_addr`
/// for the connection itself rather than resolving again.
pub async fn resolve_and_validate(url: &url::Url) -> Result<ResolvedTarget> {
    validate_scheme_and_shape(url)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("url has no host".to_string()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::InvalidUrl("url has no resolvable port".to_string()))?;

    let host_for_lookup = host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host.as_str());

    let candidates: Vec<IpAddr> = if let Ok(ip) = host_for_lookup.parse::<IpAddr>() {
        vec![ip]
    } else {
        let lookup = format!("{host_for_lookup}:{port}");
        tokio::net::lookup_host(lookup)
            .await
            .map_err(|e| Error::DnsFailure(e.to_string()))?
            .map(|addr| addr.ip())
            .collect()
    };

    if candidates.is_empty() {
        return Err(Error::DnsFailure(format!("no addresses for {host}")));
    }

    for ip in &candidates {
        if is_blocked_address(ip) {
            return Err(Error::BlockedUrl(format!("{host} resolves to blocked address {ip}")));
        }
    }

    // All candidates passed policy; pin to the first one for the actual
    // connection (spec §4.A: "the same IP the validator saw must be the
    // one contacted").
    let pinned_addr = SocketAddr::new(candidates[0], port);
    Ok(ResolvedTarget { url: url.clone(), host, pinned_addr })
}

/// True for loopback, link-local, private-network, multicast, or reserved
/// ranges (IPv4 and IPv6), per spec §4.A point 1.
pub fn is_blocked_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT, 192.0.0.0/24 IETF protocol
                // assignments: reserved ranges not covered by std helpers.
                || (v4.octets()[0] == 100 && (64..=127).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_address(&IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || v6.is_unicast_link_local()
                // fc00::/7 unique local addresses.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn blocks_well_known_private_and_special_addresses() {
        let blocked = [
            "169.254.169.254", // cloud metadata endpoint
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.5",
            "192.168.1.1",
            "0.0.0.0",
            "224.0.0.1",
        ];
        for ip in blocked {
            let addr: Ipv4Addr = ip.parse().unwrap();
            assert!(is_blocked_address(&IpAddr::V4(addr)), "{ip} should be blocked");
        }
    }

    #[test]
    fn blocks_ipv6_loopback_and_unique_local() {
        assert!(is_blocked_address(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        let ula: Ipv6Addr = "fd00::1".parse().unwrap();
        assert!(is_blocked_address(&IpAddr::V6(ula)));
    }

    #[test]
    fn allows_public_addresses() {
        let addr: Ipv4Addr = "93.184.216.34".parse().unwrap(); // example.com-ish public IP
        assert!(!is_blocked_address(&IpAddr::V4(addr)));
    }

    #[tokio::test]
    async fn rejects_fragment_and_non_http_scheme() {
        let url = url::Url::parse("https://example.com/page#section").unwrap();
        assert!(validate_scheme_and_shape(&url).is_err());

        let url = url::Url::parse("ftp://example.com/file").unwrap();
        assert!(validate_scheme_and_shape(&url).is_err());
    }

    #[tokio::test]
    async fn rejects_direct_loopback_literal() {
        let url = url::Url::parse("http://127.0.0.1/secret").unwrap();
        let err = resolve_and_validate(&url).await.unwrap_err();
        assert!(matches!(err, Error::BlockedUrl(_)));
    }

    #[tokio::test]
    async fn rejects_ipv6_loopback_literal() {
        let url = url::Url::parse("http://[::1]/secret").unwrap();
        let err = resolve_and_validate(&url).await.unwrap_err();
        assert!(matches!(err, Error::BlockedUrl(_)));
    }
}
