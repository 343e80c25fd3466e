//! Connection-level plumbing: dial overrides, TLS policy and the plain-HTTP decision

pub mod dialer;
pub mod tls;

pub use dialer::{Dialer, Route};
pub use tls::{LoadedTlsPolicy, TlsPolicy};

/// Split `host:port`, accepting bracketed IPv6 hosts. Returns `None` when no port is present.
pub fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') {
        // bare IPv6 without brackets has no port
        return None;
    }
    Some((host, port))
}

/// Decide whether a registry is reached over plain HTTP.
///
/// An enforced flag always wins. Otherwise `localhost`, with or without a port,
/// defaults to plain HTTP and everything else follows the flag.
pub fn is_plain_http(registry: &str, plain_http: bool, enforced: bool) -> bool {
    if enforced {
        return plain_http;
    }
    let host = split_host_port(registry).map_or(registry, |(host, _)| host);
    if host == "localhost" {
        return true;
    }
    plain_http
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_http_policy() {
        assert!(is_plain_http("localhost", false, false));
        assert!(is_plain_http("localhost:5000", false, false));
        assert!(!is_plain_http("registry.example.com", false, false));
        assert!(is_plain_http("registry.example.com", true, true));
        assert!(!is_plain_http("localhost:5000", false, true));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost:5000"), Some(("localhost", "5000")));
        assert_eq!(split_host_port("[::1]:5000"), Some(("::1", "5000")));
        assert_eq!(split_host_port("localhost"), None);
        assert_eq!(split_host_port("::1"), None);
    }
}
