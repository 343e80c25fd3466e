//! Dial-time address substitution
//!
//! A [`Dialer`] maps a requested `host:port` to a literal socket address. It is
//! built once from `--resolve` style entries and only read afterwards, so it is
//! shared across workers without locking.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, TargetError};

const RESOLVE_GRAMMAR: &str = "host:port:address[:address_port]";

/// Where a connection for a given host and port should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No override; the base dialer resolves the host itself
    Direct,
    /// Connect to this literal address instead
    Override(SocketAddr),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialer {
    table: HashMap<(String, u16), SocketAddr>,
}

impl Dialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse entries in order. A later entry for the same `host:port` replaces
    /// an earlier one.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut dialer = Dialer::new();
        for entry in entries {
            let entry = entry.as_ref();
            let parts: Vec<&str> = entry.splitn(4, ':').collect();
            if parts.len() < 3 {
                return Err(TargetError::format(entry, RESOLVE_GRAMMAR));
            }

            let host = parts[0];
            let host_port: u16 = parts[1]
                .parse()
                .map_err(|_| TargetError::format(entry, "a numeric host port"))?;
            let address = parse_ip(parts[2])
                .ok_or_else(|| TargetError::format(entry, "a literal IP address"))?;
            let address_port = match parts.get(3) {
                Some(port) => port
                    .parse()
                    .map_err(|_| TargetError::format(entry, "a numeric address port"))?,
                None => host_port,
            };

            dialer.add(host, host_port, address, address_port);
        }
        Ok(dialer)
    }

    pub fn add(&mut self, host: &str, port: u16, address: IpAddr, address_port: u16) {
        self.table.insert(
            (host.to_ascii_lowercase(), port),
            SocketAddr::new(address, address_port),
        );
    }

    /// Decide where a dial for `host:port` should connect
    pub fn route(&self, host: &str, port: u16) -> Route {
        match self.table.get(&(host.to_ascii_lowercase(), port)) {
            Some(addr) => Route::Override(*addr),
            None => Route::Direct,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// All overrides as `((host, port), address)` pairs
    pub fn entries(&self) -> impl Iterator<Item = (&str, u16, SocketAddr)> {
        self.table
            .iter()
            .map(|((host, port), addr)| (host.as_str(), *port, *addr))
    }
}

// IPv6 zones are accepted and dropped
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let without_zone = raw.split_once('%').map_or(raw, |(addr, _)| addr);
    without_zone.parse().ok()
}
