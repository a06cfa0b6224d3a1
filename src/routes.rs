//! Static client → backend route table.
//!
//! Routes are loaded once at startup and never mutated afterwards. Sessions
//! only see the read-only `RouteTable` trait.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Read-only mapping from client identifier to backend address.
pub trait RouteTable {
    /// Backend address for `client_id`, if one is configured.
    fn lookup(&self, client_id: u32) -> Option<SocketAddr>;
}

/// A single configured route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub client_id: u32,
    pub backend: SocketAddr,
}

impl FromStr for RouteEntry {
    type Err = RouteError;

    /// Parse `"<client_id>=<ip>:<port>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('=')
            .ok_or_else(|| RouteError::Malformed(s.to_string()))?;
        let client_id = id
            .trim()
            .parse()
            .map_err(|_| RouteError::Malformed(s.to_string()))?;
        let backend = parse_backend(addr.trim())?;
        Ok(RouteEntry { client_id, backend })
    }
}

/// Parse a backend address. The host must be an IP literal.
pub fn parse_backend(addr: &str) -> Result<SocketAddr, RouteError> {
    addr.parse()
        .map_err(|_| RouteError::InvalidBackend(addr.to_string()))
}

/// Route table errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    Malformed(String),
    InvalidBackend(String),
    Duplicate(u32),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Malformed(s) => {
                write!(f, "malformed route '{}', expected <client_id>=<ip>:<port>", s)
            }
            RouteError::InvalidBackend(s) => write!(f, "invalid backend address '{}'", s),
            RouteError::Duplicate(id) => write!(f, "duplicate route for client {}", id),
        }
    }
}

impl std::error::Error for RouteError {}

/// Route table backed by a `HashMap`, built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteTable {
    routes: HashMap<u32, SocketAddr>,
}

impl StaticRouteTable {
    /// Build a table, rejecting duplicate client ids.
    pub fn from_entries(
        entries: impl IntoIterator<Item = RouteEntry>,
    ) -> Result<Self, RouteError> {
        let mut routes = HashMap::new();
        for entry in entries {
            if routes.insert(entry.client_id, entry.backend).is_some() {
                return Err(RouteError::Duplicate(entry.client_id));
            }
        }
        Ok(Self { routes })
    }

    /// Number of configured routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteTable for StaticRouteTable {
    fn lookup(&self, client_id: u32) -> Option<SocketAddr> {
        self.routes.get(&client_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        let entry: RouteEntry = "42=10.0.0.5:9000".parse().unwrap();
        assert_eq!(entry.client_id, 42);
        assert_eq!(entry.backend, "10.0.0.5:9000".parse().unwrap());
    }

    #[test]
    fn test_parse_entry_errors() {
        assert!(matches!(
            "42".parse::<RouteEntry>(),
            Err(RouteError::Malformed(_))
        ));
        assert!(matches!(
            "abc=10.0.0.5:9000".parse::<RouteEntry>(),
            Err(RouteError::Malformed(_))
        ));
        assert!(matches!(
            "42=backend.local:9000".parse::<RouteEntry>(),
            Err(RouteError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_lookup() {
        let table = StaticRouteTable::from_entries(vec![
            "42=10.0.0.5:9000".parse().unwrap(),
            "7=[::1]:9001".parse().unwrap(),
        ])
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(42), Some("10.0.0.5:9000".parse().unwrap()));
        assert_eq!(table.lookup(7), Some("[::1]:9001".parse().unwrap()));
        assert_eq!(table.lookup(999), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = StaticRouteTable::from_entries(vec![
            "1=127.0.0.1:1".parse().unwrap(),
            "1=127.0.0.1:2".parse().unwrap(),
        ]);
        assert_eq!(result.unwrap_err(), RouteError::Duplicate(1));
    }
}
