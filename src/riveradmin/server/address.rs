use std::fmt::{self, Debug, Display, Formatter};
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::riveradmin::{Error, Result};

/// Port assumed when an address is given without one.
pub const DEFAULT_PORT: u16 = 3306;

/// The network address (host:port) of a server instance.
/// This is the natural key used to match catalog records against live group members.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InstanceAddress {
    host: String,
    port: u16,
}

impl InstanceAddress {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self{
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Parse host, host:port, [ipv6]:port or a bare ipv6 literal.
    /// default_port is used if the port is omitted.
    pub fn parse(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_argument("empty instance address"));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(|| Error::invalid_argument(format!("unterminated '[' in {}", s)))?;
            let host = &rest[..end];
            let tail = &rest[end+1..];
            let port = if tail.is_empty() {
                default_port
            } else if let Some(p) = tail.strip_prefix(':') {
                parse_port(p, s)?
            } else {
                return Err(Error::invalid_argument(format!("unexpected characters after ']' in {}", s)));
            };
            host.parse::<Ipv6Addr>().map_err(|_| Error::invalid_argument(format!("invalid IPv6 address {}", host)))?;
            (host, port)
        } else if s.matches(':').count() > 1 {
            // A bare IPv6 literal can't carry a port without brackets
            s.parse::<Ipv6Addr>().map_err(|_| Error::invalid_argument(format!("invalid IPv6 address {}", s)))?;
            (s, default_port)
        } else if let Some((host, port)) = s.rsplit_once(':') {
            (host, parse_port(port, s)?)
        } else {
            (s, default_port)
        };

        if host.is_empty() {
            return Err(Error::invalid_argument(format!("missing host in {}", s)));
        }
        if !host.contains(':') && !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_') {
            return Err(Error::invalid_argument(format!("invalid host name {}", host)));
        }
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }
}

fn parse_port(p: &str, whole: &str) -> Result<u16> {
    match p.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::invalid_argument(format!("invalid port in {}", whole))),
        Ok(port) => Ok(port),
    }
}

impl FromStr for InstanceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, DEFAULT_PORT)
    }
}

impl Display for InstanceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Debug for InstanceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for InstanceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let a: InstanceAddress = "DB1.example.com:3310".parse().unwrap();
        assert_eq!(a.host(), "db1.example.com");
        assert_eq!(a.port(), 3310);
        assert_eq!(a.to_string(), "db1.example.com:3310");

        let b = InstanceAddress::parse("db2", 33060).unwrap();
        assert_eq!(b.port(), 33060);

        let c: InstanceAddress = "[::1]:3307".parse().unwrap();
        assert_eq!(c.host(), "::1");
        assert_eq!(c.port(), 3307);
        assert_eq!(c.to_string(), "[::1]:3307");

        let d: InstanceAddress = "fe80::1".parse().unwrap();
        assert!(d.is_ipv6());
        assert_eq!(d.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_errors() {
        for bad in &["", ":3306", "db1:0", "db1:notaport", "[::1", "[nothex]:1", "db 1:3306", "[::1]x"] {
            assert!(bad.parse::<InstanceAddress>().is_err(), "expected {:?} to be rejected", bad);
        }
    }

    #[test]
    fn test_same_instance_matches() {
        let a: InstanceAddress = "Host-A:3306".parse().unwrap();
        let b: InstanceAddress = "host-a".parse().unwrap();
        assert_eq!(a, b);
    }
}
