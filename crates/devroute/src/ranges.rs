//! Allow-list of private address ranges a contract may point at.
//!
//! Built once at startup and shared read-only; a destination outside every
//! range is refused before any connection is attempted.

use std::net::IpAddr;
use std::str::FromStr;

/// RFC 1918 IPv4 blocks and the IPv6 unique-local half in use (fd00::/8).
const PRIVATE_CIDRS: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fd00::/8"];

/// IPv4 loopback, for local runs and tests.
const LOOPBACK_CIDRS: &[&str] = &["127.0.0.0/8"];

/// A single CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRange {
    V4 { network: u32, mask: u32 },
    V6 { network: u128, mask: u128 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR {0:?}")]
pub struct InvalidCidr(pub String);

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, normalize(ip)) {
            (IpRange::V4 { network, mask }, IpAddr::V4(v4)) => u32::from(v4) & mask == *network,
            (IpRange::V6 { network, mask }, IpAddr::V6(v6)) => {
                u128::from(v6) & mask == *network
            }
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = InvalidCidr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCidr(s.to_string());
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let prefix: u32 = prefix.parse().map_err(|_| invalid())?;

        match addr.parse::<IpAddr>().map_err(|_| invalid())? {
            IpAddr::V4(v4) if prefix <= 32 => {
                let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
                Ok(IpRange::V4 {
                    network: u32::from(v4) & mask,
                    mask,
                })
            }
            IpAddr::V6(v6) if prefix <= 128 => {
                let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
                Ok(IpRange::V6 {
                    network: u128::from(v6) & mask,
                    mask,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are matched as IPv4.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// The set of ranges a backend address must fall in.
#[derive(Debug, Clone)]
pub struct PrivateRanges {
    ranges: Vec<IpRange>,
}

impl PrivateRanges {
    /// The fixed allow-list, with or without 127.0.0.0/8.
    pub fn new(allow_loopback: bool) -> Self {
        let loopback: &[&str] = if allow_loopback { LOOPBACK_CIDRS } else { &[] };
        let ranges = PRIVATE_CIDRS
            .iter()
            .chain(loopback)
            .filter_map(|cidr| cidr.parse::<IpRange>().ok())
            .collect();
        Self { ranges }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(ip))
    }

    /// Parse `host` as an IP literal and check it. Host names are refused.
    pub fn permits(&self, host: &str) -> bool {
        host.parse::<IpAddr>().is_ok_and(|ip| self.contains(ip))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ranges.len()
    }
}

impl Default for PrivateRanges {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_cidrs_all_parse() {
        assert_eq!(PrivateRanges::new(true).len(), 5);
        assert_eq!(PrivateRanges::new(false).len(), 4);
    }

    #[test]
    fn test_private_addresses_permitted() {
        let ranges = PrivateRanges::default();
        for host in [
            "10.0.0.1",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.10.20",
            "fd00::1",
            "fdff:ffff::1",
            "127.0.0.1",
            "127.10.0.3",
            "::ffff:192.168.1.1",
        ] {
            assert!(ranges.permits(host), "{host} should be permitted");
        }
    }

    #[test]
    fn test_public_and_edge_addresses_refused() {
        let ranges = PrivateRanges::default();
        for host in [
            "69.145.32.56",
            "8.8.8.8",
            "172.15.255.255",
            "172.32.0.0",
            "192.169.0.1",
            "11.0.0.1",
            "fc00::1",
            "fe80::1",
            "::1",
            "2001:4860:4860::8888",
            "::ffff:8.8.8.8",
            "0.0.0.0",
        ] {
            assert!(!ranges.permits(host), "{host} should be refused");
        }
    }

    #[test]
    fn test_host_names_refused() {
        let ranges = PrivateRanges::default();
        for host in ["localhost", "example.com", "", "fe80::1%eth0", "10.0.0.1.nip.io"] {
            assert!(!ranges.permits(host), "{host:?} should be refused");
        }
    }

    #[test]
    fn test_loopback_can_be_disabled() {
        let ranges = PrivateRanges::new(false);
        assert!(!ranges.permits("127.0.0.1"));
        assert!(ranges.permits("10.1.2.3"));
    }

    #[test]
    fn test_cidr_parsing() {
        assert_eq!(
            "192.168.1.77/16".parse::<IpRange>(),
            Ok(IpRange::V4 {
                network: 0xC0A8_0000,
                mask: 0xFFFF_0000,
            })
        );
        assert!("0.0.0.0/0".parse::<IpRange>().unwrap().contains("1.2.3.4".parse().unwrap()));
        assert!("10.0.0.0/33".parse::<IpRange>().is_err());
        assert!("10.0.0.0".parse::<IpRange>().is_err());
        assert!("fd00::/129".parse::<IpRange>().is_err());
        assert!("nope/8".parse::<IpRange>().is_err());
    }
}
