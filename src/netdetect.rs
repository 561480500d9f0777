use crate::error::{ScanError, ScanResult};
use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Normalize user input into a three-octet sweep prefix.
///
/// Accepted forms: `192.168.1`, `192.168.1.0` and `192.168.1.0/24`.
pub fn parse_subnet_prefix(input: &str) -> ScanResult<String> {
    let invalid = || ScanError::InvalidSubnet(input.to_string());
    let mut s = input.trim();

    if let Some((addr, len)) = s.split_once('/') {
        if len.trim() != "24" {
            return Err(invalid());
        }
        s = addr.trim();
    }

    let parts: Vec<&str> = s.split('.').collect();
    let octets = match parts.as_slice() {
        [a, b, c] => [*a, *b, *c],
        [a, b, c, "0"] => [*a, *b, *c],
        _ => return Err(invalid()),
    };

    let mut out = Vec::with_capacity(3);
    for o in octets {
        if o.is_empty() || !o.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let n: u8 = o.parse().map_err(|_| invalid())?;
        out.push(n.to_string());
    }
    Ok(out.join("."))
}

/// Detect running non-loopback IPv4 interfaces and return their /24 prefixes, sorted.
pub fn detect_local_prefixes() -> Result<Vec<String>> {
    let mut set = BTreeSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    Ok(set.into_iter().map(|n| cidr_prefix(&n)).collect())
}

/// First local /24 prefix, if any interface is up.
pub fn suggest_subnet() -> Option<String> {
    detect_local_prefixes().ok()?.into_iter().next()
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}

fn cidr_prefix(net: &Ipv4Net) -> String {
    let o = net.network().octets();
    format!("{}.{}.{}", o[0], o[1], o[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cidr_from_ipv4() {
        let cidr = ipv4_to_default_cidr(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(cidr.to_string(), "10.1.2.0/24");
        assert_eq!(cidr_prefix(&cidr), "10.1.2");
    }

    #[test]
    fn accepts_prefix_forms() {
        assert_eq!(parse_subnet_prefix("192.168.1").unwrap(), "192.168.1");
        assert_eq!(parse_subnet_prefix(" 192.168.1.0 ").unwrap(), "192.168.1");
        assert_eq!(parse_subnet_prefix("10.0.0.0/24").unwrap(), "10.0.0");
    }

    #[test]
    fn rejects_malformed_subnets() {
        for bad in ["", "192.168", "192.168.1.5", "192.168.1.0/16", "a.b.c", "256.1.1", "1..2", "+1.2.3"] {
            assert!(parse_subnet_prefix(bad).is_err(), "{bad} should be rejected");
        }
    }
}
