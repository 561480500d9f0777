use anyhow::{bail, Context, Result};

/// Ports tried when deciding whether a host is alive. Any answer marks it online.
pub const DISCOVERY_PORTS: &[u16] = &[80, 443, 22, 53, 445, 139];

/// Curated per-host service list probed after discovery.
/// FTP, SSH, Telnet, HTTP, HTTPS, RDP, VNC, HTTP-alt, Winbox.
pub const SERVICE_PORTS: &[u16] = &[21, 22, 23, 80, 443, 3389, 5900, 8080, 8291];

/// Open ports that trigger a `HEAD /` banner probe.
pub const BANNER_PORTS: &[u16] = &[80, 443, 8080];

const SERVICE_NAMES: &[(u16, &str)] = &[
    (20, "FTP Data"),
    (21, "FTP Control"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (67, "DHCP Server"),
    (68, "DHCP Client"),
    (69, "TFTP"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (465, "SMTPS"),
    (587, "SMTP Submission"),
    (636, "LDAPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1194, "OpenVPN"),
    (1433, "SQL Server"),
    (1723, "PPTP"),
    (1883, "MQTT"),
    (3000, "React/Node"),
    (3001, "React/Node Alt"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (4000, "Elixir/Phoenix"),
    (5000, "Flask/ASP"),
    (5222, "XMPP"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8000, "Django/Common"),
    (8080, "HTTP Alt"),
    (8291, "Winbox"),
    (8443, "HTTPS Alt"),
    (9200, "Elasticsearch"),
    (11211, "Memcached"),
    (25565, "Minecraft"),
    (27017, "MongoDB"),
    (32400, "Plex"),
];

/// Well-known service name for a port, or `""` when the port is not in the table.
pub fn service_name(port: u16) -> &'static str {
    SERVICE_NAMES
        .binary_search_by_key(&port, |&(p, _)| p)
        .map(|i| SERVICE_NAMES[i].1)
        .unwrap_or("")
}

/// Parse `"80"` or `"1-1024"` into an inclusive `(start, end)` pair.
pub fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let start = parse_port_str(a.trim()).with_context(|| format!("invalid start in range: {a}"))?;
        let end = parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        return Ok((start, end));
    }
    let p = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
    Ok((p, p))
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_table_is_sorted() {
        assert!(SERVICE_NAMES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn known_and_unknown_services() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(8291), "Winbox");
        assert_eq!(service_name(7), "");
    }

    #[test]
    fn parse_single_and_range() {
        assert_eq!(parse_port_range("80").unwrap(), (80, 80));
        assert_eq!(parse_port_range(" 1 - 1024 ").unwrap(), (1, 1024));
    }

    #[test]
    fn reversed_or_out_of_range_rejected() {
        assert!(parse_port_range("10-1").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("70000").is_err());
        assert!(parse_port_range("http").is_err());
    }

    #[test]
    fn banner_ports_are_service_ports() {
        assert!(BANNER_PORTS.iter().all(|p| SERVICE_PORTS.contains(p)));
    }
}
