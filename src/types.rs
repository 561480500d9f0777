use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

/// Transport used by a probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// One host record produced by a LAN sweep.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScannedHost {
    pub address: Ipv4Addr,
    pub is_online: bool,
    pub open_ports: BTreeSet<u16>,
    pub ping_time_ms: Option<f64>,
    pub hostname: Option<String>,
    pub web_banner: Option<String>,
}

impl ScannedHost {
    pub fn online(address: Ipv4Addr, ping_time_ms: f64) -> Self {
        Self {
            address,
            is_online: true,
            open_ports: BTreeSet::new(),
            ping_time_ms: Some(ping_time_ms.max(0.0)),
            hostname: None,
            web_banner: None,
        }
    }

    pub fn offline(address: Ipv4Addr) -> Self {
        Self {
            address,
            is_online: false,
            open_ports: BTreeSet::new(),
            ping_time_ms: None,
            hostname: None,
            web_banner: None,
        }
    }
}

/// Published state of the LAN sweep.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LanSnapshot {
    pub session: u64,
    pub subnet: Option<String>,
    pub is_scanning: bool,
    pub progress: f64,
    /// Sorted by numeric address.
    pub hosts: Vec<ScannedHost>,
}

impl LanSnapshot {
    pub fn host(&self, address: Ipv4Addr) -> Option<&ScannedHost> {
        self.hosts
            .binary_search_by_key(&address, |h| h.address)
            .ok()
            .map(|i| &self.hosts[i])
    }

    pub fn online_hosts(&self) -> impl Iterator<Item = &ScannedHost> {
        self.hosts.iter().filter(|h| h.is_online)
    }
}

/// Published state of a port-range job.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PortScanSnapshot {
    pub job: u64,
    pub target: Option<String>,
    pub start_port: u16,
    pub end_port: u16,
    pub protocol: Protocol,
    /// Effective in-flight limit for this job.
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub is_scanning: bool,
    pub progress: f64,
    pub scanned: u64,
    pub total: u64,
    pub open_ports: BTreeSet<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
    Debug,
}

/// Machine-readable payload attached to some log events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    HostOnline {
        address: Ipv4Addr,
    },
    OpenPort {
        target: String,
        port: u16,
        protocol: Protocol,
        service: String,
    },
    ScanCompleted,
}

/// One entry of the structured event stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub message: String,
    pub severity: Severity,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<EventDetail>,
}
