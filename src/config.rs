use std::time::Duration;

/// Upper bound for a per-request probe timeout.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Turn a requested timeout in milliseconds into a probe timeout within `1ms..=MAX_PROBE_TIMEOUT`.
pub fn probe_timeout_ms(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1)).min(MAX_PROBE_TIMEOUT)
}

/// Tuning for the two-stage LAN sweep.
///
/// The caps bound simultaneously open sockets, not throughput.
#[derive(Debug, Clone)]
pub struct LanScanConfig {
    /// Hosts classified concurrently (discovery stage).
    pub host_concurrency: usize,
    /// Hosts service-scanned concurrently.
    pub service_concurrency: usize,
    pub discovery_timeout: Duration,
    pub service_timeout: Duration,
    pub banner_timeout: Duration,
    pub dns_timeout: Duration,
}

impl Default for LanScanConfig {
    fn default() -> Self {
        Self {
            host_concurrency: 8,
            service_concurrency: 4,
            discovery_timeout: Duration::from_millis(500),
            service_timeout: Duration::from_millis(500),
            banner_timeout: Duration::from_secs(2),
            dns_timeout: Duration::from_secs(2),
        }
    }
}

/// Tuning for the single-target port-range scanner.
#[derive(Debug, Clone)]
pub struct PortScanConfig {
    pub concurrency: usize,
    /// Pause between dispatching consecutive probes.
    pub dispatch_delay: Duration,
    pub timeout: Duration,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            dispatch_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_resource_caps() {
        let lan = LanScanConfig::default();
        assert_eq!(lan.host_concurrency, 8);
        assert_eq!(lan.service_concurrency, 4);
        assert_eq!(lan.discovery_timeout, Duration::from_millis(500));

        let ports = PortScanConfig::default();
        assert_eq!(ports.concurrency, 100);
        assert_eq!(ports.dispatch_delay, Duration::from_millis(5));
        assert_eq!(ports.timeout, Duration::from_secs(3));
    }

    #[test]
    fn requested_timeouts_are_clamped() {
        assert_eq!(probe_timeout_ms(250), Duration::from_millis(250));
        assert_eq!(probe_timeout_ms(0), Duration::from_millis(1));
        assert_eq!(probe_timeout_ms(u64::MAX), MAX_PROBE_TIMEOUT);
    }
}
