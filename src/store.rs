//! Single point of mutation for LAN sweep state.
//!
//! All writers go through `watch::Sender::send_if_modified`, which serializes them;
//! observers only ever see whole `LanSnapshot`s. Every write carries the session number
//! it belongs to so stragglers from an earlier run cannot touch a newer one.
use crate::types::{LanSnapshot, ScannedHost};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ResultStore {
    tx: Arc<watch::Sender<LanSnapshot>>,
}

impl ResultStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LanSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<LanSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> LanSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.tx.borrow().is_scanning
    }

    /// Open a new session: clears hosts, resets progress. Returns the session number,
    /// or `None` when a scan is already running.
    pub fn begin(&self, subnet: &str) -> Option<u64> {
        let mut session = None;
        self.tx.send_if_modified(|s| {
            if s.is_scanning {
                return false;
            }
            s.session += 1;
            s.subnet = Some(subnet.to_string());
            s.is_scanning = true;
            s.progress = 0.0;
            s.hosts.clear();
            session = Some(s.session);
            true
        });
        session
    }

    /// Write a host's classification. Records are unique per address.
    pub fn record_host(&self, session: u64, host: ScannedHost) {
        self.tx.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            match s.hosts.binary_search_by_key(&host.address, |h| h.address) {
                Ok(i) => s.hosts[i] = host,
                Err(i) => s.hosts.insert(i, host),
            }
            true
        });
    }

    /// Add an open port to an online host. Returns `true` if the port was new.
    pub fn merge_port(&self, session: u64, address: Ipv4Addr, port: u16) -> bool {
        let mut added = false;
        self.tx.send_if_modified(|s| {
            if let Some(h) = online_host_mut(s, session, address) {
                added = h.open_ports.insert(port);
            }
            added
        });
        added
    }

    pub fn set_hostname(&self, session: u64, address: Ipv4Addr, hostname: String) {
        self.tx.send_if_modified(|s| match online_host_mut(s, session, address) {
            Some(h) => {
                h.hostname = Some(hostname);
                true
            }
            None => false,
        });
    }

    /// First banner wins. Returns `true` if this call set it.
    pub fn set_banner_once(&self, session: u64, address: Ipv4Addr, banner: String) -> bool {
        self.tx.send_if_modified(|s| match online_host_mut(s, session, address) {
            Some(h) if h.web_banner.is_none() => {
                h.web_banner = Some(banner);
                true
            }
            _ => false,
        })
    }

    /// Raise progress of the running session. Never lowers it.
    pub fn advance_progress(&self, session: u64, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.tx.send_if_modified(|s| {
            if s.session != session || !s.is_scanning || fraction <= s.progress {
                return false;
            }
            s.progress = fraction;
            true
        });
    }

    /// Clear the running flag without touching progress. Returns `false` if idle.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|s| {
            let was = s.is_scanning;
            s.is_scanning = false;
            was
        })
    }

    /// Natural completion of `session`: flag cleared, progress forced to 1.0.
    /// Returns `false` if the session was stopped or superseded.
    pub fn finish(&self, session: u64) -> bool {
        self.tx.send_if_modified(|s| {
            if s.session != session || !s.is_scanning {
                return false;
            }
            s.is_scanning = false;
            s.progress = 1.0;
            true
        })
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

fn online_host_mut(
    s: &mut LanSnapshot,
    session: u64,
    address: Ipv4Addr,
) -> Option<&mut ScannedHost> {
    if s.session != session {
        return None;
    }
    let i = s.hosts.binary_search_by_key(&address, |h| h.address).ok()?;
    let host = &mut s.hosts[i];
    if host.is_online {
        Some(host)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn hosts_stay_sorted_and_unique() {
        let store = ResultStore::new();
        let s = store.begin("10.0.0").unwrap();
        store.record_host(s, ScannedHost::offline(ip(20)));
        store.record_host(s, ScannedHost::offline(ip(3)));
        store.record_host(s, ScannedHost::online(ip(100), 1.5));
        store.record_host(s, ScannedHost::offline(ip(3)));
        let snap = store.snapshot();
        let addrs: Vec<_> = snap.hosts.iter().map(|h| h.address).collect();
        assert_eq!(addrs, vec![ip(3), ip(20), ip(100)]);
    }

    #[test]
    fn port_merge_is_idempotent_and_sorted() {
        let store = ResultStore::new();
        let s = store.begin("10.0.0").unwrap();
        store.record_host(s, ScannedHost::online(ip(5), 0.0));
        assert!(store.merge_port(s, ip(5), 80));
        assert!(store.merge_port(s, ip(5), 22));
        assert!(!store.merge_port(s, ip(5), 80));
        let host = store.snapshot().host(ip(5)).cloned().unwrap();
        assert_eq!(host.open_ports.into_iter().collect::<Vec<_>>(), vec![22, 80]);
    }

    #[test]
    fn offline_hosts_reject_service_data() {
        let store = ResultStore::new();
        let s = store.begin("10.0.0").unwrap();
        store.record_host(s, ScannedHost::offline(ip(9)));
        assert!(!store.merge_port(s, ip(9), 22));
        store.set_hostname(s, ip(9), "ghost".into());
        assert!(!store.set_banner_once(s, ip(9), "x".into()));
        let host = store.snapshot().host(ip(9)).cloned().unwrap();
        assert!(host.open_ports.is_empty());
        assert!(host.hostname.is_none() && host.web_banner.is_none());
    }

    #[test]
    fn banner_first_value_wins() {
        let store = ResultStore::new();
        let s = store.begin("10.0.0").unwrap();
        store.record_host(s, ScannedHost::online(ip(1), 0.2));
        assert!(store.set_banner_once(s, ip(1), "nginx".into()));
        assert!(!store.set_banner_once(s, ip(1), "apache".into()));
        assert_eq!(
            store.snapshot().host(ip(1)).unwrap().web_banner.as_deref(),
            Some("nginx")
        );
    }

    #[test]
    fn progress_is_monotonic_and_stop_keeps_it() {
        let store = ResultStore::new();
        let s = store.begin("10.0.0").unwrap();
        store.advance_progress(s, 0.5);
        store.advance_progress(s, 0.2);
        assert_eq!(store.snapshot().progress, 0.5);
        assert!(store.stop());
        assert!(!store.stop());
        store.advance_progress(s, 0.9);
        assert!(!store.finish(s));
        let snap = store.snapshot();
        assert!(!snap.is_scanning);
        assert_eq!(snap.progress, 0.5);
    }

    #[test]
    fn begin_is_refused_while_running_and_resets_after() {
        let store = ResultStore::new();
        let s1 = store.begin("10.0.0").unwrap();
        assert!(store.begin("10.0.1").is_none());
        store.record_host(s1, ScannedHost::offline(ip(1)));
        assert!(store.finish(s1));
        assert_eq!(store.snapshot().progress, 1.0);

        let s2 = store.begin("10.0.1").unwrap();
        assert!(s2 > s1);
        assert!(store.snapshot().hosts.is_empty());
        // Late write from the first session is dropped.
        store.record_host(s1, ScannedHost::offline(ip(2)));
        assert!(store.snapshot().hosts.is_empty());
    }
}
