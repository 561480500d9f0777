//! First sweep stage: classify every `prefix.1..=254` as online or offline.
use crate::events::EventBus;
use crate::gauge::Gauge;
use crate::ports::DISCOVERY_PORTS;
use crate::probe::Prober;
use crate::service::ServicePool;
use crate::store::ResultStore;
use crate::types::{EventDetail, Protocol, ScannedHost, Severity};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const HOSTS_PER_SUBNET: usize = 254;

/// Probe the discovery ports in parallel. `Some(ms)` is the delay until the first answer.
pub async fn classify_host(
    prober: Arc<dyn Prober>,
    address: Ipv4Addr,
    timeout: Duration,
) -> Option<f64> {
    let start = Instant::now();
    let mut set = JoinSet::new();
    for &port in DISCOVERY_PORTS {
        let prober = prober.clone();
        set.spawn(async move {
            let addr = SocketAddr::new(IpAddr::V4(address), port);
            prober
                .probe(addr, Protocol::Tcp, timeout)
                .await
                .then(|| start.elapsed())
        });
    }

    let mut first: Option<Duration> = None;
    while let Some(res) = set.join_next().await {
        if let Ok(Some(elapsed)) = res {
            first = Some(first.map_or(elapsed, |f| f.min(elapsed)));
        }
    }
    first.map(|d| d.as_secs_f64() * 1000.0)
}

pub struct Sweep {
    pub session: u64,
    pub prefix: String,
    pub store: ResultStore,
    pub events: EventBus,
    pub prober: Arc<dyn Prober>,
    pub cancel: CancellationToken,
    /// Host-probe slots, shared across runs of the same scanner.
    pub permits: Arc<Semaphore>,
    pub timeout: Duration,
    pub host_gauge: Arc<Gauge>,
}

impl Sweep {
    /// Dispatch every address, wait for the dispatched set, then drain the service pool.
    pub async fn run(self, services: ServicePool) {
        let classified = Arc::new(AtomicUsize::new(0));
        let services = Arc::new(services);
        let mut set = JoinSet::new();

        for suffix in 1..=HOSTS_PER_SUBNET as u8 {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            // Stop may have arrived while waiting for a slot.
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(address) = host_address(&self.prefix, suffix) else {
                break;
            };

            let prober = self.prober.clone();
            let store = self.store.clone();
            let events = self.events.clone();
            let services = services.clone();
            let classified = classified.clone();
            let gauge = self.host_gauge.clone();
            let session = self.session;
            let timeout = self.timeout;

            set.spawn(async move {
                let _permit = permit;
                let _in_flight = gauge.enter();

                match classify_host(prober, address, timeout).await {
                    Some(ping_ms) => {
                        debug!(%address, ping_ms, "host online");
                        store.record_host(session, ScannedHost::online(address, ping_ms));
                        events.emit(
                            Severity::Debug,
                            format!("{address} is online ({ping_ms:.1} ms)"),
                            Some(EventDetail::HostOnline { address }),
                        );
                        services.enqueue(address);
                    }
                    None => store.record_host(session, ScannedHost::offline(address)),
                }

                let done = classified.fetch_add(1, Ordering::SeqCst) + 1;
                store.advance_progress(session, done as f64 / HOSTS_PER_SUBNET as f64);
            });
        }

        while set.join_next().await.is_some() {}
        services.drain().await;
    }
}

/// `"10.0.0"` + `5` → `10.0.0.5`.
pub fn host_address(prefix: &str, suffix: u8) -> Option<Ipv4Addr> {
    format!("{prefix}.{suffix}").parse().ok()
}
