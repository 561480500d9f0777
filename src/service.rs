//! Second sweep stage: per-host service enumeration on its own bounded pool.
use crate::gauge::Gauge;
use crate::ports::{BANNER_PORTS, SERVICE_PORTS};
use crate::probe::Prober;
use crate::resolve::HostResolver;
use crate::store::ResultStore;
use crate::types::Protocol;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Everything a service job needs, shared by all jobs of one session.
#[derive(Clone)]
pub struct ServiceContext {
    pub session: u64,
    pub store: ResultStore,
    pub prober: Arc<dyn Prober>,
    pub resolver: Arc<dyn HostResolver>,
    pub cancel: CancellationToken,
    pub port_timeout: Duration,
    pub banner_timeout: Duration,
}

/// Bounded pool of host jobs. `enqueue` never waits; `drain` waits for everything queued.
pub struct ServicePool {
    ctx: ServiceContext,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    gauge: Arc<Gauge>,
}

impl ServicePool {
    /// `permits` may be shared between pools; it is the cap on concurrent host jobs.
    pub fn new(ctx: ServiceContext, permits: Arc<Semaphore>, gauge: Arc<Gauge>) -> Self {
        Self {
            ctx,
            permits,
            tracker: TaskTracker::new(),
            gauge,
        }
    }

    pub fn enqueue(&self, address: Ipv4Addr) {
        if self.ctx.cancel.is_cancelled() {
            return;
        }
        let ctx = self.ctx.clone();
        let permits = self.permits.clone();
        let gauge = self.gauge.clone();
        let tracker = self.tracker.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            // Queued jobs that never started are dropped on stop.
            if ctx.cancel.is_cancelled() {
                return;
            }
            let _in_flight = gauge.enter();
            scan_host(&ctx, &tracker, address).await;
        });
    }

    /// Wait for every queued job and detached banner grab to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Resolve the name, walk the service list one port at a time, and kick off banner grabs.
pub async fn scan_host(ctx: &ServiceContext, tracker: &TaskTracker, address: Ipv4Addr) {
    let ip = IpAddr::V4(address);

    if let Some(name) = ctx.resolver.reverse(ip).await {
        if name != address.to_string() {
            ctx.store.set_hostname(ctx.session, address, name);
        }
    }

    for &port in SERVICE_PORTS {
        if ctx.cancel.is_cancelled() {
            debug!(%address, "service scan stopped");
            break;
        }
        let addr = SocketAddr::new(ip, port);
        if !ctx.prober.probe(addr, Protocol::Tcp, ctx.port_timeout).await {
            continue;
        }
        debug!(%address, port, "service port open");
        ctx.store.merge_port(ctx.session, address, port);

        if BANNER_PORTS.contains(&port) {
            let ctx = ctx.clone();
            tracker.spawn(async move {
                if let Some(banner) = ctx.prober.server_banner(addr, ctx.banner_timeout).await {
                    ctx.store.set_banner_once(ctx.session, address, banner);
                }
            });
        }
    }
}
