//! LAN sweep entry points: `start` / `stop` plus observable state.
use crate::config::LanScanConfig;
use crate::discovery::Sweep;
use crate::error::ScanResult;
use crate::events::EventBus;
use crate::gauge::{Gauge, PeakConcurrency};
use crate::netdetect::parse_subnet_prefix;
use crate::probe::Prober;
use crate::resolve::HostResolver;
use crate::service::{ServiceContext, ServicePool};
use crate::store::ResultStore;
use crate::types::{EventDetail, LanSnapshot, Severity};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

pub struct LanScanner {
    config: LanScanConfig,
    prober: Arc<dyn Prober>,
    resolver: Arc<dyn HostResolver>,
    store: ResultStore,
    events: EventBus,
    control: Mutex<Control>,
    // Shared by every run so a restart right after stop cannot exceed the caps.
    host_permits: Arc<Semaphore>,
    service_permits: Arc<Semaphore>,
    host_gauge: Arc<Gauge>,
    service_gauge: Arc<Gauge>,
}

impl LanScanner {
    pub fn new(
        config: LanScanConfig,
        prober: Arc<dyn Prober>,
        resolver: Arc<dyn HostResolver>,
        events: EventBus,
    ) -> Self {
        let host_permits = Arc::new(Semaphore::new(config.host_concurrency.max(1)));
        let service_permits = Arc::new(Semaphore::new(config.service_concurrency.max(1)));
        Self {
            config,
            prober,
            resolver,
            store: ResultStore::new(),
            events,
            control: Mutex::new(Control::default()),
            host_permits,
            service_permits,
            host_gauge: Arc::new(Gauge::default()),
            service_gauge: Arc::new(Gauge::default()),
        }
    }

    /// Start sweeping `subnet`. Returns `Ok(false)` if a sweep is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, subnet: &str) -> ScanResult<bool> {
        self.start_with_timeout(subnet, None)
    }

    /// Like [`start`](Self::start), with a per-run probe timeout replacing the configured ones.
    pub fn start_with_timeout(&self, subnet: &str, timeout: Option<Duration>) -> ScanResult<bool> {
        let prefix = match parse_subnet_prefix(subnet) {
            Ok(p) => p,
            Err(e) => {
                self.events.error(format!("Invalid subnet '{subnet}'. Use '192.168.1.0'"));
                return Err(e);
            }
        };

        let mut control = self.control.lock().unwrap_or_else(|p| p.into_inner());
        let Some(session) = self.store.begin(&prefix) else {
            return Ok(false);
        };
        self.host_gauge.reset_peak();
        self.service_gauge.reset_peak();

        let discovery_timeout = timeout.unwrap_or(self.config.discovery_timeout);
        let service_timeout = timeout.unwrap_or(self.config.service_timeout);

        let cancel = CancellationToken::new();
        let services = ServicePool::new(
            ServiceContext {
                session,
                store: self.store.clone(),
                prober: self.prober.clone(),
                resolver: self.resolver.clone(),
                cancel: cancel.clone(),
                port_timeout: service_timeout,
                banner_timeout: self.config.banner_timeout,
            },
            self.service_permits.clone(),
            self.service_gauge.clone(),
        );
        let sweep = Sweep {
            session,
            prefix: prefix.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            prober: self.prober.clone(),
            cancel: cancel.clone(),
            permits: self.host_permits.clone(),
            timeout: discovery_timeout,
            host_gauge: self.host_gauge.clone(),
        };

        info!(subnet = %prefix, session, "lan sweep starting");
        self.events.info(format!("Scanning {prefix}.1-254"));

        let store = self.store.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            sweep.run(services).await;
            if store.finish(session) {
                events.emit(Severity::Success, "Scan Complete.", Some(EventDetail::ScanCompleted));
            } else {
                info!(session, "lan sweep ended after stop");
            }
        });

        control.cancel = Some(cancel);
        control.task = Some(task);
        Ok(true)
    }

    /// Stop scheduling new hosts. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let control = self.control.lock().unwrap_or_else(|p| p.into_inner());
        if !self.store.stop() {
            return false;
        }
        if let Some(cancel) = control.cancel.as_ref() {
            cancel.cancel();
        }
        self.events.info("LAN scan stopping...");
        true
    }

    /// Wait for the most recently started sweep, including its drain, to finish.
    pub async fn wait(&self) {
        let task = {
            let mut control = self.control.lock().unwrap_or_else(|p| p.into_inner());
            control.task.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.store.is_scanning()
    }

    pub fn snapshot(&self) -> LanSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<LanSnapshot> {
        self.store.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn peak_concurrency(&self) -> PeakConcurrency {
        PeakConcurrency {
            host_probes: self.host_gauge.peak(),
            service_jobs: self.service_gauge.peak(),
        }
    }
}
