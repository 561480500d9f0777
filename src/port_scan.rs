//! Single-target port-range scanner with a global in-flight cap.
use crate::config::{probe_timeout_ms, PortScanConfig};
use crate::error::{ScanError, ScanResult};
use crate::events::EventBus;
use crate::gauge::Gauge;
use crate::ports::service_name;
use crate::probe::Prober;
use crate::types::{EventDetail, PortScanSnapshot, Protocol, Severity};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortScanRequest {
    pub target: String,
    pub start_port: u16,
    pub end_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Per-job probe timeout; clamped to `MAX_PROBE_TIMEOUT`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-job in-flight limit; never above the scanner's cap.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

pub struct PortScanner {
    config: PortScanConfig,
    prober: Arc<dyn Prober>,
    events: EventBus,
    status: Arc<watch::Sender<PortScanSnapshot>>,
    control: Mutex<Control>,
    // One cap for the scanner: probes of a stopped job still hold their slots.
    permits: Arc<Semaphore>,
    gauge: Arc<Gauge>,
}

impl PortScanner {
    pub fn new(config: PortScanConfig, prober: Arc<dyn Prober>, events: EventBus) -> Self {
        let (tx, _) = watch::channel(PortScanSnapshot::default());
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            prober,
            events,
            status: Arc::new(tx),
            control: Mutex::new(Control::default()),
            permits,
            gauge: Arc::new(Gauge::default()),
        }
    }

    /// Validate, resolve and launch a scan. `Ok(false)` if one is already running.
    pub async fn start(&self, req: PortScanRequest) -> ScanResult<bool> {
        if req.start_port == 0 || req.start_port > req.end_port {
            self.events.error("Invalid port range.");
            return Err(ScanError::InvalidPortRange {
                start: req.start_port,
                end: req.end_port,
            });
        }
        if self.is_scanning() {
            return Ok(false);
        }
        let ip = match resolve_target(&req.target).await {
            Some(ip) => ip,
            None => {
                self.events.error(format!("Could not resolve {}", req.target));
                return Err(ScanError::UnresolvedTarget(req.target));
            }
        };

        let mut control = self.control.lock().unwrap_or_else(|p| p.into_inner());
        let total = u64::from(req.end_port - req.start_port) + 1;
        let cap = self.config.concurrency.max(1);
        let concurrency = req.concurrency.map_or(cap, |c| c.clamp(1, cap));
        let timeout = req.timeout_ms.map_or(self.config.timeout, probe_timeout_ms);
        let mut job = None;
        self.status.send_if_modified(|s| {
            if s.is_scanning {
                return false;
            }
            *s = PortScanSnapshot {
                job: s.job + 1,
                target: Some(req.target.clone()),
                start_port: req.start_port,
                end_port: req.end_port,
                protocol: req.protocol,
                concurrency,
                timeout_ms: timeout.as_millis() as u64,
                is_scanning: true,
                progress: 0.0,
                scanned: 0,
                total,
                open_ports: Default::default(),
            };
            job = Some(s.job);
            true
        });
        let Some(job) = job else {
            return Ok(false);
        };
        self.gauge.reset_peak();

        self.events.info(format!(
            "Starting {} port scan on {} ({}-{})",
            req.protocol, req.target, req.start_port, req.end_port
        ));
        info!(host = %req.target, %ip, job, "port scan starting");

        let cancel = CancellationToken::new();
        let run = RangeRun {
            job,
            ip,
            req,
            total,
            dispatch_delay: self.config.dispatch_delay,
            timeout,
            job_permits: Arc::new(Semaphore::new(concurrency)),
            permits: self.permits.clone(),
            prober: self.prober.clone(),
            events: self.events.clone(),
            status: self.status.clone(),
            cancel: cancel.clone(),
            gauge: self.gauge.clone(),
        };
        control.cancel = Some(cancel);
        control.task = Some(tokio::spawn(run.run()));
        Ok(true)
    }

    /// Stop dispatching probes. Progress keeps its last value.
    pub fn stop(&self) -> bool {
        let control = self.control.lock().unwrap_or_else(|p| p.into_inner());
        let was = self.status.send_if_modified(|s| {
            let was = s.is_scanning;
            s.is_scanning = false;
            was
        });
        if !was {
            return false;
        }
        if let Some(cancel) = control.cancel.as_ref() {
            cancel.cancel();
        }
        self.events.info("Port scan stopping...");
        true
    }

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
        self.status.borrow().is_scanning
    }

    pub fn snapshot(&self) -> PortScanSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PortScanSnapshot> {
        self.status.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak()
    }
}

async fn resolve_target(target: &str) -> Option<IpAddr> {
    let target = target.trim();
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Some(ip);
    }
    tokio::net::lookup_host((target, 0))
        .await
        .ok()?
        .map(|a| a.ip())
        .find(IpAddr::is_ipv4)
}

struct RangeRun {
    job: u64,
    ip: IpAddr,
    req: PortScanRequest,
    total: u64,
    dispatch_delay: Duration,
    timeout: Duration,
    /// Per-job limit, acquired before a slot of the scanner-wide `permits`.
    job_permits: Arc<Semaphore>,
    permits: Arc<Semaphore>,
    prober: Arc<dyn Prober>,
    events: EventBus,
    status: Arc<watch::Sender<PortScanSnapshot>>,
    cancel: CancellationToken,
    gauge: Arc<Gauge>,
}

impl RangeRun {
    async fn run(self) {
        let completed = Arc::new(AtomicU64::new(0));
        let mut set = JoinSet::new();

        for port in self.req.start_port..=self.req.end_port {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(job_permit) = self.job_permits.clone().acquire_owned().await else {
                break;
            };
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }
            time::sleep(self.dispatch_delay).await;

            let prober = self.prober.clone();
            let events = self.events.clone();
            let status = self.status.clone();
            let completed = completed.clone();
            let gauge = self.gauge.clone();
            let target = self.req.target.clone();
            let protocol = self.req.protocol;
            let timeout = self.timeout;
            let (ip, job, total) = (self.ip, self.job, self.total);

            set.spawn(async move {
                let open = {
                    let _slots = (job_permit, permit);
                    let _in_flight = gauge.enter();
                    prober.probe(SocketAddr::new(ip, port), protocol, timeout).await
                };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                // Results of a stopped or replaced job are discarded.
                let current = status.send_if_modified(|s| {
                    if s.job != job || !s.is_scanning {
                        return false;
                    }
                    if open {
                        s.open_ports.insert(port);
                    }
                    s.scanned = s.scanned.max(done);
                    s.progress = s.progress.max(done as f64 / total as f64);
                    true
                });
                if open && current {
                    let service = service_name(port);
                    let label = if service.is_empty() {
                        format!("Port {port} is Open")
                    } else {
                        format!("Port {port} ({service}) is Open")
                    };
                    debug!(%ip, port, "open");
                    events.emit(
                        Severity::Success,
                        format!("{label} ({protocol})"),
                        Some(EventDetail::OpenPort {
                            target,
                            port,
                            protocol,
                            service: service.to_string(),
                        }),
                    );
                }
            });

            while set.try_join_next().is_some() {}
        }

        while set.join_next().await.is_some() {}

        if self.cancel.is_cancelled() {
            return;
        }
        let finished = self.status.send_if_modified(|s| {
            if s.job != self.job || !s.is_scanning {
                return false;
            }
            s.is_scanning = false;
            s.progress = 1.0;
            true
        });
        if finished {
            self.events.emit(
                Severity::Info,
                "Port scan completed.",
                Some(EventDetail::ScanCompleted),
            );
        }
    }
}
