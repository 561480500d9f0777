use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use netsweep::command::{self, SystemCommandRunner};
use netsweep::config::{LanScanConfig, PortScanConfig};
use netsweep::events::EventBus;
use netsweep::lan::LanScanner;
use netsweep::port_scan::{PortScanRequest, PortScanner};
use netsweep::probe::SocketProber;
use netsweep::resolve::SystemResolver;
use netsweep::server::{self, AppState};
use netsweep::types::{LanSnapshot, LogEvent, PortScanSnapshot, Protocol, Severity};
use netsweep::{logging, netdetect, ports};

/// netsweep: bounded-concurrency LAN sweep and port-range scanner.
#[derive(Debug, Parser)]
#[command(name = "netsweep", version, about, long_about = None)]
struct Cli {
    /// Default log level when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sweep a /24 for live hosts, then enumerate their services.
    Lan(LanArgs),
    /// Scan a port range on a single target.
    Ports(PortsArgs),
    /// Serve the JSON control API.
    Serve(ServeArgs),
    /// Run an external tool (ping, dig, whois, host) and stream its output.
    Tool {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct LanArgs {
    /// Prefix such as 192.168.1 or 192.168.1.0. Auto-detected when omitted.
    #[arg(long)]
    subnet: Option<String>,

    /// Hosts classified concurrently.
    #[arg(long = "host-concurrency", default_value_t = 8)]
    host_concurrency: usize,

    /// Hosts service-scanned concurrently.
    #[arg(long = "service-concurrency", default_value_t = 4)]
    service_concurrency: usize,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 500)]
    timeout_ms: u64,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PortsArgs {
    /// IP address or host name.
    #[arg(long)]
    target: String,

    /// Port or inclusive range, e.g. 1-1024.
    #[arg(long, default_value = "1-1024")]
    range: String,

    /// Probe UDP instead of TCP (local readiness only).
    #[arg(long, default_value_t = false)]
    udp: bool,

    /// Max concurrent probes.
    #[arg(long, default_value_t = 100)]
    concurrency: usize,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 3000)]
    timeout_ms: u64,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    // Ctrl-C cancels probes still in flight.
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    let events = EventBus::new();
    let prober = Arc::new(SocketProber::with_shutdown(shutdown.clone()));

    match cli.command {
        Command::Lan(args) => {
            let config = LanScanConfig {
                host_concurrency: args.host_concurrency,
                service_concurrency: args.service_concurrency,
                discovery_timeout: Duration::from_millis(args.timeout_ms),
                service_timeout: Duration::from_millis(args.timeout_ms),
                ..LanScanConfig::default()
            };
            let subnet = args
                .subnet
                .or_else(netdetect::suggest_subnet)
                .ok_or_else(|| anyhow!("no --subnet given and no local IPv4 interface found"))?;
            let resolver = Arc::new(SystemResolver::new(config.dns_timeout));
            let scanner = LanScanner::new(config, prober, resolver, events.clone());

            let printer = tokio::spawn(print_events(events.subscribe()));
            scanner.start(&subnet)?;
            tokio::select! {
                _ = scanner.wait() => {}
                _ = shutdown.cancelled() => {
                    scanner.stop();
                    scanner.wait().await;
                }
            }
            let snapshot = scanner.snapshot();
            drop(scanner);
            finish_printer(events, printer).await;

            print_hosts_table(&snapshot);
            write_output(args.output.as_deref(), &snapshot);
        }
        Command::Ports(args) => {
            let (start_port, end_port) = ports::parse_port_range(&args.range)?;
            let config = PortScanConfig {
                concurrency: args.concurrency,
                timeout: Duration::from_millis(args.timeout_ms),
                ..PortScanConfig::default()
            };
            let scanner = PortScanner::new(config, prober, events.clone());
            let printer = tokio::spawn(print_events(events.subscribe()));
            scanner
                .start(PortScanRequest {
                    target: args.target,
                    start_port,
                    end_port,
                    protocol: if args.udp { Protocol::Udp } else { Protocol::Tcp },
                    ..PortScanRequest::default()
                })
                .await?;
            tokio::select! {
                _ = scanner.wait() => {}
                _ = shutdown.cancelled() => {
                    scanner.stop();
                    scanner.wait().await;
                }
            }
            let snapshot = scanner.snapshot();
            drop(scanner);
            finish_printer(events, printer).await;

            print_ports_summary(&snapshot);
            write_output(args.output.as_deref(), &snapshot);
        }
        Command::Serve(args) => {
            let resolver = Arc::new(SystemResolver::default());
            let state = AppState {
                lan: Arc::new(LanScanner::new(
                    LanScanConfig::default(),
                    prober.clone(),
                    resolver,
                    events.clone(),
                )),
                ports: Arc::new(PortScanner::new(
                    PortScanConfig::default(),
                    prober,
                    events.clone(),
                )),
                events,
            };
            tokio::select! {
                res = server::spawn_server(&args.bind, state) => res?,
                _ = shutdown.cancelled() => {}
            }
        }
        Command::Tool { program, args } => {
            let printer = tokio::spawn(print_events(events.subscribe()));
            command::stream_to_events(&SystemCommandRunner, &events, &program, &args)
                .await
                .with_context(|| format!("running {program}"))?;
            finish_printer(events, printer).await;
        }
    }

    Ok(())
}

/// Cancel `shutdown` when `signal` fires. A handler that failed to install cancels nothing.
async fn cancel_on_signal(
    signal: impl Future<Output = std::io::Result<()>>,
    shutdown: CancellationToken,
) {
    match signal.await {
        Ok(()) => shutdown.cancel(),
        Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
    }
}

/// Close the bus and let the printer drain what is still buffered.
async fn finish_printer(events: EventBus, printer: JoinHandle<()>) {
    drop(events);
    let _ = printer.await;
}

async fn print_events(mut rx: broadcast::Receiver<LogEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &LogEvent) {
    let tag = match event.severity {
        Severity::Info => "[*]",
        Severity::Success => "[+]",
        Severity::Error => "[-]",
        Severity::Debug => return,
    };
    println!("{tag} {}", event.message);
}

fn print_hosts_table(snapshot: &LanSnapshot) {
    let online: Vec<_> = snapshot.online_hosts().collect();
    let host_w = online
        .iter()
        .filter_map(|h| h.hostname.as_ref().map(String::len))
        .max()
        .unwrap_or(0)
        .max("hostname".len());
    let ip_w = 15usize;
    let ping_w = "ping_ms".len().max(7);

    println!(
        "\nOnline hosts: {} of {} (progress {:.0}%)",
        online.len(),
        snapshot.hosts.len(),
        snapshot.progress * 100.0
    );
    println!(
        "{:<ip_w$}  {:>ping_w$}  {:<host_w$}  {:<24}  {}",
        "ip", "ping_ms", "hostname", "ports", "banner",
    );
    println!("{:-<ip_w$}  {:-<ping_w$}  {:-<host_w$}  {:-<24}  {:-<6}", "", "", "", "", "");
    for h in online {
        let ports = h
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut banner = h.web_banner.clone().unwrap_or_default();
        banner.truncate(60);
        println!(
            "{:<ip_w$}  {:>ping_w$.1}  {:<host_w$}  {:<24}  {}",
            h.address.to_string(),
            h.ping_time_ms.unwrap_or_default(),
            h.hostname.as_deref().unwrap_or(""),
            ports,
            banner,
        );
    }
}

fn print_ports_summary(snapshot: &PortScanSnapshot) {
    println!(
        "\nOpen ports: {} (scanned: {} of {}, {})",
        snapshot.open_ports.len(),
        snapshot.scanned,
        snapshot.total,
        snapshot.protocol
    );
    for port in &snapshot.open_ports {
        let name = ports::service_name(*port);
        println!("  {port:>5}  {name}");
    }
}

fn write_output<T: Serialize>(path: Option<&Path>, value: &T) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = write_results_json(path, value) {
        eprintln!("Failed to write JSON to {}: {}", path.display(), e);
    } else {
        println!("Wrote JSON results to {}", path.display());
    }
}

fn write_results_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_signal_handler_does_not_cancel() {
        let token = CancellationToken::new();
        cancel_on_signal(async { Err(std::io::Error::other("no handler")) }, token.clone()).await;
        assert!(!token.is_cancelled());

        cancel_on_signal(async { Ok(()) }, token.clone()).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn printer_ends_once_the_bus_is_dropped() {
        let events = EventBus::new();
        let printer = tokio::spawn(print_events(events.subscribe()));
        events.info("last line");
        tokio::time::timeout(Duration::from_secs(1), finish_printer(events, printer))
            .await
            .expect("printer should end when the bus closes");
    }
}
