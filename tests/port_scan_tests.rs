use netsweep::config::PortScanConfig;
use netsweep::error::ScanError;
use netsweep::events::EventBus;
use netsweep::port_scan::{PortScanRequest, PortScanner};
use netsweep::probe::{Prober, SocketProber};
use netsweep::types::{EventDetail, Protocol};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_utils::{completed_events, open_port_events, MockNet};
use tokio::net::TcpListener;


fn request(target: &str, start_port: u16, end_port: u16) -> PortScanRequest {
    PortScanRequest {
        target: target.to_string(),
        start_port,
        end_port,
        protocol: Protocol::Tcp,
        ..PortScanRequest::default()
    }
}

fn quick_config() -> PortScanConfig {
    PortScanConfig {
        timeout: Duration::from_millis(300),
        ..PortScanConfig::default()
    }
}

#[tokio::test]
async fn only_accepting_port_is_reported() {
    let net = MockNet::new().open("127.0.0.1", &[7]);
    let scanner = PortScanner::new(quick_config(), Arc::new(net), EventBus::new());
    assert!(scanner.start(request("127.0.0.1", 1, 10)).await.unwrap());
    scanner.wait().await;

    let history = scanner.events().history();
    assert_eq!(open_port_events(&history), vec![7]);
    assert_eq!(completed_events(&history), 1);

    let snap = scanner.snapshot();
    assert_eq!(snap.progress, 1.0);
    assert!(!snap.is_scanning);
    assert_eq!(snap.scanned, 10);
    assert_eq!(snap.open_ports.iter().copied().collect::<Vec<_>>(), vec![7]);
}

#[tokio::test]
async fn open_port_event_carries_service_name() {
    let events = EventBus::new();
    let net = MockNet::new().open("10.0.0.1", &[22, 4444]);
    let scanner = PortScanner::new(quick_config(), Arc::new(net), events.clone());
    scanner.start(request("10.0.0.1", 20, 25)).await.unwrap();
    scanner.wait().await;

    let ssh = events
        .history()
        .into_iter()
        .find_map(|e| match e.detail {
            Some(EventDetail::OpenPort { port: 22, service, .. }) => Some((e.message, service)),
            _ => None,
        })
        .unwrap();
    assert_eq!(ssh.1, "SSH");
    assert_eq!(ssh.0, "Port 22 (SSH) is Open (TCP)");
}

#[tokio::test]
async fn real_listener_is_found() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let events = EventBus::new();
    let scanner = PortScanner::new(quick_config(), Arc::new(SocketProber::new()), events.clone());
    scanner.start(request("127.0.0.1", port, port)).await.unwrap();
    scanner.wait().await;
    assert_eq!(open_port_events(&events.history()), vec![port]);
}

#[tokio::test]
async fn reversed_range_is_rejected() {
    let events = EventBus::new();
    let scanner = PortScanner::new(quick_config(), Arc::new(MockNet::new()), events.clone());
    let err = scanner.start(request("127.0.0.1", 10, 1)).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidPortRange { start: 10, end: 1 }));
    assert!(!scanner.is_scanning());
    assert_eq!(events.history().len(), 1);
}

#[tokio::test]
async fn global_cap_is_respected() {
    let net = MockNet::new().with_delay(Duration::from_millis(50));
    let config = PortScanConfig {
        dispatch_delay: Duration::ZERO,
        timeout: Duration::from_millis(500),
        ..PortScanConfig::default()
    };
    let scanner = PortScanner::new(config, Arc::new(net), EventBus::new());
    scanner.start(request("10.0.0.2", 1, 1000)).await.unwrap();
    scanner.wait().await;

    let peak = scanner.peak_in_flight();
    assert!(peak > 1 && peak <= 100, "peak {peak}");
    assert_eq!(scanner.snapshot().scanned, 1000);
}

#[tokio::test]
async fn stop_halts_dispatch_without_completing() {
    let events = EventBus::new();
    let net = MockNet::new().with_delay(Duration::from_millis(100));
    let config = PortScanConfig {
        concurrency: 10,
        ..quick_config()
    };
    let scanner = PortScanner::new(config, Arc::new(net), events.clone());
    scanner.start(request("10.0.0.3", 1, 2000)).await.unwrap();
    assert!(!scanner.start(request("10.0.0.3", 1, 5)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(scanner.stop());
    assert!(!scanner.stop());
    scanner.wait().await;

    let snap = scanner.snapshot();
    assert!(!snap.is_scanning);
    assert!(snap.progress < 1.0);
    assert!(snap.scanned < 2000);
    assert_eq!(completed_events(&events.history()), 0);
}

#[tokio::test]
async fn unreachable_address_times_out_promptly() {
    let prober = SocketProber::new();
    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let open = prober
        .probe("192.0.2.1:80".parse().unwrap(), Protocol::Tcp, timeout)
        .await;
    assert!(!open);
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
}

#[tokio::test]
async fn restart_after_stop_keeps_global_cap_and_drops_stale_results() {
    let events = EventBus::new();
    let all_open: Vec<u16> = (1..=1000).collect();
    let net = MockNet::new()
        .with_delay(Duration::from_millis(200))
        .open("10.0.0.2", &all_open);
    let config = PortScanConfig {
        dispatch_delay: Duration::ZERO,
        timeout: Duration::from_millis(300),
        ..PortScanConfig::default()
    };
    let scanner = PortScanner::new(config, Arc::new(net), events.clone());

    assert!(scanner.start(request("10.0.0.2", 1, 1000)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scanner.stop());
    assert!(scanner.start(request("10.0.0.9", 1, 300)).await.unwrap());
    scanner.wait().await;

    let peak = scanner.peak_in_flight();
    assert!(peak <= 100, "peak {peak}");
    assert!(open_port_events(&events.history()).is_empty());

    let snap = scanner.snapshot();
    assert_eq!(snap.target.as_deref(), Some("10.0.0.9"));
    assert_eq!(snap.scanned, 300);
    assert!(snap.open_ports.is_empty());
    assert_eq!(completed_events(&events.history()), 1);
}

#[tokio::test]
async fn request_overrides_are_capped() {
    let scanner = PortScanner::new(quick_config(), Arc::new(MockNet::new()), EventBus::new());
    let req = PortScanRequest {
        concurrency: Some(500),
        timeout_ms: Some(50),
        ..request("127.0.0.1", 1, 20)
    };
    assert!(scanner.start(req).await.unwrap());
    scanner.wait().await;
    let snap = scanner.snapshot();
    assert_eq!(snap.concurrency, 100);
    assert_eq!(snap.timeout_ms, 50);

    let req = PortScanRequest {
        concurrency: Some(3),
        ..request("127.0.0.1", 1, 20)
    };
    scanner.start(req).await.unwrap();
    scanner.wait().await;
    assert_eq!(scanner.snapshot().concurrency, 3);
    assert!(scanner.peak_in_flight() <= 3);
    assert_eq!(scanner.snapshot().timeout_ms, 300);
}
