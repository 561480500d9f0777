//! Timeout-bounded connect probes and the HTTP `Server:` banner grab.
use crate::types::Protocol;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lifecycle of a single probe. Every state after `Connecting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Init,
    Connecting,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProbeState::Init | ProbeState::Connecting)
    }
}

/// Lifecycle record of one probe. Once a terminal state is recorded, later ones are ignored.
#[derive(Debug)]
pub struct ProbeAttempt {
    state: ProbeState,
}

impl ProbeAttempt {
    pub fn new() -> Self {
        Self {
            state: ProbeState::Init,
        }
    }

    pub fn begin(&mut self) {
        if self.state == ProbeState::Init {
            self.state = ProbeState::Connecting;
        }
    }

    /// Record a terminal outcome. Returns `false` if one was already recorded.
    pub fn settle(&mut self, outcome: ProbeState) -> bool {
        if self.state.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.state = outcome;
        true
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ProbeState::Ready
    }
}

impl Default for ProbeAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Race a connect against `timeout` and `cancel`.
///
/// `select!` completes exactly one branch and drops the others, so the outcome is decided once;
/// the returned state is that branch's terminal state.
///
/// UDP readiness only means a local socket could be bound and connected to `addr`;
/// no datagram is exchanged, so a "ready" UDP port says nothing about the remote side.
pub async fn probe_outcome(
    addr: SocketAddr,
    protocol: Protocol,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeState {
    let mut attempt = ProbeAttempt::new();
    attempt.begin();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => ProbeState::Cancelled,
        res = connect(addr, protocol) => match res {
            Ok(()) => ProbeState::Ready,
            Err(e) => {
                trace!(%addr, error = %e, "connect failed");
                ProbeState::Failed
            }
        },
        _ = time::sleep(timeout) => ProbeState::TimedOut,
    };

    attempt.settle(outcome);
    attempt.state()
}

async fn connect(addr: SocketAddr, protocol: Protocol) -> io::Result<()> {
    match protocol {
        Protocol::Tcp => TcpStream::connect(addr).await.map(drop),
        Protocol::Udp => {
            let local: IpAddr = match addr {
                SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
                SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
            };
            let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
            socket.connect(addr).await
        }
    }
}

/// Network primitives the scanners are built on.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `true` iff the port answered before `timeout`.
    async fn probe(&self, addr: SocketAddr, protocol: Protocol, timeout: Duration) -> bool;

    /// Best-effort `HEAD /` returning the `Server:` header value.
    async fn server_banner(&self, addr: SocketAddr, timeout: Duration) -> Option<String>;
}

/// Real socket prober. Its shutdown token cancels probes still in flight.
#[derive(Debug, Clone, Default)]
pub struct SocketProber {
    shutdown: CancellationToken,
}

impl SocketProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl Prober for SocketProber {
    async fn probe(&self, addr: SocketAddr, protocol: Protocol, timeout: Duration) -> bool {
        probe_outcome(addr, protocol, timeout, &self.shutdown).await == ProbeState::Ready
    }

    async fn server_banner(&self, addr: SocketAddr, timeout: Duration) -> Option<String> {
        let request = format!("HEAD / HTTP/1.0\r\nHost: {}\r\n\r\n", addr.ip());
        let fetch = async {
            let stream = TcpStream::connect(addr).await.ok()?;
            let response = if addr.port() == 443 {
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .use_sni(false)
                    .build()
                    .ok()?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let mut tls = connector
                    .connect(&addr.ip().to_string(), stream)
                    .await
                    .ok()?;
                exchange(&mut tls, &request).await?
            } else {
                let mut plain = stream;
                exchange(&mut plain, &request).await?
            };
            parse_server_header(&response)
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            res = time::timeout(timeout, fetch) => res.ok().flatten(),
        }
    }
}

async fn exchange<S>(stream: &mut S, request: &str) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await.ok()?;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= 4096 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    if buf.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Extract the `Server:` header value from a raw HTTP response head.
pub fn parse_server_header(response: &str) -> Option<String> {
    response
        .lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("server")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn attempt_settles_once() {
        let mut a = ProbeAttempt::new();
        assert!(!a.settle(ProbeState::Connecting));
        a.begin();
        assert!(a.settle(ProbeState::TimedOut));
        assert!(!a.settle(ProbeState::Ready));
        assert_eq!(a.state(), ProbeState::TimedOut);
        assert!(!a.is_open());
    }

    #[test]
    fn server_header_is_case_insensitive() {
        let resp = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nserver: nginx/1.25\r\n\r\n";
        assert_eq!(parse_server_header(resp).as_deref(), Some("nginx/1.25"));
        assert_eq!(parse_server_header("HTTP/1.1 200 OK\r\n\r\nServer: body"), None);
    }

    #[tokio::test]
    async fn tcp_listener_is_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = probe_outcome(
            addr,
            Protocol::Tcp,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(state, ProbeState::Ready);
    }

    #[tokio::test]
    async fn closed_port_is_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let prober = SocketProber::new();
        assert!(!prober.probe(addr, Protocol::Tcp, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let addr: SocketAddr = "10.255.255.1:80".parse().unwrap();
        let state = probe_outcome(addr, Protocol::Tcp, Duration::from_secs(5), &token).await;
        assert_eq!(state, ProbeState::Cancelled);
    }

    #[tokio::test]
    async fn one_outcome_even_when_connect_would_succeed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let state = probe_outcome(addr, Protocol::Tcp, Duration::from_secs(1), &token).await;
        assert_eq!(state, ProbeState::Cancelled);
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn udp_readiness_is_local() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let prober = SocketProber::new();
        assert!(prober.probe(addr, Protocol::Udp, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn banner_from_local_http_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.0 200 OK\r\nServer: test-httpd\r\n\r\n")
                .await
                .unwrap();
        });
        let prober = SocketProber::new();
        let banner = prober.server_banner(addr, Duration::from_secs(2)).await;
        assert_eq!(banner.as_deref(), Some("test-httpd"));
    }
}
