use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time;
use tracing::debug;

/// Reverse name lookup used by the service stage.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver backed by the OS `getnameinfo`, run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
        match time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) => meaningful_name(ip, name),
            Ok(Ok(Err(e))) => {
                debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
            _ => None,
        }
    }
}

/// A resolver echoing the numeric address back means "no name".
pub fn meaningful_name(ip: IpAddr, name: String) -> Option<String> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == ip.to_string() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
