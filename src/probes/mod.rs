pub mod http;
pub mod ping;
pub mod tcp;

use crate::config::{ProbeConfig, ServiceTarget};
use crate::state::ProbeResult;
use async_trait::async_trait;
use ping::PingSettings;
use reqwest::Client;
use std::time::Duration;

/// One reachability check per protocol. Implementations never return
/// errors: failures are folded into the returned `ProbeResult`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn http(&self, url: &str) -> ProbeResult;
    async fn tcp(&self, host: &str, port: u16) -> ProbeResult;
    async fn ping(&self, host: &str) -> ProbeResult;
}

pub async fn probe_target(prober: &dyn Prober, target: &ServiceTarget) -> ProbeResult {
    match target {
        ServiceTarget::Http { url } => prober.http(url).await,
        ServiceTarget::Tcp { host, port } => prober.tcp(host, *port).await,
        ServiceTarget::Ping { host } => prober.ping(host).await,
        ServiceTarget::Unknown { .. } => ProbeResult::unknown(),
        ServiceTarget::Incomplete { kind, .. } => unreachable_result(kind),
    }
}

/// Down result for a service whose address is missing from the config.
fn unreachable_result(kind: &str) -> ProbeResult {
    match kind {
        "http" => ProbeResult::http(None, false, None),
        "tcp" => ProbeResult::tcp(None),
        _ => ProbeResult::ping(None),
    }
}

/// Prober backed by real sockets, `reqwest` and the system `ping`.
pub struct NetworkProber {
    client: Client,
    http_timeout: Duration,
    tcp_timeout: Duration,
    ping: PingSettings,
}

impl NetworkProber {
    pub fn new(cfg: &ProbeConfig) -> Self {
        let client = Client::builder()
            .user_agent(concat!("homeportal/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            http_timeout: Duration::from_millis(cfg.http_timeout_ms),
            tcp_timeout: Duration::from_millis(cfg.tcp_timeout_ms),
            ping: PingSettings::from_config(cfg),
        }
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn http(&self, url: &str) -> ProbeResult {
        http::check_http(&self.client, url, self.http_timeout).await
    }

    async fn tcp(&self, host: &str, port: u16) -> ProbeResult {
        tcp::check_tcp(host, port, self.tcp_timeout).await
    }

    async fn ping(&self, host: &str) -> ProbeResult {
        ping::run_ping(host, &self.ping).await
    }
}

fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
