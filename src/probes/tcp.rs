use super::elapsed_ms;
use crate::state::ProbeResult;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tracing::warn;

pub async fn check_tcp(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let addr = format!("{host}:{port}");

    match time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => ProbeResult::tcp(Some(elapsed_ms(start))),
        Ok(Err(err)) => {
            warn!(address = %addr, error = %err, "tcp probe failed");
            ProbeResult::tcp(None)
        }
        Err(_elapsed) => {
            warn!(address = %addr, "tcp probe timeout");
            ProbeResult::tcp(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ProbeMetrics, ProbeStatus};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_port_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = check_tcp("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(result.status, ProbeStatus::Up);
        assert!(result.metrics.latency_ms().is_some());
    }

    #[tokio::test]
    async fn closed_port_is_down_within_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let timeout = Duration::from_secs(2);
        let start = Instant::now();
        let result = check_tcp("127.0.0.1", port, timeout).await;

        assert!(start.elapsed() <= timeout + Duration::from_millis(500));
        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(result.metrics, ProbeMetrics::Tcp { latency_ms: None });
    }

    #[tokio::test]
    async fn unresolvable_host_is_down() {
        let result = check_tcp("host.invalid", 80, Duration::from_secs(2)).await;
        assert_eq!(result.status, ProbeStatus::Down);
    }
}
