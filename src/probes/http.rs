use super::elapsed_ms;
use crate::state::ProbeResult;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::warn;

pub async fn check_http(client: &Client, url: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) => {
            let code = resp.status();
            ProbeResult::http(
                Some(code.as_u16()),
                is_reachable(code),
                Some(elapsed_ms(start)),
            )
        }
        Err(err) => {
            warn!(url = %url, error = %err, "http probe failed");
            ProbeResult::http(None, false, None)
        }
    }
}

/// Redirects are followed by the client; a final status below 400 is up.
fn is_reachable(code: StatusCode) -> bool {
    code.as_u16() < 400
}
