use super::elapsed_ms;
use crate::config::ProbeConfig;
use crate::state::ProbeResult;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PingSettings {
    pub program: String,
    pub count: u32,
    pub timeout_secs: u64,
}

impl PingSettings {
    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self {
            program: cfg.ping_program.clone(),
            count: cfg.ping_count,
            timeout_secs: cfg.ping_timeout_secs,
        }
    }

    fn args(&self, host: &str) -> Vec<String> {
        let count = self.count.to_string();
        if cfg!(target_os = "windows") {
            let wait_ms = (self.timeout_secs * 1000).to_string();
            vec!["-n".into(), count, "-w".into(), wait_ms, host.into()]
        } else if cfg!(target_os = "macos") {
            let wait_ms = (self.timeout_secs * 1000).to_string();
            vec!["-c".into(), count, "-W".into(), wait_ms, host.into()]
        } else {
            let wait = self.timeout_secs.to_string();
            vec!["-c".into(), count, "-W".into(), wait, host.into()]
        }
    }

    // Every echo may wait its full timeout; the margin covers process start
    // and DNS.
    fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs * u64::from(self.count) + 2)
    }
}

/// Sends echo requests through the system ping utility and reports the
/// average round-trip time. When the summary line cannot be parsed the
/// wall-clock duration of the whole run stands in for it.
pub async fn run_ping(host: &str, settings: &PingSettings) -> ProbeResult {
    let mut cmd = Command::new(&settings.program);
    cmd.args(settings.args(host))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let start = Instant::now();
    let output = match time::timeout(settings.deadline(), cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            warn!(host = %host, program = %settings.program, error = %err, "ping unavailable");
            return ProbeResult::ping(None);
        }
        Err(_elapsed) => {
            warn!(host = %host, "ping timeout");
            return ProbeResult::ping(None);
        }
    };
    let duration_ms = elapsed_ms(start);

    if !output.status.success() {
        debug!(host = %host, status = %output.status, "ping failed");
        return ProbeResult::ping(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let avg_rtt = parse_avg_rtt(&stdout).unwrap_or(duration_ms);
    ProbeResult::ping(Some(avg_rtt))
}

/// Extracts the average from a summary such as
/// `rtt min/avg/max/mdev = 0.045/0.052/0.060/0.007 ms`.
pub fn parse_avg_rtt(output: &str) -> Option<f64> {
    let line = output
        .lines()
        .find(|line| line.contains("avg") && line.contains('/'))?;
    let values = line.rsplit('=').next()?.trim();
    values.split('/').nth(1)?.trim().parse().ok()
}
