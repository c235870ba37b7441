use crate::probes::Prober;
use crate::state::{round_ms, InternetSummary, ProbeResult, ProbeStatus};
use futures::future::join_all;

/// Pings every reachability target and reduces the outcomes to one verdict.
pub async fn check_internet(prober: &dyn Prober, targets: &[String]) -> InternetSummary {
    let results = join_all(targets.iter().map(|host| prober.ping(host))).await;
    summarize(&results)
}

pub fn summarize(results: &[ProbeResult]) -> InternetSummary {
    let rtts: Vec<f64> = results
        .iter()
        .filter(|r| r.status == ProbeStatus::Up)
        .filter_map(|r| r.metrics.latency_ms())
        .collect();

    let avg_rtt_ms = if rtts.is_empty() {
        None
    } else {
        Some(round_ms(rtts.iter().sum::<f64>() / rtts.len() as f64))
    };

    InternetSummary {
        online: !rtts.is_empty(),
        reachable_targets: rtts.len(),
        total_targets: results.len(),
        avg_rtt_ms,
    }
}
