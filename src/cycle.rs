use crate::config::{Config, ExternalServiceConfig, ServiceSpec};
use crate::internet::check_internet;
use crate::probes::{probe_target, Prober};
use crate::state::{ProbeResult, ServiceRecord, Snapshot};
use crate::tracker::{index_by_name, last_change, PreviousRecords};
use chrono::{DateTime, FixedOffset, Local, SubsecRound, Utc};
use chrono_tz::Tz;
use futures::future::join_all;

/// Current time in the configured zone, or the host's local zone.
pub fn cycle_timestamp(tz: Option<Tz>) -> DateTime<FixedOffset> {
    let now = match tz {
        Some(tz) => Utc::now().with_timezone(&tz).fixed_offset(),
        None => Local::now().fixed_offset(),
    };
    now.trunc_subsecs(3)
}

/// Runs one full cycle: every local service, every external dependency and
/// every reachability target. Individual probe failures end up as data in
/// the snapshot; the cycle itself cannot fail.
pub async fn run_cycle(
    prober: &dyn Prober,
    cfg: &Config,
    previous: Option<&Snapshot>,
    now: DateTime<FixedOffset>,
) -> Snapshot {
    let prev_local = previous
        .map(|s| index_by_name(&s.services))
        .unwrap_or_default();
    let prev_external = previous
        .map(|s| index_by_name(&s.internet_services))
        .unwrap_or_default();

    let local = join_all(
        cfg.services
            .iter()
            .map(|spec| probe_target(prober, &spec.target)),
    );
    let external = join_all(cfg.internet_services.iter().map(|ext| prober.http(&ext.url)));
    let internet = check_internet(prober, &cfg.internet_targets);
    let (local, external, internet) = tokio::join!(local, external, internet);

    let services = cfg
        .services
        .iter()
        .zip(local)
        .map(|(spec, result)| local_record(spec, result, &prev_local, now))
        .collect();
    let internet_services = cfg
        .internet_services
        .iter()
        .zip(external)
        .map(|(ext, result)| external_record(ext, result, &prev_external, now))
        .collect();

    Snapshot {
        checked_at: now,
        internet,
        services,
        internet_services,
    }
}

fn local_record(
    spec: &ServiceSpec,
    result: ProbeResult,
    previous: &PreviousRecords<'_>,
    now: DateTime<FixedOffset>,
) -> ServiceRecord {
    ServiceRecord {
        name: spec.name.clone(),
        category: spec.category.clone(),
        kind: spec.target.kind().to_string(),
        important: spec.important,
        icon: spec.icon.clone(),
        url: spec.target.url().map(str::to_string),
        host: spec.target.host().map(str::to_string),
        port: spec.target.port(),
        status: result.status,
        last_change: last_change(&spec.name, result.status, previous, now),
        metrics: result.metrics,
    }
}

fn external_record(
    ext: &ExternalServiceConfig,
    result: ProbeResult,
    previous: &PreviousRecords<'_>,
    now: DateTime<FixedOffset>,
) -> ServiceRecord {
    ServiceRecord {
        name: ext.name.clone(),
        category: None,
        kind: "http".to_string(),
        important: false,
        icon: None,
        url: Some(ext.url.clone()),
        host: None,
        port: None,
        status: result.status,
        last_change: last_change(&ext.name, result.status, previous, now),
        metrics: result.metrics,
    }
}
