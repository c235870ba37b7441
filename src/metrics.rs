use crate::state::{ProbeStatus, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub portal_service_up: GaugeVec,
    pub portal_service_latency_ms: GaugeVec,
    pub portal_services_total: Gauge,
    pub portal_services_up: Gauge,
    pub portal_services_down: Gauge,
    pub portal_services_unknown: Gauge,
    pub portal_internet_online: Gauge,
    pub portal_internet_reachable_targets: Gauge,
    pub portal_internet_total_targets: Gauge,
    pub portal_internet_avg_rtt_ms: Gauge,
    pub portal_cycles_total: Counter,
    pub portal_last_cycle_duration_seconds: Gauge,
    pub portal_last_cycle_timestamp_seconds: Gauge,
    pub portal_persist_errors_total: Counter,
    pub portal_scrape_count_total: Counter,
    pub portal_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let portal_service_up = GaugeVec::new(
            opts!(
                "portal_service_up",
                "Service status: 1 up, 0 down (unknown kinds are not exported)"
            ),
            &["group", "name", "type"],
        )?;
        let portal_service_latency_ms = GaugeVec::new(
            opts!(
                "portal_service_latency_ms",
                "Response time, connect latency or average RTT in ms"
            ),
            &["group", "name", "type"],
        )?;
        let portal_services_total = Gauge::with_opts(opts!(
            "portal_services_total",
            "Number of probed services (local and internet)"
        ))?;
        let portal_services_up =
            Gauge::with_opts(opts!("portal_services_up", "Services in UP state"))?;
        let portal_services_down =
            Gauge::with_opts(opts!("portal_services_down", "Services in DOWN state"))?;
        let portal_services_unknown = Gauge::with_opts(opts!(
            "portal_services_unknown",
            "Services with an unsupported probe type"
        ))?;
        let portal_internet_online = Gauge::with_opts(opts!(
            "portal_internet_online",
            "1 if at least one internet target answered"
        ))?;
        let portal_internet_reachable_targets = Gauge::with_opts(opts!(
            "portal_internet_reachable_targets",
            "Internet targets that answered ping"
        ))?;
        let portal_internet_total_targets = Gauge::with_opts(opts!(
            "portal_internet_total_targets",
            "Configured internet targets"
        ))?;
        let portal_internet_avg_rtt_ms = Gauge::with_opts(opts!(
            "portal_internet_avg_rtt_ms",
            "Average RTT over reachable internet targets in ms"
        ))?;
        let portal_cycles_total =
            Counter::with_opts(opts!("portal_cycles_total", "Completed probing cycles"))?;
        let portal_last_cycle_duration_seconds = Gauge::with_opts(opts!(
            "portal_last_cycle_duration_seconds",
            "Wall-clock duration of the last probing cycle"
        ))?;
        let portal_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "portal_last_cycle_timestamp_seconds",
            "Unix timestamp of the last probing cycle"
        ))?;
        let portal_persist_errors_total = Counter::with_opts(opts!(
            "portal_persist_errors_total",
            "Failed writes of the status file"
        ))?;
        let portal_scrape_count_total = Counter::with_opts(opts!(
            "portal_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let portal_uptime_seconds =
            Gauge::with_opts(opts!("portal_uptime_seconds", "Process uptime in seconds"))?;

        register(&registry, &portal_service_up)?;
        register(&registry, &portal_service_latency_ms)?;
        register(&registry, &portal_services_total)?;
        register(&registry, &portal_services_up)?;
        register(&registry, &portal_services_down)?;
        register(&registry, &portal_services_unknown)?;
        register(&registry, &portal_internet_online)?;
        register(&registry, &portal_internet_reachable_targets)?;
        register(&registry, &portal_internet_total_targets)?;
        register(&registry, &portal_internet_avg_rtt_ms)?;
        register(&registry, &portal_cycles_total)?;
        register(&registry, &portal_last_cycle_duration_seconds)?;
        register(&registry, &portal_last_cycle_timestamp_seconds)?;
        register(&registry, &portal_persist_errors_total)?;
        register(&registry, &portal_scrape_count_total)?;
        register(&registry, &portal_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            portal_service_up,
            portal_service_latency_ms,
            portal_services_total,
            portal_services_up,
            portal_services_down,
            portal_services_unknown,
            portal_internet_online,
            portal_internet_reachable_targets,
            portal_internet_total_targets,
            portal_internet_avg_rtt_ms,
            portal_cycles_total,
            portal_last_cycle_duration_seconds,
            portal_last_cycle_timestamp_seconds,
            portal_persist_errors_total,
            portal_scrape_count_total,
            portal_uptime_seconds,
        }))
    }

    pub fn observe_cycle(&self, snapshot: &Snapshot, duration: Duration) {
        self.portal_cycles_total.inc();
        self.portal_last_cycle_duration_seconds
            .set(duration.as_secs_f64());
        self.portal_last_cycle_timestamp_seconds
            .set(snapshot.checked_at.timestamp() as f64);

        // Services removed from the config must not linger.
        self.portal_service_up.reset();
        self.portal_service_latency_ms.reset();

        let (mut up, mut down, mut unknown) = (0_u64, 0_u64, 0_u64);
        for (group, record) in snapshot.all_records() {
            let labels = [group, record.name.as_str(), record.kind.as_str()];
            match record.status {
                ProbeStatus::Up => {
                    up += 1;
                    self.portal_service_up.with_label_values(&labels).set(1.0);
                }
                ProbeStatus::Down => {
                    down += 1;
                    self.portal_service_up.with_label_values(&labels).set(0.0);
                }
                ProbeStatus::Unknown => unknown += 1,
            }
            if let Some(ms) = record.metrics.latency_ms() {
                self.portal_service_latency_ms
                    .with_label_values(&labels)
                    .set(ms);
            }
        }
        self.portal_services_total.set((up + down + unknown) as f64);
        self.portal_services_up.set(up as f64);
        self.portal_services_down.set(down as f64);
        self.portal_services_unknown.set(unknown as f64);

        let internet = &snapshot.internet;
        self.portal_internet_online
            .set(if internet.online { 1.0 } else { 0.0 });
        self.portal_internet_reachable_targets
            .set(internet.reachable_targets as f64);
        self.portal_internet_total_targets
            .set(internet.total_targets as f64);
        self.portal_internet_avg_rtt_ms
            .set(internet.avg_rtt_ms.unwrap_or(0.0));
    }

    pub fn inc_persist_error(&self) {
        self.portal_persist_errors_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.portal_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.portal_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
