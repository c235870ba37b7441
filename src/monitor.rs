use crate::config::Config;
use crate::cycle::{cycle_timestamp, run_cycle};
use crate::metrics::Metrics;
use crate::probes::Prober;
use crate::state::Snapshot;
use crate::store::{StatusRead, StatusStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Demand-driven status refresher. Readers call `ensure_fresh`; whoever
/// finds the status file stale runs a cycle while everyone else waits on the
/// same lock and then sees the fresh file.
pub struct StatusMonitor {
    cfg: Arc<Config>,
    prober: Arc<dyn Prober>,
    store: StatusStore,
    metrics: Arc<Metrics>,
    refresh: Mutex<()>,
    cycles: AtomicU64,
}

impl StatusMonitor {
    pub fn new(cfg: Arc<Config>, prober: Arc<dyn Prober>, metrics: Arc<Metrics>) -> Self {
        let store = StatusStore::new(cfg.status_file.clone(), cfg.status_max_age);
        Self {
            cfg,
            prober,
            store,
            metrics,
            refresh: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// A caller that waited on the lock while another cycle ran takes that
    /// cycle's outcome, even when its write failed and the file is still stale.
    pub async fn ensure_fresh(&self) -> Result<(), StoreError> {
        let seen = self.cycles_run();
        if self.store.fresh().await {
            return Ok(());
        }
        let _guard = self.refresh.lock().await;
        if self.cycles_run() != seen || self.store.fresh().await {
            return Ok(());
        }
        self.refresh_locked().await.map(|_| ())
    }

    /// Runs a cycle regardless of freshness. Still serialized with every
    /// other refresh.
    pub async fn force_check(&self) -> Result<Snapshot, StoreError> {
        let _guard = self.refresh.lock().await;
        self.refresh_locked().await
    }

    /// Current snapshot, refreshed first when stale. A failed refresh leaves
    /// whatever is on disk in place.
    pub async fn read_status(&self) -> StatusRead {
        if let Err(err) = self.ensure_fresh().await {
            warn!(error = %err, "обновление статусов не удалось, отдаём сохранённые данные");
        }
        self.store.load().await
    }

    async fn refresh_locked(&self) -> Result<Snapshot, StoreError> {
        // Read before overwrite: last_change depends on it.
        let previous = self.store.load().await.into_snapshot();
        let now = cycle_timestamp(self.cfg.time_zone());
        let started = Instant::now();

        let snapshot = run_cycle(self.prober.as_ref(), &self.cfg, previous.as_ref(), now).await;
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.metrics.observe_cycle(&snapshot, started.elapsed());

        let snapshot = match self.store.save(snapshot).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.metrics.inc_persist_error();
                error!(error = %err, path = %self.store.path().display(), "не удалось сохранить снимок статусов");
                return Err(err);
            }
        };

        info!(
            cycle = self.cycles_run(),
            services = snapshot.services.len(),
            internet_services = snapshot.internet_services.len(),
            online = snapshot.internet.online,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "статусы обновлены"
        );
        Ok(snapshot)
    }
}
