use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::database::ScraperStore;
use crate::fetcher::Fetcher;
use crate::models::ScraperConfig;
use crate::scraper_unit::ScraperUnit;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    /// Enabled scrapers whose configuration could not be loaded, with the reason.
    pub rejected: Vec<(i64, String)>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub reconcile: ReconcileReport,
    pub dispatched: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_units: usize,
    pub running_runs: usize,
    pub completed_runs: u64,
    /// Runs whose task panicked or was cancelled.
    pub failed_runs: u64,
    pub items_found: u64,
    pub uptime_seconds: u64,
}

/// Active scraper units keyed by scraper id, kept in line with the store.
pub struct ScraperRegistry {
    store: Arc<dyn ScraperStore>,
    fetcher: Arc<dyn Fetcher>,
    units: Arc<RwLock<HashMap<i64, Arc<ScraperUnit>>>>,
    running_jobs: Arc<Mutex<HashMap<i64, JoinHandle<usize>>>>,
    permits: Arc<Semaphore>,
    config: SchedulerConfig,
    run_flag: AtomicBool,
    stop_signal: Notify,
    completed_runs: Arc<AtomicU64>,
    failed_runs: AtomicU64,
    items_found: Arc<AtomicU64>,
    start_time: DateTime<Utc>,
}

impl ScraperRegistry {
    pub fn new(store: Arc<dyn ScraperStore>, fetcher: Arc<dyn Fetcher>, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_running_jobs.max(1)));

        Self {
            store,
            fetcher,
            units: Arc::new(RwLock::new(HashMap::new())),
            running_jobs: Arc::new(Mutex::new(HashMap::new())),
            permits,
            config,
            run_flag: AtomicBool::new(true),
            stop_signal: Notify::new(),
            completed_runs: Arc::new(AtomicU64::new(0)),
            failed_runs: AtomicU64::new(0),
            items_found: Arc::new(AtomicU64::new(0)),
            start_time: Utc::now(),
        }
    }

    /// Load every enabled scraper at startup. Any rejected configuration is
    /// returned as an error so the operator sees it before the loop starts.
    pub async fn load_initial(&self) -> Result<usize> {
        let listed = self.store.list_scrapers().await?;
        let now = Utc::now();
        let mut rejected = Vec::new();

        for summary in listed.iter().filter(|s| s.enabled) {
            match self.build_unit(summary.id, now).await {
                Ok(unit) => {
                    self.add_unit(unit).await;
                }
                Err(e) => {
                    tracing::error!(scraper_id = summary.id, error = %e, "Rejected scraper at startup");
                    rejected.push(format!("#{}: {}", summary.id, e));
                }
            }
        }

        if !rejected.is_empty() {
            return Err(AppError::InitialLoad {
                count: rejected.len(),
                details: rejected.join("; "),
            });
        }

        let loaded = self.len().await;
        tracing::info!(units = loaded, "Loaded scrapers");
        Ok(loaded)
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.reconcile_at(Utc::now()).await
    }

    /// Add enabled scrapers that are missing and drop units whose scraper is
    /// disabled or gone. New units start their first interval at `now`.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let listed = match self.store.list_scrapers().await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to list scrapers, keeping current units");
                return report;
            }
        };

        let enabled: HashSet<i64> = listed.iter().filter(|s| s.enabled).map(|s| s.id).collect();
        let current: HashSet<i64> = self.units.read().await.keys().copied().collect();

        let mut to_add: Vec<i64> = enabled.difference(&current).copied().collect();
        to_add.sort_unstable();
        let mut to_remove: Vec<i64> = current.difference(&enabled).copied().collect();
        to_remove.sort_unstable();

        for id in to_add {
            match self.build_unit(id, now).await {
                Ok(unit) => {
                    if self.add_unit(unit).await {
                        report.added.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(scraper_id = id, error = %e, "Rejected scraper configuration");
                    report.rejected.push((id, e.to_string()));
                }
            }
        }

        for id in to_remove {
            if self.remove_unit(id).await {
                report.removed.push(id);
            }
        }

        if !report.is_unchanged() {
            tracing::info!(
                added = ?report.added,
                removed = ?report.removed,
                "Reconciled scrapers"
            );
        }

        report
    }

    async fn build_unit(&self, scraper_id: i64, now: DateTime<Utc>) -> Result<ScraperUnit> {
        let record = self.store.load_scraper(scraper_id).await?;
        let config = ScraperConfig::try_from(record)?;

        Ok(ScraperUnit::starting_at(
            config,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            now,
        ))
    }

    /// Returns false, leaving the existing unit in place, when the id is
    /// already registered.
    pub async fn add_unit(&self, unit: ScraperUnit) -> bool {
        let id = unit.id();
        let mut units = self.units.write().await;
        if units.contains_key(&id) {
            return false;
        }
        units.insert(id, Arc::new(unit));
        tracing::debug!(scraper_id = id, "Added scraper unit");
        true
    }

    /// Removing does not cancel a run that is already in flight.
    pub async fn remove_unit(&self, scraper_id: i64) -> bool {
        let removed = self.units.write().await.remove(&scraper_id).is_some();
        if removed {
            tracing::debug!(scraper_id, "Removed scraper unit");
        }
        removed
    }

    pub async fn contains(&self, scraper_id: i64) -> bool {
        self.units.read().await.contains_key(&scraper_id)
    }

    pub async fn get(&self, scraper_id: i64) -> Option<Arc<ScraperUnit>> {
        self.units.read().await.get(&scraper_id).cloned()
    }

    /// Registered ids in ascending order.
    pub async fn unit_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.units.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.units.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.units.read().await.is_empty()
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Reconcile, then dispatch every unit that is due at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let reconcile = self.reconcile_at(now).await;

        let units: Vec<Arc<ScraperUnit>> = {
            let units = self.units.read().await;
            let mut units: Vec<Arc<ScraperUnit>> = units.values().cloned().collect();
            units.sort_unstable_by_key(|unit| unit.id());
            units
        };

        let mut dispatched = Vec::new();
        let mut running_jobs = self.running_jobs.lock().await;
        self.reap_finished(&mut running_jobs).await;

        for unit in units {
            let id = unit.id();
            if running_jobs.contains_key(&id) {
                tracing::debug!(scraper_id = id, "Previous run still in flight");
                continue;
            }

            if !unit.update_at(now).await {
                continue;
            }

            running_jobs.insert(id, self.dispatch(unit));
            dispatched.push(id);
        }

        if !dispatched.is_empty() {
            tracing::debug!(dispatched = ?dispatched, "Dispatched scraper runs");
        }

        TickReport {
            reconcile,
            dispatched,
        }
    }

    fn dispatch(&self, unit: Arc<ScraperUnit>) -> JoinHandle<usize> {
        let permits = Arc::clone(&self.permits);
        let completed_runs = Arc::clone(&self.completed_runs);
        let items_found = Arc::clone(&self.items_found);

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(scraper_id = unit.id(), "Run permits closed, skipping run");
                    return 0;
                }
            };

            let found = unit.run().await;
            completed_runs.fetch_add(1, Ordering::Relaxed);
            items_found.fetch_add(found as u64, Ordering::Relaxed);
            found
        })
    }

    /// Join handles whose task already ended so a panicked run is reported.
    async fn reap_finished(&self, running_jobs: &mut HashMap<i64, JoinHandle<usize>>) {
        let finished: Vec<i64> = running_jobs
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            if let Some(handle) = running_jobs.remove(&id) {
                if let Err(e) = handle.await {
                    self.run_task_failed(id, &e);
                }
            }
        }
    }

    fn run_task_failed(&self, scraper_id: i64, error: &tokio::task::JoinError) {
        self.failed_runs.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(scraper_id, error = %error, "Scraper run task failed");
    }

    /// Await every in-flight run and return the items they found.
    pub async fn wait_for_runs(&self) -> usize {
        let handles: Vec<(i64, JoinHandle<usize>)> = self.running_jobs.lock().await.drain().collect();
        let (ids, handles): (Vec<i64>, Vec<JoinHandle<usize>>) = handles.into_iter().unzip();

        let mut total = 0;
        for (id, result) in ids.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(found) => total += found,
                Err(e) => self.run_task_failed(id, &e),
            }
        }
        total
    }

    /// Tick until `stop()` is called, then wait for in-flight runs.
    pub async fn run(&self) {
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        let units = self.len().await;
        tracing::info!(
            units,
            tick_interval_ms = self.config.tick_interval_ms,
            max_running_jobs = self.config.max_running_jobs,
            "Scraper registry started"
        );

        while self.run_flag.load(Ordering::SeqCst) {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_signal.notified() => {}
            }
        }

        let pending = self.running_jobs.lock().await.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight runs");
        }
        self.wait_for_runs().await;
        tracing::info!("Scraper registry stopped");
    }

    pub fn stop(&self) {
        self.run_flag.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.run_flag.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> SchedulerStats {
        let total_units = self.len().await;
        let running_runs = self
            .running_jobs
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count();
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_units,
            running_runs,
            completed_runs: self.completed_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            items_found: self.items_found.load(Ordering::Relaxed),
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }
}
