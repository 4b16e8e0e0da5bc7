use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::ScraperStore;
use crate::extractor::ExtractionEngine;
use crate::fetcher::{build_search_url, FetchResult, Fetcher};
use crate::models::{ScraperConfig, TaskLog, TaskName, TaskStatus};
use crate::utils::error::{FetchError, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Idle,
    Running,
}

/// Timing and progress of one scraper, owned by its `ScraperUnit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run_at: DateTime<Utc>,
    pub current_tick: DateTime<Utc>,
    pub run_frequency_hours: f64,
    /// Set by `update_at` when the interval has elapsed. Not the configured
    /// enabled flag, which only controls registry membership.
    pub due: bool,
    pub running: bool,
    pub state: UnitState,
    pub last_state: UnitState,
    pub last_status_code: Option<u16>,
    pub runs_completed: u64,
    pub last_items_found: usize,
}

impl RunState {
    fn new(created_at: DateTime<Utc>, run_frequency_hours: f64) -> Self {
        Self {
            last_run_at: created_at,
            current_tick: created_at,
            run_frequency_hours,
            due: false,
            running: false,
            state: UnitState::Idle,
            last_state: UnitState::Idle,
            last_status_code: None,
            runs_completed: 0,
            last_items_found: 0,
        }
    }
}

/// Values produced while one run moves through fetch, extract and persist.
#[derive(Debug)]
struct RunContext {
    run_id: Uuid,
    started: DateTime<Utc>,
    start: Instant,
    status: TaskStatus,
    status_code: Option<u16>,
    items_found: usize,
    error: Option<String>,
}

impl RunContext {
    fn begin() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Utc::now(),
            start: Instant::now(),
            status: TaskStatus::Good,
            status_code: None,
            items_found: 0,
            error: None,
        }
    }

    fn fail(&mut self, err: &FetchError) {
        self.status = TaskStatus::from(err);
        self.error = Some(err.to_string());
    }
}

pub struct ScraperUnit {
    config: ScraperConfig,
    state: Mutex<RunState>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ScraperStore>,
    engine: ExtractionEngine,
}

impl ScraperUnit {
    pub fn new(config: ScraperConfig, fetcher: Arc<dyn Fetcher>, store: Arc<dyn ScraperStore>) -> Self {
        Self::starting_at(config, fetcher, store, Utc::now())
    }

    /// Build a unit whose first interval starts at `created_at`.
    pub fn starting_at(
        config: ScraperConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ScraperStore>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let state = RunState::new(created_at, config.run_frequency_hours);
        Self {
            config,
            state: Mutex::new(state),
            fetcher,
            store,
            engine: ExtractionEngine::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.config.id
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> RunState {
        self.state.lock().await.clone()
    }

    pub async fn update(&self) -> bool {
        self.update_at(Utc::now()).await
    }

    /// Recompute the due flag for a tick at `now`.
    ///
    /// The decision and the `last_run_at` advance happen under one lock, so
    /// two racing ticks can never both see the unit as due. A unit with a run
    /// in flight is never due.
    pub async fn update_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        state.current_tick = now;

        if state.running {
            state.due = false;
            return false;
        }

        let elapsed = (now - state.last_run_at).num_milliseconds() as f64 / 1000.0;
        let threshold = state.run_frequency_hours * 3600.0;

        if elapsed >= threshold {
            state.due = true;
            state.last_run_at = now;
        } else {
            state.due = false;
        }

        tracing::debug!(
            scraper_id = self.config.id,
            elapsed_secs = elapsed,
            threshold_secs = threshold,
            due = state.due,
            "Updated scraper timing"
        );

        state.due
    }

    /// Fetch, persist and extract once. Returns the number of items found.
    ///
    /// Every failure is contained here; the caller only ever sees a count.
    pub async fn run(&self) -> usize {
        {
            let mut state = self.state.lock().await;
            if state.running {
                tracing::debug!(scraper_id = self.config.id, "Run already in progress, skipping");
                return 0;
            }
            state.running = true;
            state.last_state = state.state;
            state.state = UnitState::Running;
        }

        let mut ctx = RunContext::begin();
        tracing::info!(
            scraper_id = self.config.id,
            run_id = %ctx.run_id,
            name = %self.config.name,
            "Starting scraper run"
        );

        self.execute(&mut ctx).await;

        let duration = ctx.start.elapsed();
        let mut run_log = TaskLog::new(self.config.id, TaskName::ScraperRun, ctx.started, duration)
            .with_status(ctx.status);
        if let Some(code) = ctx.status_code {
            run_log = run_log.with_http_code(code);
        }
        if let Some(error) = &ctx.error {
            run_log = run_log.with_content(error.clone());
        }
        self.log_task(&run_log).await;

        metrics::counter!("shelfwatch_runs_total", "outcome" => ctx.status.as_str()).increment(1);
        metrics::counter!("shelfwatch_items_found_total").increment(ctx.items_found as u64);
        metrics::histogram!("shelfwatch_run_duration_seconds").record(duration.as_secs_f64());

        {
            let mut state = self.state.lock().await;
            state.running = false;
            state.last_state = state.state;
            state.state = UnitState::Idle;
            state.due = false;
            state.last_status_code = ctx.status_code;
            state.runs_completed += 1;
            state.last_items_found = ctx.items_found;
        }

        tracing::info!(
            scraper_id = self.config.id,
            run_id = %ctx.run_id,
            outcome = %ctx.status,
            items = ctx.items_found,
            duration_ms = duration.as_millis() as u64,
            "Finished scraper run"
        );

        ctx.items_found
    }

    async fn execute(&self, ctx: &mut RunContext) {
        let url = match build_search_url(&self.config.rules.url, &self.config.search_terms) {
            Ok(url) => url,
            Err(e) => {
                let err = FetchError::Unknown {
                    url: self.config.rules.url.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(scraper_id = self.config.id, error = %err, "Unable to build search url");
                ctx.fail(&err);
                return;
            }
        };

        let page = match self.fetcher.fetch(url.as_str(), self.config.timeout()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(
                    scraper_id = self.config.id,
                    task = %TaskName::FetchPage,
                    outcome = err.label(),
                    error = %err,
                    "Fetch failed, skipping run"
                );
                ctx.fail(&err);
                return;
            }
        };

        ctx.status_code = Some(page.status_code);
        if !page.is_success() {
            ctx.status = TaskStatus::HttpError;
        }

        self.save_page(&page).await;

        if !page.is_success() {
            tracing::warn!(
                scraper_id = self.config.id,
                status_code = page.status_code,
                "Non-success response, skipping extraction"
            );
            return;
        }

        self.process_page(ctx, &page).await;
    }

    /// Raw content first, then the fetch bookkeeping.
    async fn save_page(&self, page: &FetchResult) {
        let id = self.config.id;
        let fetch_status = if page.is_success() {
            TaskStatus::Good
        } else {
            TaskStatus::HttpError
        };

        let saved_at = Utc::now();
        let save_start = Instant::now();
        let saved = self
            .store
            .save_raw_data(id, page.started_at, &page.body, page.status_code)
            .await;
        let save_duration = save_start.elapsed();

        let fetch_log = TaskLog::new(id, TaskName::FetchPage, page.started_at, page.duration)
            .with_http_code(page.status_code)
            .with_status(fetch_status);
        self.log_task(&fetch_log).await;

        let mut save_log = TaskLog::new(id, TaskName::SaveRawData, saved_at, save_duration)
            .with_http_code(page.status_code);
        if let Err(e) = saved {
            save_log = save_log
                .with_status(TaskStatus::Unknown)
                .with_content(e.to_string());
            self.persistence_failed(TaskName::SaveRawData, &e);
        }
        self.log_task(&save_log).await;

        if let Err(e) = self.store.save_last_run(id, Utc::now(), page.status_code).await {
            self.persistence_failed(TaskName::ScraperRun, &e);
        }
    }

    async fn process_page(&self, ctx: &mut RunContext, page: &FetchResult) {
        let id = self.config.id;
        let started = Utc::now();
        let start = Instant::now();

        let items = self.engine.extract_html(&page.body, &self.config.rules);
        ctx.items_found = items.len();

        tracing::debug!(scraper_id = id, items = items.len(), "Extracted items");

        let saved = if items.is_empty() {
            Ok(())
        } else {
            self.store.save_items(id, page.started_at, &items).await
        };

        let mut process_log = TaskLog::new(id, TaskName::ProcessData, started, start.elapsed())
            .with_http_code(page.status_code)
            .with_content(format!("{} items", items.len()));
        if let Err(e) = saved {
            self.persistence_failed(TaskName::ProcessData, &e);
            process_log = process_log
                .with_status(TaskStatus::Unknown)
                .with_content(e.to_string());
        }
        self.log_task(&process_log).await;
    }

    async fn log_task(&self, log: &TaskLog) {
        if let Err(e) = self.store.log_task(log).await {
            self.persistence_failed(log.task, &e);
        }
    }

    fn persistence_failed(&self, task: TaskName, err: &PersistenceError) {
        tracing::warn!(
            scraper_id = self.config.id,
            task = %task,
            error = %err,
            "Persistence failed, continuing run"
        );
        metrics::counter!("shelfwatch_persistence_failures_total", "task" => task.as_str()).increment(1);
    }
}
