// Shared fixtures for the shelfwatch integration tests

pub mod registry_tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shelfwatch::config::SchedulerConfig;
use shelfwatch::database::ScraperStore;
use shelfwatch::fetcher::{FetchResult, Fetcher};
use shelfwatch::models::{Item, RuleRow, ScraperRecord, ScraperSummary, TaskLog, TaskName, TaskStatus};
use shelfwatch::registry::ScraperRegistry;
use shelfwatch::utils::error::{FetchError, PersistenceError};

pub const WIDGETS_PAGE: &str = r#"
<html>
  <body>
    <ul class="list">
      <li class="card"><h2 class="title">Widget A</h2><span class="price">£10.00 </span></li>
      <li class="card"><h2 class="title">Widget B</h2><span class="price">£20.00</span></li>
    </ul>
  </body>
</html>
"#;

pub fn widget_rules(url: &str) -> Vec<RuleRow> {
    vec![
        RuleRow::new("url", url),
        RuleRow::new("searches", "class/list"),
        RuleRow::new("products", "class/card"),
        RuleRow::new("title", "class/title"),
        RuleRow::new("price", "class/price"),
        RuleRow::new("stock", ""),
    ]
}

pub fn scraper_record(id: i64, run_frequency: f64) -> ScraperRecord {
    ScraperRecord {
        id,
        name: format!("widgets-{id}"),
        enabled: true,
        search_terms: "widgets".to_string(),
        timeout: 5,
        run_frequency,
        last_updated: None,
        status_code: None,
        rules: widget_rules("https://shop.example.com/search"),
    }
}

pub fn scheduler_config(max_running_jobs: usize) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 10,
        max_running_jobs,
    }
}

pub fn registry(
    store: Arc<MemoryStore>,
    fetcher: Arc<dyn Fetcher>,
    max_running_jobs: usize,
) -> ScraperRegistry {
    ScraperRegistry::new(store, fetcher, scheduler_config(max_running_jobs))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    SaveLastRun { scraper_id: i64, status_code: u16 },
    SaveRawData { scraper_id: i64, status_code: u16 },
    SaveItems { scraper_id: i64, count: usize },
    LogTask { scraper_id: i64, task: TaskName, status: TaskStatus },
}

impl StoreCall {
    pub fn scraper_id(&self) -> i64 {
        match self {
            StoreCall::SaveLastRun { scraper_id, .. }
            | StoreCall::SaveRawData { scraper_id, .. }
            | StoreCall::SaveItems { scraper_id, .. }
            | StoreCall::LogTask { scraper_id, .. } => *scraper_id,
        }
    }
}

/// In-memory store that records every write in call order.
#[derive(Default)]
pub struct MemoryStore {
    scrapers: Mutex<BTreeMap<i64, ScraperRecord>>,
    calls: Mutex<Vec<StoreCall>>,
    items: Mutex<Vec<(i64, Item)>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: ScraperRecord) {
        self.scrapers.lock().unwrap().insert(record.id, record);
    }

    pub fn set_enabled(&self, scraper_id: i64, enabled: bool) {
        if let Some(record) = self.scrapers.lock().unwrap().get_mut(&scraper_id) {
            record.enabled = enabled;
        }
    }

    pub fn delete(&self, scraper_id: i64) {
        self.scrapers.lock().unwrap().remove(&scraper_id);
    }

    pub fn calls_for(&self, scraper_id: i64) -> Vec<StoreCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.scraper_id() == scraper_id)
            .cloned()
            .collect()
    }

    pub fn items_for(&self, scraper_id: i64) -> Vec<Item> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == scraper_id)
            .map(|(_, item)| item.clone())
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ScraperStore for MemoryStore {
    async fn list_scrapers(&self) -> Result<Vec<ScraperSummary>, PersistenceError> {
        Ok(self
            .scrapers
            .lock()
            .unwrap()
            .values()
            .map(|record| ScraperSummary {
                id: record.id,
                enabled: record.enabled,
            })
            .collect())
    }

    async fn load_scraper(&self, scraper_id: i64) -> Result<ScraperRecord, PersistenceError> {
        self.scrapers
            .lock()
            .unwrap()
            .get(&scraper_id)
            .cloned()
            .ok_or(PersistenceError::NotFound { scraper_id })
    }

    async fn save_last_run(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        status_code: u16,
    ) -> Result<(), PersistenceError> {
        if let Some(record) = self.scrapers.lock().unwrap().get_mut(&scraper_id) {
            record.last_updated = Some(at);
            record.status_code = Some(i64::from(status_code));
        }
        self.record(StoreCall::SaveLastRun {
            scraper_id,
            status_code,
        });
        Ok(())
    }

    async fn save_raw_data(
        &self,
        scraper_id: i64,
        _at: DateTime<Utc>,
        _content: &str,
        status_code: u16,
    ) -> Result<(), PersistenceError> {
        self.record(StoreCall::SaveRawData {
            scraper_id,
            status_code,
        });
        Ok(())
    }

    async fn save_items(
        &self,
        scraper_id: i64,
        _at: DateTime<Utc>,
        items: &[Item],
    ) -> Result<(), PersistenceError> {
        self.items
            .lock()
            .unwrap()
            .extend(items.iter().cloned().map(|item| (scraper_id, item)));
        self.record(StoreCall::SaveItems {
            scraper_id,
            count: items.len(),
        });
        Ok(())
    }

    async fn log_task(&self, log: &TaskLog) -> Result<(), PersistenceError> {
        self.record(StoreCall::LogTask {
            scraper_id: log.scraper_id,
            task: log.task,
            status: log.status,
        });
        Ok(())
    }
}

/// Answers every request with the same page after an optional delay and
/// tracks how many requests overlap.
pub struct StaticFetcher {
    status_code: u16,
    body: String,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new(status_code: u16, body: &str) -> Arc<Self> {
        Self::with_delay(status_code, body, Duration::ZERO)
    }

    pub fn with_delay(status_code: u16, body: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            status_code,
            body: body.to_string(),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResult, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(url.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let started_at = Utc::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(FetchResult {
            url: url.to_string(),
            status_code: self.status_code,
            body: self.body.clone(),
            started_at,
            ended_at: Utc::now(),
            duration: self.delay,
        })
    }
}

/// Fails every request with a timeout.
#[derive(Default)]
pub struct TimeoutFetcher {
    calls: AtomicUsize,
}

impl TimeoutFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for TimeoutFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResult, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}
