pub mod config;
pub mod database;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod registry;
pub mod scraper_unit;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use database::{ScraperStore, SqliteStore};
pub use extractor::ExtractionEngine;
pub use fetcher::{FetchResult, Fetcher, HttpFetcher};
pub use registry::{ReconcileReport, ScraperRegistry, SchedulerStats, TickReport};
pub use scraper_unit::{RunState, ScraperUnit, UnitState};
pub use utils::error::AppError;
