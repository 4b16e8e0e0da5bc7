use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{Item, NewScraper, RuleRow, ScraperRecord, ScraperSummary, TaskLog};
use crate::utils::error::{AppError, PersistenceError};

/// Configuration reads and append-only run records for the scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScraperStore: Send + Sync {
    async fn list_scrapers(&self) -> Result<Vec<ScraperSummary>, PersistenceError>;

    async fn load_scraper(&self, scraper_id: i64) -> Result<ScraperRecord, PersistenceError>;

    async fn save_last_run(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        status_code: u16,
    ) -> Result<(), PersistenceError>;

    async fn save_raw_data(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        content: &str,
        status_code: u16,
    ) -> Result<(), PersistenceError>;

    async fn save_items(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        items: &[Item],
    ) -> Result<(), PersistenceError>;

    async fn log_task(&self, log: &TaskLog) -> Result<(), PersistenceError>;
}

pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to `:memory:` is its own database.
    let in_memory = config.url.contains(":memory:");
    let max_connections = if in_memory { 1 } else { config.max_connections };

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(config.min_connections.min(max_connections))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout));

    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await?;
    tracing::debug!(url = %config.url, max_connections, "Opened database pool");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
pub async fn connect_in_memory() -> Result<SqlitePool, AppError> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        acquire_timeout: 5,
    };
    let pool = connect(&config).await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_customer(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, PersistenceError> {
        let result = sqlx::query("INSERT INTO customers (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a scraper and its rules in one transaction.
    pub async fn create_scraper(&self, scraper: &NewScraper) -> Result<i64, PersistenceError> {
        let mut tx = self.pool.begin().await?;

        let scraper_id = sqlx::query(
            r"
            INSERT INTO scrapers (name, description, enabled, customer_id, search_terms, timeout, run_frequency)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&scraper.name)
        .bind(&scraper.description)
        .bind(scraper.enabled as i64)
        .bind(scraper.customer_id)
        .bind(&scraper.search_terms)
        .bind(scraper.timeout)
        .bind(scraper.run_frequency)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for rule in &scraper.rules {
            sqlx::query("INSERT INTO rules (name, value, scraper_id, customer_id) VALUES (?, ?, ?, ?)")
                .bind(&rule.name)
                .bind(&rule.value)
                .bind(scraper_id)
                .bind(scraper.customer_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(scraper_id)
    }

    /// Returns false when no scraper has this id.
    pub async fn set_enabled(&self, scraper_id: i64, enabled: bool) -> Result<bool, PersistenceError> {
        let result = sqlx::query("UPDATE scrapers SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(scraper_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert the two sample scrapers unless the table already has rows.
    pub async fn seed_sample_data(&self) -> Result<usize, PersistenceError> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scrapers")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            tracing::info!(existing, "Scrapers already present, skipping sample data");
            return Ok(0);
        }

        let argos = self.create_customer("argos", None).await?;
        let wickes = self.create_customer("wickes", None).await?;

        let samples = [
            NewScraper {
                name: "argos-xbox".to_string(),
                description: Some("Scraper for the argos search page".to_string()),
                enabled: true,
                customer_id: argos,
                search_terms: "xbox series x".to_string(),
                timeout: 30,
                run_frequency: 0.0833,
                rules: vec![
                    RuleRow::new("url", "https://www.argos.co.uk/search"),
                    RuleRow::new("searches", "class/search"),
                    RuleRow::new("products", "class/ProductCardstyles__Wrapper-l8f8q8-1"),
                    RuleRow::new("title", "class/ProductCardstyles__Title-l8f8q8-12"),
                    RuleRow::new("price", "class/ProductCardstyles__PriceText-l8f8q8-14"),
                    RuleRow::new("stock", ""),
                ],
            },
            NewScraper {
                name: "wickes-bath-taps".to_string(),
                description: Some("Scraper for the wickes search page".to_string()),
                enabled: true,
                customer_id: wickes,
                search_terms: "bath taps".to_string(),
                timeout: 30,
                run_frequency: 0.0833,
                rules: vec![
                    RuleRow::new("url", "https://www.wickes.co.uk/search?text="),
                    RuleRow::new("searches", "class/products-list"),
                    RuleRow::new("products", "class/card"),
                    RuleRow::new("title", "class/product-card__title"),
                    RuleRow::new("price", "class/product-card__price"),
                    RuleRow::new("stock", ""),
                ],
            },
        ];

        for sample in &samples {
            self.create_scraper(sample).await?;
        }

        tracing::info!(count = samples.len(), "Inserted sample scrapers");
        Ok(samples.len())
    }

    async fn load_rules(&self, scraper_id: i64) -> Result<Vec<RuleRow>, PersistenceError> {
        let rows = sqlx::query("SELECT name, value FROM rules WHERE scraper_id = ? ORDER BY id")
            .bind(scraper_id)
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            rules.push(RuleRow {
                name: row.try_get("name")?,
                value: row.try_get("value")?,
            });
        }
        Ok(rules)
    }
}

#[async_trait]
impl ScraperStore for SqliteStore {
    async fn list_scrapers(&self) -> Result<Vec<ScraperSummary>, PersistenceError> {
        let rows = sqlx::query("SELECT id, enabled FROM scrapers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut scrapers = Vec::with_capacity(rows.len());
        for row in rows {
            scrapers.push(ScraperSummary {
                id: row.try_get("id")?,
                enabled: row.try_get::<i64, _>("enabled")? != 0,
            });
        }
        Ok(scrapers)
    }

    async fn load_scraper(&self, scraper_id: i64) -> Result<ScraperRecord, PersistenceError> {
        let row = sqlx::query(
            r"
            SELECT id, name, enabled, search_terms, timeout, run_frequency, last_updated, status_code
            FROM scrapers
            WHERE id = ?
            ",
        )
        .bind(scraper_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PersistenceError::NotFound { scraper_id })?;

        let last_updated: Option<String> = row.try_get("last_updated")?;
        let last_updated = last_updated
            .map(|value| parse_timestamp("last_updated", &value))
            .transpose()?;

        Ok(ScraperRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            search_terms: row.try_get("search_terms")?,
            timeout: row.try_get("timeout")?,
            run_frequency: row.try_get("run_frequency")?,
            last_updated,
            status_code: row.try_get("status_code")?,
            rules: self.load_rules(scraper_id).await?,
        })
    }

    async fn save_last_run(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        status_code: u16,
    ) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE scrapers SET last_updated = ?, status_code = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(status_code as i64)
            .bind(scraper_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_raw_data(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        content: &str,
        status_code: u16,
    ) -> Result<(), PersistenceError> {
        sqlx::query("INSERT INTO raw_data (scraper_id, date_time, content, http_code) VALUES (?, ?, ?, ?)")
            .bind(scraper_id)
            .bind(at.to_rfc3339())
            .bind(content)
            .bind(status_code as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_items(
        &self,
        scraper_id: i64,
        at: DateTime<Utc>,
        items: &[Item],
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let at = at.to_rfc3339();

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO items (scraper_id, date_time, position, title, price, price_amount, out_of_stock)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(scraper_id)
            .bind(&at)
            .bind(position as i64)
            .bind(&item.title)
            .bind(&item.price)
            .bind(item.price_amount().map(|amount| amount.to_string()))
            .bind(item.out_of_stock as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn log_task(&self, log: &TaskLog) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            INSERT INTO scrapers_log (scraper_id, started, ended, task, http_code, status_code, content, duration, owner)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(log.scraper_id)
        .bind(log.started.to_rfc3339())
        .bind(log.ended.to_rfc3339())
        .bind(log.task.as_str())
        .bind(log.http_code.map(i64::from))
        .bind(log.status.as_str())
        .bind(&log.content)
        .bind(log.duration.as_secs_f64())
        .bind(&log.owner)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// RFC 3339, or the `YYYY-MM-DD HH:MM:SS[.ffffff]` form older rows use.
fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| PersistenceError::InvalidRow {
            field: field.to_string(),
            message: format!("{value}: {e}"),
        })
}
