use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{RuleRow, RuleSet};
use crate::utils::error::ConfigurationError;

/// `(id, enabled)` pair as listed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperSummary {
    pub id: i64,
    pub enabled: bool,
}

/// A scraper row and its rules exactly as stored, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperRecord {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub search_terms: String,
    pub timeout: i64,
    pub run_frequency: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub status_code: Option<i64>,
    pub rules: Vec<RuleRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScraper {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub customer_id: i64,
    pub search_terms: String,
    pub timeout: i64,
    pub run_frequency: f64,
    pub rules: Vec<RuleRow>,
}

/// Validated, immutable configuration a `ScraperUnit` runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub search_terms: String,
    pub timeout_secs: u64,
    pub run_frequency_hours: f64,
    pub rules: RuleSet,
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TryFrom<ScraperRecord> for ScraperConfig {
    type Error = ConfigurationError;

    fn try_from(record: ScraperRecord) -> Result<Self, Self::Error> {
        let invalid = |setting: &str, reason: String| ConfigurationError::InvalidSetting {
            scraper_id: record.id,
            setting: setting.to_string(),
            reason,
        };

        if record.timeout <= 0 {
            return Err(invalid(
                "timeout",
                format!("must be a positive number of seconds, got {}", record.timeout),
            ));
        }

        if !record.run_frequency.is_finite() || record.run_frequency <= 0.0 {
            return Err(invalid(
                "run_frequency",
                format!("must be a positive number of hours, got {}", record.run_frequency),
            ));
        }

        let rules = RuleSet::from_rules(record.id, &record.rules)?;

        Ok(Self {
            id: record.id,
            name: record.name,
            enabled: record.enabled,
            search_terms: record.search_terms.trim().to_string(),
            timeout_secs: record.timeout as u64,
            run_frequency_hours: record.run_frequency,
            rules,
        })
    }
}
