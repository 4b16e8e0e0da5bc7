use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::utils::error::FetchError;

pub const DEFAULT_OWNER: &str = "scraper";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskName {
    FetchPage,
    SaveRawData,
    ProcessData,
    ScraperRun,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::FetchPage => "fetch-page",
            TaskName::SaveRawData => "save-raw-data",
            TaskName::ProcessData => "process-data",
            TaskName::ScraperRun => "scraper-run",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Good,
    HttpError,
    Timeout,
    ConnectionFailure,
    ProtocolError,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Good => "GOOD",
            TaskStatus::HttpError => "HTTP_ERROR",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::ConnectionFailure => "CONNECTION_FAILURE",
            TaskStatus::ProtocolError => "PROTOCOL_ERROR",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

impl From<&FetchError> for TaskStatus {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Timeout { .. } => TaskStatus::Timeout,
            FetchError::ConnectionFailure { .. } => TaskStatus::ConnectionFailure,
            FetchError::ProtocolError { .. } => TaskStatus::ProtocolError,
            FetchError::Unknown { .. } => TaskStatus::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the scrapers task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub scraper_id: i64,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub task: TaskName,
    pub http_code: Option<u16>,
    pub status: TaskStatus,
    pub content: Option<String>,
    pub duration: Duration,
    pub owner: String,
}

impl TaskLog {
    pub fn new(scraper_id: i64, task: TaskName, started: DateTime<Utc>, duration: Duration) -> Self {
        let ended = started
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            scraper_id,
            started,
            ended,
            task,
            http_code: None,
            status: TaskStatus::Good,
            content: None,
            duration,
            owner: DEFAULT_OWNER.to_string(),
        }
    }

    pub fn with_http_code(mut self, http_code: u16) -> Self {
        self.http_code = Some(http_code);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}
