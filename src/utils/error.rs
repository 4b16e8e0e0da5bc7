use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Scraper configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rejected {count} scraper(s) at startup: {details}")]
    InitialLoad { count: usize, details: String },
}

/// Raised while turning stored scraper rows into a runnable configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Scraper {scraper_id}: required rule '{rule}' is missing")]
    MissingRule { scraper_id: i64, rule: String },

    #[error("Rule '{rule}' has malformed selector path '{value}': {reason}")]
    MalformedSelector {
        rule: String,
        value: String,
        reason: String,
    },

    #[error("Scraper {scraper_id}: invalid url '{url}': {reason}")]
    InvalidUrl {
        scraper_id: i64,
        url: String,
        reason: String,
    },

    #[error("Scraper {scraper_id}: invalid setting {setting}: {reason}")]
    InvalidSetting {
        scraper_id: i64,
        setting: String,
        reason: String,
    },
}

/// Classified failure of a single page fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Unable to connect to {url}: {message}")]
    ConnectionFailure { url: String, message: String },

    #[error("Protocol error fetching {url}: {message}")]
    ProtocolError { url: String, message: String },

    #[error("Unknown error fetching {url}: {message}")]
    Unknown { url: String, message: String },
}

impl FetchError {
    /// Short machine-readable label, used for task logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "TIMEOUT",
            FetchError::ConnectionFailure { .. } => "CONNECTION_FAILURE",
            FetchError::ProtocolError { .. } => "PROTOCOL_ERROR",
            FetchError::Unknown { .. } => "UNKNOWN",
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Scraper not found: {scraper_id}")]
    NotFound { scraper_id: i64 },

    #[error("Invalid stored value for {field}: {message}")]
    InvalidRow { field: String, message: String },
}

/// Result alias for the process-level paths.
pub type Result<T> = std::result::Result<T, AppError>;
