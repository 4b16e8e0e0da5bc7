pub mod error;

pub use error::{AppError, ConfigurationError, FetchError, PersistenceError};
