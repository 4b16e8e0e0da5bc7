pub mod item;
pub mod rule_set;
pub mod scraper;
pub mod task_log;

// Re-exports for convenience
pub use item::*;
pub use rule_set::*;
pub use scraper::*;
pub use task_log::*;
