pub mod crawler;

pub use crawler::config::CrawlerConfig;
pub use crawler::crawler::{CrawlSettings, Crawler};
pub use crawler::errors::{CrawlerError, CrawlerResult};
pub use crawler::product::ProductRecord;
pub use crawler::state::RunSummary;
