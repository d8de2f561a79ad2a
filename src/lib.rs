pub mod browser;
pub mod config;
pub mod delay_manager;
pub mod dom;
pub mod error;
pub mod extractor;
pub mod logger;
pub mod record;
pub mod result_sink;
pub mod scraper;
pub mod search_url;
pub mod session_store;

// Exporting types for convenience
pub use browser::{Browser, HttpBrowser};
pub use config::{AppConfig, Country, DatePosted, JobType, RawSearch, ScraperConfig, SearchQuery};
pub use error::{Result, ScrapeError, TransientFault};
pub use extractor::Extractor;
pub use record::JobRecord;
pub use result_sink::ResultSink;
pub use self::scraper::{CancelToken, RunReport, Scraper, StopReason};
pub use session_store::{SessionState, SessionStore};
