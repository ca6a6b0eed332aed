pub mod config;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod scrapers;
pub mod sink;

pub use config::{Config, SearchTarget};
pub use error::{Result, ScrapeError};
pub use fingerprint::{FingerprintEntry, FingerprintIndex};
pub use models::{Classification, IdentityKey, Listing, Source};
pub use orchestrator::{CycleOutcome, CycleSummary, RetryPolicy, ScrapeOrchestrator};
pub use rate_limit::RateLimiter;
pub use scrapers::{adapter_for, SiteAdapter};
pub use sink::ListingSink;
