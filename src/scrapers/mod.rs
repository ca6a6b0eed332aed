pub mod browser;
pub(crate) mod extract;
pub mod leboncoin;
pub mod seloger;
pub mod session;
pub mod stealth;
pub mod traits;
pub mod types;

use std::sync::Arc;

use crate::models::Source;

pub use browser::{ChromeSession, ChromeSessionFactory};
pub use leboncoin::LeboncoinAdapter;
pub use seloger::SelogerAdapter;
pub use session::{BrowserSession, Navigator, PacedSession, PageContent, SessionFactory};
pub use stealth::StealthConfig;
pub use traits::SiteAdapter;
pub use types::{RawCard, SearchParams};

/// Adapter for a site
pub fn adapter_for_source(source: Source) -> Arc<dyn SiteAdapter> {
    match source {
        Source::Leboncoin => Arc::new(LeboncoinAdapter::new()),
        Source::Seloger => Arc::new(SelogerAdapter::new()),
    }
}

/// Adapter for a site key such as "leboncoin"
pub fn adapter_for(name: &str) -> Option<Arc<dyn SiteAdapter>> {
    Source::from_key(name).map(adapter_for_source)
}
