use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Listing, Source};
use crate::scrapers::session::Navigator;
use crate::scrapers::types::{RawCard, SearchParams};

/// Site-specific scraping logic.
///
/// Navigation (`list_cards`) is I/O and may be retried by the caller; parsing
/// (`parse_card`) is pure so selectors can be tested against fixture HTML.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Build the results URL for a search
    fn search_url(&self, params: &SearchParams) -> String;

    /// Load the results page and return every ad card on it, in page order.
    /// Zero results is an empty vector, not an error.
    async fn list_cards(&self, session: &mut dyn Navigator, search_url: &str) -> Result<Vec<RawCard>>;

    /// `None` when the card lacks a price or a link or cannot be read at all
    fn parse_card(&self, card: &RawCard) -> Option<Listing>;
}
