use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// Browser engine, context or page could not be created
    #[error("Session init failure: {0}")]
    SessionInit(String),

    /// A single page load failed (timeout, network, block page)
    #[error("Navigation failure for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// The adapter could not enumerate cards for a target
    #[error("Extraction failure: {0}")]
    Extraction(String),

    /// Downstream persistence or notification rejected an item
    #[error("Sink failure: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScrapeError {
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        ScrapeError::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Only navigation failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Navigation { .. })
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Sink(err.to_string())
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Sink(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_navigation_is_retryable() {
        assert!(ScrapeError::navigation("https://www.leboncoin.fr", "timeout").is_retryable());
        assert!(!ScrapeError::SessionInit("no chrome".into()).is_retryable());
        assert!(!ScrapeError::Extraction("no results container".into()).is_retryable());
        assert!(!ScrapeError::Sink("disk full".into()).is_retryable());
    }

    #[test]
    fn test_navigation_message_names_url() {
        let err = ScrapeError::navigation("https://www.seloger.com/list", "blocked");
        assert_eq!(
            err.to_string(),
            "Navigation failure for https://www.seloger.com/list: blocked"
        );
    }
}
