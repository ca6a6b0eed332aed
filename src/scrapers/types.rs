use serde::{Deserialize, Serialize};

/// Search filters an adapter turns into a site search URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// City, postcode or area as the site expects it
    pub location: String,
    /// Minimum price (EUR)
    pub min_price: Option<u64>,
    /// Maximum price (EUR)
    pub max_price: Option<u64>,
    /// Minimum surface in square meters
    pub min_surface: Option<u32>,
    /// Maximum surface in square meters
    pub max_surface: Option<u32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            location: "Paris".to_string(),
            min_price: None,
            max_price: None,
            min_surface: None,
            max_surface: None,
        }
    }
}

/// Raw markup of one ad card as found on a results page
#[derive(Debug, Clone, PartialEq)]
pub struct RawCard {
    pub html: String,
    /// Page the card came from, used to resolve relative links
    pub page_url: String,
}

impl RawCard {
    pub fn new(html: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            page_url: page_url.into(),
        }
    }
}

/// `min-max` range parameter, `min-max` with an empty side when only one bound is set
pub(crate) fn range_param<T: ToString>(min: Option<T>, max: Option<T>) -> Option<String> {
    match (min, max) {
        (None, None) => None,
        (min, max) => Some(format!(
            "{}-{}",
            min.map(|v| v.to_string()).unwrap_or_default(),
            max.map(|v| v.to_string()).unwrap_or_default()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_param() {
        assert_eq!(range_param::<u64>(None, None), None);
        assert_eq!(range_param(Some(100_000u64), None).as_deref(), Some("100000-"));
        assert_eq!(range_param(None, Some(80u32)).as_deref(), Some("-80"));
        assert_eq!(range_param(Some(20u32), Some(80u32)).as_deref(), Some("20-80"));
    }
}
