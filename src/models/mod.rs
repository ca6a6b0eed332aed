use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Site a listing was scraped from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Leboncoin,
    Seloger,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Leboncoin => "leboncoin",
            Source::Seloger => "seloger",
        }
    }

    /// Look up a source by its site key ("leboncoin", "seloger")
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "leboncoin" => Some(Source::Leboncoin),
            "seloger" => Some(Source::Seloger),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical real-estate listing, shared by every site adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: u64,
    pub surface: Option<f64>,
    pub location: String,
    pub url: String,
    pub description: String,
    pub photos: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub source: Source,
}

impl Listing {
    /// Build a listing observed now. Text fields start empty, the id is
    /// derived from the URL.
    pub fn new(source: Source, url: impl Into<String>, price: u64) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: derive_listing_id(&url),
            title: String::new(),
            price,
            surface: None,
            location: String::new(),
            url,
            description: String::new(),
            photos: Vec::new(),
            first_seen: now,
            last_update: now,
            source,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::for_listing(self)
    }
}

/// Stable name of one real-world ad inside the fingerprint index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub source: Source,
    pub locator: Locator,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Id(String),
    Url(String),
}

impl IdentityKey {
    /// `(source, id)` when the listing carries an id, `(source, normalized url)` otherwise
    pub fn for_listing(listing: &Listing) -> Self {
        let id = listing.id.trim();
        let locator = if id.is_empty() {
            Locator::Url(normalize_url(&listing.url))
        } else {
            Locator::Id(id.to_string())
        };
        Self {
            source: listing.source,
            locator,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Locator::Id(id) => write!(f, "{}:{}", self.source, id),
            Locator::Url(url) => write!(f, "{}:{}", self.source, url),
        }
    }
}

/// Outcome of reconciling one observation against the index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Updated,
    Unchanged,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::New => "new",
            Classification::Updated => "updated",
            Classification::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// Query parameters that only track where a visitor came from
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "xtor", "at_medium", "at_campaign", "at_platform"];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Lowercase scheme and host, drop the fragment, tracking parameters and a
/// trailing path slash. Remaining query parameters are kept in sorted order.
/// Unparseable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_string();
    };

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    kept.sort();

    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    if kept.is_empty() {
        url.set_query(None);
        url.as_str().trim_end_matches('/').to_string()
    } else {
        url.query_pairs_mut().clear().extend_pairs(&kept);
        url.to_string()
    }
}

/// Short lowercase hex digest, the first 8 bytes of SHA-256
pub(crate) fn short_digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Site-scoped id for an ad URL.
///
/// A purely numeric last path segment is the site's ad number and becomes the id
/// (`/ad/ventes_immobilieres/2456789012`, `/annonces/achat/appartement/paris-11eme-75/212345678.htm`).
/// Any other URL gets `u` followed by [`short_digest`] of the normalized URL, query
/// included, so ads told apart by a query parameter keep distinct ids.
pub fn derive_listing_id(raw_url: &str) -> String {
    match url_slug(raw_url) {
        Some(slug) => slug,
        None => format!("u{}", short_digest(&normalize_url(raw_url))),
    }
}

fn url_slug(raw_url: &str) -> Option<String> {
    let url = Url::parse(raw_url.trim()).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = segment
        .strip_suffix(".htm")
        .or_else(|| segment.strip_suffix(".html"))
        .unwrap_or(segment);

    if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) {
        Some(stem.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_slug_becomes_id() {
        assert_eq!(
            derive_listing_id("https://www.leboncoin.fr/ad/ventes_immobilieres/2456789012"),
            "2456789012"
        );
        assert_eq!(
            derive_listing_id("https://www.seloger.com/annonces/achat/appartement/paris-11eme-75/212345678.htm?p=1"),
            "212345678"
        );
    }

    #[test]
    fn test_url_without_slug_falls_back_to_hash() {
        let a = derive_listing_id("https://www.example.fr/annonce/appartement-lumineux?utm_source=mail");
        let b = derive_listing_id("HTTPS://WWW.EXAMPLE.FR/annonce/appartement-lumineux/#photos");

        assert!(a.starts_with('u'));
        assert_eq!(a.len(), 17);
        assert_eq!(a, b, "normalization should make the fallback id stable");
    }

    #[test]
    fn test_place_slug_is_not_an_ad_number() {
        let first = derive_listing_id("https://www.example.fr/achat/appartement/lyon-3eme-69/?idannonce=111111");
        let second = derive_listing_id("https://www.example.fr/achat/appartement/lyon-3eme-69/?idannonce=222222");

        assert!(first.starts_with('u'));
        assert_ne!(first, second);
        assert_eq!(
            first,
            derive_listing_id("https://www.example.fr/achat/appartement/lyon-3eme-69?utm_campaign=x&idannonce=111111")
        );
    }

    #[test]
    fn test_normalize_url_strips_tracking_fragment_and_slash() {
        assert_eq!(
            normalize_url(" https://WWW.Leboncoin.fr/ad/123/?utm_medium=x#top "),
            "https://www.leboncoin.fr/ad/123"
        );
        assert_eq!(
            normalize_url("https://www.seloger.com/annonces/lyon-3eme-69/?idannonce=7&gclid=abc&b=2"),
            "https://www.seloger.com/annonces/lyon-3eme-69?b=2&idannonce=7"
        );
        assert_eq!(normalize_url("not a url/"), "not a url");
    }

    #[test]
    fn test_identity_key_prefers_id_then_url() {
        let mut listing = Listing::new(Source::Leboncoin, "https://www.leboncoin.fr/ad/ventes_immobilieres/42", 100);
        assert_eq!(listing.identity_key().locator, Locator::Id("42".to_string()));

        listing.id = String::new();
        assert_eq!(
            listing.identity_key().locator,
            Locator::Url("https://www.leboncoin.fr/ad/ventes_immobilieres/42".to_string())
        );
    }

    #[test]
    fn test_source_keys() {
        assert_eq!(Source::from_key(" SeLoger "), Some(Source::Seloger));
        assert_eq!(Source::from_key("booli"), None);
        assert_eq!(Source::Leboncoin.to_string(), "leboncoin");
    }
}
