use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::error::Result;
use crate::models::{Listing, Source};
use crate::scrapers::extract::{collect_cards, first_text, image_urls, parse_price, parse_surface, resolve_url};
use crate::scrapers::session::Navigator;
use crate::scrapers::traits::SiteAdapter;
use crate::scrapers::types::{range_param, RawCard, SearchParams};

const SEARCH_BASE: &str = "https://www.leboncoin.fr/recherche";
/// "Ventes immobilières"
const CATEGORY: &str = "9";

const CARD: &str = r#"[data-qa-id="aditem_container"]"#;
const RESULTS_MARKER: &str = r#"[data-test-id="listing-column"], [data-qa-id="no_result"]"#;
const TITLE: &str = r#"[data-qa-id="aditem_title"]"#;
const PRICE: &str = r#"[data-qa-id="aditem_price"], [data-test-id="price"]"#;
const LOCATION: &str = r#"[data-qa-id="aditem_location"]"#;
const CRITERIA: &str = r#"[data-qa-id="aditem_criteria"]"#;

/// leboncoin.fr real-estate sales
#[derive(Debug, Default)]
pub struct LeboncoinAdapter;

impl LeboncoinAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SiteAdapter for LeboncoinAdapter {
    fn source(&self) -> Source {
        Source::Leboncoin
    }

    fn search_url(&self, params: &SearchParams) -> String {
        let mut query: Vec<(&str, String)> = vec![
            ("category", CATEGORY.to_string()),
            ("locations", params.location.clone()),
        ];
        if let Some(price) = range_param(params.min_price, params.max_price) {
            query.push(("price", price));
        }
        if let Some(square) = range_param(params.min_surface, params.max_surface) {
            query.push(("square", square));
        }

        match Url::parse_with_params(SEARCH_BASE, &query) {
            Ok(url) => url.to_string(),
            Err(_) => SEARCH_BASE.to_string(),
        }
    }

    async fn list_cards(&self, session: &mut dyn Navigator, search_url: &str) -> Result<Vec<RawCard>> {
        info!("Opening leboncoin search page...");
        let page = session.navigate(search_url).await?;
        debug!("Downloaded {} bytes of HTML", page.html.len());

        let cards = collect_cards(&page.html, &page.final_url, CARD, RESULTS_MARKER)?;
        info!("Found {} leboncoin cards", cards.len());
        Ok(cards)
    }

    fn parse_card(&self, card: &RawCard) -> Option<Listing> {
        let fragment = Html::parse_fragment(&card.html);
        let root = fragment.root_element();

        // The card is either the link itself or wraps it
        let link = Selector::parse("a[href]").ok()?;
        let href = root.select(&link).next()?.value().attr("href")?;
        let url = resolve_url(&card.page_url, href)?;

        let price = parse_price(&first_text(root, PRICE))?;

        let mut listing = Listing::new(Source::Leboncoin, url, price);
        listing.title = first_text(root, TITLE);
        if listing.title.is_empty() {
            // Older markup only carries the title as an attribute
            listing.title = Selector::parse("p[title]")
                .ok()
                .and_then(|sel| root.select(&sel).next())
                .and_then(|p| p.value().attr("title"))
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
        }
        listing.location = first_text(root, LOCATION);

        let criteria = first_text(root, CRITERIA);
        listing.surface = parse_surface(&criteria).or_else(|| parse_surface(&listing.title));
        listing.description = criteria;
        listing.photos = image_urls(root, &card.page_url);

        Some(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.leboncoin.fr/recherche?category=9&locations=Lyon";

    fn card(body: &str) -> RawCard {
        RawCard::new(
            format!(r#"<article data-qa-id="aditem_container">{}</article>"#, body),
            PAGE,
        )
    }

    #[test]
    fn test_parses_complete_card() {
        let raw = card(
            r#"<a href="/ad/ventes_immobilieres/2456789012">
                 <img src="https://img.leboncoin.fr/api/v1/lbcpb1/images/aa.jpg">
                 <img src="https://img.leboncoin.fr/api/v1/lbcpb1/images/aa.jpg">
                 <p data-qa-id="aditem_title">Appartement 3 pièces</p>
                 <p data-qa-id="aditem_criteria">3 pièces · 65 m²</p>
                 <p data-qa-id="aditem_price"><span>250 000 €</span></p>
                 <p data-qa-id="aditem_location">Lyon 69003 3e Arrondissement</p>
               </a>"#,
        );

        let listing = LeboncoinAdapter::new().parse_card(&raw).unwrap();
        assert_eq!(listing.id, "2456789012");
        assert_eq!(listing.url, "https://www.leboncoin.fr/ad/ventes_immobilieres/2456789012");
        assert_eq!(listing.price, 250_000);
        assert_eq!(listing.surface, Some(65.0));
        assert_eq!(listing.title, "Appartement 3 pièces");
        assert_eq!(listing.location, "Lyon 69003 3e Arrondissement");
        assert_eq!(listing.photos.len(), 1);
        assert_eq!(listing.source, Source::Leboncoin);
    }

    #[test]
    fn test_missing_price_is_absent() {
        let raw = card(
            r#"<a href="/ad/ventes_immobilieres/1"><p data-qa-id="aditem_title">Terrain</p></a>"#,
        );
        assert!(LeboncoinAdapter::new().parse_card(&raw).is_none());
    }

    #[test]
    fn test_missing_link_is_absent() {
        let raw = card(r#"<p data-qa-id="aditem_price">99 000 €</p>"#);
        assert!(LeboncoinAdapter::new().parse_card(&raw).is_none());
    }

    #[test]
    fn test_partial_card_keeps_empty_text_fields() {
        let raw = card(r#"<a href="/ad/ventes_immobilieres/7"><p data-qa-id="aditem_price">180 000 €</p></a>"#);
        let listing = LeboncoinAdapter::new().parse_card(&raw).unwrap();

        assert_eq!(listing.title, "");
        assert_eq!(listing.location, "");
        assert_eq!(listing.description, "");
        assert_eq!(listing.surface, None);
        assert!(listing.photos.is_empty());
    }

    #[test]
    fn test_search_url_carries_filters() {
        let params = SearchParams {
            location: "Lyon".to_string(),
            min_price: Some(100_000),
            max_price: Some(300_000),
            min_surface: Some(40),
            max_surface: None,
        };
        let url = LeboncoinAdapter::new().search_url(&params);

        assert!(url.starts_with("https://www.leboncoin.fr/recherche?category=9"));
        assert!(url.contains("locations=Lyon"));
        assert!(url.contains("price=100000-300000"));
        assert!(url.contains("square=40-"));
    }
}
