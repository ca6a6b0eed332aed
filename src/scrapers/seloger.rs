use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::error::Result;
use crate::models::{Listing, Source};
use crate::scrapers::extract::{collect_cards, first_text, image_urls, parse_price, parse_surface, resolve_url, text_of};
use crate::scrapers::session::Navigator;
use crate::scrapers::traits::SiteAdapter;
use crate::scrapers::types::{RawCard, SearchParams};

const SEARCH_BASE: &str = "https://www.seloger.com/list.htm";

const CARD: &str = r#"[data-testid="sl.explore.card-container"]"#;
const RESULTS_MARKER: &str = r#"[data-testid="sl.explore.results-list"], [data-testid="sl.explore.no-results"]"#;
const LINK: &str = r#"a[data-testid="sl.explore.coveringLink"], a[href]"#;
const TITLE: &str = r#"[data-test="sl.title"]"#;
const PRICE: &str = r#"[data-test="sl.price-label"]"#;
const ADDRESS: &str = r#"[data-test="sl.address"]"#;
const TAGS: &str = r#"[data-test="sl.tags"] li"#;
const DESCRIPTION: &str = r#"[data-testid="sl.explore.card-description"]"#;

/// seloger.com purchase listings
#[derive(Debug, Default)]
pub struct SelogerAdapter;

impl SelogerAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// seloger ranges are `min/max` with `NaN` for an open side
fn bound_pair<T: ToString>(min: Option<T>, max: Option<T>) -> Option<String> {
    if min.is_none() && max.is_none() {
        return None;
    }
    let side = |v: Option<T>| v.map(|v| v.to_string()).unwrap_or_else(|| "NaN".to_string());
    Some(format!("{}/{}", side(min), side(max)))
}

#[async_trait]
impl SiteAdapter for SelogerAdapter {
    fn source(&self) -> Source {
        Source::Seloger
    }

    fn search_url(&self, params: &SearchParams) -> String {
        let mut query: Vec<(&str, String)> = vec![
            ("projects", "2".to_string()),
            ("types", "1,2".to_string()),
            ("places", params.location.clone()),
        ];
        if let Some(price) = bound_pair(params.min_price, params.max_price) {
            query.push(("price", price));
        }
        if let Some(surface) = bound_pair(params.min_surface, params.max_surface) {
            query.push(("surface", surface));
        }

        match Url::parse_with_params(SEARCH_BASE, &query) {
            Ok(url) => url.to_string(),
            Err(_) => SEARCH_BASE.to_string(),
        }
    }

    async fn list_cards(&self, session: &mut dyn Navigator, search_url: &str) -> Result<Vec<RawCard>> {
        info!("Opening seloger search page...");
        let page = session.navigate(search_url).await?;
        debug!("Downloaded {} bytes of HTML", page.html.len());

        let cards = collect_cards(&page.html, &page.final_url, CARD, RESULTS_MARKER)?;
        info!("Found {} seloger cards", cards.len());
        Ok(cards)
    }

    fn parse_card(&self, card: &RawCard) -> Option<Listing> {
        let fragment = Html::parse_fragment(&card.html);
        let root = fragment.root_element();

        let link = Selector::parse(LINK).ok()?;
        let href = root.select(&link).next()?.value().attr("href")?;
        let url = resolve_url(&card.page_url, href)?;
        let price = parse_price(&first_text(root, PRICE))?;

        let mut listing = Listing::new(Source::Seloger, url, price);
        listing.title = first_text(root, TITLE);
        listing.location = first_text(root, ADDRESS);
        listing.description = first_text(root, DESCRIPTION);

        // Surface sits in one of the tag items ("3 pièces", "2 chambres", "65 m²")
        listing.surface = Selector::parse(TAGS)
            .ok()
            .and_then(|sel| root.select(&sel).find_map(|li| parse_surface(&text_of(li))));
        listing.photos = image_urls(root, &card.page_url);

        Some(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.seloger.com/list.htm?projects=2&places=Nantes";

    #[test]
    fn test_parses_card_with_tags() {
        let raw = RawCard::new(
            r#"<div data-testid="sl.explore.card-container">
                 <a data-testid="sl.explore.coveringLink" href="https://www.seloger.com/annonces/achat/appartement/nantes-44/212345678.htm?projects=2"></a>
                 <img data-src="/photos/1.jpg">
                 <div data-test="sl.title">Appartement</div>
                 <div data-test="sl.price-label">312 000 €</div>
                 <ul data-test="sl.tags"><li>3 pièces</li><li>2 chambres</li><li>71,4 m²</li></ul>
                 <div data-test="sl.address">Nantes Centre</div>
                 <div data-testid="sl.explore.card-description">Proche tramway, parquet.</div>
               </div>"#,
            PAGE,
        );

        let listing = SelogerAdapter::new().parse_card(&raw).unwrap();
        assert_eq!(listing.id, "212345678");
        assert_eq!(listing.price, 312_000);
        assert_eq!(listing.surface, Some(71.4));
        assert_eq!(listing.location, "Nantes Centre");
        assert_eq!(listing.description, "Proche tramway, parquet.");
        assert_eq!(listing.photos, vec!["https://www.seloger.com/photos/1.jpg".to_string()]);
    }

    #[test]
    fn test_price_on_request_is_absent() {
        let raw = RawCard::new(
            r#"<div data-testid="sl.explore.card-container">
                 <a href="/annonces/achat/maison/1.htm"></a>
                 <div data-test="sl.price-label">Prix sur demande</div>
               </div>"#,
            PAGE,
        );
        assert!(SelogerAdapter::new().parse_card(&raw).is_none());
    }

    #[test]
    fn test_search_url_uses_open_bounds() {
        let params = SearchParams {
            location: "Nantes".to_string(),
            min_price: None,
            max_price: Some(350_000),
            min_surface: None,
            max_surface: None,
        };
        let url = SelogerAdapter::new().search_url(&params);

        assert!(url.starts_with(SEARCH_BASE));
        assert!(url.contains("places=Nantes"));
        assert!(url.contains("price=NaN%2F350000"));
        assert!(!url.contains("surface="));
    }
}
