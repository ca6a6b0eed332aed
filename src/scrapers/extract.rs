//! Selector helpers shared by the site adapters.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::scrapers::types::RawCard;

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScrapeError::Extraction(format!("invalid selector '{}': {}", css, e)))
}

/// Split a results page into cards.
///
/// A page with no cards is only accepted when `marker_css` matches (the
/// results list or the site's empty-results notice); otherwise the page is
/// not a results page and the target could not be enumerated.
pub(crate) fn collect_cards(html: &str, page_url: &str, card_css: &str, marker_css: &str) -> Result<Vec<RawCard>> {
    let document = Html::parse_document(html);
    let cards: Vec<RawCard> = document
        .select(&selector(card_css)?)
        .map(|card| RawCard::new(card.html(), page_url))
        .collect();

    if cards.is_empty() && document.select(&selector(marker_css)?).next().is_none() {
        return Err(ScrapeError::Extraction(format!(
            "no results list found on {}",
            page_url
        )));
    }

    Ok(cards)
}

/// Whitespace-collapsed text of an element
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first match under `root`, empty when nothing matches
pub(crate) fn first_text(root: ElementRef<'_>, css: &str) -> String {
    Selector::parse(css)
        .ok()
        .and_then(|sel| root.select(&sel).next())
        .map(text_of)
        .unwrap_or_default()
}

/// First number in a price label: "250 000 €", "1.250.000 €", "Prix : 240 000 € FAI".
/// `None` when the label has no digits ("Prix sur demande").
pub(crate) fn parse_price(text: &str) -> Option<u64> {
    let mut digits = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            let is_group_separator = matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '.' | '\'');
            let next_is_digit = chars.peek().map_or(false, |n| n.is_ascii_digit());
            if !(is_group_separator && next_is_digit) {
                break;
            }
        }
    }

    digits.parse().ok()
}

/// Surface in square meters from text such as "3 pièces · 65,5 m²" or "120m2"
pub(crate) fn parse_surface(text: &str) -> Option<f64> {
    let unit = text.find("m²").or_else(|| text.find("m2"))?;
    let before = text[..unit].trim_end();

    let start = before
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == ',' || *c == '.')
        .last()
        .map(|(i, _)| i)?;

    let value: f64 = before[start..].replace(',', ".").parse().ok()?;
    (value > 0.0).then_some(value)
}

/// Absolute http(s) URL for a link found on `base`
pub(crate) fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Image sources in document order, without duplicates
pub(crate) fn image_urls(root: ElementRef<'_>, base: &str) -> Vec<String> {
    let Ok(img) = Selector::parse("img") else {
        return Vec::new();
    };

    let mut photos: Vec<String> = Vec::new();
    for element in root.select(&img) {
        let src = element
            .value()
            .attr("src")
            .or_else(|| element.value().attr("data-src"));
        if let Some(url) = src.and_then(|s| resolve_url(base, s)) {
            if !photos.contains(&url) {
                photos.push(url);
            }
        }
    }
    photos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("250 000 €"), Some(250_000));
        assert_eq!(parse_price("250\u{a0}000\u{a0}€"), Some(250_000));
        assert_eq!(parse_price("1.250.000 €"), Some(1_250_000));
        assert_eq!(parse_price("Prix : 240 000 € FAI 3 692 €/m²"), Some(240_000));
        assert_eq!(parse_price("Prix sur demande"), None);
    }

    #[test]
    fn test_parse_surface_variants() {
        assert_eq!(parse_surface("3 pièces · 65,5 m²"), Some(65.5));
        assert_eq!(parse_surface("Maison 120m2 terrain"), Some(120.0));
        assert_eq!(parse_surface("3 pièces"), None);
        assert_eq!(parse_surface("0 m²"), None);
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://www.leboncoin.fr/recherche?category=9", "/ad/ventes_immobilieres/42").as_deref(),
            Some("https://www.leboncoin.fr/ad/ventes_immobilieres/42")
        );
        assert_eq!(
            resolve_url("https://www.leboncoin.fr/", "https://img.leboncoin.fr/a.jpg").as_deref(),
            Some("https://img.leboncoin.fr/a.jpg")
        );
        assert_eq!(resolve_url("https://www.leboncoin.fr/", "javascript:void(0)"), None);
        assert_eq!(resolve_url("https://www.leboncoin.fr/", "  "), None);
    }

    #[test]
    fn test_collect_cards_distinguishes_empty_from_unknown_page() {
        let empty = r#"<html><body><div data-testid="results"></div></body></html>"#;
        assert!(collect_cards(empty, "https://x.fr", "article.card", "[data-testid=results]")
            .unwrap()
            .is_empty());

        let login_wall = "<html><body><form id=\"login\"></form></body></html>";
        let err = collect_cards(login_wall, "https://x.fr", "article.card", "[data-testid=results]").unwrap_err();
        assert!(matches!(err, ScrapeError::Extraction(_)));

        let two = r#"<html><body><article class="card">a</article><article class="card">b</article></body></html>"#;
        let cards = collect_cards(two, "https://x.fr", "article.card", "[data-testid=results]").unwrap();
        assert_eq!(cards.len(), 2);
        assert!(cards[0].html.contains(">a<"));
    }
}
