//! Tiered product-data extraction
//!
//! Runs over a snapshot of an uncontrolled retail page and recovers price,
//! currency, title and image with zero cooperation from the page author.
//! Four tiers feed one candidate pool, highest-trust first: JSON-LD
//! structured data, product meta tags, known retailer selectors, and a
//! last-resort visible-text scan. Selection is by confidence order only;
//! confidence values are an ordinal ranking, never arithmetic inputs.

use crate::normalize::{self, Currency};
use crate::Result;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;
use url::Url;

/// A snapshot of the live page context, captured by the browser bridge.
///
/// `token` is the session token the bridge handed into the page at capture
/// time; it rides along so the host can verify the snapshot came from this
/// run and not from a script already squatting on the page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: Url,
    pub html: String,
    pub token: String,
}

/// Which tier produced a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    StructuredData,
    MetaTag,
    Selector(&'static str),
    HeuristicText,
}

impl CandidateSource {
    /// Stable wire label for this source.
    pub fn label(&self) -> String {
        match self {
            CandidateSource::StructuredData => "structured-data".to_string(),
            CandidateSource::MetaTag => "meta-tag".to_string(),
            CandidateSource::Selector(css) => format!("selector:{}", css),
            CandidateSource::HeuristicText => "heuristic-text".to_string(),
        }
    }
}

/// One hypothesis about the product's price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub source: CandidateSource,
    pub raw_text: String,
    /// Canonical decimal string, `None` when normalization found no number
    pub normalized: Option<String>,
    pub currency: Option<Currency>,
    /// Ordinal ranking hint in [0, 1]; used only for ordering
    pub confidence: f64,
}

/// The outcome of one extraction pass. Built once, consumed once.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub title: Option<String>,
    pub image: Option<String>,
    pub source_url: Url,
    pub top_choice: Option<PriceCandidate>,
    pub candidates: Vec<PriceCandidate>,
    pub token: String,
}

/// One entry in the site-specific selector table.
struct SelectorSpec {
    css: &'static str,
    confidence: f64,
    /// Some retailers keep the authoritative price in a visually-hidden
    /// element (screen-reader text); those selectors skip the layout gate.
    offscreen_ok: bool,
}

/// Known retailer price selectors, most specific first. Generic class-name
/// patterns sit at the bottom with correspondingly lower confidence.
const PRICE_SELECTORS: &[SelectorSpec] = &[
    SelectorSpec { css: ".a-price .a-offscreen", confidence: 0.8, offscreen_ok: true },
    SelectorSpec { css: "#priceblock_ourprice", confidence: 0.8, offscreen_ok: false },
    SelectorSpec { css: ".x-price-primary .ux-textspans", confidence: 0.75, offscreen_ok: false },
    SelectorSpec { css: "[data-testid='product-price']", confidence: 0.7, offscreen_ok: false },
    SelectorSpec { css: "[itemprop='price']", confidence: 0.65, offscreen_ok: false },
    SelectorSpec { css: ".product-price", confidence: 0.55, offscreen_ok: false },
    SelectorSpec { css: ".price", confidence: 0.5, offscreen_ok: false },
];

/// Text nodes longer than this are never price labels.
const HEURISTIC_MAX_LEN: usize = 20;

/// Inline font sizes below this are treated as illegible decoys.
const MIN_LEGIBLE_FONT_PX: f64 = 9.0;

/// Run the full strategy chain over a page snapshot.
///
/// Always re-scans the snapshot it is given; no caching, no page-state
/// mutation. Tiers 1-3 always run so the candidate pool is complete; the
/// heuristic text scan only runs when they all came up empty.
pub fn extract(snapshot: &PageSnapshot) -> Result<ExtractionResult> {
    let document = Html::parse_document(&snapshot.html);

    let mut candidates = Vec::new();
    structured_data_candidates(&document, &mut candidates);
    meta_tag_candidates(&document, &mut candidates);
    selector_candidates(&document, &mut candidates);

    if candidates.is_empty() {
        heuristic_text_candidates(&document, &mut candidates);
    }

    // Normalize every raw price; anything that yields no number is dropped
    // before selection.
    for candidate in &mut candidates {
        candidate.normalized = normalize::normalize_price(&candidate.raw_text);
    }
    candidates.retain(|c| c.normalized.is_some());

    // Stable sort keeps tier order as the tie-break.
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let top_choice = candidates.first().cloned();
    debug!(
        candidates = candidates.len(),
        top = ?top_choice.as_ref().map(|c| c.source.label()),
        "extraction pass complete"
    );

    Ok(ExtractionResult {
        title: extract_title(&document),
        image: extract_image(&document),
        source_url: snapshot.url.clone(),
        top_choice,
        candidates,
        token: snapshot.token.clone(),
    })
}

// ============================================================================
// Tier 1: JSON-LD structured data (confidence 0.95)
// ============================================================================

fn structured_data_candidates(document: &Html, out: &mut Vec<PriceCandidate>) {
    let selector = Selector::parse("script[type='application/ld+json']").unwrap();

    for script in document.select(&selector) {
        let text: String = script.text().collect();
        // Malformed blocks are common in the wild; skip, never abort.
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping malformed JSON-LD block: {}", e);
                continue;
            }
        };
        collect_product_offers(&value, out);
    }
}

/// Walk a JSON-LD value for Product entities, including top-level arrays
/// and `@graph` containers, and emit one candidate per offer.
fn collect_product_offers(value: &Value, out: &mut Vec<PriceCandidate>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_product_offers(item, out);
            }
        }
        Value::Object(map) => {
            if is_product_type(map.get("@type")) {
                if let Some(offers) = map.get("offers") {
                    for offer in offer_list(offers) {
                        if let Some(candidate) = candidate_from_offer(offer) {
                            out.push(candidate);
                        }
                    }
                }
            }
            if let Some(graph) = map.get("@graph") {
                collect_product_offers(graph, out);
            }
        }
        _ => {}
    }
}

fn is_product_type(type_field: Option<&Value>) -> bool {
    match type_field {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some("Product")),
        _ => false,
    }
}

fn offer_list(offers: &Value) -> Vec<&Value> {
    match offers {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![offers],
        _ => Vec::new(),
    }
}

fn candidate_from_offer(offer: &Value) -> Option<PriceCandidate> {
    let price = offer.get("price").or_else(|| offer.get("lowPrice"))?;
    let raw_text = match price {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let currency = offer
        .get("priceCurrency")
        .and_then(Value::as_str)
        .and_then(Currency::from_code);

    Some(PriceCandidate {
        source: CandidateSource::StructuredData,
        raw_text,
        normalized: None,
        currency,
        confidence: 0.95,
    })
}

// ============================================================================
// Tier 2: product meta tags (confidence 0.85)
// ============================================================================

fn meta_tag_candidates(document: &Html, out: &mut Vec<PriceCandidate>) {
    let amount = meta_content(document, "product:price:amount")
        .or_else(|| meta_content(document, "og:price:amount"));

    let Some(raw_text) = amount else { return };

    let currency = meta_content(document, "product:price:currency")
        .or_else(|| meta_content(document, "og:price:currency"))
        .and_then(|code| Currency::from_code(&code));

    out.push(PriceCandidate {
        source: CandidateSource::MetaTag,
        raw_text,
        normalized: None,
        currency,
        confidence: 0.85,
    });
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property='{}']", property)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// Tier 3: site-specific selectors (confidence per selector)
// ============================================================================

fn selector_candidates(document: &Html, out: &mut Vec<PriceCandidate>) {
    for spec in PRICE_SELECTORS {
        let selector = Selector::parse(spec.css).unwrap();
        for element in document.select(&selector) {
            if !spec.offscreen_ok && element_tree_hidden(element) {
                continue;
            }
            let text: String = element.text().collect::<String>().trim().to_string();
            if text.is_empty() {
                continue;
            }
            let currency = leading_symbol(&text).and_then(|s| normalize::infer_currency(&s));
            out.push(PriceCandidate {
                source: CandidateSource::Selector(spec.css),
                raw_text: text,
                normalized: None,
                currency,
                confidence: spec.confidence,
            });
        }
    }
}

// ============================================================================
// Tier 4: heuristic visible-text scan (confidence 0.3, last resort)
// ============================================================================

fn heuristic_text_candidates(document: &Html, out: &mut Vec<PriceCandidate>) {
    let price_re = Regex::new(r"(£|€|\$|AED)\s*\d[\d.,]*").unwrap();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.len() >= HEURISTIC_MAX_LEN {
            continue;
        }
        let Some(caps) = price_re.captures(trimmed) else {
            continue;
        };

        let parent = node
            .ancestors()
            .find_map(ElementRef::wrap);
        let Some(parent) = parent else { continue };
        if matches!(parent.value().name(), "script" | "style" | "noscript") {
            continue;
        }
        if element_tree_hidden(parent) || element_tree_illegible(parent) {
            continue;
        }

        let symbol = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        out.push(PriceCandidate {
            source: CandidateSource::HeuristicText,
            raw_text: trimmed.to_string(),
            normalized: None,
            currency: normalize::infer_currency(symbol),
            confidence: 0.3,
        });
    }
}

// ============================================================================
// Static visibility checks
// ============================================================================

/// Whether an element or any ancestor is hidden by markup.
///
/// A snapshot carries no computed layout, so this checks the signals the
/// markup itself exposes: `hidden`, `aria-hidden`, hidden inputs, and
/// inline display/visibility styles.
fn element_tree_hidden(element: ElementRef) -> bool {
    std::iter::once(*element)
        .chain(element.ancestors())
        .filter_map(ElementRef::wrap)
        .any(|el| element_hidden(&el))
}

fn element_hidden(element: &ElementRef) -> bool {
    let el = element.value();
    if el.attr("hidden").is_some() || el.attr("aria-hidden") == Some("true") {
        return true;
    }
    if el.name() == "input" && el.attr("type") == Some("hidden") {
        return true;
    }
    if let Some(style) = el.attr("style") {
        let style = style.replace(' ', "").to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    false
}

/// Whether any inline font-size on the element chain drops below the
/// legibility threshold (a favorite spot for decoy prices).
fn element_tree_illegible(element: ElementRef) -> bool {
    let font_re = Regex::new(r"font-size:\s*(\d+(?:\.\d+)?)px").unwrap();
    std::iter::once(*element)
        .chain(element.ancestors())
        .filter_map(ElementRef::wrap)
        .any(|el| {
            let Some(style) = el.value().attr("style") else {
                return false;
            };
            let style = style.to_ascii_lowercase();
            font_re
                .captures(&style)
                .and_then(|caps| caps[1].parse::<f64>().ok())
                .map(|px| px < MIN_LEGIBLE_FONT_PX)
                .unwrap_or(false)
        })
}

/// First currency symbol at the head of a price string, if any.
fn leading_symbol(text: &str) -> Option<String> {
    let symbol_re = Regex::new(r"^\s*(£|€|\$|AED)").unwrap();
    symbol_re
        .captures(text)
        .map(|caps| caps[1].to_string())
}

// ============================================================================
// Metadata (independent of the price tiers)
// ============================================================================

fn extract_title(document: &Html) -> Option<String> {
    if let Some(title) = meta_content(document, "og:title") {
        return Some(title);
    }
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn extract_image(document: &Html) -> Option<String> {
    if let Some(image) = meta_content(document, "og:image") {
        return Some(image);
    }
    // Known main-product-image id, then any image at all.
    for css in ["#landingImage", "img"] {
        let selector = Selector::parse(css).unwrap();
        if let Some(src) = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("src"))
        {
            return Some(src.to_string());
        }
    }
    None
}

/// Convenience wrapper used by offline scanning: parse a URL string and
/// extract from raw HTML with the given token.
pub fn extract_from_html(html: &str, url: &str, token: &str) -> Result<ExtractionResult> {
    let url = Url::parse(url)?;
    extract(&PageSnapshot {
        url,
        html: html.to_string(),
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(html: &str) -> PageSnapshot {
        PageSnapshot {
            url: Url::parse("https://www.amazon.co.uk/dp/B0TEST").unwrap(),
            html: html.to_string(),
            token: "test-token".to_string(),
        }
    }

    #[test]
    fn test_structured_data_beats_heuristic_text() {
        // JSON-LD says 100, a visible text node says 50; tier order must win
        // regardless of DOM order.
        let html = r#"<html><head>
            <title>Widget</title>
        </head><body>
            <span>$50.00</span>
            <script type="application/ld+json">
              {"@type":"Product","name":"Widget",
               "offers":{"price":"100.00","priceCurrency":"USD"}}
            </script>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::StructuredData);
        assert_eq!(top.normalized.as_deref(), Some("100.00"));
        assert_eq!(top.currency, Some(Currency::Usd));
    }

    #[test]
    fn test_heuristic_tier_gated_off_when_pool_nonempty() {
        // A generic .price selector hit must suppress the text scan entirely:
        // the decoy value may not even appear in the candidate list.
        let html = r#"<html><body>
            <div class="price">£19.99</div>
            <p>£77.77</p>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::Selector(".price"));
        assert_eq!(top.normalized.as_deref(), Some("19.99"));
        assert!(result
            .candidates
            .iter()
            .all(|c| c.source != CandidateSource::HeuristicText));
        assert!(result.candidates.iter().all(|c| c.raw_text != "£77.77"));
    }

    #[test]
    fn test_heuristic_tier_runs_when_pool_empty() {
        let html = r#"<html><body>
            <span>Only £12.50</span>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::HeuristicText);
        assert_eq!(top.normalized.as_deref(), Some("12.50"));
        assert_eq!(top.currency, Some(Currency::Gbp));
    }

    #[test]
    fn test_heuristic_skips_hidden_and_tiny_text() {
        let html = r#"<html><body>
            <span style="display: none">$9.99</span>
            <span style="font-size: 4px">$8.88</span>
            <span>$25.00</span>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].raw_text, "$25.00");
    }

    #[test]
    fn test_heuristic_ignores_long_text_nodes() {
        let html = r#"<html><body>
            <p>Over $100 of value packed into every single box we ship</p>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert!(result.top_choice.is_none());
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn test_malformed_json_ld_skipped_silently() {
        let html = r#"<html><body>
            <script type="application/ld+json">{not json at all</script>
            <script type="application/ld+json">
              {"@type":"Product","offers":{"price":42.5,"priceCurrency":"EUR"}}
            </script>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::StructuredData);
        assert_eq!(top.normalized.as_deref(), Some("42.5"));
        assert_eq!(top.currency, Some(Currency::Eur));
    }

    #[test]
    fn test_json_ld_graph_and_offer_arrays() {
        let html = r#"<html><body>
            <script type="application/ld+json">
              {"@graph":[
                {"@type":"WebPage","name":"ignored"},
                {"@type":["Thing","Product"],
                 "offers":[{"price":"10.00","priceCurrency":"GBP"},
                           {"price":"12.00","priceCurrency":"GBP"}]}
              ]}
            </script>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.candidates.len(), 2);
        assert!(result
            .candidates
            .iter()
            .all(|c| c.source == CandidateSource::StructuredData));
    }

    #[test]
    fn test_meta_tag_tier() {
        let html = r#"<html><head>
            <meta property="product:price:amount" content="59.00">
            <meta property="product:price:currency" content="AED">
        </head><body></body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::MetaTag);
        assert_eq!(top.normalized.as_deref(), Some("59.00"));
        assert_eq!(top.currency, Some(Currency::Aed));
    }

    #[test]
    fn test_meta_beats_selector_and_both_survive_in_pool() {
        let html = r#"<html><head>
            <meta property="og:price:amount" content="30.00">
        </head><body>
            <div class="price">$28.00</div>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(
            result.top_choice.unwrap().source,
            CandidateSource::MetaTag
        );
    }

    #[test]
    fn test_offscreen_amazon_price_is_authoritative() {
        // .a-offscreen is visually hidden screen-reader text but is the
        // canonical Amazon price; the offscreen flag must admit it.
        let html = r#"<html><body>
            <span class="a-price">
              <span class="a-offscreen" style="visibility: hidden">$13.49</span>
            </span>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        let top = result.top_choice.unwrap();
        assert_eq!(top.source, CandidateSource::Selector(".a-price .a-offscreen"));
        assert_eq!(top.normalized.as_deref(), Some("13.49"));
        assert_eq!(top.currency, Some(Currency::Usd));
    }

    #[test]
    fn test_hidden_generic_selector_skipped() {
        let html = r#"<html><body>
            <div class="price" style="display:none">$1.00</div>
            <div class="price">$2.00</div>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].raw_text, "$2.00");
    }

    #[test]
    fn test_unnormalizable_candidates_dropped() {
        let html = r#"<html><body>
            <div class="price">Call for price</div>
        </body></html>"#;

        let result = extract(&snapshot(html)).unwrap();
        assert!(result.top_choice.is_none());
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn test_title_prefers_og_then_document_title() {
        let html = r#"<html><head>
            <meta property="og:title" content="Social Widget">
            <title>Doc Widget</title>
        </head><body></body></html>"#;
        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.title.as_deref(), Some("Social Widget"));

        let html = r#"<html><head><title>Doc Widget</title></head><body></body></html>"#;
        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.title.as_deref(), Some("Doc Widget"));
    }

    #[test]
    fn test_image_fallback_chain() {
        let html = r#"<html><body>
            <img id="landingImage" src="https://img.example/main.jpg">
            <img src="https://img.example/other.jpg">
        </body></html>"#;
        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(
            result.image.as_deref(),
            Some("https://img.example/main.jpg")
        );
    }

    #[test]
    fn test_repeated_extraction_is_independent() {
        let html = r#"<html><body><div class="price">$5.00</div></body></html>"#;
        let snap = snapshot(html);
        let a = extract(&snap).unwrap();
        let b = extract(&snap).unwrap();
        assert_eq!(a.candidates, b.candidates);
        assert_eq!(a.top_choice, b.top_choice);
    }

    #[test]
    fn test_token_carried_through() {
        let html = "<html><body></body></html>";
        let result = extract(&snapshot(html)).unwrap();
        assert_eq!(result.token, "test-token");
    }
}
