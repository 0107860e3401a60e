//! Host side of the page/host trust boundary
//!
//! [`BrowserHost`] owns the session token, tracks the current URL from
//! navigation events (never from message payloads), gates the capture
//! affordance on the allowlist, and re-validates every inbound message
//! before anything reaches the cart importer. Nothing in this module
//! trusts the page: a compromised page script can at worst produce a
//! message that gets silently dropped.

use crate::allowlist;
use crate::envelope::{Envelope, ExtractPayload};
use crate::normalize::Currency;
use crate::ImportableProduct;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, info, warn};
use url::Url;

/// Per-session integrity token.
///
/// Generated once when the embedded browser session starts and reused for
/// its whole lifetime; the in-page script is reinjected on every navigation
/// so there is nothing to gain from rotating it per page. Compared
/// byte-exact; this is not a cryptographic secret against a remote
/// attacker, only proof a message came from this run's injected logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    const LEN: usize = 32;

    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn fixed(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where the embedded browser currently is, from the host's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum NavState {
    Idle,
    Loading(Url),
    Loaded(Url),
}

/// Outcome of pressing the capture affordance.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Page is allowlisted; the bridge should invoke the in-page extractor.
    Proceed(Url),
    /// Fail-closed: current page is not a supported retailer.
    NotAvailable,
}

/// The seam to the cart/import subsystem. One call per accepted message;
/// everything after the handoff is the importer's problem.
pub trait ProductImporter {
    fn import(&mut self, product: ImportableProduct);
}

impl<F: FnMut(ImportableProduct)> ProductImporter for F {
    fn import(&mut self, product: ImportableProduct) {
        self(product)
    }
}

/// Mediates between the embedded browser and the rest of the app.
pub struct BrowserHost<I: ProductImporter> {
    token: SessionToken,
    nav: NavState,
    importer: I,
}

impl<I: ProductImporter> BrowserHost<I> {
    /// Start a new browsing session. The token generated here is the only
    /// one this session will ever accept.
    pub fn new(importer: I) -> Self {
        Self {
            token: SessionToken::generate(),
            nav: NavState::Idle,
            importer,
        }
    }

    #[cfg(test)]
    fn with_token(importer: I, token: SessionToken) -> Self {
        Self {
            token,
            nav: NavState::Idle,
            importer,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn nav_state(&self) -> &NavState {
        &self.nav
    }

    /// The host's ground truth for what page the user is on. Navigating
    /// away destroys the old page context, so a stale in-flight result can
    /// never be attributed to the wrong page.
    pub fn current_url(&self) -> Option<&Url> {
        match &self.nav {
            NavState::Idle => None,
            NavState::Loading(url) | NavState::Loaded(url) => Some(url),
        }
    }

    pub fn on_navigation_started(&mut self, url: Url) {
        debug!(%url, "navigation started");
        self.nav = NavState::Loading(url);
    }

    pub fn on_navigation_settled(&mut self, url: Url) {
        debug!(%url, "navigation settled");
        self.nav = NavState::Loaded(url);
    }

    /// Whether the capture affordance should be shown. Re-evaluated on
    /// every navigation event: mid-session redirects to ads or login walls
    /// must hide it immediately.
    pub fn capture_available(&self) -> bool {
        self.current_url().map(allowlist::url_allowed).unwrap_or(false)
    }

    /// User pressed capture. Re-checks the allowlist before anything
    /// touches the page; not allowed means no message exchange at all.
    pub fn on_capture_triggered(&self) -> CaptureOutcome {
        match self.current_url() {
            Some(url) if allowlist::url_allowed(url) => CaptureOutcome::Proceed(url.clone()),
            Some(url) => {
                info!(%url, "capture not available on this page");
                CaptureOutcome::NotAvailable
            }
            None => CaptureOutcome::NotAvailable,
        }
    }

    /// Validate one raw message from the page context.
    ///
    /// Unparseable input degrades to a URL-only capture from the
    /// host-tracked current URL; never trust a page-reported URL when the
    /// message could not even be parsed. Rejections are silent toward the
    /// page so a hostile script gets no validation oracle.
    pub fn on_message_received(&mut self, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("malformed capture message, degrading to URL-only: {}", e);
                self.import_degraded();
                return;
            }
        };

        match envelope {
            Envelope::Error { message } => {
                warn!("in-page extraction reported an error: {}", message);
            }
            Envelope::ProductExtract { payload } => self.validate_and_import(payload),
        }
    }

    fn validate_and_import(&mut self, payload: ExtractPayload) {
        if payload.token != self.token.as_str() {
            warn!("dropping capture message with mismatched integrity token");
            return;
        }

        // Independent re-check of the self-reported source. The in-page
        // allowlist gate already ran, but that script executes on hostile
        // ground; the host verifies again with the same shared rule table.
        let source_url = match Url::parse(&payload.url) {
            Ok(url) if allowlist::url_allowed(&url) => url,
            Ok(url) => {
                debug!(%url, "dropping capture message from non-allowlisted source");
                return;
            }
            Err(e) => {
                debug!("dropping capture message with unparseable source url: {}", e);
                return;
            }
        };

        let (price, currency): (Option<String>, Option<Currency>) = match &payload.top_choice {
            Some(top) => (top.price.clone(), top.currency),
            None => (payload.price.clone(), payload.currency),
        };

        let product = ImportableProduct {
            url: source_url,
            title: payload.title,
            image: payload.image,
            price,
            currency,
        };

        info!(url = %product.url, price = ?product.price, "captured product validated");
        self.importer.import(product);
    }

    fn import_degraded(&mut self) {
        match self.current_url() {
            Some(url) if allowlist::url_allowed(url) => {
                let product = ImportableProduct::url_only(url.clone());
                self.importer.import(product);
            }
            _ => {
                debug!("no allowlisted current URL, dropping degraded capture");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{CandidateSource, ExtractionResult, PriceCandidate};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Recorded = Rc<RefCell<Vec<ImportableProduct>>>;
    type RecordingHost = BrowserHost<Box<dyn FnMut(ImportableProduct)>>;

    fn host_with_recorder(token: &str) -> (RecordingHost, Recorded) {
        let products: Recorded = Rc::new(RefCell::new(Vec::new()));
        let sink: Box<dyn FnMut(ImportableProduct)> = {
            let products = Rc::clone(&products);
            Box::new(move |p| products.borrow_mut().push(p))
        };
        let host = BrowserHost::with_token(sink, SessionToken::fixed(token));
        (host, products)
    }

    fn valid_message(token: &str, url: &str) -> String {
        let candidate = PriceCandidate {
            source: CandidateSource::StructuredData,
            raw_text: "£19.99".to_string(),
            normalized: Some("19.99".to_string()),
            currency: Some(Currency::Gbp),
            confidence: 0.95,
        };
        let result = ExtractionResult {
            title: Some("Trainers".to_string()),
            image: Some("https://img.example/1.jpg".to_string()),
            source_url: Url::parse(url).unwrap(),
            top_choice: Some(candidate.clone()),
            candidates: vec![candidate],
            token: token.to_string(),
        };
        Envelope::from(result).to_json().unwrap()
    }

    #[test]
    fn test_valid_message_imported() {
        let (mut host, products) = host_with_recorder("abc123");
        host.on_navigation_settled(Url::parse("https://www.asos.com/p/1").unwrap());
        host.on_message_received(&valid_message("abc123", "https://www.asos.com/p/1"));

        let products = products.borrow();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].price.as_deref(), Some("19.99"));
        assert_eq!(products[0].currency, Some(Currency::Gbp));
        assert_eq!(products[0].title.as_deref(), Some("Trainers"));
    }

    #[test]
    fn test_token_off_by_one_character_dropped() {
        let (mut host, products) = host_with_recorder("abc124");
        host.on_navigation_settled(Url::parse("https://www.asos.com/p/1").unwrap());
        host.on_message_received(&valid_message("abc123", "https://www.asos.com/p/1"));
        assert!(products.borrow().is_empty());
    }

    #[test]
    fn test_forged_source_url_dropped_despite_valid_token() {
        // Simulates a payload forged past the in-page gate: token correct,
        // source host not allowlisted. Host must re-check independently.
        let (mut host, products) = host_with_recorder("tok");
        host.on_navigation_settled(Url::parse("https://www.asos.com/p/1").unwrap());
        host.on_message_received(&valid_message("tok", "https://evil.example/p/1"));
        assert!(products.borrow().is_empty());
    }

    #[test]
    fn test_malformed_message_degrades_to_url_only() {
        let (mut host, products) = host_with_recorder("tok");
        let current = Url::parse("https://www.amazon.co.uk/dp/B0TEST").unwrap();
        host.on_navigation_settled(current.clone());
        host.on_message_received("][ not json ][");

        let products = products.borrow();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0], ImportableProduct::url_only(current));
    }

    #[test]
    fn test_malformed_message_without_current_url_dropped() {
        let (mut host, products) = host_with_recorder("tok");
        host.on_message_received("][ not json ][");
        assert!(products.borrow().is_empty());
    }

    #[test]
    fn test_error_envelope_logged_not_imported() {
        let (mut host, products) = host_with_recorder("tok");
        host.on_navigation_settled(Url::parse("https://www.asos.com/p/1").unwrap());
        host.on_message_received(r#"{"type":"ERROR","message":"selector blew up"}"#);
        assert!(products.borrow().is_empty());
    }

    #[test]
    fn test_flat_price_fallback_when_top_choice_null() {
        let (mut host, products) = host_with_recorder("tok");
        host.on_navigation_settled(Url::parse("https://www.noon.com/p/9").unwrap());
        let raw = r#"{"type":"PRODUCT_EXTRACT","payload":{
            "title":null,"image":null,
            "url":"https://www.noon.com/p/9",
            "topChoice":null,"candidates":[],
            "price":"49.00","currency":"AED",
            "token":"tok"}}"#;
        host.on_message_received(raw);

        let products = products.borrow();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].price.as_deref(), Some("49.00"));
        assert_eq!(products[0].currency, Some(Currency::Aed));
    }

    #[test]
    fn test_capture_affordance_follows_navigation() {
        let (mut host, _) = host_with_recorder("tok");
        assert!(!host.capture_available());

        host.on_navigation_settled(Url::parse("https://www.ebay.com/itm/1").unwrap());
        assert!(host.capture_available());

        // Mid-session redirect to an ad network hides the affordance
        host.on_navigation_started(Url::parse("https://ads.tracker.example/x").unwrap());
        assert!(!host.capture_available());
    }

    #[test]
    fn test_capture_trigger_fails_closed() {
        let (mut host, _) = host_with_recorder("tok");
        host.on_navigation_settled(Url::parse("https://login.example.com/").unwrap());
        assert_eq!(host.on_capture_triggered(), CaptureOutcome::NotAvailable);

        let url = Url::parse("https://www.zara.com/uk/p/1.html").unwrap();
        host.on_navigation_settled(url.clone());
        assert_eq!(host.on_capture_triggered(), CaptureOutcome::Proceed(url));
    }

    #[test]
    fn test_nav_state_transitions() {
        let (mut host, _) = host_with_recorder("tok");
        assert_eq!(*host.nav_state(), NavState::Idle);

        let url = Url::parse("https://www.asos.com/").unwrap();
        host.on_navigation_started(url.clone());
        assert_eq!(*host.nav_state(), NavState::Loading(url.clone()));

        host.on_navigation_settled(url.clone());
        assert_eq!(*host.nav_state(), NavState::Loaded(url));
    }

    #[test]
    fn test_session_token_generation() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_eq!(a.as_str().len(), 32);
        assert_ne!(a, b);
    }
}
