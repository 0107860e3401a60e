//! Magpie Core Library
//!
//! Core functionality for Magpie product capture including:
//! - Retailer allowlist shared between page and host contexts
//! - Price text normalization and currency inference
//! - Tiered product-data extraction from page snapshots
//! - Page-to-host message envelope and host-side validation
//! - Embedded Chrome browser bridge

pub mod allowlist;
pub mod browser;
pub mod envelope;
pub mod extract;
pub mod host;
pub mod normalize;

use thiserror::Error;

// Re-export key types
pub use envelope::{CandidateWire, Envelope, ExtractPayload};
pub use extract::{CandidateSource, ExtractionResult, PageSnapshot, PriceCandidate};
pub use host::{BrowserHost, CaptureOutcome, ProductImporter, SessionToken};
pub use normalize::Currency;

#[derive(Error, Debug)]
pub enum MagpieError {
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    #[error("Message serialization error: {0}")]
    MessageError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MagpieError>;

/// A validated product fact handed to the cart/import subsystem.
///
/// Constructed by [`BrowserHost`] only after token and allowlist checks
/// pass; everything after the handoff belongs to the importer.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ImportableProduct {
    /// The page the product was captured from
    pub url: url::Url,
    /// Best-effort product title
    pub title: Option<String>,
    /// Best-effort product image URL
    pub image: Option<String>,
    /// Canonical decimal price string, absent when nothing cleared normalization
    pub price: Option<String>,
    /// Currency code, absent when unknown (never defaulted)
    pub currency: Option<Currency>,
}

impl ImportableProduct {
    /// A product fact carrying only the page URL, used when a capture
    /// degrades (unparseable message) but the page itself is allowlisted.
    pub fn url_only(url: url::Url) -> Self {
        Self {
            url,
            title: None,
            image: None,
            price: None,
            currency: None,
        }
    }
}
