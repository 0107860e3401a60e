//! Page-to-host message envelope
//!
//! The single message shape that crosses the page/host trust boundary.
//! Everything in here is untrusted until [`crate::host::BrowserHost`] has
//! validated the token and the self-reported source URL.

use crate::extract::{ExtractionResult, PriceCandidate};
use crate::normalize::Currency;
use serde::{Deserialize, Serialize};

/// One capture message. Either a successful extraction or a typed error,
/// so the host can tell "no price found" apart from "extraction threw".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "PRODUCT_EXTRACT")]
    ProductExtract { payload: ExtractPayload },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractPayload {
    pub title: Option<String>,
    pub image: Option<String>,
    pub url: String,
    pub top_choice: Option<CandidateWire>,
    #[serde(default)]
    pub candidates: Vec<CandidateWire>,
    /// Flat duplicates of the top choice, kept for consumers that only
    /// want the headline numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateWire {
    pub source: String,
    pub raw_price: String,
    pub price: Option<String>,
    pub currency: Option<Currency>,
    pub confidence: f64,
}

impl From<&PriceCandidate> for CandidateWire {
    fn from(candidate: &PriceCandidate) -> Self {
        Self {
            source: candidate.source.label(),
            raw_price: candidate.raw_text.clone(),
            price: candidate.normalized.clone(),
            currency: candidate.currency,
            confidence: candidate.confidence,
        }
    }
}

impl From<ExtractionResult> for Envelope {
    fn from(result: ExtractionResult) -> Self {
        let top_choice = result.top_choice.as_ref().map(CandidateWire::from);
        Envelope::ProductExtract {
            payload: ExtractPayload {
                title: result.title,
                image: result.image,
                url: result.source_url.to_string(),
                price: top_choice.as_ref().and_then(|c| c.price.clone()),
                currency: top_choice.as_ref().and_then(|c| c.currency),
                top_choice,
                candidates: result.candidates.iter().map(CandidateWire::from).collect(),
                token: result.token,
            },
        }
    }
}

impl Envelope {
    /// An error-typed envelope reporting that extraction itself failed.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
