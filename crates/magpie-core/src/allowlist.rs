//! Retailer allowlist
//!
//! The single source of truth for which retail domains Magpie may extract
//! from. Both the in-page capture gate and the host-side message validator
//! call into this module; there is deliberately no second copy of these
//! rules anywhere.

use url::Url;

/// A hostname rule for one supported retailer.
///
/// Matches the domain itself and any subdomain of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowlistEntry {
    pub domain: &'static str,
}

impl AllowlistEntry {
    const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Whether `host` is this domain or a subdomain of it.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == self.domain || host.ends_with(&format!(".{}", self.domain))
    }
}

/// Supported retailer domains, in display order.
pub const ALLOWLIST: &[AllowlistEntry] = &[
    AllowlistEntry::new("amazon.com"),
    AllowlistEntry::new("amazon.co.uk"),
    AllowlistEntry::new("amazon.ae"),
    AllowlistEntry::new("ebay.com"),
    AllowlistEntry::new("asos.com"),
    AllowlistEntry::new("zara.com"),
    AllowlistEntry::new("next.co.uk"),
    AllowlistEntry::new("noon.com"),
    AllowlistEntry::new("namshi.com"),
];

/// Whether a hostname belongs to a supported retailer.
pub fn host_allowed(host: &str) -> bool {
    ALLOWLIST.iter().any(|entry| entry.matches(host))
}

/// Whether a URL points at a supported retailer.
///
/// URLs without a host component (about:blank, data:) are never allowed.
pub fn url_allowed(url: &Url) -> bool {
    url.host_str().map(host_allowed).unwrap_or(false)
}
