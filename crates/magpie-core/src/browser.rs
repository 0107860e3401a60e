//! Embedded Chrome browser bridge
//!
//! Owns the headless Chrome instance the user browses in, injects the
//! static page hook at navigation time, and drives one capture round trip:
//! invoke the hook with the session token, run the extraction chain over
//! the returned snapshot, and deliver the resulting envelope to the host
//! validator. The session token is passed as a call argument, never
//! interpolated into script source.

use crate::extract::{self, PageSnapshot};
use crate::host::{BrowserHost, CaptureOutcome, ProductImporter};
use crate::envelope::Envelope;
use crate::{MagpieError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{CallArgument, CallFunctionOnParams};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Static page hook, installed on every new document. Parameterless by
/// design: it exposes a capture function and a readiness probe, and learns
/// the session token only as an argument at invocation time.
const PAGE_HOOK: &str = r#"
(function () {
    if (window.__magpieCapture) { return; }
    window.__magpieCapture = function (token) {
        return JSON.stringify({
            url: window.location.href,
            html: document.documentElement.outerHTML,
            token: token
        });
    };
})();
"#;

/// Configuration for the embedded browser.
#[derive(Debug, Clone)]
pub struct EmbeddedBrowserConfig {
    /// Browser mode: "auto", "system", or "none"
    pub mode: String,
    /// Custom Chrome binary path (for system mode)
    pub chrome_path: Option<PathBuf>,
    /// Bounded wait for one capture round trip; the page context is
    /// untrusted and may hang
    pub capture_timeout_secs: u64,
}

impl Default for EmbeddedBrowserConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            chrome_path: None,
            capture_timeout_secs: 5,
        }
    }
}

/// How one capture attempt ended, from the bridge's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    /// A message was delivered to the host validator (it may still have
    /// been rejected there; rejections are silent by design)
    Delivered,
    /// Current page is not an allowlisted retailer
    NotAvailable,
    /// The in-page hook was missing (stale or unsupported page state)
    NotSupported,
    /// The page context did not answer within the bounded wait; the
    /// capture affordance is re-armed
    TimedOut,
}

/// Handle to a running browser instance
pub struct BrowserHandle {
    pub browser: Browser,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

/// The embedded browser for one browsing session.
pub struct EmbeddedBrowser {
    handle: BrowserHandle,
    page: Option<Page>,
    config: EmbeddedBrowserConfig,
}

/// Shape the page hook returns, still untrusted at this point.
#[derive(Debug, Deserialize)]
struct SnapshotWire {
    url: String,
    html: String,
    token: String,
}

impl EmbeddedBrowser {
    /// Launch the embedded browser for a new session.
    pub async fn launch(config: EmbeddedBrowserConfig) -> Result<Self> {
        if config.mode == "none" {
            return Err(MagpieError::BrowserError(
                "Chrome disabled by configuration".to_string(),
            ));
        }

        let chrome_path = resolve_chrome(&config)?;
        debug!("Launching browser from {:?}", chrome_path);

        let (browser, mut handler) = Browser::launch(
            BrowserConfig::builder()
                .chrome_executable(&chrome_path)
                .arg("--disable-gpu")
                .arg("--no-sandbox")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-software-rasterizer")
                .build()
                .map_err(MagpieError::BrowserError)?,
        )
        .await
        .map_err(|e| MagpieError::BrowserError(format!("Failed to launch browser: {}", e)))?;

        let handle = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        Ok(Self {
            handle: BrowserHandle { browser, handle },
            page: None,
            config,
        })
    }

    /// Navigate the session page, feeding navigation events to the host so
    /// its tracked URL stays the ground truth.
    pub async fn navigate<I: ProductImporter>(
        &mut self,
        host: &mut BrowserHost<I>,
        url: &str,
    ) -> Result<()> {
        let requested = Url::parse(url)?;
        info!("Navigating to {}", requested);
        host.on_navigation_started(requested.clone());

        let page = match self.page.take() {
            Some(page) => {
                page.goto(url)
                    .await
                    .map_err(|e| MagpieError::BrowserError(e.to_string()))?;
                page
            }
            None => {
                let page = self
                    .handle
                    .browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| MagpieError::BrowserError(e.to_string()))?;
                // Hook rides on every subsequent document in this page,
                // reinjected fresh by the browser on each navigation.
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(PAGE_HOOK))
                    .await
                    .map_err(|e| MagpieError::BrowserError(e.to_string()))?;
                page.goto(url)
                    .await
                    .map_err(|e| MagpieError::BrowserError(e.to_string()))?;
                page
            }
        };

        page.wait_for_navigation()
            .await
            .map_err(|e| MagpieError::BrowserError(e.to_string()))?;

        // Redirects are common on retail sites; settle on what the browser
        // actually landed on.
        let settled = match page.url().await {
            Ok(Some(current)) => Url::parse(&current).unwrap_or(requested),
            _ => requested,
        };
        host.on_navigation_settled(settled);

        self.page = Some(page);
        Ok(())
    }

    /// Run one capture round trip: gate, snapshot, extract, deliver.
    pub async fn capture<I: ProductImporter>(
        &mut self,
        host: &mut BrowserHost<I>,
    ) -> Result<CaptureStatus> {
        let CaptureOutcome::Proceed(url) = host.on_capture_triggered() else {
            return Ok(CaptureStatus::NotAvailable);
        };

        let Some(page) = self.page.as_ref() else {
            return Ok(CaptureStatus::NotSupported);
        };

        debug!(%url, "capture triggered");
        let token = host.token().as_str().to_string();

        let wait = Duration::from_secs(self.config.capture_timeout_secs);
        let raw = match tokio::time::timeout(wait, invoke_page_hook(page, &token)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("capture timed out, re-arming");
                return Ok(CaptureStatus::TimedOut);
            }
        };

        let Some(raw) = raw else {
            info!("page hook missing, capture not supported on this page");
            return Ok(CaptureStatus::NotSupported);
        };

        let envelope = build_envelope(&raw);
        host.on_message_received(&envelope.to_json()?);
        Ok(CaptureStatus::Delivered)
    }

    /// Shut the browser down.
    pub async fn close(mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        let _ = self.handle.browser.close().await;
        Ok(())
    }
}

/// Call the in-page capture hook, handing over the session token as a
/// structured call argument. `None` means the hook is not installed.
async fn invoke_page_hook(page: &Page, token: &str) -> Result<Option<String>> {
    let call = CallFunctionOnParams::builder()
        .function_declaration(
            "function (token) { \
                 return window.__magpieCapture ? window.__magpieCapture(token) : null; \
             }",
        )
        .argument(
            CallArgument::builder()
                .value(serde_json::Value::String(token.to_string()))
                .build(),
        )
        .return_by_value(true)
        .build()
        .map_err(MagpieError::BrowserError)?;

    let result = page
        .evaluate_function(call)
        .await
        .map_err(|e| MagpieError::BrowserError(e.to_string()))?;

    Ok(result.into_value().ok())
}

/// Turn a raw snapshot from the page into one envelope. Extraction errors
/// become typed ERROR messages, never a crash and never a silent empty.
fn build_envelope(raw_snapshot: &str) -> Envelope {
    let wire: SnapshotWire = match serde_json::from_str(raw_snapshot) {
        Ok(wire) => wire,
        Err(e) => return Envelope::error(format!("unreadable page snapshot: {}", e)),
    };
    let url = match Url::parse(&wire.url) {
        Ok(url) => url,
        Err(e) => return Envelope::error(format!("unparseable page url: {}", e)),
    };
    let snapshot = PageSnapshot {
        url,
        html: wire.html,
        token: wire.token,
    };
    match extract::extract(&snapshot) {
        Ok(result) => result.into(),
        Err(e) => Envelope::error(e.to_string()),
    }
}

fn resolve_chrome(config: &EmbeddedBrowserConfig) -> Result<PathBuf> {
    if let Some(ref path) = config.chrome_path {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(MagpieError::BrowserError(format!(
            "Configured Chrome path does not exist: {:?}",
            path
        )));
    }
    find_system_chrome()
        .ok_or_else(|| MagpieError::BrowserError("No system Chrome found".to_string()))
}

/// Find Chrome installed on the system
pub fn find_system_chrome() -> Option<PathBuf> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        vec![]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    which::which("google-chrome")
        .or_else(|_| which::which("google-chrome-stable"))
        .or_else(|_| which::which("chromium"))
        .or_else(|_| which::which("chromium-browser"))
        .ok()
}
