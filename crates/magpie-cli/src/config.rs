//! Configuration management

use anyhow::Result;
use directories::ProjectDirs;
use magpie_core::browser::EmbeddedBrowserConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Capture behavior
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Embedded browser settings
    #[serde(default)]
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Bounded wait for one capture round trip, in seconds
    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_capture_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSection {
    /// Browser mode: "auto", "system", or "none"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Custom Chrome binary path
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            chrome_path: None,
        }
    }
}

fn default_capture_timeout() -> u64 {
    5
}
fn default_mode() -> String {
    "auto".to_string()
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&content)?;
                return Ok(config);
            }
        }
        Ok(Self::default())
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "magpie", "magpie")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Browser bridge settings derived from this config
    pub fn to_browser_config(&self) -> EmbeddedBrowserConfig {
        EmbeddedBrowserConfig {
            mode: self.browser.mode.clone(),
            chrome_path: self.browser.chrome_path.clone(),
            capture_timeout_secs: self.capture.timeout_secs,
        }
    }
}
