//! Magpie CLI - product capture from allowlisted retail pages
//!
//! Drives an embedded Chrome session against a retailer URL, runs the
//! tiered extraction chain, and prints the validated product fact.

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use magpie_core::browser::{CaptureStatus, EmbeddedBrowser};
use magpie_core::{allowlist, envelope::Envelope, extract, BrowserHost, ImportableProduct};
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "magpie")]
#[command(author, version, about = "Capture product facts from allowlisted retail pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a URL in the embedded browser and capture the product on it
    Capture {
        /// Retailer page URL
        url: String,
    },

    /// Run the extraction chain over HTML from stdin (offline diagnostics)
    Scan {
        /// Page URL the HTML was taken from
        #[arg(short, long)]
        url: String,
    },

    /// Check whether a URL belongs to a supported retailer
    Check {
        /// URL to check
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::new("debug"))
            .init();
    }

    match cli.command {
        Commands::Capture { url } => {
            run_capture(&url).await?;
        }
        Commands::Scan { url } => {
            run_scan(&url)?;
        }
        Commands::Check { url } => {
            run_check(&url)?;
        }
    }

    Ok(())
}

async fn run_capture(url: &str) -> Result<()> {
    let config = Config::load()?;

    let captured: Arc<Mutex<Vec<ImportableProduct>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let captured = Arc::clone(&captured);
        move |product: ImportableProduct| captured.lock().unwrap().push(product)
    };

    let mut host = BrowserHost::new(sink);
    let mut browser = EmbeddedBrowser::launch(config.to_browser_config()).await?;

    browser.navigate(&mut host, url).await?;
    let status = browser.capture(&mut host).await?;
    browser.close().await?;

    match status {
        CaptureStatus::NotAvailable => {
            println!("Capture is not available here: this page is not a supported retailer.");
        }
        CaptureStatus::NotSupported => {
            println!("Capture is not supported on this page.");
        }
        CaptureStatus::TimedOut => {
            println!("The page did not answer in time. Try capturing again.");
        }
        CaptureStatus::Delivered => {
            let captured = captured.lock().unwrap();
            match captured.first() {
                Some(product) => {
                    println!("{}", serde_json::to_string_pretty(product)?);
                }
                None => println!("No product captured this time."),
            }
        }
    }

    Ok(())
}

fn run_scan(url: &str) -> Result<()> {
    let mut html = String::new();
    io::stdin().read_to_string(&mut html)?;

    let result = extract::extract_from_html(&html, url, "offline-scan")?;
    let envelope: Envelope = result.into();
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    Ok(())
}

fn run_check(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)?;
    if allowlist::url_allowed(&parsed) {
        println!("supported: {}", parsed.host_str().unwrap_or_default());
    } else {
        println!("not supported: capture is limited to allowlisted retailers");
        for entry in allowlist::ALLOWLIST {
            println!("  {}", entry.domain);
        }
    }
    Ok(())
}
