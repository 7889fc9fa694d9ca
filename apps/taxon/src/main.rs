//! # Taxon - Inventory Metamodel CLI
//!
//! The main binary for the Taxon metamodel engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          apps/taxon (THE BINARY)         │
//! │                                          │
//! │   ┌─────────────┐    ┌──────────────┐    │
//! │   │   CLI       │    │ TOML config  │    │
//! │   │  (clap)     │    │ (rule seeds) │    │
//! │   └──────┬──────┘    └──────┬───────┘    │
//! │          └─────────┬────────┘            │
//! │                    ▼                     │
//! │            ┌───────────────┐             │
//! │            │  taxon-core   │             │
//! │            │ (THE ENGINE)  │             │
//! │            └───────────────┘             │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! taxon init
//! taxon class-create Rack -a serial:string:mandatory
//! taxon instance-create Rack -s name=R1 -s serial=XF-12
//! taxon check
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = taxon::cli::Cli::parse();

    // TAXON_LOG_FORMAT=json enables machine-parseable logs. Logs go to stderr,
    // command output to stdout.
    let log_format = std::env::var("TAXON_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "taxon=debug,taxon_core=debug"
    } else if cli.quiet {
        "taxon=error,taxon_core=error"
    } else {
        "taxon=warn,taxon_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("TAXON_LOG")
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let quiet = cli.quiet && !cli.json_mode;
    match taxon::cli::execute(cli) {
        Ok(output) => {
            if !quiet && !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
