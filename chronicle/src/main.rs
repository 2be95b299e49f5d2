//! Chronicle terminal front end.
//!
//! A line-oriented interface for playing sessions against the configured
//! narrator chain. Records are kept as JSON files under `--saves`.
//!
//! ```bash
//! cargo run -p chronicle -- --name "Aria" --class rogue --activity infiltration --risk high
//! ```

mod cli;
mod repl;

use anyhow::Context;
use chronicle_core::{JsonFileStore, NarratorConfig, Orchestrator};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chronicle=info,chronicle_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        cli::print_help();
        return Ok(());
    }
    let options = cli::parse_args(&args)?;

    let narrator = NarratorConfig::from_env()
        .build_chain()
        .context("no narrator configured; set ANTHROPIC_API_KEY or OLLAMA_BASE_URL")?;
    let store = Arc::new(JsonFileStore::new(&options.saves));
    let orchestrator = Orchestrator::new(store, Arc::new(narrator));

    let character = cli::load_or_create_character(&orchestrator, &options).await?;
    repl::run(&orchestrator, character, options.session_config()).await
}
