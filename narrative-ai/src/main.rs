//! Narrative AI server.
//!
//! ```bash
//! ANTHROPIC_API_KEY=... cargo run -p narrative-ai
//! ```
//!
//! See `AppConfig` for the `NARRATIVE_*` variables.

use anyhow::Context;
use claude::Claude;
use narrative_ai::{bind_and_serve, AppConfig, AppState};
use narrative_core::{
    ClaudeGenerator, FileStore, MemoryStore, NarrativeService, StoryStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let client = Claude::from_env()
        .context("ANTHROPIC_API_KEY must be set (in .env or the environment)")?
        .with_model(&config.model);
    let generator = ClaudeGenerator::new(client).with_config(config.generator.clone());

    let store: Arc<dyn StoryStore> = match &config.store_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using file store");
            Arc::new(FileStore::open(dir).await?)
        }
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let service = NarrativeService::new(Arc::new(generator), store)
        .with_config(config.service.clone());

    info!(model = %config.model, "starting narrative service");
    bind_and_serve(config.addr(), AppState::new(service)).await?;
    Ok(())
}
