use std::sync::Arc;

use clap::Parser;
use tracing::warn;

use watchtower_archive::ArchiveStore;
use watchtower_core::config::{ConfigHandle, WatchtowerConfig};
use watchtower_retrieval::{CagBuilder, Embedder, FastEmbedder, RetrievalEngine};
use watchtower_tools::{server, ToolHost};

/// Watchtower tool server — serves the retrieval tool catalog over stdio.
/// Spawned as a child process by the chat pipeline.
#[derive(Parser)]
#[command(name = "watchtower-tools", version)]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, default_value = "watchtower.json", env = "WATCHTOWER_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchtower_tools=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ConfigHandle::new(WatchtowerConfig::load(&args.config)?);
    let cfg = config.current();

    let archive = Arc::new(ArchiveStore::open(&cfg.database.archive_path)?);

    // A missing embedding model is not fatal — retrieval degrades to
    // keyword-only and logs the transition once.
    let embedder: Option<Arc<dyn Embedder>> =
        match FastEmbedder::load(&cfg.retrieval.embedding_model, cfg.retrieval.vector_dim) {
            Ok(e) => Some(Arc::new(e)),
            Err(e) => {
                warn!(error = %e, "embedding model unavailable");
                None
            }
        };

    let engine = Arc::new(RetrievalEngine::new(
        archive.clone(),
        config.clone(),
        embedder,
    ));
    if let Err(e) = engine.rebuild_index().await {
        warn!(error = %e, "initial index build failed, continuing keyword-only");
    }

    let cag = Arc::new(CagBuilder::new(archive.clone(), config));
    let host = ToolHost::new(archive, engine, cag);

    server::run(host).await?;
    Ok(())
}
