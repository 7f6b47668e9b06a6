use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{info, warn};

use watchtower_agent::{LlmProvider, OpenAiProvider, ToolBridge, ToolExecutor};
use watchtower_alerts::{AlertMonitor, Notifier};
use watchtower_archive::ArchiveStore;
use watchtower_core::config::{ConfigHandle, WatchtowerConfig};
use watchtower_ingest::{ContainerTailSource, IngestWorker};
use watchtower_retrieval::{CagBuilder, Embedder, FastEmbedder, RetrievalEngine};
use watchtower_sessions::SessionStore;
use watchtower_telegram::{adapter::BotContext, TelegramAdapter, TelegramNotifier};

mod app;
mod http;
mod notify;

/// Watchtower gateway — ingest worker, alert monitor, chat pipeline, and the
/// HTTP API in one process.
#[derive(Parser)]
#[command(name = "watchtower-gateway", version)]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, default_value = "watchtower.json", env = "WATCHTOWER_CONFIG")]
    config: String,

    /// Skip the startup probe of the chat-model endpoint.
    #[arg(long)]
    skip_model_probe: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchtower=info,watchtower_gateway=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();

    // Fatal startup failures (bad config, missing stores, dead model
    // endpoint) bubble out of main and exit 1.
    let config = ConfigHandle::new(
        WatchtowerConfig::load(&args.config).context("loading configuration")?,
    );
    let cfg = config.current();

    let archive = Arc::new(
        ArchiveStore::open(&cfg.database.archive_path).context("opening event archive")?,
    );
    let sessions = Arc::new(
        SessionStore::open(&cfg.database.sessions_path).context("opening session store")?,
    );

    // Retrieval: embedding failures degrade to keyword-only, never fatal.
    let embedder: Option<Arc<dyn Embedder>> =
        match FastEmbedder::load(&cfg.retrieval.embedding_model, cfg.retrieval.vector_dim) {
            Ok(e) => Some(Arc::new(e)),
            Err(e) => {
                warn!(error = %e, "embedding model unavailable, keyword-only retrieval");
                None
            }
        };
    let engine = Arc::new(RetrievalEngine::new(
        archive.clone(),
        config.clone(),
        embedder,
    ));
    {
        // First build can take a while on a cold model cache; run it behind
        // the startup path.
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.rebuild_index().await {
                warn!(error = %e, "initial semantic index build failed");
            }
        });
    }
    let cag = Arc::new(CagBuilder::new(archive.clone(), config.clone()));

    // Chat model client + startup probe.
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
        cfg.model.base_url.clone(),
        cfg.model.api_key.clone(),
    ));
    if !args.skip_model_probe {
        let probe = OpenAiProvider::new(cfg.model.base_url.clone(), cfg.model.api_key.clone());
        probe
            .probe()
            .await
            .with_context(|| format!("model endpoint {} unreachable", cfg.model.base_url))?;
        info!(endpoint = %cfg.model.base_url, "model endpoint probe ok");
    }

    // Tool server child process.
    let mut tool_args = cfg.tools.args.clone();
    tool_args.extend(["--config".to_string(), args.config.clone()]);
    let executor: Arc<dyn ToolExecutor> = Arc::new(
        ToolBridge::spawn(&cfg.tools.command, &tool_args).context("spawning tool server")?,
    );

    // Notification transport: Telegram when configured, process log otherwise.
    let telegram_bot = cfg
        .telegram
        .bot_token
        .as_ref()
        .map(|token| teloxide::Bot::new(token.clone()));
    let notifier: Arc<dyn Notifier> = match &telegram_bot {
        Some(bot) => Arc::new(TelegramNotifier::new(bot.clone())),
        None => Arc::new(notify::LogNotifier),
    };
    let monitor = AlertMonitor::new(archive.clone(), config.clone(), notifier);

    // Ingest worker.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source = ContainerTailSource::new(
        cfg.network.container_name.clone(),
        cfg.network.archives_path.clone(),
    );
    let worker = IngestWorker::new(source, archive.clone(), config.clone());
    tokio::spawn(worker.run(shutdown_rx));

    // Telegram command surface.
    if let Some(bot) = telegram_bot {
        let ctx = Arc::new(BotContext {
            config: config.clone(),
            monitor: monitor.clone(),
            provider: provider.clone(),
            executor: executor.clone(),
        });
        tokio::spawn(TelegramAdapter::new(bot, ctx).run());
        info!("telegram adapter enabled");
    }

    let state = Arc::new(app::AppState {
        config: config.clone(),
        config_path: args.config.clone(),
        archive,
        sessions,
        engine,
        cag,
        provider,
        executor,
        monitor,
        tokens: DashMap::new(),
        active_turns: Arc::new(DashMap::new()),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.server.bind, cfg.server.port)
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listener")?;
    info!(%addr, "watchtower gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("serving HTTP")?;

    info!("clean shutdown");
    Ok(())
}
