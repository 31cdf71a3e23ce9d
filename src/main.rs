use std::sync::Arc;

use anyhow::Context;
use group_assist::channels::{AppState, Outbox, Transport, WhatsAppClient, webhook_routes};
use group_assist::config::Settings;
use group_assist::digest::{
    GroupSummarizer, SummaryFanout, TopicLoader, spawn_summary_ticker, spawn_topic_ticker,
};
use group_assist::llm::{RetryPolicy, RigEmbedder, create_provider};
use group_assist::pipeline::{MessageRouter, UnavailableKnowledgeBase};
use group_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = settings.chat.backend.as_str(),
        model = %settings.chat.model,
        embedding_model = %settings.embedding_model,
        gateway = %settings.whatsapp.host,
        "Starting group assist"
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&settings.database_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database at {}",
                    settings.database_path.display()
                )
            })?,
    );

    // ── Transport & LLM ─────────────────────────────────────────────────
    let transport: Arc<dyn Transport> = Arc::new(WhatsAppClient::new(&settings.whatsapp));
    let outbox = Arc::new(Outbox::new(transport, db.clone()));
    let llm = create_provider(&settings.chat).context("Failed to create LLM provider")?;
    let embedder = Arc::new(
        RigEmbedder::new(&settings.embedding_api_key)
            .context("Failed to create embedding provider")?,
    );

    // ── Routing & scheduled jobs ────────────────────────────────────────
    let knowledge = Arc::new(UnavailableKnowledgeBase::new(outbox.clone()));
    let router = Arc::new(MessageRouter::new(
        db.clone(),
        outbox.clone(),
        llm.clone(),
        knowledge,
    ));

    let summarizer = Arc::new(GroupSummarizer::new(
        db.clone(),
        outbox.clone(),
        llm.clone(),
        RetryPolicy::default(),
    ));
    let fanout = Arc::new(SummaryFanout::new(summarizer));
    let _summary_ticker = spawn_summary_ticker(fanout.clone(), settings.summary_schedule.clone());

    let topics = Arc::new(TopicLoader::new(
        db.clone(),
        outbox.clone(),
        llm,
        embedder,
        settings.embedding_model.clone(),
        RetryPolicy::default(),
    ));
    let _topic_ticker = spawn_topic_ticker(topics.clone(), settings.topic_schedule.clone());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = webhook_routes(AppState {
        store: db,
        outbox,
        router,
        fanout,
        topics,
    });

    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("Webhook server failed")?;

    Ok(())
}
