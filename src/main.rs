use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tag_relay::bot::RelayBot;
use tag_relay::capture::CaptureService;
use tag_relay::channels::TelegramApi;
use tag_relay::config::RelayConfig;
use tag_relay::forwarding::{self, EngineConfig, ForwardingEngine};
use tag_relay::store::{LibSqlBackend, OperatorRegistry, OperatorRole};
use tag_relay::tagging::{self, SessionStore, TaggingWorkflow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tag-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,hyper=warn,reqwest=warn")
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📨 Tag Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    match config.forward_interval {
        Some(interval) => eprintln!("   Forwarding every {}s", interval.as_secs()),
        None => eprintln!("   Timed forwarding disabled (use /forward)"),
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    for &user_id in &config.admin_ids {
        db.upsert_operator(user_id, "", None, OperatorRole::Admin)
            .await
            .with_context(|| format!("Failed to seed admin operator {user_id}"))?;
    }
    if config.admin_ids.is_empty() {
        tracing::warn!("No admin operators configured; set TAG_RELAY_ADMIN_IDS");
    }

    // ── Services ─────────────────────────────────────────────────────────
    let api = TelegramApi::new(config.bot_token.clone(), &config.api_base);

    let sessions = SessionStore::new(config.session_ttl);
    let _session_expiry = tagging::spawn_expiry_task(sessions.clone());
    let workflow = Arc::new(TaggingWorkflow::new(db.clone(), sessions));

    let engine = Arc::new(ForwardingEngine::new(
        db.clone(),
        db.clone(),
        Arc::new(api.clone()),
        EngineConfig {
            delivery_timeout: config.delivery_timeout,
            max_concurrent_cycles: config.max_concurrent_cycles,
        },
    ));
    let _ticker = config
        .forward_interval
        .map(|interval| forwarding::spawn_forward_ticker(engine.clone(), interval));

    let capture = CaptureService::new(db.clone(), db.clone(), workflow.clone());
    let bot = RelayBot::new(api, db.clone(), capture, workflow, engine);

    tokio::select! {
        _ = bot.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
