use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

use recado::core::Config;
use recado::database::Database;
use recado::features::aggregator::MessageAggregator;
use recado::features::reengagement::{ReengagementChecker, ReengagementPolicy};
use recado::features::reminders::{ReminderDispatcher, ReminderEngine};
use recado::gateway::{MessageGateway, WhapiClient};
use recado::llm::{GeminiClient, TextGenerator};
use recado::router::MessageRouter;
use recado::webhook::WebhookServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting Recado WhatsApp Bot...");

    let database = Database::new(&config.database_path).await?;
    info!("💾 Database ready at {}", config.database_path);

    let whapi = Arc::new(WhapiClient::new(&config.whapi_api_url, &config.whapi_token)?);
    match whapi.test_connection().await {
        Ok(()) => info!("📱 Whapi connection verified"),
        Err(e) => warn!("Whapi connection check failed: {e:#}. Continuing anyway."),
    }
    let gateway: Arc<dyn MessageGateway> = whapi;

    let generator: Arc<dyn TextGenerator> = Arc::new(GeminiClient::new(
        &config.gemini_api_key,
        &config.gemini_model,
        &config.gemini_context,
    )?);
    info!("🤖 Using Gemini model {}", config.gemini_model);

    let engine = Arc::new(ReminderEngine::new(
        database.clone(),
        gateway.clone(),
        generator.clone(),
        config.timezone,
    ));
    let aggregator = MessageAggregator::new(database.clone(), config.debounce_secs);
    let router = Arc::new(MessageRouter::new(
        database.clone(),
        aggregator,
        engine.clone(),
        gateway.clone(),
        generator.clone(),
        config.timezone,
        config.history_limit,
        config.summarize_threshold,
    ));

    // Pending buffer drain loop
    let drain_router = router.clone();
    let scan_secs = config.pending_scan_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(scan_secs));
        loop {
            interval.tick().await;
            if let Err(e) = drain_router.process_pending(chrono::Utc::now()).await {
                error!("Pending message scan failed: {e:#}");
            }
        }
    });

    // Due reminder dispatch loop
    let dispatcher = ReminderDispatcher::new(database.clone(), gateway.clone());
    let check_secs = config.reminder_check_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(check_secs));
        loop {
            interval.tick().await;
            match dispatcher.run_cycle(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("⏰ Dispatched {n} reminder(s)"),
                Err(e) => error!("Reminder dispatch failed: {e:#}"),
            }
        }
    });

    // Stale session sweep loop
    let sweep_engine = engine.clone();
    let sweep_secs = config.session_sweep_secs;
    let session_timeout = config.session_timeout_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        loop {
            interval.tick().await;
            let (creation, cancellation) = sweep_engine.sweep_stale_sessions(session_timeout);
            if creation + cancellation > 0 {
                info!("🧹 Swept {creation} creation and {cancellation} cancellation session(s)");
            }
        }
    });

    // Re-engagement loop
    let reengagement = ReengagementChecker::new(
        database.clone(),
        gateway.clone(),
        generator.clone(),
        ReengagementPolicy {
            inactive_hours: config.reengagement_inactive_hours,
            stale_hours: config.reengagement_stale_hours,
            min_gap_hours: config.reengagement_min_gap_hours,
        },
    );
    let reengagement_secs = config.reengagement_check_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(reengagement_secs));
        loop {
            interval.tick().await;
            match reengagement.run_cycle(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("👋 Re-engaged {n} chat(s)"),
                Err(e) => error!("Re-engagement check failed: {e:#}"),
            }
        }
    });

    info!("Bot configured successfully. Starting webhook server...");
    let server = Arc::new(WebhookServer::new(router));
    server.run(&config.webhook_bind).await
}
