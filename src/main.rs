use anyhow::Context;
use dotenvy::dotenv;
use loyalty_bot::admin::AdminActionRouter;
use loyalty_bot::bot::handlers;
use loyalty_bot::config::Settings;
use loyalty_bot::engine::ConversationEngine;
use loyalty_bot::notify::{Notifier, TelegramNotifier};
use loyalty_bot::provider::HttpLoginProvider;
use loyalty_bot::registry::SessionRegistry;
use loyalty_bot::store::Store;
use loyalty_bot::withdraw::WithdrawalWorkflow;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    init_logging();

    info!("Starting loyalty bot...");

    let settings = Arc::new(Settings::new().context("failed to load configuration")?);
    info!("Configuration loaded successfully.");

    let store = Arc::new(
        Store::connect(&settings.database_url)
            .await
            .context("failed to initialize the database")?,
    );
    info!("Database initialized.");

    let provider = Arc::new(HttpLoginProvider::new(settings.provider_base_url.clone()));
    info!(base_url = %settings.provider_base_url, "Login provider client initialized.");

    let bot = Bot::new(settings.telegram_token.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));

    let registry = Arc::new(SessionRegistry::new(store.clone(), provider));
    let withdrawals = Arc::new(WithdrawalWorkflow::new(
        store.clone(),
        notifier.clone(),
        settings.points_per_unit,
        settings.min_withdrawal,
    ));
    let router = AdminActionRouter::new(
        store.clone(),
        registry.clone(),
        withdrawals.clone(),
        settings.page_size,
    );
    let engine = Arc::new(ConversationEngine::new(
        store,
        registry,
        withdrawals,
        router,
        notifier,
        settings,
    ));

    info!("Bot is running...");

    Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
