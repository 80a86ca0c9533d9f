use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use citabot_agent::decision::LlmDecisionMaker;
use citabot_agent::llm::HttpLlmClient;
use citabot_calendar::{CalendarClient, HttpCalendarClient, NoopCalendarClient};
use citabot_chatwoot::client::{ChatClient, HttpChatClient, NoopChatClient};
use citabot_core::config::{AppConfig, ConfigError, LoadOptions};
use citabot_db::repositories::{
    SqlBookingStore, SqlCatalogStore, SqlConversationStore, SqlKeywordStore, SqlRateLimitStore,
    SqlStatsStore,
};
use citabot_db::{connect_with_settings, migrations, seed_baseline, DbPool};
use citabot_engine::orchestrator::PipelineDeps;
use citabot_engine::{
    AvailabilityOracle, BookingEngine, ConversationGate, Orchestrator, RateLimiter,
};

const GATE_CACHE_TTL: Duration = Duration::from_secs(30);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("seeding baseline data failed: {0}")]
    Seed(String),
    #[error("calendar client init failed: {0}")]
    Calendar(String),
    #[error("chat client init failed: {0}")]
    Chat(String),
    #[error("llm client init failed: {0}")]
    Llm(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let seeded = seed_baseline(&db_pool)
        .await
        .map_err(|seed_error| BootstrapError::Seed(seed_error.to_string()))?;
    if seeded.seeded {
        info!(
            event_name = "system.bootstrap.seeded",
            services = seeded.services,
            providers = seeded.providers,
            keywords = seeded.keywords,
            "baseline catalog seeded"
        );
    }

    let bookings = Arc::new(SqlBookingStore::new(db_pool.clone()));
    let catalog = Arc::new(SqlCatalogStore::new(db_pool.clone()));
    let conversations = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let keywords = Arc::new(SqlKeywordStore::new(db_pool.clone()));
    let rate_windows = Arc::new(SqlRateLimitStore::new(db_pool.clone()));
    let stats = Arc::new(SqlStatsStore::new(db_pool.clone()));

    // Collaborators degrade to no-ops when unconfigured so a fresh checkout
    // can run end-to-end against the local database alone.
    let calendar: Arc<dyn CalendarClient> = if config.calendar.calendar_id.trim().is_empty() {
        info!(
            event_name = "system.bootstrap.calendar_mode",
            mode = "noop",
            "no calendar configured; events stay local"
        );
        Arc::new(NoopCalendarClient::new())
    } else {
        Arc::new(
            HttpCalendarClient::from_config(&config.calendar)
                .map_err(|calendar_error| BootstrapError::Calendar(calendar_error.to_string()))?,
        )
    };

    let chat: Arc<dyn ChatClient> = if config.chatwoot.base_url.trim().is_empty() {
        info!(
            event_name = "system.bootstrap.chat_mode",
            mode = "noop",
            "no helpdesk configured; replies are swallowed"
        );
        Arc::new(NoopChatClient::new())
    } else {
        Arc::new(
            HttpChatClient::from_config(&config.chatwoot)
                .map_err(|chat_error| BootstrapError::Chat(chat_error.to_string()))?,
        )
    };

    let llm = HttpLlmClient::from_config(&config.llm)
        .map_err(|llm_error| BootstrapError::Llm(llm_error.to_string()))?;
    let decision = Arc::new(LlmDecisionMaker::new(llm, config.llm.max_retries));

    let gate = Arc::new(ConversationGate::new(conversations.clone(), GATE_CACHE_TTL));
    let oracle = Arc::new(AvailabilityOracle::new(
        calendar.clone(),
        bookings.clone(),
        config.calendar.calendar_id.clone(),
        Duration::from_secs(config.calendar.freebusy_cache_ttl_secs),
    ));
    let engine = Arc::new(BookingEngine::new(
        bookings.clone(),
        catalog.clone(),
        calendar,
        oracle.clone(),
        stats.clone(),
        config.calendar.calendar_id.clone(),
    ));
    let limiter = RateLimiter::new(rate_windows, &config.pipeline);

    let orchestrator = Arc::new(Orchestrator::new(
        PipelineDeps {
            gate,
            limiter,
            engine,
            oracle,
            bookings,
            catalog,
            conversations,
            keywords,
            decision,
            chat,
            stats,
        },
        Duration::from_secs(config.pipeline.message_group_delay_secs),
        config.pipeline.context_max_entries,
    ));

    info!(event_name = "system.bootstrap.complete", "application bootstrap complete");
    Ok(Application { config, db_pool, orchestrator })
}

pub fn webhook_secret(config: &AppConfig) -> Option<String> {
    config
        .chatwoot
        .webhook_secret
        .as_ref()
        .map(|secret| secret.expose_secret().to_string())
        .filter(|secret| !secret.trim().is_empty())
}
