use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use ventix_agent::runtime::RuntimeError;
use ventix_agent::{
    AgentRuntime, CommerceHandles, ContextCache, ContextSettings, IntentRouter, ProviderError,
    RuntimeSettings,
};
use ventix_core::clock::{Clock, SystemClock};
use ventix_core::config::{AppConfig, ConfigError, LoadOptions};
use ventix_core::ledger::EditWindow;
use ventix_db::repositories::{
    ConversationRepository, SqlConversationRepository, SqlOrderLedger, SqlOrderRepository,
    SqlProductRepository,
};
use ventix_db::{connect_from_config, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
}

/// Everything a request handler needs, independent of the backing store.
#[derive(Clone)]
pub struct Services {
    pub handles: CommerceHandles,
    pub conversations: Arc<dyn ConversationRepository>,
    pub context: Arc<ContextCache>,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("provider client setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Services {
    pub fn assemble(
        config: &AppConfig,
        handles: CommerceHandles,
        conversations: Arc<dyn ConversationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BootstrapError> {
        let router = IntentRouter::from_config(config, clock.clone())?;
        let context = Arc::new(ContextCache::new(
            conversations.clone(),
            handles.orders.clone(),
            clock.clone(),
            ContextSettings::from_config(&config.conversation),
        ));
        let runtime = AgentRuntime::new(
            router,
            context.clone(),
            handles.clone(),
            clock,
            RuntimeSettings::from_config(config),
        )?;

        Ok(Self { handles, conversations, context, runtime: Arc::new(runtime) })
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = SqlOrderLedger::new(
        db_pool.clone(),
        EditWindow::from_secs(config.orders.edit_window_secs),
        clock.clone(),
    );
    let handles = CommerceHandles {
        catalog: Arc::new(SqlProductRepository::new(db_pool.clone())),
        orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
        ledger: Arc::new(ledger),
    };
    let services = Services::assemble(
        &config,
        handles,
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        clock,
    )?;

    let classification = match services.runtime.router().invoker() {
        Some(invoker) => {
            let shape = invoker.pool().shape();
            format!("remote ({} credential(s) x {} model(s))", shape.credentials, shape.models)
        }
        None => "keyword fallback only".to_string(),
    };
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        classification = %classification,
        "agent runtime assembled"
    );

    Ok(Application { config, db_pool, services })
}
