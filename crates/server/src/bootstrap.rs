use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use handoff_core::config::{AppConfig, ConfigError, LoadOptions};
use handoff_core::domain::user::UserId;
use handoff_core::handoff::{AgentPool, EscalationCoordinator, EscalationRequest, EscalationResult};
use handoff_core::{AgentAvailability, ApplicationError};
use handoff_db::{
    connect_with_settings, migrations, DbPool, SqlAgentStore, SqlConversationStore,
    SqlMessageRepository, SqlTicketStore, SqlUserRepository,
};
use handoff_gateway::client::{ChannelApiClient, MessageGateway, NoopGateway};
use handoff_gateway::events::{EventHandlerError, HandoffService};

use crate::notify::ChannelNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub coordinator: Arc<EscalationCoordinator>,
    pub gateway: Arc<dyn MessageGateway>,
    pub users: Arc<SqlUserRepository>,
    pub messages: Arc<SqlMessageRepository>,
    pub conversations: Arc<SqlConversationStore>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    // The webhook URL doubles as the on/off switch for outbound traffic:
    // without one the channel cannot reach us, so replies stay local.
    let gateway: Arc<dyn MessageGateway> = if config.channel.webhook_url.is_some() {
        Arc::new(ChannelApiClient::new(
            config.channel.api_base_url.clone(),
            config.channel.auth_token.clone(),
            config.channel.sender_name.clone(),
        ))
    } else {
        Arc::new(NoopGateway)
    };

    let agent_store = Arc::new(SqlAgentStore::new(db_pool.clone()));
    let ticket_store = Arc::new(SqlTicketStore::new(db_pool.clone()));
    let conversation_store = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let pool = Arc::new(AgentPool::new(agent_store));
    let notifier = Arc::new(ChannelNotifier::new(gateway.clone()));

    let coordinator = Arc::new(EscalationCoordinator::new(
        pool,
        ticket_store,
        conversation_store.clone(),
        notifier,
        config.support.clone(),
    ));

    Ok(Application {
        users: Arc::new(SqlUserRepository::new(db_pool.clone())),
        messages: Arc::new(SqlMessageRepository::new(db_pool.clone())),
        conversations: conversation_store,
        config,
        db_pool,
        coordinator,
        gateway,
    })
}

/// Adapts the coordinator onto the channel-facing service trait.
pub struct CoordinatorHandoffService {
    coordinator: Arc<EscalationCoordinator>,
}

impl CoordinatorHandoffService {
    pub fn new(coordinator: Arc<EscalationCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl HandoffService for CoordinatorHandoffService {
    async fn escalate(
        &self,
        user_id: &UserId,
        _user_name: &str,
    ) -> Result<EscalationResult, EventHandlerError> {
        self.coordinator
            .escalate(EscalationRequest::for_user(user_id.clone()))
            .await
            .map_err(handoff_error)
    }

    async fn availability(&self) -> Result<AgentAvailability, EventHandlerError> {
        self.coordinator.check_agent_availability().await.map_err(handoff_error)
    }

    async fn queue_position(&self, user_id: &UserId) -> Result<Option<usize>, EventHandlerError> {
        self.coordinator.queue_position_for_user(user_id).await.map_err(handoff_error)
    }

    async fn end_conversation(&self, user_id: &UserId) -> Result<bool, EventHandlerError> {
        self.coordinator.end_conversation(user_id).await.map_err(handoff_error)
    }
}

fn handoff_error(error: ApplicationError) -> EventHandlerError {
    EventHandlerError::Handoff(error.to_string())
}
