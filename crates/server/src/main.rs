mod bootstrap;
mod health;
mod notify;
mod routes;
mod sweeper;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;

use handoff_core::config::{AppConfig, LoadOptions};
use handoff_gateway::events::{
    EventDispatcher, MessageHandler, NoopSubscriberService, SubscribedHandler, UnsubscribedHandler,
    WelcomeHandler,
};

use crate::bootstrap::CoordinatorHandoffService;
use crate::routes::WebhookState;

fn init_logging(config: &AppConfig) {
    use handoff_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Now bootstrap using the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config).await?;

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(CoordinatorHandoffService::new(app.coordinator.clone())));
    dispatcher.register(WelcomeHandler);
    dispatcher.register(SubscribedHandler::new(NoopSubscriberService));
    dispatcher
        .register(UnsubscribedHandler::new(CoordinatorHandoffService::new(app.coordinator.clone())));

    let router = Router::new()
        .merge(routes::router(WebhookState {
            dispatcher: Arc::new(dispatcher),
            gateway: app.gateway.clone(),
            users: app.users.clone(),
            messages: app.messages.clone(),
            conversations: app.conversations.clone(),
        }))
        .merge(health::router(app.db_pool.clone()));

    let sweep_handle =
        sweeper::spawn(app.coordinator.clone(), app.config.support.sweep_interval_secs);

    if let Some(webhook_url) = app.config.channel.webhook_url.clone() {
        app.gateway.register_webhook(&webhook_url).await?;
        tracing::info!(
            event_name = "system.server.webhook_registered",
            correlation_id = "bootstrap",
            webhook_url = %webhook_url,
            "channel webhook registered"
        );
    }

    let bind = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %bind,
        "handoff-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    sweep_handle.abort();
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "handoff-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
