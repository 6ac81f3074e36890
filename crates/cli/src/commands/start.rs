use crate::commands::{exit_code, CommandResult};
use handoff_core::config::{AppConfig, LoadOptions};
use handoff_core::handoff::AgentStore;
use handoff_db::{connect_with_settings, migrations, SqlAgentStore};

/// Preflight for the server: config loads, the database accepts
/// connections, the schema is current, and the roster is inspectable.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "start",
                "config_validation",
                format!("configuration issue: {error}"),
                exit_code::CONFIG,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "start",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                exit_code::RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit_code::DATABASE))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit_code::OPERATION))?;

        let agents = SqlAgentStore::new(pool.clone())
            .list_agents()
            .await
            .map_err(|error| ("roster_read", error.to_string(), exit_code::OPERATION))?;
        let available = agents.iter().filter(|agent| agent.is_available).count();

        pool.close().await;
        Ok::<(usize, usize), (&'static str, String, u8)>((agents.len(), available))
    });

    match result {
        Ok((total, available)) => CommandResult::success(
            "start",
            format!("preflight passed: {total} agents registered, {available} available"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}
