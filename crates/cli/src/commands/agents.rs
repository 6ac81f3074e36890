use chrono::Utc;

use crate::commands::{exit_code, CommandResult};
use handoff_core::config::{AppConfig, LoadOptions};
use handoff_core::domain::agent::{Agent, AgentId};
use handoff_core::handoff::AgentStore;
use handoff_db::{connect_with_settings, migrations, DbPool, SqlAgentStore};

pub fn list() -> CommandResult {
    with_store("agents_list", |store, _config| async move {
        let agents = store.list_agents().await.map_err(|error| error.to_string())?;
        if agents.is_empty() {
            return Ok("no agents registered".to_string());
        }

        let lines: Vec<String> = agents
            .iter()
            .map(|agent| {
                format!(
                    "  - {} ({}) {} {}/{} chats",
                    agent.id.0,
                    agent.name,
                    if agent.is_available { "available" } else { "unavailable" },
                    agent.current_chats,
                    agent.max_concurrent_chats,
                )
            })
            .collect();
        Ok(format!("{} agents registered:\n{}", agents.len(), lines.join("\n")))
    })
}

pub fn add(id: &str, name: &str, email: &str, role: &str, capacity: Option<u32>) -> CommandResult {
    let agent_id = id.to_string();
    let agent_name = name.to_string();
    let agent_email = email.to_string();
    let agent_role = role.to_string();

    with_store("agents_add", move |store, config| async move {
        let capacity = capacity.unwrap_or(config.support.default_agent_capacity);
        let agent = Agent {
            id: AgentId(agent_id.clone()),
            name: agent_name,
            email: agent_email,
            role: agent_role,
            is_available: true,
            max_concurrent_chats: capacity,
            current_chats: 0,
            created_at: Utc::now(),
        };
        store.upsert_agent(&agent).await.map_err(|error| error.to_string())?;
        Ok(format!("agent {agent_id} registered with capacity {capacity}"))
    })
}

pub fn set_availability(id: &str, available: bool) -> CommandResult {
    let agent_id = id.to_string();

    with_store("agents_availability", move |store, _config| async move {
        let updated = store
            .set_availability(&AgentId(agent_id.clone()), available)
            .await
            .map_err(|error| error.to_string())?;
        if !updated {
            return Err(format!("agent {agent_id} is not registered"));
        }
        Ok(format!(
            "agent {agent_id} marked {}",
            if available { "available" } else { "unavailable" }
        ))
    })
}

fn with_store<F, Fut>(command: &'static str, operation: F) -> CommandResult
where
    F: FnOnce(SqlAgentStore, AppConfig) -> Fut,
    Fut: std::future::Future<Output = Result<String, String>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
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
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                exit_code::RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool: DbPool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit_code::DATABASE))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit_code::OPERATION))?;

        let outcome = operation(SqlAgentStore::new(pool.clone()), config)
            .await
            .map_err(|message| ("roster_update", message, exit_code::OPERATION));

        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
