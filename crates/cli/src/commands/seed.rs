use crate::commands::{exit_code, CommandResult};
use handoff_core::config::{AppConfig, LoadOptions};
use handoff_db::{connect_with_settings, migrations, DemoSeedDataset};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
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
                "seed",
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

        let report = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit_code::OPERATION))?;

        let verified = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit_code::FIXTURES))?;

        let run_result = if verified {
            Ok(report)
        } else {
            Err((
                "seed_verification",
                "seeded rows missing after load".to_string(),
                exit_code::FIXTURES,
            ))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(report) => CommandResult::success(
            "seed",
            format!(
                "demo fixtures loaded: {} agents, {} subscribers",
                report.agents_seeded, report.users_seeded
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
