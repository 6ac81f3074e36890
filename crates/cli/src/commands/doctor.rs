use handoff_core::config::{AppConfig, LoadOptions};
use handoff_core::domain::ticket::TicketStatus;
use handoff_core::handoff::{AgentStore, TicketStore};
use handoff_db::{connect_with_settings, SqlAgentStore, SqlTicketStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DB_CHECKS: &[&str] = &["database_connectivity", "agent_roster", "escalation_queue"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(pass("config_validation", "configuration loaded and validated"));
            config
        }
        Err(error) => {
            checks.push(fail("config_validation", error.to_string()));
            checks.push(skipped("channel_endpoint"));
            for name in DB_CHECKS {
                checks.push(skipped(name));
            }
            return finish(checks);
        }
    };

    checks.push(check_channel_endpoint(&config));
    run_database_checks(&config, &mut checks);
    finish(checks)
}

/// The token itself is validated by the config contract; this reports how
/// outbound delivery will behave with the configured endpoint.
fn check_channel_endpoint(config: &AppConfig) -> DoctorCheck {
    let details = match &config.channel.webhook_url {
        Some(webhook_url) => format!(
            "api base `{}`, webhook registered at `{webhook_url}`",
            config.channel.api_base_url
        ),
        None => format!(
            "api base `{}`, no webhook configured so replies stay local",
            config.channel.api_base_url
        ),
    };
    pass("channel_endpoint", details)
}

fn run_database_checks(config: &AppConfig, checks: &mut Vec<DoctorCheck>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            ));
            checks.push(skipped("agent_roster"));
            checks.push(skipped("escalation_queue"));
            return;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                checks.push(fail(
                    "database_connectivity",
                    format!("failed to connect to database: {error}"),
                ));
                checks.push(skipped("agent_roster"));
                checks.push(skipped("escalation_queue"));
                return;
            }
        };
        checks.push(pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ));

        checks.push(check_agent_roster(&pool).await);
        checks.push(check_escalation_queue(&pool).await);
        pool.close().await;
    });
}

async fn check_agent_roster(pool: &handoff_db::DbPool) -> DoctorCheck {
    match SqlAgentStore::new(pool.clone()).list_agents().await {
        Ok(agents) if agents.is_empty() => fail(
            "agent_roster",
            "no agents registered; run `handoff seed` or `handoff agents add`".to_string(),
        ),
        Ok(agents) => {
            let accepting = agents
                .iter()
                .filter(|agent| agent.is_available && agent.has_capacity())
                .count();
            pass(
                "agent_roster",
                format!("{} agents registered, {accepting} accepting new chats", agents.len()),
            )
        }
        Err(error) => fail(
            "agent_roster",
            format!("roster unreadable ({error}); run `handoff migrate` if the schema is missing"),
        ),
    }
}

async fn check_escalation_queue(pool: &handoff_db::DbPool) -> DoctorCheck {
    match SqlTicketStore::new(pool.clone()).list_by_status(TicketStatus::Pending).await {
        Ok(pending) if pending.is_empty() => {
            pass("escalation_queue", "no users waiting for an agent".to_string())
        }
        Ok(pending) => pass(
            "escalation_queue",
            format!("{} users waiting for an agent, oldest ticket {}", pending.len(), pending[0].id),
        ),
        Err(error) => fail(
            "escalation_queue",
            format!("queue unreadable ({error}); run `handoff migrate` if the schema is missing"),
        ),
    }
}

fn finish(checks: Vec<DoctorCheck>) -> DoctorReport {
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };
    DoctorReport { overall_status, summary, checks }
}

fn pass(name: &'static str, details: impl Into<String>) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Pass, details: details.into() }
}

fn fail(name: &'static str, details: impl Into<String>) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Fail, details: details.into() }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because an earlier check failed".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
