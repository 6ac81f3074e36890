pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "handoff",
    about = "Hand-off engine operator CLI",
    long_about = "Operate hand-off runtime readiness, migrations, agent roster management, config inspection, and demo fixtures.",
    after_help = "Examples:\n  handoff doctor --json\n  handoff agents list\n  handoff agents add --id agent-ana --name \"Ana\" --email ana@support.example"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo support team and subscriber fixtures")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check config, channel endpoint, DB connectivity, agent roster, and queue depth")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Manage the support agent roster")]
    Agents(AgentsCommand),
}

#[derive(Debug, Subcommand)]
enum AgentsCommand {
    #[command(about = "List registered agents with availability and live chat load")]
    List,
    #[command(about = "Register a new agent or refresh an existing one")]
    Add {
        #[arg(long, help = "Stable agent identifier, e.g. agent-ana")]
        id: String,
        #[arg(long, help = "Display name shown to users on assignment")]
        name: String,
        #[arg(long, help = "Agent email address")]
        email: String,
        #[arg(long, default_value = "agent", help = "Roster role, e.g. agent or supervisor")]
        role: String,
        #[arg(long, help = "Concurrent chat capacity; defaults to support.default_agent_capacity")]
        capacity: Option<u32>,
    },
    #[command(about = "Mark an agent available or unavailable for new assignments")]
    Availability {
        #[arg(long, help = "Agent identifier to update")]
        id: String,
        #[arg(long, help = "Whether the agent accepts new assignments")]
        available: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Agents(agents) => match agents {
            AgentsCommand::List => commands::agents::list(),
            AgentsCommand::Add { id, name, email, role, capacity } => {
                commands::agents::add(&id, &name, &email, &role, capacity)
            }
            AgentsCommand::Availability { id, available } => {
                commands::agents::set_availability(&id, available)
            }
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
