use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub server: ServerConfig,
    pub support: SupportConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Messaging-channel credentials and endpoints.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub auth_token: SecretString,
    pub api_base_url: String,
    pub webhook_url: Option<String>,
    pub sender_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Escalation policy knobs. `expire_assigned_tickets` decides whether the
/// sweeper may also close overdue tickets that already have an agent; the
/// default leaves assigned tickets alone.
#[derive(Clone, Debug)]
pub struct SupportConfig {
    pub escalation_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub default_agent_capacity: u32,
    pub expire_assigned_tickets: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub channel_auth_token: Option<String>,
    pub escalation_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://handoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                auth_token: String::new().into(),
                api_base_url: "https://chatapi.viber.com/pa".to_string(),
                webhook_url: None,
                sender_name: "Support".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            support: SupportConfig {
                escalation_timeout_secs: 300,
                sweep_interval_secs: 30,
                default_agent_capacity: 5,
                expire_assigned_tickets: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("handoff.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(token_value) = channel.auth_token {
                self.channel.auth_token = token_value.into();
            }
            if let Some(api_base_url) = channel.api_base_url {
                self.channel.api_base_url = api_base_url;
            }
            if let Some(webhook_url) = channel.webhook_url {
                self.channel.webhook_url = Some(webhook_url);
            }
            if let Some(sender_name) = channel.sender_name {
                self.channel.sender_name = sender_name;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(support) = patch.support {
            if let Some(escalation_timeout_secs) = support.escalation_timeout_secs {
                self.support.escalation_timeout_secs = escalation_timeout_secs;
            }
            if let Some(sweep_interval_secs) = support.sweep_interval_secs {
                self.support.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(default_agent_capacity) = support.default_agent_capacity {
                self.support.default_agent_capacity = default_agent_capacity;
            }
            if let Some(expire_assigned_tickets) = support.expire_assigned_tickets {
                self.support.expire_assigned_tickets = expire_assigned_tickets;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HANDOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HANDOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("HANDOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HANDOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HANDOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HANDOFF_CHANNEL_AUTH_TOKEN") {
            self.channel.auth_token = value.into();
        }
        if let Some(value) = read_env("HANDOFF_CHANNEL_API_BASE_URL") {
            self.channel.api_base_url = value;
        }
        if let Some(value) = read_env("HANDOFF_CHANNEL_WEBHOOK_URL") {
            self.channel.webhook_url = Some(value);
        }
        if let Some(value) = read_env("HANDOFF_CHANNEL_SENDER_NAME") {
            self.channel.sender_name = value;
        }

        if let Some(value) = read_env("HANDOFF_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HANDOFF_SERVER_PORT") {
            self.server.port = parse_u16("HANDOFF_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HANDOFF_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HANDOFF_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("HANDOFF_SUPPORT_ESCALATION_TIMEOUT_SECS") {
            self.support.escalation_timeout_secs =
                parse_u64("HANDOFF_SUPPORT_ESCALATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HANDOFF_SUPPORT_SWEEP_INTERVAL_SECS") {
            self.support.sweep_interval_secs =
                parse_u64("HANDOFF_SUPPORT_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("HANDOFF_SUPPORT_DEFAULT_AGENT_CAPACITY") {
            self.support.default_agent_capacity =
                parse_u32("HANDOFF_SUPPORT_DEFAULT_AGENT_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("HANDOFF_SUPPORT_EXPIRE_ASSIGNED_TICKETS") {
            self.support.expire_assigned_tickets =
                parse_bool("HANDOFF_SUPPORT_EXPIRE_ASSIGNED_TICKETS", &value)?;
        }

        let log_level = read_env("HANDOFF_LOGGING_LEVEL").or_else(|| read_env("HANDOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HANDOFF_LOGGING_FORMAT").or_else(|| read_env("HANDOFF_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(channel_auth_token) = overrides.channel_auth_token {
            self.channel.auth_token = channel_auth_token.into();
        }
        if let Some(escalation_timeout_secs) = overrides.escalation_timeout_secs {
            self.support.escalation_timeout_secs = escalation_timeout_secs;
        }
        if let Some(sweep_interval_secs) = overrides.sweep_interval_secs {
            self.support.sweep_interval_secs = sweep_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_server(&self.server)?;
        validate_support(&self.support)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("handoff.toml"), PathBuf::from("config/handoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url = url.starts_with("sqlite:") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...` or `:memory:`)".to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.auth_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.auth_token is required. Get it from your channel's bot admin console"
                .to_string(),
        ));
    }

    if !channel.api_base_url.starts_with("http://") && !channel.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "channel.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if let Some(webhook_url) = &channel.webhook_url {
        if !webhook_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "channel.webhook_url must start with https:// (the channel rejects plain http)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_support(support: &SupportConfig) -> Result<(), ConfigError> {
    if support.escalation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "support.escalation_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if support.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "support.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if support.default_agent_capacity == 0 {
        return Err(ConfigError::Validation(
            "support.default_agent_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    server: Option<ServerPatch>,
    support: Option<SupportPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    auth_token: Option<String>,
    api_base_url: Option<String>,
    webhook_url: Option<String>,
    sender_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SupportPatch {
    escalation_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    default_agent_capacity: Option<u32>,
    expire_assigned_tickets: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CHANNEL_AUTH_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("handoff.toml");
            fs::write(
                &path,
                r#"
[channel]
auth_token = "${TEST_CHANNEL_AUTH_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.channel.auth_token.expose_secret() == "token-from-env",
                "auth token should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_CHANNEL_AUTH_TOKEN"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HANDOFF_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HANDOFF_CHANNEL_AUTH_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("handoff.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[channel]
auth_token = "token-from-file"

[support]
escalation_timeout_secs = 120

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.channel.auth_token.expose_secret() == "token-from-env",
                "env auth token should win over file and defaults",
            )?;
            ensure(
                config.support.escalation_timeout_secs == 120,
                "file escalation timeout should win over the default",
            )?;
            Ok(())
        })();

        clear_vars(&["HANDOFF_DATABASE_URL", "HANDOFF_CHANNEL_AUTH_TOKEN"]);
        result
    }

    #[test]
    fn support_policy_env_overrides_are_parsed() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HANDOFF_CHANNEL_AUTH_TOKEN", "token-test");
        env::set_var("HANDOFF_SUPPORT_SWEEP_INTERVAL_SECS", "10");
        env::set_var("HANDOFF_SUPPORT_EXPIRE_ASSIGNED_TICKETS", "true");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.support.sweep_interval_secs == 10, "sweep interval should come from env")?;
            ensure(
                config.support.expire_assigned_tickets,
                "assigned-expiry policy should be enabled from env",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "HANDOFF_CHANNEL_AUTH_TOKEN",
            "HANDOFF_SUPPORT_SWEEP_INTERVAL_SECS",
            "HANDOFF_SUPPORT_EXPIRE_ASSIGNED_TICKETS",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&["HANDOFF_CHANNEL_AUTH_TOKEN"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("channel.auth_token")
        );
        ensure(has_message, "validation failure should mention channel.auth_token")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HANDOFF_CHANNEL_AUTH_TOKEN", "channel-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("channel-secret-value"),
                "debug output should not contain the channel token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["HANDOFF_CHANNEL_AUTH_TOKEN"]);
        result
    }
}
