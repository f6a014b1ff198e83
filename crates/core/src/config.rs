use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::DEFAULT_DUPLICATE_WINDOW_SECS;

pub const DEFAULT_AGENT_NAME: &str = "salesforce-assistant";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub salesforce: SalesforceConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

/// Hosted agent service (assistants-style REST API).
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub api_version: String,
    pub model: String,
    pub name: String,
    pub bing_connection_id: Option<String>,
    pub timeout_secs: u64,
    pub max_tool_rounds: u32,
}

#[derive(Clone, Debug)]
pub struct SalesforceConfig {
    pub domain: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub security_token: Option<SecretString>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub api_version: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub duplicate_window_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub record_content: bool,
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
    pub log_level: Option<String>,
    pub agent_endpoint: Option<String>,
    pub agent_model: Option<String>,
    pub server_port: Option<u16>,
    pub telemetry_enabled: Option<bool>,
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
            agent: AgentConfig {
                endpoint: None,
                api_key: None,
                api_version: "2025-05-01".to_string(),
                model: "gpt-4".to_string(),
                name: DEFAULT_AGENT_NAME.to_string(),
                bing_connection_id: None,
                timeout_secs: 120,
                max_tool_rounds: 8,
            },
            salesforce: SalesforceConfig {
                domain: "login".to_string(),
                username: None,
                password: None,
                security_token: None,
                client_id: None,
                client_secret: None,
                api_version: "v59.0".to_string(),
                timeout_secs: 30,
            },
            chat: ChatConfig { duplicate_window_secs: DEFAULT_DUPLICATE_WINDOW_SECS },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 7860,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            telemetry: TelemetryConfig { enabled: true, record_content: false },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AgentConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|endpoint| !endpoint.trim().is_empty())
    }
}

impl SalesforceConfig {
    /// Whether every value the password login needs is present.
    pub fn has_credentials(&self) -> bool {
        let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());
        present(self.username.as_deref())
            && present(self.password.as_ref().map(|secret| secret.expose_secret()))
            && present(self.client_id.as_deref())
            && present(self.client_secret.as_ref().map(|secret| secret.expose_secret()))
    }

    pub fn login_url(&self) -> String {
        format!("https://{}.salesforce.com", self.domain.trim())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("crmchat.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(agent) = patch.agent {
            if let Some(endpoint) = agent.endpoint {
                self.agent.endpoint = Some(endpoint);
            }
            if let Some(api_key_value) = agent.api_key {
                self.agent.api_key = Some(secret_value(api_key_value));
            }
            if let Some(api_version) = agent.api_version {
                self.agent.api_version = api_version;
            }
            if let Some(model) = agent.model {
                self.agent.model = model;
            }
            if let Some(name) = agent.name {
                self.agent.name = name;
            }
            if let Some(bing_connection_id) = agent.bing_connection_id {
                self.agent.bing_connection_id = Some(bing_connection_id);
            }
            if let Some(timeout_secs) = agent.timeout_secs {
                self.agent.timeout_secs = timeout_secs;
            }
            if let Some(max_tool_rounds) = agent.max_tool_rounds {
                self.agent.max_tool_rounds = max_tool_rounds;
            }
        }

        if let Some(salesforce) = patch.salesforce {
            if let Some(domain) = salesforce.domain {
                self.salesforce.domain = domain;
            }
            if let Some(username) = salesforce.username {
                self.salesforce.username = Some(username);
            }
            if let Some(password_value) = salesforce.password {
                self.salesforce.password = Some(secret_value(password_value));
            }
            if let Some(security_token_value) = salesforce.security_token {
                self.salesforce.security_token = Some(secret_value(security_token_value));
            }
            if let Some(client_id) = salesforce.client_id {
                self.salesforce.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = salesforce.client_secret {
                self.salesforce.client_secret = Some(secret_value(client_secret_value));
            }
            if let Some(api_version) = salesforce.api_version {
                self.salesforce.api_version = api_version;
            }
            if let Some(timeout_secs) = salesforce.timeout_secs {
                self.salesforce.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(duplicate_window_secs) = chat.duplicate_window_secs {
                self.chat.duplicate_window_secs = duplicate_window_secs;
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(telemetry) = patch.telemetry {
            if let Some(enabled) = telemetry.enabled {
                self.telemetry.enabled = enabled;
            }
            if let Some(record_content) = telemetry.record_content {
                self.telemetry.record_content = record_content;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CRMCHAT_AGENT_ENDPOINT") {
            self.agent.endpoint = Some(value);
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_API_KEY") {
            self.agent.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_API_VERSION") {
            self.agent.api_version = value;
        }
        let model = read_env("CRMCHAT_AGENT_MODEL").or_else(|| read_env("MODEL_DEPLOYMENT_NAME"));
        if let Some(value) = model {
            self.agent.model = value;
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_NAME") {
            self.agent.name = value;
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_BING_CONNECTION_ID") {
            self.agent.bing_connection_id = Some(value);
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_u64("CRMCHAT_AGENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMCHAT_AGENT_MAX_TOOL_ROUNDS") {
            self.agent.max_tool_rounds = parse_u32("CRMCHAT_AGENT_MAX_TOOL_ROUNDS", &value)?;
        }

        let domain = read_env("CRMCHAT_SALESFORCE_DOMAIN").or_else(|| read_env("SF_DOMAIN"));
        if let Some(value) = domain {
            self.salesforce.domain = value;
        }
        let username = read_env("CRMCHAT_SALESFORCE_USERNAME").or_else(|| read_env("SF_USERNAME"));
        if let Some(value) = username {
            self.salesforce.username = Some(value);
        }
        let password = read_env("CRMCHAT_SALESFORCE_PASSWORD").or_else(|| read_env("SF_PASSWORD"));
        if let Some(value) = password {
            self.salesforce.password = Some(secret_value(value));
        }
        let security_token = read_env("CRMCHAT_SALESFORCE_SECURITY_TOKEN")
            .or_else(|| read_env("SF_SECURITY_TOKEN"));
        if let Some(value) = security_token {
            self.salesforce.security_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CRMCHAT_SALESFORCE_CLIENT_ID") {
            self.salesforce.client_id = Some(value);
        }
        if let Some(value) = read_env("CRMCHAT_SALESFORCE_CLIENT_SECRET") {
            self.salesforce.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CRMCHAT_SALESFORCE_API_VERSION") {
            self.salesforce.api_version = value;
        }
        if let Some(value) = read_env("CRMCHAT_SALESFORCE_TIMEOUT_SECS") {
            self.salesforce.timeout_secs = parse_u64("CRMCHAT_SALESFORCE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CRMCHAT_CHAT_DUPLICATE_WINDOW_SECS") {
            self.chat.duplicate_window_secs =
                parse_u64("CRMCHAT_CHAT_DUPLICATE_WINDOW_SECS", &value)?;
        }

        if let Some(value) = read_env("CRMCHAT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CRMCHAT_SERVER_PORT") {
            self.server.port = parse_u16("CRMCHAT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CRMCHAT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CRMCHAT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CRMCHAT_LOGGING_LEVEL").or_else(|| read_env("CRMCHAT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CRMCHAT_LOGGING_FORMAT").or_else(|| read_env("CRMCHAT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("CRMCHAT_TELEMETRY_ENABLED") {
            self.telemetry.enabled = parse_bool("CRMCHAT_TELEMETRY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CRMCHAT_TELEMETRY_RECORD_CONTENT") {
            self.telemetry.record_content =
                parse_bool("CRMCHAT_TELEMETRY_RECORD_CONTENT", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(endpoint) = overrides.agent_endpoint {
            self.agent.endpoint = Some(endpoint);
        }
        if let Some(model) = overrides.agent_model {
            self.agent.model = model;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.telemetry_enabled {
            self.telemetry.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_agent(&self.agent)?;
        validate_salesforce(&self.salesforce)?;
        validate_chat(&self.chat)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("crmchat.toml"), PathBuf::from("config/crmchat.toml")]
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

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &agent.endpoint {
        let endpoint = endpoint.trim();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "agent.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    if agent.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "agent.model must name a model deployment (env MODEL_DEPLOYMENT_NAME)".to_string(),
        ));
    }

    if agent.name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.name must not be empty".to_string()));
    }

    if agent.timeout_secs == 0 || agent.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agent.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if agent.max_tool_rounds == 0 || agent.max_tool_rounds > 32 {
        return Err(ConfigError::Validation(
            "agent.max_tool_rounds must be in range 1..=32".to_string(),
        ));
    }

    Ok(())
}

fn validate_salesforce(salesforce: &SalesforceConfig) -> Result<(), ConfigError> {
    let domain = salesforce.domain.trim();
    if domain.is_empty() || domain.contains("://") || domain.contains('/') {
        return Err(ConfigError::Validation(
            "salesforce.domain must be a bare login subdomain such as `login` or `test`"
                .to_string(),
        ));
    }

    if !salesforce.api_version.starts_with('v') {
        return Err(ConfigError::Validation(
            "salesforce.api_version must look like `v59.0`".to_string(),
        ));
    }

    if salesforce.timeout_secs == 0 || salesforce.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "salesforce.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.duplicate_window_secs > 3600 {
        return Err(ConfigError::Validation(
            "chat.duplicate_window_secs must be at most 3600".to_string(),
        ));
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
    agent: Option<AgentPatch>,
    salesforce: Option<SalesforcePatch>,
    chat: Option<ChatPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    telemetry: Option<TelemetryPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    endpoint: Option<String>,
    api_key: Option<String>,
    api_version: Option<String>,
    model: Option<String>,
    name: Option<String>,
    bing_connection_id: Option<String>,
    timeout_secs: Option<u64>,
    max_tool_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SalesforcePatch {
    domain: Option<String>,
    username: Option<String>,
    password: Option<String>,
    security_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    duplicate_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct TelemetryPatch {
    enabled: Option<bool>,
    record_content: Option<bool>,
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

        env::set_var("TEST_CRMCHAT_AGENT_KEY", "agent-key-from-env");
        env::set_var("TEST_CRMCHAT_SF_PASSWORD", "sf-password-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("crmchat.toml");
            fs::write(
                &path,
                r#"
[agent]
endpoint = "https://example.services.ai.azure.com/api/projects/demo"
api_key = "${TEST_CRMCHAT_AGENT_KEY}"

[salesforce]
username = "ops@example.com"
password = "${TEST_CRMCHAT_SF_PASSWORD}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.agent.api_key.as_ref().map(|key| key.expose_secret())
                    == Some("agent-key-from-env"),
                "agent api key should be interpolated from environment",
            )?;
            ensure(
                config.salesforce.password.as_ref().map(|password| password.expose_secret())
                    == Some("sf-password-from-env"),
                "salesforce password should be interpolated from environment",
            )?;
            ensure(config.agent.is_configured(), "agent endpoint should be configured")?;
            Ok(())
        })();

        clear_vars(&["TEST_CRMCHAT_AGENT_KEY", "TEST_CRMCHAT_SF_PASSWORD"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("crmchat.toml");
        fs::write(&path, "[agent]\napi_key = \"${CRMCHAT_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var } if var == "CRMCHAT_TEST_UNSET_VARIABLE"
            ),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn original_deployment_variables_are_honoured() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MODEL_DEPLOYMENT_NAME", "gpt-4o");
        env::set_var("SF_USERNAME", "ops@example.com");
        env::set_var("SF_PASSWORD", "hunter2");
        env::set_var("SF_SECURITY_TOKEN", "token");
        env::set_var("SF_DOMAIN", "test");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.agent.model == "gpt-4o", "model should come from MODEL_DEPLOYMENT_NAME")?;
            ensure(
                config.salesforce.username.as_deref() == Some("ops@example.com"),
                "username should come from SF_USERNAME",
            )?;
            ensure(
                config.salesforce.login_url() == "https://test.salesforce.com",
                "domain should come from SF_DOMAIN",
            )?;
            ensure(
                !config.salesforce.has_credentials(),
                "credentials are incomplete without a connected app",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "MODEL_DEPLOYMENT_NAME",
            "SF_USERNAME",
            "SF_PASSWORD",
            "SF_SECURITY_TOKEN",
            "SF_DOMAIN",
        ]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CRMCHAT_LOG_LEVEL", "warn");
        env::set_var("CRMCHAT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CRMCHAT_LOG_LEVEL", "CRMCHAT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CRMCHAT_AGENT_MODEL", "model-from-env");
        env::set_var("CRMCHAT_SERVER_PORT", "9100");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("crmchat.toml");
            fs::write(
                &path,
                r#"
[agent]
model = "model-from-file"
max_tool_rounds = 4

[server]
port = 9000

[chat]
duplicate_window_secs = 10

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    server_port: Some(9200),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.server.port == 9200, "override port should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.agent.model == "model-from-env", "env model should win over file")?;
            ensure(config.agent.max_tool_rounds == 4, "file value should win over default")?;
            ensure(config.chat.duplicate_window_secs == 10, "file window should be applied")?;
            Ok(())
        })();

        clear_vars(&["CRMCHAT_AGENT_MODEL", "CRMCHAT_SERVER_PORT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CRMCHAT_AGENT_ENDPOINT", "example.services.ai.azure.com");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("agent.endpoint")
            );
            ensure(has_message, "validation failure should mention agent.endpoint")
        })();

        clear_vars(&["CRMCHAT_AGENT_ENDPOINT"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CRMCHAT_AGENT_MAX_TOOL_ROUNDS", "many");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid override".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "CRMCHAT_AGENT_MAX_TOOL_ROUNDS", "override key should be reported")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["CRMCHAT_AGENT_MAX_TOOL_ROUNDS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CRMCHAT_AGENT_API_KEY", "agent-secret-value");
        env::set_var("CRMCHAT_SALESFORCE_CLIENT_SECRET", "sf-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("agent-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("sf-secret-value"),
                "debug output should not contain client secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(!config.telemetry.record_content, "content recording is off by default")?;
            Ok(())
        })();

        clear_vars(&["CRMCHAT_AGENT_API_KEY", "CRMCHAT_SALESFORCE_CLIENT_SECRET"]);
        result
    }
}
