use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crmchat_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let agent = &config.agent;
    let salesforce = &config.salesforce;

    vec![
        Field::new(
            "agent.endpoint",
            agent.endpoint.as_deref().unwrap_or("<unset>"),
            &["CRMCHAT_AGENT_ENDPOINT"],
        ),
        Field::new("agent.api_key", redact_secret(agent.api_key.as_ref()), &["CRMCHAT_AGENT_API_KEY"]),
        Field::new("agent.api_version", &agent.api_version, &["CRMCHAT_AGENT_API_VERSION"]),
        Field::new(
            "agent.model",
            &agent.model,
            &["CRMCHAT_AGENT_MODEL", "MODEL_DEPLOYMENT_NAME"],
        ),
        Field::new("agent.name", &agent.name, &["CRMCHAT_AGENT_NAME"]),
        Field::new(
            "agent.bing_connection_id",
            agent.bing_connection_id.as_deref().unwrap_or("<unset>"),
            &["CRMCHAT_AGENT_BING_CONNECTION_ID"],
        ),
        Field::new(
            "agent.timeout_secs",
            agent.timeout_secs.to_string(),
            &["CRMCHAT_AGENT_TIMEOUT_SECS"],
        ),
        Field::new(
            "agent.max_tool_rounds",
            agent.max_tool_rounds.to_string(),
            &["CRMCHAT_AGENT_MAX_TOOL_ROUNDS"],
        ),
        Field::new(
            "salesforce.domain",
            &salesforce.domain,
            &["CRMCHAT_SALESFORCE_DOMAIN", "SF_DOMAIN"],
        ),
        Field::new(
            "salesforce.username",
            salesforce.username.as_deref().unwrap_or("<unset>"),
            &["CRMCHAT_SALESFORCE_USERNAME", "SF_USERNAME"],
        ),
        Field::new(
            "salesforce.password",
            redact_secret(salesforce.password.as_ref()),
            &["CRMCHAT_SALESFORCE_PASSWORD", "SF_PASSWORD"],
        ),
        Field::new(
            "salesforce.security_token",
            redact_secret(salesforce.security_token.as_ref()),
            &["CRMCHAT_SALESFORCE_SECURITY_TOKEN", "SF_SECURITY_TOKEN"],
        ),
        Field::new(
            "salesforce.client_id",
            salesforce.client_id.as_deref().unwrap_or("<unset>"),
            &["CRMCHAT_SALESFORCE_CLIENT_ID"],
        ),
        Field::new(
            "salesforce.client_secret",
            redact_secret(salesforce.client_secret.as_ref()),
            &["CRMCHAT_SALESFORCE_CLIENT_SECRET"],
        ),
        Field::new(
            "salesforce.api_version",
            &salesforce.api_version,
            &["CRMCHAT_SALESFORCE_API_VERSION"],
        ),
        Field::new(
            "chat.duplicate_window_secs",
            config.chat.duplicate_window_secs.to_string(),
            &["CRMCHAT_CHAT_DUPLICATE_WINDOW_SECS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CRMCHAT_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["CRMCHAT_SERVER_PORT"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["CRMCHAT_LOGGING_LEVEL", "CRMCHAT_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CRMCHAT_LOGGING_FORMAT", "CRMCHAT_LOG_FORMAT"],
        ),
        Field::new(
            "telemetry.enabled",
            config.telemetry.enabled.to_string(),
            &["CRMCHAT_TELEMETRY_ENABLED"],
        ),
        Field::new(
            "telemetry.record_content",
            config.telemetry.record_content.to_string(),
            &["CRMCHAT_TELEMETRY_RECORD_CONTENT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("crmchat.toml"), PathBuf::from("config/crmchat.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>",
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}
