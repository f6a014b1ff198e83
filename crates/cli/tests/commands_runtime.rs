use std::env;
use std::sync::{Mutex, OnceLock};

use crmchat_cli::commands::eval::EvalOptions;
use crmchat_cli::commands::{config, doctor, eval};
use serde_json::Value;

#[test]
fn config_reports_env_source_and_redacts_secrets() {
    with_env(
        &[
            ("CRMCHAT_AGENT_MODEL", "gpt-4o"),
            ("CRMCHAT_AGENT_API_KEY", "agent-secret-value"),
            ("SF_USERNAME", "ops@example.com"),
        ],
        || {
            let output = config::run();

            assert!(output.starts_with("effective config"));
            assert!(output.contains("- agent.model = gpt-4o (source: env (CRMCHAT_AGENT_MODEL))"));
            assert!(output.contains("- agent.api_key = <redacted> (source: env (CRMCHAT_AGENT_API_KEY))"));
            assert!(output.contains("- salesforce.username = ops@example.com (source: env (SF_USERNAME))"));
            assert!(output.contains("- chat.duplicate_window_secs = 5 (source: default)"));
            assert!(!output.contains("agent-secret-value"));
        },
    );
}

#[test]
fn config_reports_validation_failure() {
    with_env(&[("CRMCHAT_AGENT_MAX_TOOL_ROUNDS", "many")], || {
        let output = config::run();
        assert!(output.starts_with("config validation failed"));
    });
}

#[test]
fn doctor_fails_without_agent_endpoint_and_skips_service_check() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1, "expected doctor failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().cloned().unwrap_or_default();
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("agent_endpoint"), "fail");
        assert_eq!(status_of("salesforce_credentials"), "fail");
        assert_eq!(status_of("agent_service"), "skipped");
    });
}

#[test]
fn doctor_skips_remaining_checks_when_config_is_invalid() {
    with_env(&[("CRMCHAT_SERVER_PORT", "not-a-port")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);

        let mut lines = result.output.lines();
        assert_eq!(lines.next(), Some("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] agent_service: skipped because configuration did not load"));
    });
}

#[test]
fn eval_rejects_missing_query_file() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = eval::run(EvalOptions {
            queries: dir.path().join("missing.jsonl"),
            output_dir: dir.path().join("test_results"),
            pause_secs: 0,
        });
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "eval");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "queries_missing");
    });
}

#[test]
fn eval_requires_agent_endpoint_and_writes_nothing() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let queries = dir.path().join("queries.jsonl");
        std::fs::write(&queries, "{\"id\": 1, \"question\": \"List accounts\"}\n")
            .expect("write queries");
        let output_dir = dir.path().join("test_results");

        let result = eval::run(EvalOptions { queries, output_dir: output_dir.clone(), pause_secs: 0 });
        assert_eq!(result.exit_code, 5);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "evaluation");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("agent service is not configured"), "message: {message}");
        assert!(!output_dir.exists());
    });
}

#[test]
fn eval_reports_config_failure_first() {
    with_env(&[("CRMCHAT_AGENT_ENDPOINT", "ftp://agents.example.com")], || {
        let result = eval::run(EvalOptions {
            queries: "missing.jsonl".into(),
            output_dir: "test_results".into(),
            pause_secs: 0,
        });
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CRMCHAT_AGENT_ENDPOINT",
        "CRMCHAT_AGENT_API_KEY",
        "CRMCHAT_AGENT_API_VERSION",
        "CRMCHAT_AGENT_MODEL",
        "MODEL_DEPLOYMENT_NAME",
        "CRMCHAT_AGENT_NAME",
        "CRMCHAT_AGENT_BING_CONNECTION_ID",
        "CRMCHAT_AGENT_TIMEOUT_SECS",
        "CRMCHAT_AGENT_MAX_TOOL_ROUNDS",
        "CRMCHAT_SALESFORCE_DOMAIN",
        "CRMCHAT_SALESFORCE_USERNAME",
        "CRMCHAT_SALESFORCE_PASSWORD",
        "CRMCHAT_SALESFORCE_SECURITY_TOKEN",
        "CRMCHAT_SALESFORCE_CLIENT_ID",
        "CRMCHAT_SALESFORCE_CLIENT_SECRET",
        "SF_DOMAIN",
        "SF_USERNAME",
        "SF_PASSWORD",
        "SF_SECURITY_TOKEN",
        "CRMCHAT_CHAT_DUPLICATE_WINDOW_SECS",
        "CRMCHAT_SERVER_BIND_ADDRESS",
        "CRMCHAT_SERVER_PORT",
        "CRMCHAT_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CRMCHAT_LOGGING_LEVEL",
        "CRMCHAT_LOGGING_FORMAT",
        "CRMCHAT_LOG_LEVEL",
        "CRMCHAT_LOG_FORMAT",
        "CRMCHAT_TELEMETRY_ENABLED",
        "CRMCHAT_TELEMETRY_RECORD_CONTENT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
