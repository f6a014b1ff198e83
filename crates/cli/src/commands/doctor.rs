use crmchat_agent::service::AgentDirectory;
use crmchat_agent::HostedAgentClient;
use crmchat_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use crate::commands::CommandResult;

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

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_agent_endpoint(&config));
            checks.push(check_salesforce_credentials(&config));
            checks.push(check_agent_service(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["agent_endpoint", "salesforce_credentials", "agent_service"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_agent_endpoint(config: &AppConfig) -> DoctorCheck {
    match config.agent.endpoint.as_deref() {
        Some(endpoint) if config.agent.is_configured() => DoctorCheck {
            name: "agent_endpoint",
            status: CheckStatus::Pass,
            details: format!("agent `{}` at `{endpoint}`", config.agent.name),
        },
        _ => DoctorCheck {
            name: "agent_endpoint",
            status: CheckStatus::Fail,
            details: "set agent.endpoint or CRMCHAT_AGENT_ENDPOINT".to_string(),
        },
    }
}

fn check_salesforce_credentials(config: &AppConfig) -> DoctorCheck {
    if config.salesforce.has_credentials() {
        DoctorCheck {
            name: "salesforce_credentials",
            status: CheckStatus::Pass,
            details: format!("credentials present for `{}`", config.salesforce.login_url()),
        }
    } else {
        DoctorCheck {
            name: "salesforce_credentials",
            status: CheckStatus::Fail,
            details: "username, password, client_id and client_secret are required".to_string(),
        }
    }
}

fn check_agent_service(config: &AppConfig) -> DoctorCheck {
    if !config.agent.is_configured() {
        return DoctorCheck::skipped("agent_service", "no agent endpoint is configured");
    }

    let client = match HostedAgentClient::from_config(&config.agent) {
        Ok(client) => client,
        Err(error) => {
            return DoctorCheck {
                name: "agent_service",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "agent_service",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    match runtime.block_on(client.list_agents()) {
        Ok(agents) => {
            let provisioned =
                agents.iter().any(|agent| agent.name.as_deref() == Some(config.agent.name.as_str()));
            DoctorCheck {
                name: "agent_service",
                status: CheckStatus::Pass,
                details: format!(
                    "reachable; {} agent(s) listed, `{}` {}",
                    agents.len(),
                    config.agent.name,
                    if provisioned { "exists" } else { "will be created on first start" }
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "agent_service",
            status: CheckStatus::Fail,
            details: format!("failed to list agents: {error}"),
        },
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
