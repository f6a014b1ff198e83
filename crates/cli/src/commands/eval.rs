use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use crmchat_agent::evaluation::{load_queries, write_results, EvaluationRunner, EvaluationStatus};
use crmchat_agent::provisioning::{provision_agent, ProvisionRequest, EVALUATION_INSTRUCTIONS};
use crmchat_agent::{crm_registry, AgentService, HostedAgentClient, SessionSettings};
use crmchat_core::config::{AppConfig, LoadOptions};
use crmchat_crm::CrmFunctions;

use crate::commands::CommandResult;

const COMMAND: &str = "eval";

#[derive(Clone, Debug)]
pub struct EvalOptions {
    pub queries: PathBuf,
    pub output_dir: PathBuf,
    pub pause_secs: u64,
}

pub fn run(options: EvalOptions) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2);
        }
    };

    // Queries are checked before anything touches the network.
    if !options.queries.exists() {
        return CommandResult::failure(
            COMMAND,
            "queries_missing",
            format!("query file `{}` does not exist", options.queries.display()),
            3,
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                4,
            );
        }
    };

    match runtime.block_on(evaluate(&config, &options)) {
        Ok(summary) => CommandResult::success(COMMAND, summary),
        Err(error) => CommandResult::failure(COMMAND, "evaluation", format!("{error:#}"), 5),
    }
}

async fn evaluate(config: &AppConfig, options: &EvalOptions) -> anyhow::Result<String> {
    let queries = load_queries(&options.queries).await?;

    let client =
        HostedAgentClient::from_config(&config.agent).context("agent service is not configured")?;
    let service: Arc<dyn AgentService> = Arc::new(client);
    let tools = Arc::new(crm_registry(CrmFunctions::from_config(&config.salesforce)));

    let provisioned = provision_agent(
        service.as_ref(),
        &tools,
        ProvisionRequest {
            name: &config.agent.name,
            model: &config.agent.model,
            instructions: EVALUATION_INSTRUCTIONS,
            bing_connection_id: None,
        },
    )
    .await
    .context("agent provisioning failed")?;

    let runner = EvaluationRunner::new(
        service,
        tools,
        provisioned.agent.id,
        SessionSettings::from_config(config),
    )
    .with_pause(Duration::from_secs(options.pause_secs));
    let results = runner.run_all(&queries).await;

    let path = write_results(&options.output_dir, &results, Utc::now()).await?;
    let completed =
        results.iter().filter(|result| result.status == EvaluationStatus::Completed).count();

    Ok(format!(
        "{completed}/{} queries completed; results saved to {}",
        results.len(),
        path.display()
    ))
}
