use std::sync::Arc;

use crmchat_agent::provisioning::{provision_agent, ProvisionRequest, CHAT_INSTRUCTIONS};
use crmchat_agent::{crm_registry, AgentService, HostedAgentClient, ServiceError, SessionSettings};
use crmchat_core::config::AppConfig;
use crmchat_crm::CrmFunctions;
use thiserror::Error;
use tracing::{info, warn};

use crate::chat::{ChatBackend, ChatState};

pub struct Application {
    pub config: AppConfig,
    pub chat: ChatState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("agent provisioning failed: {0}")]
    Provisioning(#[source] ServiceError),
}

/// Wires the CRM functions and provisions the agent. Without an agent endpoint
/// the server still starts and reports itself degraded.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let functions = CrmFunctions::from_config(&config.salesforce);
    let crm_connected = functions.is_connected();
    let tools = Arc::new(crm_registry(functions));
    let settings = SessionSettings::from_config(&config);

    let backend = match HostedAgentClient::from_config(&config.agent) {
        Ok(client) => {
            let service: Arc<dyn AgentService> = Arc::new(client);
            let provisioned = provision_agent(
                service.as_ref(),
                &tools,
                ProvisionRequest {
                    name: &config.agent.name,
                    model: &config.agent.model,
                    instructions: CHAT_INSTRUCTIONS,
                    bing_connection_id: config.agent.bing_connection_id.as_deref(),
                },
            )
            .await
            .map_err(BootstrapError::Provisioning)?;
            info!(
                event_name = "system.bootstrap.agent_ready",
                correlation_id = "bootstrap",
                agent_id = %provisioned.agent.id,
                agent_action = provisioned.action.as_str(),
                "agent provisioned"
            );
            Some(ChatBackend { service, tools, agent_id: provisioned.agent.id })
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.agent_unavailable",
                correlation_id = "bootstrap",
                error = %error,
                "agent service not configured; chat routes will be unavailable"
            );
            None
        }
    };

    Ok(Application { chat: ChatState::new(backend, settings, crm_connected), config })
}
