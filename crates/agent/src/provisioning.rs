use tracing::{info, info_span, Instrument};

use crate::service::{AgentDefinition, AgentDirectory, AgentInfo, ServiceError, ToolDefinition};
use crate::tools::ToolRegistry;

pub const CHAT_INSTRUCTIONS: &str = "\
You are a helpful Salesforce assistant that can retrieve information from a Salesforce instance. Follow these rules:

1. If the user asks general questions, use the Bing grounding tool.
2. If the user wants to look up Salesforce accounts, call the `fetch_accounts` function.
   - They might specify a search filter for account name, and optionally a limit.
   - For example: \"Show me the top 5 accounts with 'Tech' in their name\"
3. If the user wants to look up Salesforce contacts, call the `fetch_contacts` function.
   - They might specify an account ID, name filter, or limit.
   - For example: \"Show me contacts for account 001xxxxxxxxxxx\" or \"Find contacts with 'Smith' in their name\"
4. Provide relevant answers to the user in a concise yet complete manner.
5. Always ensure the user's request is properly addressed.
6. Format the results in a readable way when displaying account or contact information.
7. Never share Salesforce credentials or sensitive information.
";

pub const EVALUATION_INSTRUCTIONS: &str = "\
You are a helpful Salesforce assistant that can retrieve information from a Salesforce instance. Follow these rules:
1. If the user wants to look up Salesforce accounts, call the `fetch_accounts` function.
2. If the user wants to look up Salesforce contacts, call the `fetch_contacts` function.
3. Provide relevant answers to the user in a concise yet complete manner.
4. Format the results in a readable way when displaying account or contact information.
";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionAction {
    Created,
    Updated,
}

impl ProvisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "create",
            Self::Updated => "update",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionRequest<'a> {
    pub name: &'a str,
    pub model: &'a str,
    pub instructions: &'a str,
    pub bing_connection_id: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedAgent {
    pub agent: AgentInfo,
    pub action: ProvisionAction,
}

pub fn toolset(registry: &ToolRegistry, bing_connection_id: Option<&str>) -> Vec<ToolDefinition> {
    let mut tools = Vec::with_capacity(registry.len() + 1);
    if let Some(connection_id) = bing_connection_id.filter(|id| !id.trim().is_empty()) {
        tools.push(ToolDefinition::bing_grounding(connection_id));
    }
    tools.extend(registry.definitions());
    tools
}

/// Finds the agent by name and refreshes its instructions and tools, or creates
/// it when none exists. An existing agent keeps its model.
pub async fn provision_agent(
    directory: &dyn AgentDirectory,
    registry: &ToolRegistry,
    request: ProvisionRequest<'_>,
) -> Result<ProvisionedAgent, ServiceError> {
    let span = info_span!("setup_agent", agent_name = request.name, model = request.model);

    async {
        let existing = directory
            .list_agents()
            .await?
            .into_iter()
            .find(|agent| agent.name.as_deref() == Some(request.name));

        let tools = toolset(registry, request.bing_connection_id);
        let provisioned = match existing {
            Some(found) => {
                let definition = AgentDefinition {
                    model: found.model.clone(),
                    name: request.name.to_string(),
                    instructions: request.instructions.to_string(),
                    tools,
                };
                let agent = directory.update_agent(&found.id, &definition).await?;
                ProvisionedAgent { agent, action: ProvisionAction::Updated }
            }
            None => {
                let definition = AgentDefinition {
                    model: request.model.to_string(),
                    name: request.name.to_string(),
                    instructions: request.instructions.to_string(),
                    tools,
                };
                let agent = directory.create_agent(&definition).await?;
                ProvisionedAgent { agent, action: ProvisionAction::Created }
            }
        };

        info!(
            event_name = "agent.provisioned",
            agent_id = %provisioned.agent.id,
            agent_action = provisioned.action.as_str(),
            "agent ready"
        );
        Ok(provisioned)
    }
    .instrument(span)
    .await
}
