use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use crmchat_core::bubbles::{FETCH_ACCOUNTS, FETCH_CONTACTS};
use crmchat_crm::{CrmFunctions, FetchAccountsArgs, FetchContactsArgs};
use serde_json::{json, Value};
use tracing::{field, info_span, warn, Instrument};

use crate::service::{FunctionDefinition, ToolDefinition};

/// A client-side function the hosted agent may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> FunctionDefinition;
    /// Runs the function and returns the output handed back to the agent.
    async fn execute(&self, input: Value) -> Result<String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition::Function { function: tool.definition() })
            .collect()
    }

    /// Executes `name` with JSON `arguments`. Failures are reported to the agent
    /// as an `{"error": ...}` output rather than ending the run.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let span = info_span!("tool_call", tool_name = name, error = field::Empty);
        async {
            let Some(tool) = self.tools.get(name) else {
                warn!(
                    event_name = "agent.tool.unknown",
                    tool_name = name,
                    "unknown function requested"
                );
                tracing::Span::current().record("error", "unknown function");
                return json!({ "error": format!("Unknown function: {name}") }).to_string();
            };

            let input = if arguments.trim().is_empty() {
                Ok(json!({}))
            } else {
                serde_json::from_str::<Value>(arguments)
                    .with_context(|| format!("invalid arguments for `{name}`"))
            };

            match input {
                Ok(input) => match tool.execute(input).await {
                    Ok(output) => output,
                    Err(error) => tool_error(name, &error),
                },
                Err(error) => tool_error(name, &error),
            }
        }
        .instrument(span)
        .await
    }
}

fn tool_error(name: &str, error: &anyhow::Error) -> String {
    warn!(
        event_name = "agent.tool.failed",
        tool_name = name,
        error = %format!("{error:#}"),
        "function call failed"
    );
    tracing::Span::current().record("error", tracing::field::display(error));
    json!({ "error": format!("{error:#}") }).to_string()
}

pub struct FetchAccountsTool {
    functions: CrmFunctions,
}

impl FetchAccountsTool {
    pub fn new(functions: CrmFunctions) -> Self {
        Self { functions }
    }
}

#[async_trait]
impl Tool for FetchAccountsTool {
    fn name(&self) -> &'static str {
        FETCH_ACCOUNTS
    }

    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: FETCH_ACCOUNTS.to_string(),
            description: "Fetches accounts from Salesforce with optional name filtering."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of accounts to return",
                        "default": 10
                    },
                    "name_filter": {
                        "type": "string",
                        "description": "Optional filter for account name (uses LIKE in SOQL)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let args: FetchAccountsArgs =
            serde_json::from_value(input).context("fetch_accounts arguments")?;
        Ok(self.functions.fetch_accounts(&args).await)
    }
}

pub struct FetchContactsTool {
    functions: CrmFunctions,
}

impl FetchContactsTool {
    pub fn new(functions: CrmFunctions) -> Self {
        Self { functions }
    }
}

#[async_trait]
impl Tool for FetchContactsTool {
    fn name(&self) -> &'static str {
        FETCH_CONTACTS
    }

    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: FETCH_CONTACTS.to_string(),
            description: "Fetches contacts from Salesforce with optional account filtering."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "account_id": {
                        "type": "string",
                        "description": "Optional Salesforce Account ID to filter contacts"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of contacts to return",
                        "default": 10
                    },
                    "name_filter": {
                        "type": "string",
                        "description": "Optional filter for contact name (uses LIKE in SOQL)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let args: FetchContactsArgs =
            serde_json::from_value(input).context("fetch_contacts arguments")?;
        Ok(self.functions.fetch_contacts(&args).await)
    }
}

pub fn crm_registry(functions: CrmFunctions) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(FetchAccountsTool::new(functions.clone()));
    registry.register(FetchContactsTool::new(functions));
    registry
}
