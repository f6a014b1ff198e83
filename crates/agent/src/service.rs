//! Seams to the hosted agent service.
//!
//! [`RunExecutionService`] posts messages and opens run streams,
//! [`AgentDirectory`] manages agents and threads. [`EventObserver`] receives the
//! decoded events of a run for diagnostics; it never mutates the conversation.

use async_trait::async_trait;
use crmchat_core::events::{MessageDelta, RunEvent, RunStep, RunStepDelta, ThreadMessage, ThreadRun};
use crmchat_core::{Role, StreamItem};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub type ItemStream = BoxStream<'static, Result<StreamItem, ServiceError>>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("agent service is not configured: {0}")]
    NotConfigured(String),
    #[error("agent service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent service returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("run stream failed: {0}")]
    Stream(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroundingConnection {
    pub connection_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BingGroundingDefinition {
    pub connections: Vec<GroundingConnection>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function { function: FunctionDefinition },
    BingGrounding { bing_grounding: BingGroundingDefinition },
}

impl ToolDefinition {
    pub fn bing_grounding(connection_id: impl Into<String>) -> Self {
        Self::BingGrounding {
            bing_grounding: BingGroundingDefinition {
                connections: vec![GroundingConnection { connection_id: connection_id.into() }],
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentDefinition {
    pub model: String,
    pub name: String,
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait RunExecutionService: Send + Sync {
    /// Appends a message to a remote thread.
    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), ServiceError>;

    /// Starts a run of `agent_id` on the thread and streams its events.
    async fn create_stream(&self, thread_id: &str, agent_id: &str)
        -> Result<ItemStream, ServiceError>;

    /// Resumes a run paused on `requires_action` and streams the continuation.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ItemStream, ServiceError>;
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, ServiceError>;
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentInfo, ServiceError>;
    async fn update_agent(
        &self,
        agent_id: &str,
        definition: &AgentDefinition,
    ) -> Result<AgentInfo, ServiceError>;
    async fn create_thread(&self) -> Result<ThreadInfo, ServiceError>;
}

/// Everything a chat session needs from the hosted service.
pub trait AgentService: RunExecutionService + AgentDirectory {}

impl<T> AgentService for T where T: RunExecutionService + AgentDirectory {}

pub trait EventObserver: Send + Sync {
    fn on_message_delta(&self, _delta: &MessageDelta) {}
    fn on_thread_message(&self, _message: &ThreadMessage) {}
    fn on_thread_run(&self, _run: &ThreadRun) {}
    fn on_run_step(&self, _step: &RunStep) {}
    fn on_run_step_delta(&self, _delta: &RunStepDelta) {}
}

pub fn notify(observer: &dyn EventObserver, event: &RunEvent) {
    match event {
        RunEvent::MessageDelta(delta) => observer.on_message_delta(delta),
        RunEvent::MessageCompleted(message) => observer.on_thread_message(message),
        RunEvent::RunStatusChanged(run) => observer.on_thread_run(run),
        RunEvent::StepChanged(step) => observer.on_run_step(step),
        RunEvent::StepDelta(delta) => observer.on_run_step_delta(delta),
    }
}

/// Writes each run event to the log at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_thread_message(&self, message: &ThreadMessage) {
        debug!(
            event_name = "agent.message.completed",
            message_id = %message.id,
            message_role = %message.role,
            message_status = %message.status,
            "thread message finished"
        );
    }

    fn on_thread_run(&self, run: &ThreadRun) {
        debug!(
            event_name = "agent.run.status",
            run_id = %run.id,
            run_status = run.status.as_str(),
            "thread run status"
        );
    }

    fn on_run_step(&self, step: &RunStep) {
        debug!(
            event_name = "agent.run.step",
            step_id = %step.id,
            step_type = step.kind.as_str(),
            step_status = step.status.as_str(),
            "run step"
        );
    }

    fn on_run_step_delta(&self, delta: &RunStepDelta) {
        for call in delta.tool_calls() {
            debug!(
                event_name = "agent.run.step_delta",
                step_id = %delta.id,
                call_id = call.id().unwrap_or("none"),
                "partial tool call"
            );
        }
    }
}
