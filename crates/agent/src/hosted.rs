//! HTTP client for the hosted agent service (assistants-style REST with
//! server-sent run streams).

use std::time::Duration;

use async_trait::async_trait;
use crmchat_core::config::AgentConfig;
use crmchat_core::events::{DONE, ERROR};
use crmchat_core::{Role, StreamItem};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::service::{
    AgentDefinition, AgentDirectory, AgentInfo, ItemStream, RunExecutionService, ServiceError,
    ThreadInfo, ToolOutput,
};

const SSE_DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct AgentList {
    #[serde(default)]
    data: Vec<AgentInfo>,
}

pub struct HostedAgentClient {
    client: Client,
    endpoint: String,
    api_version: String,
    api_key: Option<SecretString>,
}

impl HostedAgentClient {
    pub fn from_config(config: &AgentConfig) -> Result<Self, ServiceError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| ServiceError::NotConfigured("agent.endpoint is not set".to_string()))?;

        // Run streams stay open for the whole run, so only connecting is bounded.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{path}", self.endpoint))
            .query(&[("api-version", self.api_version.as_str())]);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ServiceError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| value.pointer("/error/message").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or(body);
        warn!(
            event_name = "agent.service.request_failed",
            status = status.as_u16(),
            message = %message,
            "agent service request failed"
        );
        Err(ServiceError::Api { status: status.as_u16(), message })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ServiceError> {
        Ok(self.send(builder).await?.json().await?)
    }

    async fn open_stream(&self, builder: RequestBuilder) -> Result<ItemStream, ServiceError> {
        let response = self.send(builder.header("accept", "text/event-stream")).await?;
        Ok(run_stream(response))
    }
}

/// Turns a server-sent event body into stream items. The stream ends at the
/// `done` event or when the body closes; dropping it releases the connection.
fn run_stream(response: Response) -> ItemStream {
    let mut events = Box::pin(response.bytes_stream().eventsource());

    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    yield Err(ServiceError::Stream(error.to_string()));
                    break;
                }
            };

            if event.event == DONE || event.data.trim() == SSE_DONE_SENTINEL {
                break;
            }
            if event.event == ERROR {
                yield Err(ServiceError::Stream(event.data));
                break;
            }
            if event.data.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(&event.data) {
                Ok(data) => yield Ok(StreamItem::new(event.event, data)),
                Err(error) => {
                    debug!(
                        event_name = "agent.stream.unparsed_event",
                        event_type = %event.event,
                        error = %error,
                        "skipping non-JSON stream event"
                    );
                }
            }
        }
    })
}

#[async_trait]
impl RunExecutionService for HostedAgentClient {
    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), ServiceError> {
        let builder = self
            .request(reqwest::Method::POST, &format!("threads/{thread_id}/messages"))
            .json(&json!({ "role": role, "content": content }));
        self.send(builder).await?;
        Ok(())
    }

    async fn create_stream(
        &self,
        thread_id: &str,
        agent_id: &str,
    ) -> Result<ItemStream, ServiceError> {
        let builder = self
            .request(reqwest::Method::POST, &format!("threads/{thread_id}/runs"))
            .json(&json!({ "assistant_id": agent_id, "stream": true }));
        self.open_stream(builder).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ItemStream, ServiceError> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&json!({ "tool_outputs": outputs, "stream": true }));
        self.open_stream(builder).await
    }
}

#[async_trait]
impl AgentDirectory for HostedAgentClient {
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, ServiceError> {
        let list: AgentList = self
            .send_json(self.request(reqwest::Method::GET, "assistants").query(&[("limit", "100")]))
            .await?;
        Ok(list.data)
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentInfo, ServiceError> {
        self.send_json(self.request(reqwest::Method::POST, "assistants").json(definition)).await
    }

    async fn update_agent(
        &self,
        agent_id: &str,
        definition: &AgentDefinition,
    ) -> Result<AgentInfo, ServiceError> {
        self.send_json(
            self.request(reqwest::Method::POST, &format!("assistants/{agent_id}")).json(definition),
        )
        .await
    }

    async fn create_thread(&self) -> Result<ThreadInfo, ServiceError> {
        self.send_json(self.request(reqwest::Method::POST, "threads").json(&json!({}))).await
    }
}
