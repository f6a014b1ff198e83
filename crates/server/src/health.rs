use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::chat::ChatState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub agent: HealthCheck,
    pub crm: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(chat: ChatState) -> Router {
    Router::new().route("/health", get(health)).with_state(chat)
}

/// Ready once the agent is provisioned. A disconnected CRM is reported but does
/// not degrade the service; the functions answer with an error payload instead.
pub async fn health(State(chat): State<ChatState>) -> (StatusCode, Json<HealthResponse>) {
    let agent = match chat.agent_id() {
        Some(agent_id) => {
            HealthCheck { status: "ready", detail: format!("agent {agent_id} provisioned") }
        }
        None => HealthCheck {
            status: "degraded",
            detail: "agent endpoint is not configured".to_string(),
        },
    };
    let crm = if chat.crm_connected() {
        HealthCheck { status: "ready", detail: "salesforce credentials configured".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "salesforce is not connected".to_string() }
    };
    let ready = chat.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "crmchat-server runtime initialized".to_string(),
        },
        agent,
        crm,
        active_sessions: chat.session_count().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
