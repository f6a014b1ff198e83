//! Chat routes.
//!
//! - `GET  /api/examples`                     - example questions for the input box
//! - `POST /api/sessions`                     - open a chat session on a new thread
//! - `GET  /api/sessions/{session_id}`        - current transcript
//! - `POST /api/sessions/{session_id}/messages` - submit text; streams `snapshot` events
//! - `POST /api/sessions/{session_id}/clear`  - empty the transcript and switch threads

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use crmchat_agent::{
    AgentService, ChatSession, ChatSnapshot, SessionError, SessionSettings, ToolRegistry,
};
use crmchat_core::{ApplicationError, DomainError, InterfaceError};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub const EXAMPLE_QUESTIONS: [&str; 2] =
    ["What is the address of Microsoft?", "Find contacts with 'Furter' in their name"];

#[derive(Clone)]
pub struct ChatBackend {
    pub service: Arc<dyn AgentService>,
    pub tools: Arc<ToolRegistry>,
    pub agent_id: String,
}

type SessionHandle = Arc<Mutex<ChatSession>>;
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct ChatState {
    backend: Option<ChatBackend>,
    settings: SessionSettings,
    crm_connected: bool,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    clock: Clock,
}

impl ChatState {
    pub fn new(backend: Option<ChatBackend>, settings: SessionSettings, crm_connected: bool) -> Self {
        Self {
            backend,
            settings,
            crm_connected,
            sessions: Arc::default(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used to timestamp submissions.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.backend.as_ref().map(|backend| backend.agent_id.as_str())
    }

    pub fn crm_connected(&self) -> bool {
        self.crm_connected
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn backend(&self, correlation_id: &str) -> Result<&ChatBackend, ApiError> {
        self.backend.as_ref().ok_or_else(|| {
            ApplicationError::Integration("agent service is not configured".to_string())
                .into_interface(correlation_id)
                .into()
        })
    }

    async fn session(&self, session_id: &str, correlation_id: &str) -> Result<SessionHandle, ApiError> {
        self.sessions.read().await.get(session_id).cloned().ok_or_else(|| {
            ApplicationError::SessionNotFound(session_id.to_string())
                .into_interface(correlation_id)
                .into()
        })
    }
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        Self(error)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

impl ErrorBody {
    fn from_interface(error: &InterfaceError) -> Self {
        Self {
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "chat.request.failed",
            correlation_id = self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "chat request failed"
        );
        (status, Json(ErrorBody::from_interface(&self.0))).into_response()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExamplesResponse {
    pub examples: Vec<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/api/examples", get(examples))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{session_id}", get(get_session))
        .route("/api/sessions/{session_id}/messages", post(submit_message))
        .route("/api/sessions/{session_id}/clear", post(clear_session))
        .with_state(state)
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn examples() -> Json<ExamplesResponse> {
    Json(ExamplesResponse { examples: EXAMPLE_QUESTIONS.to_vec() })
}

pub async fn create_session(
    State(state): State<ChatState>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let correlation_id = new_correlation_id();
    let backend = state.backend(&correlation_id)?;

    let session = ChatSession::start(
        backend.service.clone(),
        backend.tools.clone(),
        backend.agent_id.clone(),
        state.settings.clone(),
    )
    .await
    .map_err(|error| {
        ApiError::from(
            ApplicationError::Integration(error.to_string()).into_interface(&correlation_id),
        )
    })?;

    let session_id = Uuid::new_v4().to_string();
    let thread_id = session.thread_id().to_string();
    state.sessions.write().await.insert(session_id.clone(), Arc::new(Mutex::new(session)));

    info!(
        event_name = "chat.session.created",
        correlation_id = %correlation_id,
        session_id = %session_id,
        thread_id = %thread_id,
        "chat session created"
    );
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id, thread_id })))
}

pub async fn get_session(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSnapshot>, ApiError> {
    let correlation_id = new_correlation_id();
    let session = state.session(&session_id, &correlation_id).await?;
    let session = session.lock().await;
    Ok(Json(ChatSnapshot::new(session.conversation().clone())))
}

/// Streams the turn as server-sent events: one `snapshot` per transcript change,
/// then an `error` event if the turn fails. Submissions on one session queue
/// behind its lock.
pub async fn submit_message(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Stamped on arrival: a repeat queued behind a running turn still counts as a duplicate.
    let submitted_at = (state.clock)();
    let correlation_id = new_correlation_id();
    if body.text.trim().is_empty() {
        return Err(ApplicationError::from(DomainError::EmptySubmission)
            .into_interface(correlation_id)
            .into());
    }
    let session = state.session(&session_id, &correlation_id).await?;

    let events = async_stream::stream! {
        let mut session = session.lock_owned().await;
        let prior_history = session.conversation().clone();
        let mut turn = Box::pin(session.handle_submit(&body.text, prior_history, submitted_at));

        while let Some(step) = turn.next().await {
            match step {
                Ok(snapshot) => yield Ok::<Event, Infallible>(snapshot_event(&snapshot, &correlation_id)),
                Err(error) => {
                    let error = turn_error(error).into_interface(correlation_id.clone());
                    warn!(
                        event_name = "chat.turn.failed",
                        correlation_id = %correlation_id,
                        session_id = %session_id,
                        error = %error,
                        "chat turn ended with an error"
                    );
                    yield Ok(error_event(&error));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn clear_session(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSnapshot>, ApiError> {
    let correlation_id = new_correlation_id();
    let session = state.session(&session_id, &correlation_id).await?;
    let mut session = session.lock().await;

    session.clear().await.map_err(|error| {
        ApiError::from(
            ApplicationError::Integration(error.to_string()).into_interface(&correlation_id),
        )
    })?;
    Ok(Json(ChatSnapshot::new(session.conversation().clone())))
}

fn snapshot_event(snapshot: &ChatSnapshot, correlation_id: &str) -> Event {
    match Event::default().event("snapshot").json_data(snapshot) {
        Ok(event) => event,
        Err(error) => error_event(
            &ApplicationError::Internal(format!("snapshot encoding failed: {error}"))
                .into_interface(correlation_id),
        ),
    }
}

fn turn_error(error: SessionError) -> ApplicationError {
    match error {
        SessionError::Service(error) => ApplicationError::Integration(error.to_string()),
        SessionError::ToolRoundsExceeded { run_id, limit } => DomainError::RunFailed {
            run_id,
            message: format!("more than {limit} rounds of function calls"),
        }
        .into(),
    }
}

fn error_event(error: &InterfaceError) -> Event {
    let body = ErrorBody::from_interface(error);
    Event::default()
        .event("error")
        .data(serde_json::to_string(&body).unwrap_or_else(|_| body.error.clone()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
        Json,
    };
    use chrono::{TimeZone, Utc};
    use crmchat_agent::service::{
        AgentDefinition, AgentDirectory, AgentInfo, ItemStream, RunExecutionService, ServiceError,
        ThreadInfo, ToolOutput,
    };
    use crmchat_agent::{crm_registry, SessionError, SessionSettings};
    use crmchat_core::{ApplicationError, DomainError, Role, StreamItem};
    use crmchat_crm::CrmFunctions;
    use futures::{stream, StreamExt};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{examples, router, turn_error, ChatBackend, ChatState};

    type Script = Vec<Result<StreamItem, ServiceError>>;

    #[derive(Default)]
    struct ScriptedService {
        streams: Mutex<VecDeque<Script>>,
        threads: Mutex<usize>,
    }

    #[async_trait]
    impl RunExecutionService for ScriptedService {
        async fn create_message(&self, _: &str, _: Role, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn create_stream(&self, _: &str, _: &str) -> Result<ItemStream, ServiceError> {
            let script = self.streams.lock().expect("streams lock").pop_front().unwrap_or_default();
            Ok(stream::iter(script).boxed())
        }

        async fn submit_tool_outputs(
            &self,
            _: &str,
            _: &str,
            _: &[ToolOutput],
        ) -> Result<ItemStream, ServiceError> {
            Ok(stream::empty().boxed())
        }
    }

    #[async_trait]
    impl AgentDirectory for ScriptedService {
        async fn list_agents(&self) -> Result<Vec<AgentInfo>, ServiceError> {
            Ok(Vec::new())
        }

        async fn create_agent(&self, _: &AgentDefinition) -> Result<AgentInfo, ServiceError> {
            Err(ServiceError::Stream("not used".to_owned()))
        }

        async fn update_agent(
            &self,
            _: &str,
            _: &AgentDefinition,
        ) -> Result<AgentInfo, ServiceError> {
            Err(ServiceError::Stream("not used".to_owned()))
        }

        async fn create_thread(&self) -> Result<ThreadInfo, ServiceError> {
            let mut threads = self.threads.lock().expect("threads lock");
            *threads += 1;
            Ok(ThreadInfo { id: format!("thread_{threads}") })
        }
    }

    fn state_with(streams: Vec<Script>) -> ChatState {
        let service =
            Arc::new(ScriptedService { streams: Mutex::new(streams.into()), ..Default::default() });
        ChatState::new(
            Some(ChatBackend {
                service,
                tools: Arc::new(crm_registry(CrmFunctions::disconnected())),
                agent_id: "asst_1".to_owned(),
            }),
            SessionSettings::default(),
            false,
        )
    }

    fn text_delta(text: &str) -> Result<StreamItem, ServiceError> {
        Ok(StreamItem::new(
            "thread.message.delta",
            json!({"id": "msg_1", "delta": {"content": [
                {"index": 0, "type": "text", "text": {"value": text}}
            ]}}),
        ))
    }

    async fn send(state: &ChatState, method: &str, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");
        router(state.clone()).oneshot(request).await.expect("response")
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    async fn create(state: &ChatState) -> String {
        let response = send(state, "POST", "/api/sessions", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = serde_json::from_str(&body_text(response).await).expect("json");
        created["session_id"].as_str().expect("session id").to_owned()
    }

    #[tokio::test]
    async fn examples_lists_starter_questions() {
        let Json(payload) = examples().await;

        assert_eq!(
            payload.examples,
            vec!["What is the address of Microsoft?", "Find contacts with 'Furter' in their name"]
        );
    }

    #[tokio::test]
    async fn submit_streams_snapshots_and_clear_resets_transcript() {
        let state = state_with(vec![vec![text_delta("Hello"), text_delta(" world")]]);
        let session_id = create(&state).await;

        let response = send(
            &state,
            "POST",
            &format!("/api/sessions/{session_id}/messages"),
            Some(json!({"text": "hi"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let events = body_text(response).await;
        assert_eq!(events.matches("event: snapshot").count(), 3);
        assert!(events.contains("Hello world"));

        let current = send(&state, "GET", &format!("/api/sessions/{session_id}"), None).await;
        let snapshot: Value = serde_json::from_str(&body_text(current).await).expect("json");
        assert_eq!(
            snapshot,
            json!({
                "conversation": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "Hello world"}
                ],
                "input": ""
            })
        );

        let cleared =
            send(&state, "POST", &format!("/api/sessions/{session_id}/clear"), None).await;
        let snapshot: Value = serde_json::from_str(&body_text(cleared).await).expect("json");
        assert_eq!(snapshot, json!({"conversation": [], "input": ""}));
    }

    #[tokio::test]
    async fn repeat_queued_behind_running_turn_is_suppressed() {
        let elapsed_secs = Arc::new(AtomicI64::new(0));
        let clock_secs = elapsed_secs.clone();
        let started = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp");
        let state = state_with(vec![vec![text_delta("two contacts")]]).with_clock(move || {
            started + chrono::Duration::seconds(clock_secs.load(Ordering::SeqCst))
        });
        let session_id = create(&state).await;
        let uri = format!("/api/sessions/{session_id}/messages");

        let first = send(&state, "POST", &uri, Some(json!({"text": "find Furter"}))).await;
        let second = send(&state, "POST", &uri, Some(json!({"text": "find Furter"}))).await;
        // The first run outlasts the duplicate window before the second gets the session.
        elapsed_secs.store(6, Ordering::SeqCst);

        let first_events = body_text(first).await;
        let second_events = body_text(second).await;
        assert_eq!(first_events.matches("event: snapshot").count(), 2);
        assert_eq!(second_events.matches("event: snapshot").count(), 1);

        let current = send(&state, "GET", &format!("/api/sessions/{session_id}"), None).await;
        let snapshot: Value = serde_json::from_str(&body_text(current).await).expect("json");
        assert_eq!(
            snapshot["conversation"],
            json!([
                {"role": "user", "content": "find Furter"},
                {"role": "assistant", "content": "two contacts"}
            ])
        );
    }

    #[tokio::test]
    async fn stream_failure_is_reported_as_error_event() {
        let state = state_with(vec![vec![
            text_delta("Partial"),
            Err(ServiceError::Stream("connection reset".to_owned())),
        ]]);
        let session_id = create(&state).await;

        let response = send(
            &state,
            "POST",
            &format!("/api/sessions/{session_id}/messages"),
            Some(json!({"text": "hi"})),
        )
        .await;
        let events = body_text(response).await;

        assert_eq!(events.matches("event: snapshot").count(), 2);
        assert!(events.contains("event: error"));
        assert!(events.contains("temporarily unavailable"));
    }

    #[tokio::test]
    async fn empty_text_and_unknown_sessions_are_rejected() {
        let state = state_with(Vec::new());
        let session_id = create(&state).await;

        let empty = send(
            &state,
            "POST",
            &format!("/api/sessions/{session_id}/messages"),
            Some(json!({"text": "   "})),
        )
        .await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let missing =
            send(&state, "POST", "/api/sessions/nope/messages", Some(json!({"text": "hi"}))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_str(&body_text(missing).await).expect("json");
        assert_eq!(body["error"], "The chat session no longer exists. Start a new chat.");
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn sessions_are_unavailable_without_agent_backend() {
        let state = ChatState::new(None, SessionSettings::default(), false);

        let response = send(&state, "POST", "/api/sessions", None).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.session_count().await, 0);
    }

    #[test]
    fn exhausted_tool_rounds_map_to_failed_run() {
        let error = turn_error(SessionError::ToolRoundsExceeded { run_id: "run_1".to_owned(), limit: 2 });

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::RunFailed {
                run_id: "run_1".to_owned(),
                message: "more than 2 rounds of function calls".to_owned(),
            })
        );
        let transport = turn_error(SessionError::Service(ServiceError::Stream("reset".to_owned())));
        assert!(matches!(transport, ApplicationError::Integration(_)));
    }
}
