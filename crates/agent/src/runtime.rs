//! One chat session: a remote thread, its transcript, and the turn loop.
//!
//! [`ChatSession::handle_submit`] drives a turn. It gates duplicate input, posts
//! the user message, reduces the run stream into the transcript, executes the
//! functions the agent asks for and resubmits their outputs until the run
//! settles. Every change is yielded as a [`ChatSnapshot`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crmchat_core::config::{AppConfig, TelemetryConfig};
use crmchat_core::events::{RequiredToolCall, RunStatus};
use crmchat_core::telemetry::{content_field, scoped_span};
use crmchat_core::{
    Conversation, ConversationMessage, EventReducer, GateDecision, Role, RunDiagnostics, RunEvent,
    SubmissionGate,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::service::{notify, AgentService, EventObserver, ServiceError, ToolOutput, TracingObserver};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("run `{run_id}` asked for more than {limit} rounds of function calls")]
    ToolRoundsExceeded { run_id: String, limit: u32 },
}

/// What the UI renders after each step of a turn. The input box is always
/// cleared once a submission is accepted or suppressed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatSnapshot {
    pub conversation: Conversation,
    pub input: String,
}

impl ChatSnapshot {
    pub fn new(conversation: Conversation) -> Self {
        Self { conversation, input: String::new() }
    }
}

/// Raw output of one function call made during a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolContext {
    pub function: String,
    pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnRecord {
    pub diagnostics: RunDiagnostics,
    pub tool_context: Vec<ToolContext>,
    /// Last assistant text of the turn, ignoring tool bubbles.
    pub response: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub duplicate_window_secs: u64,
    pub max_tool_rounds: u32,
    pub telemetry: TelemetryConfig,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            duplicate_window_secs: config.chat.duplicate_window_secs,
            max_tool_rounds: config.agent.max_tool_rounds,
            telemetry: config.telemetry.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct ChatSession {
    service: Arc<dyn AgentService>,
    tools: Arc<ToolRegistry>,
    observer: Arc<dyn EventObserver>,
    agent_id: String,
    thread_id: String,
    conversation: Conversation,
    gate: SubmissionGate,
    reducer: EventReducer,
    last_turn: TurnRecord,
    max_tool_rounds: u32,
    telemetry: TelemetryConfig,
}

impl ChatSession {
    pub fn new(
        service: Arc<dyn AgentService>,
        tools: Arc<ToolRegistry>,
        agent_id: impl Into<String>,
        thread_id: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            service,
            tools,
            observer: Arc::new(TracingObserver),
            agent_id: agent_id.into(),
            thread_id: thread_id.into(),
            conversation: Conversation::new(),
            gate: SubmissionGate::with_window_secs(settings.duplicate_window_secs),
            reducer: EventReducer::new(),
            last_turn: TurnRecord::default(),
            max_tool_rounds: settings.max_tool_rounds,
            telemetry: settings.telemetry,
        }
    }

    /// Opens a fresh remote thread and wraps it in a session.
    pub async fn start(
        service: Arc<dyn AgentService>,
        tools: Arc<ToolRegistry>,
        agent_id: impl Into<String>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let thread = service.create_thread().await?;
        info!(event_name = "chat.thread.created", thread_id = %thread.id, "chat thread created");
        Ok(Self::new(service, tools, agent_id, thread.id, settings))
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn last_turn(&self) -> &TurnRecord {
        &self.last_turn
    }

    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot::new(self.conversation.clone())
    }

    /// Runs one turn on top of `prior_history` and streams a snapshot after every
    /// visible change. The stream ends when the run stream ends; a transport
    /// failure is yielded once as an error and ends the turn. Snapshots already
    /// yielded stay valid.
    pub fn handle_submit<'a>(
        &'a mut self,
        text: &str,
        prior_history: Conversation,
        now: DateTime<Utc>,
    ) -> impl Stream<Item = Result<ChatSnapshot, SessionError>> + Send + 'a {
        let text = text.to_owned();
        let telemetry = self.telemetry.clone();
        let span = scoped_span(telemetry.enabled, || {
            info_span!(
                "chat_interaction",
                thread_id = %self.thread_id,
                agent_id = %self.agent_id,
                user_message = field::Empty,
                duplicate_message = field::Empty,
                run_id = field::Empty,
                run_status = field::Empty,
                last_error = field::Empty,
                tool_rounds = field::Empty,
                conversation_length = field::Empty,
                error = field::Empty,
            )
        });
        span.record("user_message", content_field(&telemetry, &text));

        async_stream::stream! {
            if self.gate.submit(&text, now) == GateDecision::Suppress {
                span.record("duplicate_message", true);
                info!(
                    parent: &span,
                    event_name = "chat.submit.suppressed",
                    thread_id = %self.thread_id,
                    "duplicate submission suppressed"
                );
                yield Ok(ChatSnapshot::new(prior_history));
                return;
            }

            self.conversation = prior_history;
            self.conversation.push(ConversationMessage::user(text.clone()));
            self.reducer = EventReducer::new();
            self.last_turn = TurnRecord::default();
            yield Ok(self.snapshot());

            let message_span = scoped_span(telemetry.enabled, || {
                info_span!(
                    parent: &span,
                    "create_message",
                    message_role = "user",
                    message_content_length = text.len(),
                )
            });
            let created = self
                .service
                .create_message(&self.thread_id, Role::User, &text)
                .instrument(message_span)
                .await;
            if let Err(error) = created {
                record_error(&span, &error);
                yield Err(error.into());
                return;
            }

            let mut events = match self
                .service
                .create_stream(&self.thread_id, &self.agent_id)
                .instrument(span.clone())
                .await
            {
                Ok(events) => events,
                Err(error) => {
                    record_error(&span, &error);
                    yield Err(error.into());
                    return;
                }
            };

            let mut rounds = 0_u32;
            loop {
                let mut paused: Option<(String, Vec<RequiredToolCall>)> = None;

                while let Some(item) = events.next().await {
                    let item = match item {
                        Ok(item) => item,
                        Err(error) => {
                            record_error(&span, &error);
                            yield Err(error.into());
                            return;
                        }
                    };
                    let event = match RunEvent::decode(&item) {
                        Ok(Some(event)) => event,
                        Ok(None) => continue,
                        Err(error) => {
                            warn!(
                                parent: &span,
                                event_name = "chat.event.undecodable",
                                event_type = %item.event_type,
                                error = %error,
                                "skipping run event"
                            );
                            continue;
                        }
                    };

                    let changed =
                        span.in_scope(|| self.reducer.apply(&mut self.conversation, &event));
                    notify(self.observer.as_ref(), &event);

                    if let RunEvent::RunStatusChanged(run) = &event {
                        if run.status == RunStatus::RequiresAction
                            && !run.pending_tool_calls().is_empty()
                        {
                            paused = Some((run.id.clone(), run.pending_tool_calls().to_vec()));
                        }
                    }
                    if changed {
                        yield Ok(self.snapshot());
                    }
                    if paused.is_some() {
                        break;
                    }
                }

                let Some((run_id, calls)) = paused else {
                    break;
                };
                rounds += 1;
                span.record("tool_rounds", rounds);
                if rounds > self.max_tool_rounds {
                    let error = SessionError::ToolRoundsExceeded {
                        run_id,
                        limit: self.max_tool_rounds,
                    };
                    record_error(&span, &error);
                    yield Err(error);
                    return;
                }

                let mut outputs = Vec::with_capacity(calls.len());
                for call in &calls {
                    let output = self
                        .tools
                        .execute(&call.function.name, &call.function.arguments)
                        .instrument(span.clone())
                        .await;
                    self.last_turn.tool_context.push(ToolContext {
                        function: call.function.name.clone(),
                        output: output.clone(),
                    });
                    outputs.push(ToolOutput { tool_call_id: call.id.clone(), output });
                }

                events = match self
                    .service
                    .submit_tool_outputs(&self.thread_id, &run_id, &outputs)
                    .instrument(span.clone())
                    .await
                {
                    Ok(events) => events,
                    Err(error) => {
                        record_error(&span, &error);
                        yield Err(error.into());
                        return;
                    }
                };
            }

            self.last_turn.response = final_response(&self.conversation);
            self.last_turn.diagnostics = self.reducer.diagnostics().clone();
            if self.last_turn.diagnostics.failed() {
                let last_error = self.last_turn.diagnostics.last_error.clone().unwrap_or_default();
                self.conversation
                    .push(ConversationMessage::assistant(format!("Run failed: {last_error}")));
                yield Ok(self.snapshot());
            }
            span.record("conversation_length", self.conversation.len());
        }
    }

    /// Empties the transcript and moves the session to a new remote thread.
    pub async fn clear(&mut self) -> Result<(), SessionError> {
        let span = scoped_span(self.telemetry.enabled, || {
            info_span!(
                "clear_chat_history",
                old_thread_id = %self.thread_id,
                new_thread_id = field::Empty,
            )
        });

        let thread = self.service.create_thread().instrument(span.clone()).await?;
        span.record("new_thread_id", thread.id.as_str());
        info!(
            parent: &span,
            event_name = "chat.history.cleared",
            thread_id = %thread.id,
            "chat history cleared"
        );

        self.thread_id = thread.id;
        self.conversation = Conversation::new();
        self.reducer = EventReducer::new();
        self.last_turn = TurnRecord::default();
        Ok(())
    }
}

fn record_error(span: &Span, error: &dyn std::fmt::Display) {
    span.record("error", field::display(error));
    warn!(parent: span, event_name = "chat.turn.failed", error = %error, "chat turn failed");
}

fn final_response(conversation: &Conversation) -> Option<String> {
    conversation
        .iter()
        .rev()
        .take_while(|message| message.role != Role::User)
        .find(|message| message.is_plain_assistant())
        .map(|message| message.content.clone())
}
