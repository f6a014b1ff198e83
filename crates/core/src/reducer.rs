//! Folds decoded run events into a [`Conversation`].
//!
//! The reducer owns the single open text accumulation of a turn. It never
//! fails: payloads that cannot be interpreted are logged and skipped so a turn
//! always keeps streaming.

use serde_json::Value;
use tracing::{debug, warn};

use crate::bubbles::{citation_block, function_summary, search_query, searching_label, tool_title};
use crate::bubbles::BING_GROUNDING;
use crate::domain::conversation::{BubbleChange, BubbleStatus, Conversation, ConversationMessage};
use crate::events::{
    LastError, MessageDelta, RunEvent, RunStatus, RunStep, RunStepDelta, StepKind, StepStatus,
    ThreadRun, ToolCall,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunDiagnostics {
    pub run_id: Option<String>,
    pub run_status: Option<RunStatus>,
    pub last_error: Option<LastError>,
    pub last_step_id: Option<String>,
    pub last_step_kind: Option<StepKind>,
    pub last_step_status: Option<StepStatus>,
    pub events_applied: usize,
}

impl RunDiagnostics {
    pub fn failed(&self) -> bool {
        self.run_status == Some(RunStatus::Failed)
    }
}

#[derive(Clone, Debug)]
struct OpenAccumulation {
    message_id: String,
    /// Position of the message being grown, once text has arrived.
    index: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct EventReducer {
    open: Option<OpenAccumulation>,
    diagnostics: RunDiagnostics,
}

impl EventReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    pub fn open_message_id(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.message_id.as_str())
    }

    /// Applies one event and reports whether the conversation changed.
    pub fn apply(&mut self, conversation: &mut Conversation, event: &RunEvent) -> bool {
        self.diagnostics.events_applied += 1;
        match event {
            RunEvent::MessageDelta(delta) => self.apply_message_delta(conversation, delta),
            RunEvent::MessageCompleted(message) => {
                if self.open_message_id() == Some(message.id.as_str()) {
                    self.open = None;
                }
                false
            }
            RunEvent::StepDelta(delta) => self.apply_step_delta(conversation, delta),
            RunEvent::StepChanged(step) => self.apply_step(conversation, step),
            RunEvent::RunStatusChanged(run) => {
                self.observe_run(run);
                false
            }
        }
    }

    fn apply_message_delta(&mut self, conversation: &mut Conversation, delta: &MessageDelta) -> bool {
        let same_message = self.open_message_id() == Some(delta.id.as_str());
        if !same_message {
            self.open = Some(OpenAccumulation { message_id: delta.id.clone(), index: None });
        }

        let mut chunk = delta.text();
        chunk.push_str(&citation_block(delta.citations()));
        if chunk.is_empty() {
            return false;
        }

        let open_index = self.open.as_ref().and_then(|open| open.index);
        let last_index = conversation.len().checked_sub(1);
        let extend = same_message
            && open_index.is_some()
            && open_index == last_index
            && conversation.last().is_some_and(ConversationMessage::is_plain_assistant);

        match conversation.last_mut() {
            Some(last) if extend => last.content.push_str(&chunk),
            _ => {
                conversation.push(ConversationMessage::assistant(chunk));
                if let Some(open) = self.open.as_mut() {
                    open.index = Some(conversation.len() - 1);
                }
            }
        }
        true
    }

    fn apply_step_delta(&mut self, conversation: &mut Conversation, delta: &RunStepDelta) -> bool {
        let mut changed = false;
        for call in delta.tool_calls() {
            let ToolCall::BingGrounding { id, bing_grounding } = call else {
                continue;
            };
            let Some(query) = search_query(&bing_grounding.request_url) else {
                continue;
            };
            let change = conversation.upsert_bubble(
                &tool_title(BING_GROUNDING),
                id.as_deref(),
                &searching_label(query),
                BubbleStatus::Pending,
            );
            changed |= change != BubbleChange::Unchanged;
        }
        changed
    }

    fn apply_step(&mut self, conversation: &mut Conversation, step: &RunStep) -> bool {
        self.diagnostics.last_step_id = Some(step.id.clone());
        self.diagnostics.last_step_kind = Some(step.kind);
        self.diagnostics.last_step_status = Some(step.status);
        debug!(
            event_name = "chat.run.step",
            step_id = %step.id,
            step_kind = step.kind.as_str(),
            step_status = step.status.as_str(),
            "run step changed"
        );

        if step.kind != StepKind::ToolCalls || step.status != StepStatus::Completed {
            return false;
        }

        let mut changed = false;
        for call in step.tool_calls() {
            let ToolCall::Function { id, function } = call else {
                continue;
            };
            let Some(raw_output) = function.output.as_deref() else {
                continue;
            };
            let output = match serde_json::from_str::<Value>(raw_output) {
                Ok(output) => output,
                Err(error) => {
                    warn!(
                        event_name = "chat.tool.output_unparsed",
                        function = %function.name,
                        call_id = id.as_deref().unwrap_or_default(),
                        error = %error,
                        "function output is not valid JSON; skipping bubble"
                    );
                    continue;
                }
            };
            let Some(summary) = function_summary(&function.name, &output) else {
                continue;
            };
            let change = conversation.upsert_bubble(
                &tool_title(&function.name),
                id.as_deref(),
                &summary,
                BubbleStatus::Done,
            );
            changed |= change != BubbleChange::Unchanged;
        }

        changed | (conversation.complete_pending_bubbles() > 0)
    }

    fn observe_run(&mut self, run: &ThreadRun) {
        let span = tracing::Span::current();
        span.record("run_id", run.id.as_str());
        span.record("run_status", run.status.as_str());

        self.diagnostics.run_id = Some(run.id.clone());
        self.diagnostics.run_status = Some(run.status);

        if run.status == RunStatus::Failed {
            let last_error = run.last_error.clone().unwrap_or_default();
            span.record("last_error", tracing::field::display(&last_error));
            warn!(
                event_name = "chat.run.failed",
                run_id = %run.id,
                last_error = %last_error,
                "agent run failed"
            );
            self.diagnostics.last_error = Some(last_error);
        } else {
            debug!(
                event_name = "chat.run.status",
                run_id = %run.id,
                run_status = run.status.as_str(),
                "run status changed"
            );
        }
    }
}
