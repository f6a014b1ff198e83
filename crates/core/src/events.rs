//! Typed view of the hosted agent's run stream.
//!
//! The service delivers `(event_type, payload)` pairs. They are decoded exactly
//! once, here, into [`RunEvent`]; the reducer never looks at raw JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MESSAGE_DELTA: &str = "thread.message.delta";
pub const MESSAGE_COMPLETED: &str = "thread.message.completed";
pub const MESSAGE_INCOMPLETE: &str = "thread.message.incomplete";
pub const STEP_DELTA: &str = "thread.run.step.delta";
pub const STEP_PREFIX: &str = "thread.run.step.";
pub const RUN_STEP: &str = "run_step";
pub const RUN_PREFIX: &str = "thread.run.";
pub const DONE: &str = "done";
pub const ERROR: &str = "error";

/// One raw item of a run stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub event_type: String,
    pub data: Value,
}

impl StreamItem {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self { event_type: event_type.into(), data }
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("malformed `{event_type}` payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    MessageDelta(MessageDelta),
    MessageCompleted(ThreadMessage),
    RunStatusChanged(ThreadRun),
    StepChanged(RunStep),
    StepDelta(RunStepDelta),
}

impl RunEvent {
    /// Decodes a raw stream item. Items that carry nothing the chat cares about
    /// (`thread.message.created`, `done`, ...) decode to `None`.
    pub fn decode(item: &StreamItem) -> Result<Option<Self>, EventDecodeError> {
        let event_type = item.event_type.as_str();
        let event = match event_type {
            MESSAGE_DELTA => Self::MessageDelta(parse(event_type, &item.data)?),
            MESSAGE_COMPLETED | MESSAGE_INCOMPLETE => {
                Self::MessageCompleted(parse(event_type, &item.data)?)
            }
            STEP_DELTA => Self::StepDelta(parse(event_type, &item.data)?),
            RUN_STEP => Self::StepChanged(parse(event_type, &item.data)?),
            other if other.starts_with(STEP_PREFIX) => {
                Self::StepChanged(parse(event_type, &item.data)?)
            }
            other if other.starts_with(RUN_PREFIX) => {
                Self::RunStatusChanged(parse(event_type, &item.data)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::MessageDelta(delta) => &delta.id,
            Self::MessageCompleted(message) => &message.id,
            Self::RunStatusChanged(run) => &run.id,
            Self::StepChanged(step) => &step.id,
            Self::StepDelta(delta) => &delta.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageDelta(_) => "message_delta",
            Self::MessageCompleted(_) => "message_completed",
            Self::RunStatusChanged(_) => "run_status_changed",
            Self::StepChanged(_) => "step_changed",
            Self::StepDelta(_) => "step_delta",
        }
    }
}

fn parse<T: DeserializeOwned>(event_type: &str, data: &Value) -> Result<T, EventDecodeError> {
    T::deserialize(data)
        .map_err(|source| EventDecodeError::Malformed { event_type: event_type.to_owned(), source })
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MessageDelta {
    pub id: String,
    #[serde(default)]
    pub delta: MessageDeltaBody,
}

impl MessageDelta {
    /// Text fragments of this delta in emission order.
    pub fn text(&self) -> String {
        self.text_parts().map(|text| text.value.as_str()).collect()
    }

    pub fn citations(&self) -> impl Iterator<Item = &Annotation> {
        self.text_parts().flat_map(|text| text.annotations.iter())
    }

    fn text_parts(&self) -> impl Iterator<Item = &TextDelta> {
        self.delta.content.iter().filter_map(|content| match content {
            MessageDeltaContent::Text { text } => Some(text),
            MessageDeltaContent::Unsupported => None,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub content: Vec<MessageDeltaContent>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageDeltaContent {
    Text {
        #[serde(default)]
        text: TextDelta,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    UrlCitation {
        #[serde(default)]
        text: String,
        #[serde(default)]
        url_citation: UrlCitation,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UrlCitation {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LastError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (true, true) => write!(f, "unknown error"),
            (true, false) => write!(f, "{}", self.message),
            (false, true) => write!(f, "{}", self.code),
            (false, false) => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ThreadRun {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
}

impl ThreadRun {
    /// Function calls the service is waiting on, if the run is paused for them.
    pub fn pending_tool_calls(&self) -> &[RequiredToolCall] {
        self.required_action
            .as_ref()
            .and_then(|action| action.submit_tool_outputs.as_ref())
            .map(|outputs| outputs.tool_calls.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RequiredAction {
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputsAction>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SubmitToolOutputsAction {
    #[serde(default)]
    pub tool_calls: Vec<RequiredToolCall>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RequiredToolCall {
    pub id: String,
    #[serde(default)]
    pub function: FunctionCall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    MessageCreation,
    ToolCalls,
    #[serde(other)]
    Unknown,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreation => "message_creation",
            Self::ToolCalls => "tool_calls",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Cancelled,
    Failed,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RunStep {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(default)]
    pub step_details: Option<StepDetails>,
    #[serde(default)]
    pub last_error: Option<LastError>,
}

impl RunStep {
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.step_details.as_ref().map(|details| details.tool_calls.as_slice()).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StepDetails {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RunStepDelta {
    pub id: String,
    #[serde(default)]
    pub delta: RunStepDeltaBody,
}

impl RunStepDelta {
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.delta.step_details {
            Some(details) if details.kind.as_deref().unwrap_or("tool_calls") == "tool_calls" => {
                &details.tool_calls
            }
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RunStepDeltaBody {
    #[serde(default)]
    pub step_details: Option<StepDeltaDetails>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StepDeltaDetails {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCall {
    Function {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        function: FunctionCall,
    },
    BingGrounding {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        bing_grounding: BingGroundingCall,
    },
    #[serde(other)]
    Unsupported,
}

impl ToolCall {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Function { id, .. } | Self::BingGrounding { id, .. } => id.as_deref(),
            Self::Unsupported => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BingGroundingCall {
    #[serde(default, rename = "requesturl", alias = "request_url")]
    pub request_url: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        Annotation, RunEvent, RunStatus, StepKind, StepStatus, StreamItem, ToolCall,
    };

    #[test]
    fn decodes_message_delta_with_multiple_chunks_and_citations() {
        let item = StreamItem::new(
            "thread.message.delta",
            json!({
                "id": "msg_1",
                "object": "thread.message.delta",
                "delta": {
                    "content": [
                        {"index": 0, "type": "text", "text": {"value": "Hello"}},
                        {"index": 1, "type": "image_file", "image_file": {"file_id": "f"}},
                        {"index": 2, "type": "text", "text": {
                            "value": " world",
                            "annotations": [{
                                "type": "url_citation",
                                "text": "【3:0†source】",
                                "url_citation": {"url": "https://example.com", "title": "Example"}
                            }, {"type": "file_citation", "text": "x"}]
                        }}
                    ]
                }
            }),
        );

        let Some(RunEvent::MessageDelta(delta)) = RunEvent::decode(&item).expect("decode") else {
            panic!("expected message delta");
        };
        assert_eq!(delta.id, "msg_1");
        assert_eq!(delta.text(), "Hello world");
        let citations = delta.citations().collect::<Vec<_>>();
        assert_eq!(citations.len(), 2);
        assert!(matches!(citations[0], Annotation::UrlCitation { .. }));
        assert_eq!(citations[1], &Annotation::Other);
    }

    #[test]
    fn decodes_step_completion_with_function_and_grounding_calls() {
        let item = StreamItem::new(
            "thread.run.step.completed",
            json!({
                "id": "step_1",
                "type": "tool_calls",
                "status": "completed",
                "step_details": {
                    "type": "tool_calls",
                    "tool_calls": [
                        {"id": "call_1", "type": "function", "function": {
                            "name": "fetch_accounts", "arguments": "{}", "output": "{\"totalSize\": 2}"
                        }},
                        {"id": "call_2", "type": "bing_grounding", "bing_grounding": {
                            "requesturl": "https://api.bing.microsoft.com/v7.0/search?q=Microsoft+address"
                        }},
                        {"id": "call_3", "type": "code_interpreter"}
                    ]
                }
            }),
        );

        let Some(RunEvent::StepChanged(step)) = RunEvent::decode(&item).expect("decode") else {
            panic!("expected step event");
        };
        assert_eq!(step.kind, StepKind::ToolCalls);
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.tool_calls().len(), 3);
        assert_eq!(step.tool_calls()[0].id(), Some("call_1"));
        assert!(matches!(
            &step.tool_calls()[1],
            ToolCall::BingGrounding { bing_grounding, .. }
                if bing_grounding.request_url.ends_with("?q=Microsoft+address")
        ));
        assert_eq!(step.tool_calls()[2], ToolCall::Unsupported);
    }

    #[test]
    fn decodes_run_status_with_required_action() {
        let item = StreamItem::new(
            "thread.run.requires_action",
            json!({
                "id": "run_1",
                "status": "requires_action",
                "required_action": {
                    "type": "submit_tool_outputs",
                    "submit_tool_outputs": {"tool_calls": [
                        {"id": "call_9", "type": "function", "function": {
                            "name": "fetch_contacts", "arguments": "{\"limit\": 3}"
                        }}
                    ]}
                }
            }),
        );

        let Some(RunEvent::RunStatusChanged(run)) = RunEvent::decode(&item).expect("decode") else {
            panic!("expected run event");
        };
        assert_eq!(run.status, RunStatus::RequiresAction);
        assert_eq!(run.pending_tool_calls().len(), 1);
        assert_eq!(run.pending_tool_calls()[0].function.name, "fetch_contacts");
    }

    #[test]
    fn unknown_statuses_do_not_fail_decoding() {
        let item =
            StreamItem::new("thread.run.created", json!({"id": "run_2", "status": "paused"}));
        let event = RunEvent::decode(&item).expect("decode").expect("event");
        assert!(matches!(event, RunEvent::RunStatusChanged(run) if run.status == RunStatus::Unknown));
    }

    #[test]
    fn irrelevant_event_types_decode_to_none() {
        for event_type in ["done", "thread.message.created", "thread.created"] {
            let item = StreamItem::new(event_type, json!("[DONE]"));
            assert!(RunEvent::decode(&item).expect("decode").is_none(), "{event_type}");
        }
    }

    #[test]
    fn malformed_payload_reports_event_type() {
        let item = StreamItem::new("thread.message.delta", json!({"delta": {}}));
        let error = RunEvent::decode(&item).expect_err("missing id should fail");
        assert!(error.to_string().contains("thread.message.delta"));
    }

    #[test]
    fn step_delta_ignores_non_tool_call_details() {
        let item = StreamItem::new(
            "thread.run.step.delta",
            json!({"id": "step_2", "delta": {"step_details": {"type": "message_creation"}}}),
        );
        let Some(RunEvent::StepDelta(delta)) = RunEvent::decode(&item).expect("decode") else {
            panic!("expected step delta");
        };
        assert!(delta.tool_calls().is_empty());
    }
}
