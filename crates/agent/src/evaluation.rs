//! Batch evaluation: replays a file of questions against the agent and records
//! what each run answered and which CRM data it saw.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crmchat_core::Conversation;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::runtime::{ChatSession, SessionSettings};
use crate::service::AgentService;
use crate::tools::ToolRegistry;

pub const RESULTS_DIR: &str = "test_results";
pub const DEFAULT_PAUSE_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("failed to read queries from {path}: {source}")]
    ReadQueries {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid query on line {line} of {path}: {source}")]
    InvalidQuery {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write results to {path}: {source}")]
    WriteResults {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EvaluationQuery {
    pub id: Value,
    pub question: String,
    #[serde(default)]
    pub ground_truth: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Completed,
    Failed,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub function: String,
    pub context: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub query_id: Value,
    pub question: String,
    pub ground_truth: Value,
    pub timestamp: String,
    pub status: EvaluationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextEntry>,
    pub response: Option<String>,
}

impl EvaluationResult {
    fn started(query: &EvaluationQuery, at: DateTime<Utc>) -> Self {
        Self {
            query_id: query.id.clone(),
            question: query.question.clone(),
            ground_truth: query.ground_truth.clone(),
            timestamp: at.to_rfc3339(),
            status: EvaluationStatus::Error,
            error: None,
            context: Vec::new(),
            response: None,
        }
    }

    fn errored(mut self, error: impl std::fmt::Display) -> Self {
        self.status = EvaluationStatus::Error;
        self.error = Some(error.to_string());
        self
    }
}

/// Parses newline-delimited queries; blank lines are skipped.
pub fn parse_queries(text: &str, path: &Path) -> Result<Vec<EvaluationQuery>, EvaluationError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| EvaluationError::InvalidQuery {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

pub async fn load_queries(path: &Path) -> Result<Vec<EvaluationQuery>, EvaluationError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| EvaluationError::ReadQueries { path: path.to_path_buf(), source })?;
    parse_queries(&text, path)
}

/// Drops one layer of surrounding double quotes and unescapes the quotes inside.
pub fn strip_quotes(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|inner| inner.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\""),
        None => raw.to_owned(),
    }
}

pub fn results_file_name(at: DateTime<Utc>) -> String {
    format!("test_results_{}.jsonl", at.format("%Y%m%d_%H%M%S"))
}

/// Writes a `{"timestamp"}` header line followed by one line per result and
/// returns the file path.
pub async fn write_results(
    output_dir: &Path,
    results: &[EvaluationResult],
    at: DateTime<Utc>,
) -> Result<PathBuf, EvaluationError> {
    let path = output_dir.join(results_file_name(at));

    let mut body = serde_json::to_string(&serde_json::json!({ "timestamp": at.to_rfc3339() }))?;
    body.push('\n');
    for result in results {
        body.push_str(&serde_json::to_string(result)?);
        body.push('\n');
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| EvaluationError::WriteResults { path: output_dir.to_path_buf(), source })?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| EvaluationError::WriteResults { path: path.clone(), source })?;

    info!(
        event_name = "eval.results.written",
        path = %path.display(),
        result_count = results.len(),
        "evaluation results saved"
    );
    Ok(path)
}

pub struct EvaluationRunner {
    service: Arc<dyn AgentService>,
    tools: Arc<ToolRegistry>,
    agent_id: String,
    settings: SessionSettings,
    pause: Duration,
}

impl EvaluationRunner {
    pub fn new(
        service: Arc<dyn AgentService>,
        tools: Arc<ToolRegistry>,
        agent_id: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            service,
            tools,
            agent_id: agent_id.into(),
            settings,
            pause: Duration::from_secs(DEFAULT_PAUSE_SECS),
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub async fn run_all(&self, queries: &[EvaluationQuery]) -> Vec<EvaluationResult> {
        let mut results = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            results.push(self.run_query(query).await);
        }
        results
    }

    /// Runs one question on its own thread so earlier answers cannot leak in.
    pub async fn run_query(&self, query: &EvaluationQuery) -> EvaluationResult {
        let span = info_span!(
            "evaluation_query",
            query_id = %query.id,
            thread_id = field::Empty,
            status = field::Empty,
        );
        let result = EvaluationResult::started(query, Utc::now());

        let result = async {
            let started = ChatSession::start(
                self.service.clone(),
                self.tools.clone(),
                self.agent_id.clone(),
                self.settings.clone(),
            )
            .await;
            let mut session = match started {
                Ok(session) => session,
                Err(error) => return result.errored(error),
            };
            Span::current().record("thread_id", session.thread_id());

            let steps = session
                .handle_submit(&query.question, Conversation::new(), Utc::now())
                .collect::<Vec<_>>()
                .await;
            if let Some(error) = steps.into_iter().find_map(Result::err) {
                return result.errored(error);
            }

            let turn = session.last_turn();
            if turn.diagnostics.failed() {
                let last_error = turn.diagnostics.last_error.clone().unwrap_or_default();
                return EvaluationResult {
                    status: EvaluationStatus::Failed,
                    error: Some(last_error.to_string()),
                    ..result
                };
            }

            EvaluationResult {
                status: EvaluationStatus::Completed,
                context: turn
                    .tool_context
                    .iter()
                    .map(|entry| ContextEntry {
                        function: entry.function.clone(),
                        context: strip_quotes(&entry.output),
                    })
                    .collect(),
                response: turn.response.clone(),
                ..result
            }
        }
        .instrument(span.clone())
        .await;

        span.record("status", field::debug(result.status));
        match result.status {
            EvaluationStatus::Completed => info!(
                parent: &span,
                event_name = "eval.query.completed",
                context_entries = result.context.len(),
                "query completed"
            ),
            _ => warn!(
                parent: &span,
                event_name = "eval.query.failed",
                error = result.error.as_deref().unwrap_or_default(),
                "query did not complete"
            ),
        }
        result
    }
}
