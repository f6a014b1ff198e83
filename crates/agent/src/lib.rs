//! Agent side of the CRM chat assistant.
//!
//! This crate talks to the hosted agent service and runs chat turns:
//! - `service` - seams to the run execution service and agent directory
//! - `hosted` - HTTP client for the hosted service (REST plus server-sent run streams)
//! - `tools` - client-side functions the agent may call, backed by the CRM crate
//! - `runtime` - [`ChatSession`], the per-chat turn loop
//! - `provisioning` - find-or-create of the named agent with its toolset
//! - `evaluation` - batch replay of a question file with recorded results
//!
//! # Turn flow
//!
//! 1. The submission gate drops a repeat of the last text inside the window.
//! 2. The user message is appended locally and posted to the remote thread.
//! 3. Run events are decoded once and folded into the transcript by the reducer.
//! 4. A run paused on `requires_action` gets its functions executed locally and
//!    the outputs submitted; the continuation stream feeds the same transcript.
//!
//! The run stream is the only writer of the transcript. Observers registered on a
//! session see the same decoded events for diagnostics.

pub mod evaluation;
pub mod hosted;
pub mod provisioning;
pub mod runtime;
pub mod service;
pub mod tools;

pub use hosted::HostedAgentClient;
pub use runtime::{ChatSession, ChatSnapshot, SessionError, SessionSettings};
pub use service::{AgentService, EventObserver, ServiceError};
pub use tools::{crm_registry, ToolRegistry};
