//! Core chat model for the CRM assistant.
//!
//! Everything in this crate is free of network I/O:
//! - **Conversation** (`domain::conversation`) - ordered transcript with tool bubbles
//! - **Events** (`events`) - typed decoding of the hosted agent's run stream
//! - **Reducer** (`reducer`) - folds run events into the transcript
//! - **Gate** (`gate`) - duplicate submission suppression
//! - **Bubbles** (`bubbles`) - tool titles, search labels, citations, function summaries
//!
//! Configuration, error mapping and tracing helpers shared by the binaries also
//! live here.

pub mod bubbles;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod gate;
pub mod reducer;
pub mod telemetry;

pub use domain::conversation::{
    BubbleStatus, Conversation, ConversationMessage, MessageMetadata, Role,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{EventDecodeError, RunEvent, StreamItem};
pub use gate::{GateDecision, SubmissionGate, SubmissionState};
pub use reducer::{EventReducer, RunDiagnostics};
