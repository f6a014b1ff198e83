use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionState {
    pub last_text: String,
    pub last_submit_time: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Suppress,
}

/// Rejects a repeat of the last allowed text that arrives inside the window,
/// e.g. a double press of enter. One gate per chat session.
#[derive(Clone, Debug)]
pub struct SubmissionGate {
    window: Duration,
    state: Option<SubmissionState>,
}

impl Default for SubmissionGate {
    fn default() -> Self {
        Self::with_window_secs(DEFAULT_DUPLICATE_WINDOW_SECS)
    }
}

impl SubmissionGate {
    pub fn new(window: Duration) -> Self {
        Self { window, state: None }
    }

    pub fn with_window_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000)))
    }

    pub fn submit(&mut self, text: &str, now: DateTime<Utc>) -> GateDecision {
        if let Some(state) = &self.state {
            let elapsed = now.signed_duration_since(state.last_submit_time);
            if state.last_text == text && elapsed < self.window {
                return GateDecision::Suppress;
            }
        }

        self.state = Some(SubmissionState { last_text: text.to_owned(), last_submit_time: now });
        GateDecision::Allow
    }

    pub fn state(&self) -> Option<&SubmissionState> {
        self.state.as_ref()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
