use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::{InputWarning, InvalidVoice};

/// Lifecycle state of one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Submitting,
    Active,
    Completed,
    Failed(String),
    /// Some requested voices are invalid; the user must resolve them and
    /// submit again.
    AwaitingResolution,
}

impl LifecycleState {
    /// `Completed`, `Failed` and `AwaitingResolution` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed(_) | Self::AwaitingResolution
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::AwaitingResolution => "awaiting_resolution",
        }
    }
}

/// Timestamped log line shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Local>,
    pub message: String,
}

/// Correlation id reported for one upstream API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub api: String,
    pub trace_id: Option<String>,
}

/// Read-only view of a session handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: uuid::Uuid,
    pub state: LifecycleState,
    /// Latest stage headline.
    pub progress: Option<String>,
    pub logs: Vec<LogEntry>,
    /// Script lines in arrival order.
    pub result_lines: Vec<String>,
    pub cover_url: Option<String>,
    pub traces: Vec<TraceEntry>,
    /// Final media reference from `complete`, as sent by the service.
    pub media_url: Option<String>,
    /// Final script reference from `complete`, as sent by the service.
    pub script_url: Option<String>,
    /// Most recent advisory input warning.
    pub warning: Option<InputWarning>,
    /// Voices to resolve when `state` is `AwaitingResolution`.
    pub invalid_voices: Vec<InvalidVoice>,
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            state: LifecycleState::Idle,
            progress: None,
            logs: Vec::new(),
            result_lines: Vec::new(),
            cover_url: None,
            traces: Vec::new(),
            media_url: None,
            script_url: None,
            warning: None,
            invalid_voices: Vec::new(),
        }
    }

    /// Trace ids recorded for `api`, in arrival order.
    pub fn traces_for<'a>(&'a self, api: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.traces
            .iter()
            .filter(move |t| t.api == api)
            .filter_map(|t| t.trace_id.as_deref())
    }

    /// Failure message when the session failed.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            LifecycleState::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }
}

/// State of one generation request.
///
/// Mutated only by the event dispatcher; everything else reads snapshots.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    data: SessionSnapshot,
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationSession {
    /// Creates an idle session with a fresh id.
    pub fn new() -> Self {
        Self {
            data: SessionSnapshot::empty(),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.data.session_id
    }

    pub fn state(&self) -> &LifecycleState {
        &self.data.state
    }

    pub fn is_terminal(&self) -> bool {
        self.data.state.is_terminal()
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.data.logs
    }

    pub fn result_lines(&self) -> &[String] {
        &self.data.result_lines
    }

    pub fn traces(&self) -> &[TraceEntry] {
        &self.data.traces
    }

    pub fn media_url(&self) -> Option<&str> {
        self.data.media_url.as_deref()
    }

    pub fn script_url(&self) -> Option<&str> {
        self.data.script_url.as_deref()
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.data.cover_url.as_deref()
    }

    pub fn warning(&self) -> Option<&InputWarning> {
        self.data.warning.as_ref()
    }

    pub fn invalid_voices(&self) -> &[InvalidVoice] {
        &self.data.invalid_voices
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.data.clone()
    }

    /// Discards all accumulated state and enters `Submitting` under a new id.
    pub(crate) fn begin_submission(&mut self) {
        self.data = SessionSnapshot::empty();
        self.data.state = LifecycleState::Submitting;
        debug!(session_id = %self.data.session_id, "session submitting");
    }

    /// `Submitting -> Active`. Ignored from any other state.
    pub(crate) fn mark_active(&mut self) {
        if self.data.state == LifecycleState::Submitting {
            self.set_state(LifecycleState::Active);
        }
    }

    /// Moves to a terminal state. Returns `false` (and changes nothing) when
    /// the session already reached one.
    pub(crate) fn finish(&mut self, state: LifecycleState) -> bool {
        debug_assert!(state.is_terminal());
        if self.data.state.is_terminal() {
            return false;
        }
        self.set_state(state);
        true
    }

    pub(crate) fn push_log(&mut self, message: impl Into<String>) {
        self.data.logs.push(LogEntry {
            time: Local::now(),
            message: message.into(),
        });
    }

    pub(crate) fn set_progress(&mut self, headline: impl Into<String>) {
        self.data.progress = Some(headline.into());
    }

    pub(crate) fn push_result_line(&mut self, line: impl Into<String>) {
        self.data.result_lines.push(line.into());
    }

    pub(crate) fn push_trace(&mut self, api: impl Into<String>, trace_id: Option<String>) {
        self.data.traces.push(TraceEntry {
            api: api.into(),
            trace_id,
        });
    }

    pub(crate) fn set_cover(&mut self, url: impl Into<String>) {
        self.data.cover_url = Some(url.into());
    }

    pub(crate) fn set_media_url(&mut self, url: impl Into<String>) {
        self.data.media_url = Some(url.into());
    }

    pub(crate) fn set_script_url(&mut self, url: impl Into<String>) {
        self.data.script_url = Some(url.into());
    }

    pub(crate) fn set_warning(&mut self, warning: InputWarning) {
        self.data.warning = Some(warning);
    }

    pub(crate) fn set_invalid_voices(&mut self, invalid: Vec<InvalidVoice>) {
        self.data.invalid_voices = invalid;
    }

    fn set_state(&mut self, state: LifecycleState) {
        debug!(
            session_id = %self.data.session_id,
            from = self.data.state.name(),
            to = state.name(),
            "session transition"
        );
        self.data.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle_and_empty() {
        let session = GenerationSession::new();
        assert_eq!(session.state(), &LifecycleState::Idle);
        assert!(session.logs().is_empty());
        assert!(session.result_lines().is_empty());
        assert!(session.media_url().is_none());
    }

    #[test]
    fn begin_submission_resets_everything_and_renews_id() {
        let mut session = GenerationSession::new();
        session.begin_submission();
        let first_id = session.id();
        session.mark_active();
        session.push_log("hello");
        session.push_result_line("Speaker1: hi");
        session.push_trace("tts", Some("t-1".into()));
        session.set_cover("https://img/cover.png");
        assert!(session.finish(LifecycleState::Completed));

        session.begin_submission();
        assert_ne!(session.id(), first_id);
        assert_eq!(session.state(), &LifecycleState::Submitting);
        assert!(session.logs().is_empty());
        assert!(session.result_lines().is_empty());
        assert!(session.traces().is_empty());
        assert!(session.cover_url().is_none());
    }

    #[test]
    fn mark_active_only_leaves_submitting() {
        let mut session = GenerationSession::new();
        session.mark_active();
        assert_eq!(session.state(), &LifecycleState::Idle);
        session.begin_submission();
        session.mark_active();
        assert_eq!(session.state(), &LifecycleState::Active);
    }

    #[test]
    fn terminal_state_is_never_replaced() {
        let mut session = GenerationSession::new();
        session.begin_submission();
        session.mark_active();
        assert!(session.finish(LifecycleState::AwaitingResolution));
        assert!(!session.finish(LifecycleState::Completed));
        assert!(!session.finish(LifecycleState::Failed("late".into())));
        assert_eq!(session.state(), &LifecycleState::AwaitingResolution);
    }

    #[test]
    fn traces_keep_every_entry_per_api() {
        let mut session = GenerationSession::new();
        session.push_trace("tts", Some("a".into()));
        session.push_trace("script", Some("b".into()));
        session.push_trace("tts", Some("c".into()));
        session.push_trace("tts", None);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.traces.len(), 4);
        assert_eq!(snapshot.traces_for("tts").collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
