//! Applies decoded events to the session and the playback controller.

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::event::{self, CompletePayload, GenerationEvent, InputWarning, InvalidVoice};
use crate::playback::{MediaUpdate, PlaybackController};
use crate::session::{GenerationSession, LifecycleState, SessionSnapshot};

/// Characters of a malformed payload quoted at each end in diagnostics.
const EXCERPT_CHARS: usize = 100;

/// What happened to one frame or event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event changed the session or playback.
    Applied,
    /// Nothing to apply: a frame without an event, a media chunk or an
    /// unknown kind.
    Ignored,
    /// The session had already ended; the event was only logged.
    LateAfterTerminal,
    /// The payload could not be decoded and was skipped.
    Malformed,
}

/// Sole writer of a `GenerationSession`.
pub struct EventDispatcher {
    session: GenerationSession,
    playback: PlaybackController,
    config: ClientConfig,
    malformed: u64,
}

impl EventDispatcher {
    pub fn new(session: GenerationSession, playback: PlaybackController, config: ClientConfig) -> Self {
        Self {
            session,
            playback,
            config,
            malformed: 0,
        }
    }

    pub fn session(&self) -> &GenerationSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Number of payloads skipped as undecodable.
    pub fn malformed_frames(&self) -> u64 {
        self.malformed
    }

    /// The response stream is open.
    pub fn stream_opened(&mut self) {
        self.session.mark_active();
    }

    /// Parses one frame and applies its event, if it carries one.
    pub fn dispatch_frame(&mut self, frame: &str) -> DispatchOutcome {
        match event::parse_frame(frame) {
            None => DispatchOutcome::Ignored,
            Some(Ok(event)) => self.dispatch(event),
            Some(Err(err)) => {
                self.malformed += 1;
                let payload = event::frame_payload(frame).unwrap_or_default();
                warn!(
                    session_id = %self.session.id(),
                    error = %err,
                    payload_len = payload.len(),
                    head = %head(payload),
                    tail = %tail(payload),
                    "skipping malformed event payload"
                );
                DispatchOutcome::Malformed
            }
        }
    }

    /// Applies one event.
    pub fn dispatch(&mut self, event: GenerationEvent) -> DispatchOutcome {
        if self.session.is_terminal() {
            return self.late(&event);
        }
        self.session.mark_active();

        match event {
            GenerationEvent::Progress { message } => {
                self.session.set_progress(message.clone());
                self.session.push_log(message);
            }
            GenerationEvent::Log { message } => self.session.push_log(message),
            GenerationEvent::PartialResult { line } => self.session.push_result_line(line),
            GenerationEvent::Trace { api, trace_id } => {
                debug!(session_id = %self.session.id(), api = %api, trace_id = ?trace_id, "trace recorded");
                self.session.push_trace(api, trace_id);
            }
            GenerationEvent::CoverImage { image_url } => {
                self.session.set_cover(image_url);
                self.session.push_log("cover image ready");
            }
            GenerationEvent::MediaChunk => return DispatchOutcome::Ignored,
            GenerationEvent::ProgressiveMedia(media) => {
                let reference = self.config.resolve(&media.audio_url);
                match self.playback.on_media_update(reference) {
                    MediaUpdate::Direct { slot } => {
                        debug!(session_id = %self.session.id(), slot = %slot, "progressive media loaded");
                    }
                    MediaUpdate::Swap(handle) => {
                        debug!(
                            session_id = %self.session.id(),
                            from = %handle.from,
                            to = %handle.to,
                            "progressive media handoff started"
                        );
                    }
                }
                self.session.push_log(media.log_line());
            }
            GenerationEvent::Complete(payload) => self.complete(payload),
            GenerationEvent::InputWarning(warning) => self.input_warning(warning),
            GenerationEvent::VoiceResourceInvalid { invalid, message } => {
                self.voice_resource_invalid(invalid, message)
            }
            GenerationEvent::Error { message } => {
                self.session.push_log(format!("error: {message}"));
                self.session.finish(LifecycleState::Failed(message));
                warn!(session_id = %self.session.id(), "generation failed");
            }
            GenerationEvent::Unknown { kind } => {
                debug!(session_id = %self.session.id(), kind = %kind, "ignoring unknown event kind");
                return DispatchOutcome::Ignored;
            }
        }
        DispatchOutcome::Applied
    }

    /// The transport failed to open or read the stream.
    pub fn transport_failed(&mut self, err: &TransportError) {
        let message = err.to_string();
        if self.session.is_terminal() {
            warn!(session_id = %self.session.id(), error = %message, "transport error after session ended");
            return;
        }
        self.session.push_log(format!("error: {message}"));
        self.session.finish(LifecycleState::Failed(message));
        warn!(session_id = %self.session.id(), error = %err, "generation stream failed");
    }

    /// The stream closed. A session that never reached a terminal state fails.
    pub fn stream_ended(&mut self) {
        if self.session.is_terminal() {
            return;
        }
        let message = "stream ended before completion";
        self.session.push_log(format!("error: {message}"));
        self.session.finish(LifecycleState::Failed(message.into()));
        warn!(session_id = %self.session.id(), "stream closed before a terminal event");
    }

    fn complete(&mut self, payload: CompletePayload) {
        if let Some(audio_url) = &payload.audio_url {
            self.session.set_media_url(audio_url.clone());
        }
        if let Some(script_url) = &payload.script_url {
            self.session.set_script_url(script_url.clone());
        }
        if let Some(cover_url) = payload.cover_url {
            if self.session.cover_url().is_none() {
                self.session.set_cover(cover_url);
            }
        }
        self.session.finish(LifecycleState::Completed);
        self.session.set_progress("podcast generation complete");
        self.session.push_log(
            payload
                .message
                .unwrap_or_else(|| "podcast generation complete, ready to download".into()),
        );

        if let Some(audio_url) = &payload.audio_url {
            if self.playback.load_if_empty(self.config.resolve(audio_url)) {
                debug!(session_id = %self.session.id(), "final media loaded into idle player");
            }
        }
        info!(
            session_id = %self.session.id(),
            media = ?self.session.media_url(),
            script = ?self.session.script_url(),
            "generation complete"
        );
    }

    fn input_warning(&mut self, warning: InputWarning) {
        warn!(
            session_id = %self.session.id(),
            code = ?warning.error_code,
            message = %warning.message,
            "input warning"
        );
        self.session.push_log(format!("warning: {}", warning.message));
        if warning.is_access_denied() {
            let hint = warning.remediation_hint();
            self.session.set_progress(hint);
            self.session.push_log(hint);
        }
        self.session.set_warning(warning);
    }

    fn voice_resource_invalid(&mut self, invalid: Vec<InvalidVoice>, message: Option<String>) {
        self.session.push_log(
            message.unwrap_or_else(|| format!("{} requested voice(s) cannot be used", invalid.len())),
        );
        for voice in &invalid {
            let fallback = voice
                .default_voice_name
                .as_deref()
                .map(|name| format!("{} ({name})", voice.default_voice_id))
                .unwrap_or_else(|| voice.default_voice_id.clone());
            self.session.push_log(format!(
                "{}: voice {} rejected ({}), fallback {fallback}",
                voice.speaker, voice.voice_id, voice.reason
            ));
        }
        self.session.set_invalid_voices(invalid);
        self.session.finish(LifecycleState::AwaitingResolution);
        warn!(session_id = %self.session.id(), "generation awaiting voice resolution");
    }

    fn late(&mut self, event: &GenerationEvent) -> DispatchOutcome {
        let kind = event.kind();
        warn!(
            session_id = %self.session.id(),
            kind = %kind,
            state = self.session.state().name(),
            "late event ignored"
        );
        let line = match event.message() {
            Some(message) => format!("late {kind} event ignored: {message}"),
            None => format!("late {kind} event ignored"),
        };
        self.session.push_log(line);
        DispatchOutcome::LateAfterTerminal
    }
}

fn head(payload: &str) -> &str {
    match payload.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}

fn tail(payload: &str) -> &str {
    let count = payload.chars().count();
    if count <= EXCERPT_CHARS {
        return payload;
    }
    match payload.char_indices().nth(count - EXCERPT_CHARS) {
        Some((idx, _)) => &payload[idx..],
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{PlaybackConfig, SlotId};

    fn dispatcher() -> EventDispatcher {
        let mut session = GenerationSession::new();
        session.begin_submission();
        let mut dispatcher = EventDispatcher::new(
            session,
            PlaybackController::headless(PlaybackConfig::immediate()),
            ClientConfig::new("http://svc:5001"),
        );
        dispatcher.stream_opened();
        dispatcher
    }

    fn feed(dispatcher: &mut EventDispatcher, frames: &[&str]) -> Vec<DispatchOutcome> {
        frames.iter().map(|f| dispatcher.dispatch_frame(f)).collect()
    }

    #[tokio::test]
    async fn malformed_payload_between_good_events_is_skipped() {
        let mut d = dispatcher();
        let outcomes = feed(
            &mut d,
            &[
                r#"data: {"type":"log","message":"one"}"#,
                r#"data: {"type":"log","message":"#,
                "",
                r#"data: {"type":"log","message":"two"}"#,
            ],
        );
        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::Applied,
                DispatchOutcome::Malformed,
                DispatchOutcome::Ignored,
                DispatchOutcome::Applied
            ]
        );
        assert_eq!(d.malformed_frames(), 1);
        let messages: Vec<_> = d.session().logs().iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(d.session().state(), &LifecycleState::Active);
    }

    #[tokio::test]
    async fn complete_with_media_only_records_media_and_loads_idle_player() {
        let mut d = dispatcher();
        d.dispatch_frame(r#"data: {"type":"complete","audio_url":"/output/final.mp3"}"#);

        let snapshot = d.snapshot();
        assert_eq!(snapshot.state, LifecycleState::Completed);
        assert_eq!(snapshot.media_url.as_deref(), Some("/output/final.mp3"));
        assert_eq!(snapshot.script_url, None);
        assert_eq!(
            d.playback().snapshot().slot(SlotId::Primary).source.as_deref(),
            Some("http://svc:5001/output/final.mp3")
        );
    }

    #[tokio::test]
    async fn complete_does_not_override_progressive_player_or_cover() {
        let mut d = dispatcher();
        feed(
            &mut d,
            &[
                r#"data: {"type":"cover_image","image_url":"https://img/cover.png"}"#,
                r#"data: {"type":"progressive_audio","audio_url":"/p1.mp3","duration_ms":4400}"#,
                r#"data: {"type":"complete","audio_url":"/final.mp3","script_url":"/s.txt","cover_url":"/other.png"}"#,
            ],
        );
        let snapshot = d.snapshot();
        assert_eq!(snapshot.cover_url.as_deref(), Some("https://img/cover.png"));
        assert_eq!(snapshot.script_url.as_deref(), Some("/s.txt"));
        assert_eq!(
            d.playback().snapshot().active_slot().source.as_deref(),
            Some("http://svc:5001/p1.mp3")
        );
        assert!(snapshot.logs.iter().any(|l| l.message == "opening audio ready, total duration 4s"));
    }

    #[tokio::test]
    async fn voice_invalid_then_complete_stays_awaiting_resolution() {
        let mut d = dispatcher();
        let outcomes = feed(
            &mut d,
            &[
                r#"data: {"type":"voice_id_invalid","invalid_voice_ids":[{"speaker":"Speaker1","voice_id":"ghost","reason":"not found","default_voice_id":"male-qn-qingse","default_voice_name":"Mini"}]}"#,
                r#"data: {"type":"complete","audio_url":"/final.mp3"}"#,
            ],
        );
        assert_eq!(outcomes[1], DispatchOutcome::LateAfterTerminal);
        let snapshot = d.snapshot();
        assert_eq!(snapshot.state, LifecycleState::AwaitingResolution);
        assert_eq!(snapshot.invalid_voices.len(), 1);
        assert_eq!(snapshot.invalid_voices[0].default_voice_id, "male-qn-qingse");
        assert_eq!(snapshot.media_url, None);
        assert!(snapshot.logs.iter().any(|l| l.message.contains("fallback male-qn-qingse (Mini)")));
        assert!(snapshot.logs.iter().any(|l| l.message == "late complete event ignored"));
    }

    #[tokio::test]
    async fn error_then_complete_stays_failed() {
        let mut d = dispatcher();
        feed(
            &mut d,
            &[
                r#"data: {"type":"error","message":"quota exceeded"}"#,
                r#"data: {"type":"complete","audio_url":"/final.mp3"}"#,
                r#"data: {"type":"log","message":"cleanup"}"#,
            ],
        );
        let snapshot = d.snapshot();
        assert_eq!(snapshot.failure(), Some("quota exceeded"));
        assert_eq!(snapshot.media_url, None);
        assert!(snapshot.logs.iter().any(|l| l.message == "late log event ignored: cleanup"));
    }

    #[tokio::test]
    async fn access_denied_warning_is_advisory_and_sets_hint() {
        let mut d = dispatcher();
        d.dispatch_frame(r#"data: {"type":"url_parse_warning","message":"blocked","error_code":403}"#);
        let snapshot = d.snapshot();
        assert_eq!(snapshot.state, LifecycleState::Active);
        let warning = snapshot.warning.as_ref().expect("warning");
        assert!(warning.is_access_denied());
        assert_eq!(snapshot.progress.as_deref(), Some(warning.remediation_hint()));
        assert_eq!(snapshot.logs[0].message, "warning: blocked");
    }

    #[tokio::test]
    async fn other_warnings_leave_headline_alone() {
        let mut d = dispatcher();
        feed(
            &mut d,
            &[
                r#"data: {"type":"progress","message":"parsing url"}"#,
                r#"data: {"type":"input_warning","message":"timeout","error_code":"504"}"#,
            ],
        );
        assert_eq!(d.snapshot().progress.as_deref(), Some("parsing url"));
    }

    #[tokio::test]
    async fn script_lines_traces_and_unknown_kinds() {
        let mut d = dispatcher();
        let outcomes = feed(
            &mut d,
            &[
                r#"data: {"type":"script_chunk","full_line":"Speaker1: hello"}"#,
                r#"data: {"type":"partial_result","speaker":"Speaker2","text":"hi"}"#,
                r#"data: {"type":"trace_id","api":"tts","trace_id":"t-1"}"#,
                r#"data: {"type":"trace_id","api":"tts","trace_id":"t-2"}"#,
                r#"data: {"type":"audio_chunk","audio":"00ff"}"#,
                r#"data: {"type":"sparkle","x":1}"#,
            ],
        );
        assert_eq!(outcomes[4], DispatchOutcome::Ignored);
        assert_eq!(outcomes[5], DispatchOutcome::Ignored);
        let snapshot = d.snapshot();
        assert_eq!(snapshot.result_lines, vec!["Speaker1: hello", "Speaker2: hi"]);
        assert_eq!(snapshot.traces_for("tts").collect::<Vec<_>>(), vec!["t-1", "t-2"]);
    }

    #[tokio::test]
    async fn stream_end_without_terminal_event_fails() {
        let mut d = dispatcher();
        d.dispatch_frame(r#"data: {"type":"progress","message":"working"}"#);
        d.stream_ended();
        assert_eq!(d.snapshot().failure(), Some("stream ended before completion"));
    }

    #[tokio::test]
    async fn stream_end_after_completion_changes_nothing() {
        let mut d = dispatcher();
        d.dispatch_frame(r#"data: {"type":"complete"}"#);
        d.stream_ended();
        d.transport_failed(&TransportError::read("reset"));
        assert_eq!(d.snapshot().state, LifecycleState::Completed);
    }

    #[tokio::test]
    async fn transport_failure_fails_with_transport_text() {
        let mut d = dispatcher();
        d.transport_failed(&TransportError::status(502, "bad gateway"));
        assert_eq!(
            d.snapshot().failure(),
            Some("service returned status 502: bad gateway")
        );
    }

    #[test]
    fn excerpts_respect_char_boundaries() {
        let long: String = "播".repeat(150);
        assert_eq!(head(&long).chars().count(), EXCERPT_CHARS);
        assert_eq!(tail(&long).chars().count(), EXCERPT_CHARS);
        assert_eq!(head("short"), "short");
        assert_eq!(tail("short"), "short");
    }
}
