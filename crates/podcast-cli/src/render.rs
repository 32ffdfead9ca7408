//! Incremental terminal output for session snapshots.

use std::io::Write;

use podcast_client::{InvalidVoice, LifecycleState, PlaybackSnapshot, SessionSnapshot, SlotId};

/// Prints only what changed since the previous snapshot.
pub struct Renderer<W: Write> {
    out: W,
    logs_seen: usize,
    lines_seen: usize,
    cover_shown: bool,
    active: Option<SlotId>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            logs_seen: 0,
            lines_seen: 0,
            cover_shown: false,
            active: None,
        }
    }

    /// Forgets what was printed; used when a new submission starts.
    pub fn restart(&mut self) {
        self.logs_seen = 0;
        self.lines_seen = 0;
        self.cover_shown = false;
        self.active = None;
    }

    pub fn session(&mut self, snapshot: &SessionSnapshot) -> std::io::Result<()> {
        for entry in snapshot.logs.iter().skip(self.logs_seen) {
            writeln!(self.out, "[{}] {}", entry.time.format("%H:%M:%S"), entry.message)?;
        }
        self.logs_seen = snapshot.logs.len();

        for line in snapshot.result_lines.iter().skip(self.lines_seen) {
            writeln!(self.out, "  > {line}")?;
        }
        self.lines_seen = snapshot.result_lines.len();

        if !self.cover_shown
            && let Some(cover) = &snapshot.cover_url
        {
            writeln!(self.out, "cover: {cover}")?;
            self.cover_shown = true;
        }
        Ok(())
    }

    pub fn playback(&mut self, snapshot: &PlaybackSnapshot) -> std::io::Result<()> {
        let slot = snapshot.active_slot();
        if slot.source.is_none() {
            return Ok(());
        }
        match self.active {
            Some(previous) if previous != snapshot.active => writeln!(
                self.out,
                "playback: {previous} -> {} at {:.1}s",
                snapshot.active,
                slot.position.as_secs_f64()
            )?,
            None => writeln!(self.out, "playback: {} started", snapshot.active)?,
            _ => {}
        }
        self.active = Some(snapshot.active);
        Ok(())
    }

    /// Final summary line(s) for a finished session.
    pub fn outcome(&mut self, snapshot: &SessionSnapshot) -> std::io::Result<()> {
        match &snapshot.state {
            LifecycleState::Completed => {
                writeln!(self.out, "done.")?;
                if let Some(media) = &snapshot.media_url {
                    writeln!(self.out, "audio:  {media}")?;
                }
                if let Some(script) = &snapshot.script_url {
                    writeln!(self.out, "script: {script}")?;
                }
            }
            LifecycleState::Failed(message) => writeln!(self.out, "failed: {message}")?,
            LifecycleState::AwaitingResolution => {
                writeln!(self.out, "some voices cannot be used:")?;
                for voice in &snapshot.invalid_voices {
                    writeln!(self.out, "  {}", describe_invalid(voice))?;
                }
            }
            other => writeln!(self.out, "ended while {}", other.name())?,
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn describe_invalid(voice: &InvalidVoice) -> String {
    let fallback = match &voice.default_voice_name {
        Some(name) => format!("{} ({name})", voice.default_voice_id),
        None => voice.default_voice_id.clone(),
    };
    format!(
        "{}: {} ({}), fallback {fallback}",
        voice.speaker, voice.voice_id, voice.reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use podcast_client::{GenerationEvent, GenerationSession, SlotSnapshot};
    use std::time::Duration;

    fn snapshot_with(logs: &[&str], lines: &[&str]) -> SessionSnapshot {
        let mut snapshot = GenerationSession::new().snapshot();
        snapshot.logs = logs
            .iter()
            .map(|m| podcast_client::LogEntry {
                time: chrono::Local::now(),
                message: m.to_string(),
            })
            .collect();
        snapshot.result_lines = lines.iter().map(|l| l.to_string()).collect();
        snapshot
    }

    fn text(renderer: Renderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).expect("utf8")
    }

    #[test]
    fn only_new_entries_are_printed() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.session(&snapshot_with(&["a"], &["Speaker1: hi"])).expect("render");
        renderer
            .session(&snapshot_with(&["a", "b"], &["Speaker1: hi", "Speaker2: yo"]))
            .expect("render");
        let out = text(renderer);
        assert_eq!(out.matches("] a").count(), 1);
        assert_eq!(out.matches("] b").count(), 1);
        assert!(out.contains("  > Speaker2: yo"));
        assert_eq!(out.matches("Speaker1: hi").count(), 1);
    }

    fn playback(active: SlotId, position: Duration) -> PlaybackSnapshot {
        let slot = |id| SlotSnapshot {
            slot: id,
            source: Some(format!("/{id}.mp3")),
            playing: id == active,
            position,
        };
        PlaybackSnapshot {
            active,
            slots: [slot(SlotId::Primary), slot(SlotId::Secondary)],
        }
    }

    #[test]
    fn handoffs_are_reported_once() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.playback(&playback(SlotId::Primary, Duration::ZERO)).expect("render");
        renderer.playback(&playback(SlotId::Primary, Duration::from_secs(3))).expect("render");
        renderer
            .playback(&playback(SlotId::Secondary, Duration::from_millis(12_500)))
            .expect("render");
        let out = text(renderer);
        assert_eq!(out, "playback: primary started\nplayback: primary -> secondary at 12.5s\n");
    }

    #[test]
    fn awaiting_resolution_lists_fallbacks() {
        let mut snapshot = snapshot_with(&[], &[]);
        snapshot.state = LifecycleState::AwaitingResolution;
        let GenerationEvent::VoiceResourceInvalid { invalid, .. } = podcast_client::parse_event(
            r#"{"type":"voice_resource_invalid","invalid_voice_ids":[{"speaker":"Speaker2","voice_id":"ghost","reason":"not found","default_voice_id":"female-shaonv"}]}"#,
        )
        .expect("event") else {
            panic!("expected voice event");
        };
        snapshot.invalid_voices = invalid;

        let mut renderer = Renderer::new(Vec::new());
        renderer.outcome(&snapshot).expect("render");
        assert!(text(renderer).contains("Speaker2: ghost (not found), fallback female-shaonv"));
    }
}
