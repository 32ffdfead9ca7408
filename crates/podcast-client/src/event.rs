//! Typed events carried by the generation stream.
//!
//! Each event-bearing frame looks like `data: {"type": "...", ...}`. The
//! `type` tag selects the variant; both the canonical kind names and the names
//! the generation service emits are accepted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::EventParseError;

/// Frame prefix marking an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Error classification the service uses for "the source site denied access".
pub const ACCESS_DENIED_CODE: &str = "403";

/// One decoded stream event.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    /// Stage headline, also appended to the log.
    Progress { message: String },
    /// Plain log line.
    Log { message: String },
    /// One more line of the generated script.
    PartialResult { line: String },
    /// Correlation id of one upstream API call.
    Trace {
        api: String,
        trace_id: Option<String>,
    },
    /// Cover artwork is available.
    CoverImage { image_url: String },
    /// Raw media chunk. Superseded by `ProgressiveMedia` and ignored.
    MediaChunk,
    /// A longer version of the media artifact is available.
    ProgressiveMedia(ProgressiveMedia),
    /// Generation finished.
    Complete(CompletePayload),
    /// Advisory warning about the submitted input.
    InputWarning(InputWarning),
    /// One or more requested voices cannot be used.
    VoiceResourceInvalid {
        invalid: Vec<InvalidVoice>,
        message: Option<String>,
    },
    /// Generation failed.
    Error { message: String },
    /// Kind this client does not know about.
    Unknown { kind: String },
}

impl GenerationEvent {
    /// Canonical kind name, used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
            Self::PartialResult { .. } => "partial_result",
            Self::Trace { .. } => "trace",
            Self::CoverImage { .. } => "cover_image",
            Self::MediaChunk => "media_chunk",
            Self::ProgressiveMedia(_) => "progressive_media",
            Self::Complete(_) => "complete",
            Self::InputWarning(_) => "input_warning",
            Self::VoiceResourceInvalid { .. } => "voice_resource_invalid",
            Self::Error { .. } => "error",
            Self::Unknown { kind } => kind,
        }
    }

    /// Whether this event ends the session (`complete`, `error`,
    /// `voice_resource_invalid`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete(_) | Self::Error { .. } | Self::VoiceResourceInvalid { .. }
        )
    }

    /// Human-readable message carried by the event, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Progress { message } | Self::Log { message } | Self::Error { message } => {
                Some(message.as_str())
            }
            Self::InputWarning(warning) => Some(warning.message.as_str()),
            Self::ProgressiveMedia(media) => media.message.as_deref(),
            Self::Complete(complete) => complete.message.as_deref(),
            Self::VoiceResourceInvalid { message, .. } => message.as_deref(),
            Self::PartialResult { line } => Some(line.as_str()),
            _ => None,
        }
    }
}

/// Progressive media update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveMedia {
    /// Reference to the grown artifact (relative to the service origin).
    #[serde(alias = "url")]
    pub audio_url: String,
    /// Index of the sentence just appended, absent for the opening segment.
    #[serde(default)]
    pub sentence_number: Option<u64>,
    /// Total duration of the artifact so far.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Service-provided description of the update.
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressiveMedia {
    /// Log line for this update.
    ///
    /// Priority: the service message, then a sentence-number line, then an
    /// opening-segment line. Durations are whole seconds, rounded.
    pub fn log_line(&self) -> String {
        if let Some(message) = self.message.as_deref().filter(|m| !m.trim().is_empty()) {
            return message.to_string();
        }
        let seconds = self.duration_secs();
        match self.sentence_number {
            Some(n) if n > 0 => format!("sentence {n} added, total duration {seconds}s"),
            _ => format!("opening audio ready, total duration {seconds}s"),
        }
    }

    /// Duration in whole seconds, rounded half up.
    pub fn duration_secs(&self) -> u64 {
        let ms = self.duration_ms.unwrap_or(0);
        ms.saturating_add(500) / 1000
    }
}

/// Terminal success payload. Every field is optional and independent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Non-fatal warning about the input (for example an unreadable source URL).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputWarning {
    #[serde(default)]
    pub message: String,
    /// Classification code. The service sends it as a string, but numbers are
    /// accepted too.
    #[serde(default, deserialize_with = "code_as_string")]
    pub error_code: Option<String>,
}

impl InputWarning {
    /// Whether the warning means the source denied access, so the user has to
    /// paste the content manually.
    pub fn is_access_denied(&self) -> bool {
        self.error_code.as_deref().map(str::trim) == Some(ACCESS_DENIED_CODE)
    }

    /// Remediation text suited to the warning.
    pub fn remediation_hint(&self) -> &'static str {
        if self.is_access_denied() {
            "the site refused access: open the URL, copy the page text, paste it as the topic and submit again"
        } else {
            "the source could not be read; other inputs are still used"
        }
    }
}

/// One voice reference the service rejected, with its suggested replacement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidVoice {
    /// Speaker slot the voice was configured for (for example `Speaker1`).
    pub speaker: String,
    /// Offending voice reference.
    pub voice_id: String,
    #[serde(default)]
    pub reason: String,
    /// Voice id the reference can be replaced with.
    pub default_voice_id: String,
    #[serde(default)]
    pub default_voice_name: Option<String>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct PartialResultPayload {
    #[serde(default)]
    full_line: Option<String>,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct TracePayload {
    api: String,
    #[serde(default)]
    trace_id: Option<String>,
}

#[derive(Deserialize)]
struct CoverPayload {
    image_url: String,
}

#[derive(Deserialize)]
struct VoiceInvalidPayload {
    #[serde(default, alias = "invalid_voices")]
    invalid_voice_ids: Vec<InvalidVoice>,
    #[serde(default)]
    message: Option<String>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Returns the trimmed payload of an event-bearing frame, or `None` for
/// frames without the `data:` prefix and for empty payloads.
pub fn frame_payload(frame: &str) -> Option<&str> {
    let line = frame.trim();
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(payload)
}

/// Parses one frame. `None` means the frame carries no event.
pub fn parse_frame(frame: &str) -> Option<Result<GenerationEvent, EventParseError>> {
    frame_payload(frame).map(parse_event)
}

/// Decodes a JSON payload into a typed event.
pub fn parse_event(payload: &str) -> Result<GenerationEvent, EventParseError> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    map_json_to_event(value)
}

pub(crate) fn map_json_to_event(
    value: serde_json::Value,
) -> Result<GenerationEvent, EventParseError> {
    let Some(kind) = value.get("type").and_then(|v| v.as_str()).map(str::to_owned) else {
        return Err(EventParseError::MissingKind);
    };
    let event = match kind.as_str() {
        "progress" => {
            let p: MessagePayload = fields(&kind, value)?;
            GenerationEvent::Progress { message: p.message }
        }
        "log" => {
            let p: MessagePayload = fields(&kind, value)?;
            GenerationEvent::Log { message: p.message }
        }
        "partial_result" | "script_chunk" => {
            let p: PartialResultPayload = fields(&kind, value)?;
            let line = match (p.full_line, p.speaker, p.text) {
                (Some(line), _, _) => line,
                (None, Some(speaker), Some(text)) => format!("{speaker}: {text}"),
                (None, None, Some(text)) => text,
                _ => {
                    return Err(EventParseError::InvalidPayload {
                        kind: kind.clone(),
                        source: serde::de::Error::custom("missing `full_line` and `text`"),
                    });
                }
            };
            GenerationEvent::PartialResult { line }
        }
        "trace" | "trace_id" => {
            let p: TracePayload = fields(&kind, value)?;
            GenerationEvent::Trace {
                api: p.api,
                trace_id: p.trace_id,
            }
        }
        "cover_image" => {
            let p: CoverPayload = fields(&kind, value)?;
            GenerationEvent::CoverImage {
                image_url: p.image_url,
            }
        }
        "media_chunk" | "audio_chunk" | "welcome_audio_chunk" | "bgm" => {
            GenerationEvent::MediaChunk
        }
        "progressive_media" | "progressive_audio" => {
            GenerationEvent::ProgressiveMedia(fields(&kind, value)?)
        }
        "complete" => GenerationEvent::Complete(fields(&kind, value)?),
        "input_warning" | "url_parse_warning" => {
            GenerationEvent::InputWarning(fields(&kind, value)?)
        }
        "voice_resource_invalid" | "voice_id_invalid" => {
            let p: VoiceInvalidPayload = fields(&kind, value)?;
            GenerationEvent::VoiceResourceInvalid {
                invalid: p.invalid_voice_ids,
                message: p.message,
            }
        }
        "error" => {
            let p: MessagePayload = fields(&kind, value)?;
            GenerationEvent::Error { message: p.message }
        }
        _ => GenerationEvent::Unknown { kind: kind.clone() },
    };
    Ok(event)
}

fn fields<T: DeserializeOwned>(kind: &str, value: serde_json::Value) -> Result<T, EventParseError> {
    serde_json::from_value(value).map_err(|source| EventParseError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}
