//! Submission model for one generation request.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};

use crate::errors::ClientError;
use crate::event::InvalidVoice;

/// One of the two podcast speakers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpeakerSlot {
    Speaker1,
    Speaker2,
}

impl SpeakerSlot {
    pub const ALL: [SpeakerSlot; 2] = [SpeakerSlot::Speaker1, SpeakerSlot::Speaker2];

    /// Parses the speaker label the service uses in voice diagnostics.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "speaker1" | "speaker 1" | "mini" | "1" => Some(Self::Speaker1),
            "speaker2" | "speaker 2" | "max" | "2" => Some(Self::Speaker2),
            _ => None,
        }
    }

    /// Name of the built-in voice used when nothing else is configured.
    pub fn default_voice(self) -> &'static str {
        match self {
            Self::Speaker1 => "mini",
            Self::Speaker2 => "max",
        }
    }

    fn field_prefix(self) -> &'static str {
        match self {
            Self::Speaker1 => "speaker1",
            Self::Speaker2 => "speaker2",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Speaker1 => 0,
            Self::Speaker2 => 1,
        }
    }
}

impl std::fmt::Display for SpeakerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Speaker1 => "Speaker1",
            Self::Speaker2 => "Speaker2",
        })
    }
}

/// Voice configuration for one speaker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeakerVoice {
    /// Built-in voice selected by name.
    Default { name: String },
    /// Existing voice resource selected by id.
    VoiceId { id: String },
    /// Audio sample to clone the voice from.
    Sample { file_name: String, bytes: Bytes },
}

impl SpeakerVoice {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Default { name: name.into() }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::VoiceId { id: id.into() }
    }

    pub fn sample(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::Sample {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    fn type_field(&self) -> &'static str {
        match self {
            Self::Default { .. } => "default",
            Self::VoiceId { .. } => "voice_id",
            Self::Sample { .. } => "custom",
        }
    }
}

/// Document uploaded as generation input.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

impl std::fmt::Debug for DocumentUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Everything one submission sends to the service.
#[derive(Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Opaque credential passed through to the service.
    pub api_key: String,
    pub topic: Option<String>,
    pub url: Option<String>,
    pub document: Option<DocumentUpload>,
    pub speakers: [SpeakerVoice; 2],
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("api_key", &"<redacted>")
            .field("topic", &self.topic)
            .field("url", &self.url)
            .field("document", &self.document)
            .field("speakers", &self.speakers)
            .finish()
    }
}

impl GenerationRequest {
    /// Creates a request with no inputs and both speakers on their default
    /// voices.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            topic: None,
            url: None,
            document: None,
            speakers: SpeakerSlot::ALL.map(|slot| SpeakerVoice::named(slot.default_voice())),
        }
    }

    /// Sets the free-text topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the web page to read from.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attaches a PDF document.
    pub fn document(mut self, file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.document = Some(DocumentUpload {
            file_name: file_name.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn speaker(mut self, slot: SpeakerSlot, voice: SpeakerVoice) -> Self {
        self.speakers[slot.index()] = voice;
        self
    }

    pub fn voice(&self, slot: SpeakerSlot) -> &SpeakerVoice {
        &self.speakers[slot.index()]
    }

    /// Checks the request before it is sent.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::validation("an API key is required"));
        }
        let has_topic = self.topic.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_url = self.url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_document = self.document.as_ref().is_some_and(|d| !d.bytes.is_empty());
        if !has_topic && !has_url && !has_document {
            return Err(ClientError::validation(
                "provide at least one input: topic, url or document",
            ));
        }
        for slot in SpeakerSlot::ALL {
            match self.voice(slot) {
                SpeakerVoice::Default { name } if name.trim().is_empty() => {
                    return Err(ClientError::validation(format!("{slot}: voice name is empty")));
                }
                SpeakerVoice::VoiceId { id } if id.trim().is_empty() => {
                    return Err(ClientError::validation(format!("{slot}: voice id is empty")));
                }
                SpeakerVoice::Sample { bytes, .. } if bytes.is_empty() => {
                    return Err(ClientError::validation(format!("{slot}: voice sample is empty")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates and encodes the request as the multipart form the service
    /// expects.
    pub fn to_multipart(&self) -> Result<Form, ClientError> {
        self.validate()?;
        let mut form = Form::new().text("api_key", self.api_key.clone());
        if let Some(topic) = self.topic.as_deref().filter(|t| !t.trim().is_empty()) {
            form = form.text("text_input", topic.to_string());
        }
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            form = form.text("url", url.trim().to_string());
        }
        if let Some(document) = &self.document {
            form = form.part(
                "pdf_file",
                Part::bytes(document.bytes.to_vec()).file_name(document.file_name.clone()),
            );
        }
        for slot in SpeakerSlot::ALL {
            let prefix = slot.field_prefix();
            let voice = self.voice(slot);
            form = form.text(format!("{prefix}_type"), voice.type_field());
            form = match voice {
                SpeakerVoice::Default { name } => {
                    form.text(format!("{prefix}_voice_name"), name.clone())
                }
                SpeakerVoice::VoiceId { id } => form.text(format!("{prefix}_voice_id"), id.clone()),
                SpeakerVoice::Sample { file_name, bytes } => form.part(
                    format!("{prefix}_audio"),
                    Part::bytes(bytes.to_vec()).file_name(file_name.clone()),
                ),
            };
        }
        Ok(form)
    }

    /// Returns a copy with each rejected voice replaced by the fallback the
    /// service suggested.
    pub fn apply_voice_fallbacks(&self, invalid: &[InvalidVoice]) -> Self {
        let mut next = self.clone();
        for voice in invalid {
            let Some(slot) = SpeakerSlot::from_label(&voice.speaker) else {
                continue;
            };
            let fallback = if voice.default_voice_id.trim().is_empty() {
                SpeakerVoice::named(slot.default_voice())
            } else {
                SpeakerVoice::id(voice.default_voice_id.clone())
            };
            next.speakers[slot.index()] = fallback;
        }
        next
    }

    /// Returns a copy with each rejected voice reverted to the speaker's
    /// default named voice.
    pub fn clear_invalid_voices(&self, invalid: &[InvalidVoice]) -> Self {
        let mut next = self.clone();
        for slot in invalid
            .iter()
            .filter_map(|voice| SpeakerSlot::from_label(&voice.speaker))
        {
            next.speakers[slot.index()] = SpeakerVoice::named(slot.default_voice());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(speaker: &str, fallback: &str) -> InvalidVoice {
        InvalidVoice {
            speaker: speaker.into(),
            voice_id: "ghost-voice".into(),
            reason: "voice not found".into(),
            default_voice_id: fallback.into(),
            default_voice_name: None,
        }
    }

    #[test]
    fn new_request_uses_default_voices() {
        let request = GenerationRequest::new("key");
        assert_eq!(request.voice(SpeakerSlot::Speaker1), &SpeakerVoice::named("mini"));
        assert_eq!(request.voice(SpeakerSlot::Speaker2), &SpeakerVoice::named("max"));
    }

    #[test]
    fn validation_requires_credential_and_an_input() {
        let err = GenerationRequest::new("  ").topic("rust").validate().expect_err("no key");
        assert!(matches!(err, ClientError::Validation(msg) if msg.contains("API key")));

        let err = GenerationRequest::new("key").topic("   ").validate().expect_err("no input");
        assert!(matches!(err, ClientError::Validation(msg) if msg.contains("at least one input")));

        GenerationRequest::new("key").url("https://example.com").validate().expect("url only");
        GenerationRequest::new("key")
            .document("paper.pdf", Bytes::from_static(b"%PDF"))
            .validate()
            .expect("document only");
    }

    #[test]
    fn validation_rejects_empty_voice_references() {
        let err = GenerationRequest::new("key")
            .topic("rust")
            .speaker(SpeakerSlot::Speaker2, SpeakerVoice::id(""))
            .validate()
            .expect_err("empty id");
        assert_eq!(err.to_string(), "validation error: Speaker2: voice id is empty");

        let err = GenerationRequest::new("key")
            .topic("rust")
            .speaker(SpeakerSlot::Speaker1, SpeakerVoice::sample("me.wav", Bytes::new()))
            .validate()
            .expect_err("empty sample");
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn multipart_encoding_checks_validity_first() {
        assert!(GenerationRequest::new("key").to_multipart().is_err());
        let form = GenerationRequest::new("key")
            .topic("rust")
            .speaker(SpeakerSlot::Speaker1, SpeakerVoice::sample("me.wav", vec![1u8, 2, 3]))
            .to_multipart()
            .expect("form");
        assert!(!form.boundary().is_empty());
    }

    #[test]
    fn debug_output_hides_the_credential() {
        let request = GenerationRequest::new("sk-secret").topic("rust");
        let debug = format!("{request:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn fallbacks_replace_only_the_rejected_speakers() {
        let request = GenerationRequest::new("key")
            .topic("rust")
            .speaker(SpeakerSlot::Speaker1, SpeakerVoice::id("ghost-voice"))
            .speaker(SpeakerSlot::Speaker2, SpeakerVoice::id("good-voice"));

        let next = request.apply_voice_fallbacks(&[invalid("Speaker1", "male-qn-qingse")]);
        assert_eq!(next.voice(SpeakerSlot::Speaker1), &SpeakerVoice::id("male-qn-qingse"));
        assert_eq!(next.voice(SpeakerSlot::Speaker2), &SpeakerVoice::id("good-voice"));
        assert_eq!(next.topic.as_deref(), Some("rust"));
    }

    #[test]
    fn clearing_invalid_voices_reverts_to_default_names() {
        let request = GenerationRequest::new("key")
            .topic("rust")
            .speaker(SpeakerSlot::Speaker2, SpeakerVoice::id("ghost-voice"));
        let next = request.clear_invalid_voices(&[invalid("speaker2", ""), invalid("narrator", "x")]);
        assert_eq!(next.voice(SpeakerSlot::Speaker2), &SpeakerVoice::named("max"));
        assert_eq!(next.voice(SpeakerSlot::Speaker1), &SpeakerVoice::named("mini"));
    }
}
