//! Command-line definitions.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser;
use podcast_client::{GenerationRequest, SpeakerSlot, SpeakerVoice};

/// Generate podcasts from a topic, a web page or a PDF and follow them live.
#[derive(Debug, Parser)]
#[command(name = "podcast-cli", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Submit a generation and render its progress until it ends.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    /// Service API key. Falls back to `PODCAST_API_KEY`.
    #[arg(long, env = "PODCAST_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Service origin. Overrides `PODCAST_API_URL`.
    #[arg(long)]
    pub api_url: Option<String>,

    /// Topic text to discuss.
    #[arg(long)]
    pub topic: Option<String>,

    /// Web page to read from.
    #[arg(long)]
    pub url: Option<String>,

    /// PDF document to read from.
    #[arg(long, value_name = "PATH")]
    pub pdf: Option<PathBuf>,

    /// Built-in voice name for speaker 1.
    #[arg(long, value_name = "NAME", conflicts_with_all = ["speaker1_voice_id", "speaker1_sample"])]
    pub speaker1: Option<String>,

    /// Existing voice id for speaker 1.
    #[arg(long, value_name = "ID", conflicts_with = "speaker1_sample")]
    pub speaker1_voice_id: Option<String>,

    /// Audio sample to clone speaker 1's voice from.
    #[arg(long, value_name = "PATH")]
    pub speaker1_sample: Option<PathBuf>,

    /// Built-in voice name for speaker 2.
    #[arg(long, value_name = "NAME", conflicts_with_all = ["speaker2_voice_id", "speaker2_sample"])]
    pub speaker2: Option<String>,

    /// Existing voice id for speaker 2.
    #[arg(long, value_name = "ID", conflicts_with = "speaker2_sample")]
    pub speaker2_voice_id: Option<String>,

    /// Audio sample to clone speaker 2's voice from.
    #[arg(long, value_name = "PATH")]
    pub speaker2_sample: Option<PathBuf>,

    /// Download the final audio and script into this directory.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print the final session snapshot as JSON.
    #[arg(long)]
    pub json: bool,

    /// Resubmit once with the suggested fallback voices when some voices are
    /// rejected.
    #[arg(long)]
    pub apply_fallbacks: bool,
}

impl GenerateArgs {
    /// Builds the request, reading any referenced files.
    pub async fn to_request(&self) -> Result<GenerationRequest> {
        let mut request = GenerationRequest::new(self.api_key.clone().unwrap_or_default());
        if let Some(topic) = &self.topic {
            request = request.topic(topic.clone());
        }
        if let Some(url) = &self.url {
            request = request.url(url.clone());
        }
        if let Some(path) = &self.pdf {
            let bytes = read_file(path).await?;
            request = request.document(file_name(path), bytes);
        }

        let speakers = [
            (
                SpeakerSlot::Speaker1,
                &self.speaker1,
                &self.speaker1_voice_id,
                &self.speaker1_sample,
            ),
            (
                SpeakerSlot::Speaker2,
                &self.speaker2,
                &self.speaker2_voice_id,
                &self.speaker2_sample,
            ),
        ];
        for (slot, name, voice_id, sample) in speakers {
            let voice = match (name, voice_id, sample) {
                (_, _, Some(path)) => SpeakerVoice::sample(file_name(path), read_file(path).await?),
                (_, Some(id), None) => SpeakerVoice::id(id.clone()),
                (Some(name), None, None) => SpeakerVoice::named(name.clone()),
                (None, None, None) => continue,
            };
            request = request.speaker(slot, voice);
        }
        Ok(request)
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(args: &[&str]) -> GenerateArgs {
        let cli = Cli::try_parse_from(["podcast-cli", "generate"].into_iter().chain(args.iter().copied()))
            .expect("parse");
        match cli.command {
            Command::Generate(args) => args,
        }
    }

    #[tokio::test]
    async fn defaults_keep_built_in_voices() {
        let args = generate(&["--api-key", "k", "--topic", "rust"]);
        let request = args.to_request().await.expect("request");
        assert_eq!(request.topic.as_deref(), Some("rust"));
        assert_eq!(request.voice(SpeakerSlot::Speaker1), &SpeakerVoice::named("mini"));
        assert_eq!(request.voice(SpeakerSlot::Speaker2), &SpeakerVoice::named("max"));
    }

    #[tokio::test]
    async fn speaker_flags_select_voice_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sample = dir.path().join("me.wav");
        std::fs::write(&sample, b"RIFF").expect("write sample");

        let args = generate(&[
            "--api-key",
            "k",
            "--url",
            "https://example.com/post",
            "--speaker1-voice-id",
            "voice-123",
            "--speaker2-sample",
            sample.to_str().expect("utf8 path"),
        ]);
        let request = args.to_request().await.expect("request");
        assert_eq!(request.voice(SpeakerSlot::Speaker1), &SpeakerVoice::id("voice-123"));
        assert_eq!(
            request.voice(SpeakerSlot::Speaker2),
            &SpeakerVoice::sample("me.wav", b"RIFF".to_vec())
        );
    }

    #[test]
    fn conflicting_speaker_flags_are_rejected() {
        let parsed = Cli::try_parse_from([
            "podcast-cli",
            "generate",
            "--speaker1",
            "mini",
            "--speaker1-voice-id",
            "x",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn missing_pdf_is_reported_with_its_path() {
        let args = generate(&["--api-key", "k", "--pdf", "/no/such/file.pdf"]);
        let err = args.to_request().await.expect_err("missing file");
        assert!(err.to_string().contains("/no/such/file.pdf"));
    }
}
