//! Saving finished artifacts to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use bytes::Bytes;
use podcast_client::{GenerationClient, SessionSnapshot};
use tracing::info;

/// File name for an artifact reference: its last path segment without query
/// or fragment, or `fallback` when there is none.
pub fn artifact_file_name(reference: &str, fallback: &str) -> String {
    let path = reference.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next().map(str::trim) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name.to_string(),
        _ => fallback.to_string(),
    }
}

/// Writes `bytes` under `dir`, creating the directory if needed.
pub async fn save_artifact(dir: &Path, file_name: &str, bytes: &Bytes) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Downloads the final audio and script of a completed session.
pub async fn download_outputs(
    client: &GenerationClient,
    snapshot: &SessionSnapshot,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let artifacts = [
        (snapshot.media_url.as_deref(), "podcast.mp3"),
        (snapshot.script_url.as_deref(), "script.txt"),
    ];
    let mut saved = Vec::new();
    for (reference, fallback) in artifacts {
        let Some(reference) = reference else {
            continue;
        };
        let bytes = client
            .fetch_artifact(reference)
            .await
            .with_context(|| format!("failed to download {reference}"))?;
        let path = save_artifact(dir, &artifact_file_name(reference, fallback), &bytes).await?;
        info!(path = %path.display(), size = bytes.len(), "artifact saved");
        saved.push(path);
    }
    Ok(saved)
}
