//! Submit podcast generations and follow them from the terminal.

mod cli;
mod download;
mod render;

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use podcast_client::prelude::*;
use tracing::warn;

use crate::cli::{Cli, Command, GenerateArgs};
use crate::render::Renderer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    podcast_client::init_observability();

    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => generate(args).await,
    }
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &args.api_url {
        config = config.base_url(url.clone());
    }
    let mut client = GenerationClient::new(config)?;
    let mut request = args.to_request().await?;
    let mut renderer = Renderer::new(std::io::stdout());
    let mut resubmitted = false;

    let snapshot = loop {
        let snapshot = follow(&mut client, request.clone(), &mut renderer).await?;
        if snapshot.state == LifecycleState::AwaitingResolution
            && args.apply_fallbacks
            && !resubmitted
        {
            println!("resubmitting with fallback voices");
            request = request.apply_voice_fallbacks(&snapshot.invalid_voices);
            resubmitted = true;
            renderer.restart();
            continue;
        }
        break snapshot;
    };

    if snapshot.state == LifecycleState::Completed
        && let Some(dir) = &args.output_dir
    {
        for path in download::download_outputs(&client, &snapshot, dir).await? {
            println!("saved {}", path.display());
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?;
        println!("{json}");
    }

    Ok(match snapshot.state {
        LifecycleState::Completed => ExitCode::SUCCESS,
        LifecycleState::AwaitingResolution => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    })
}

/// Runs one submission to its end, rendering as snapshots arrive.
async fn follow<W: std::io::Write>(
    client: &mut GenerationClient,
    request: GenerationRequest,
    renderer: &mut Renderer<W>,
) -> Result<SessionSnapshot> {
    let mut handle = client.submit(request)?;
    while let Some(snapshot) = handle.next_snapshot().await {
        renderer.session(&snapshot)?;
        start_playback_if_idle(handle.playback()).await;
        renderer.playback(&handle.playback().snapshot())?;
    }
    let snapshot = handle.finish().await?;
    renderer.session(&snapshot)?;
    renderer.outcome(&snapshot)?;
    std::io::stdout().flush()?;
    Ok(snapshot)
}

async fn start_playback_if_idle(playback: &PlaybackController) {
    let snapshot = playback.snapshot();
    let active = snapshot.active_slot();
    if active.source.is_some() && !active.playing {
        if let Err(err) = playback.play_active().await {
            warn!(slot = %snapshot.active, error = %err, "could not start playback");
        }
    }
}
