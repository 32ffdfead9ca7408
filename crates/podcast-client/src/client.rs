use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::dispatch::EventDispatcher;
use crate::errors::ClientError;
use crate::frame::StreamDecoder;
use crate::playback::PlaybackController;
use crate::request::GenerationRequest;
use crate::session::{GenerationSession, SessionSnapshot};
use crate::transport::{GenerationTransport, ReqwestTransport};

/// Handle used to abandon a running generation.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation. The read loop stops at its next suspension
    /// point and drops the response stream.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Entry point: owns the transport, the playback controller and the one
/// active submission.
pub struct GenerationClient {
    config: ClientConfig,
    transport: Arc<dyn GenerationTransport>,
    playback: PlaybackController,
    current: Option<AbortHandle>,
}

impl GenerationClient {
    /// Creates a client with the HTTP transport and headless playback.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(ReqwestTransport::new(config.clone())?);
        let playback = PlaybackController::headless(config.playback.clone());
        Ok(Self::with_parts(config, transport, playback))
    }

    /// Creates a client with `ClientConfig::from_env()`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client over an explicit transport and playback controller.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn GenerationTransport>,
        playback: PlaybackController,
    ) -> Self {
        Self {
            config,
            transport,
            playback,
            current: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Starts a generation.
    ///
    /// Any previous submission is abandoned, playback is reset and a fresh
    /// session is created. Must be called from within a tokio runtime.
    pub fn submit(&mut self, request: GenerationRequest) -> Result<GenerationHandle, ClientError> {
        request.validate()?;

        if let Some(previous) = self.current.take() {
            debug!("abandoning previous generation");
            previous.abort();
        }
        self.playback.reset();

        let mut session = GenerationSession::new();
        session.begin_submission();
        let session_id = session.id();
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (abort_tx, abort_rx) = watch::channel(false);
        let abort = AbortHandle { tx: abort_tx };
        self.current = Some(abort.clone());

        let dispatcher = EventDispatcher::new(session, self.playback.clone(), self.config.clone());
        info!(session_id = %session_id, request = ?request, "submitting generation");
        let task = tokio::spawn(read_loop(
            self.transport.clone(),
            request,
            dispatcher,
            snapshot_tx,
            abort_rx,
        ));

        Ok(GenerationHandle {
            session_id,
            snapshots: snapshot_rx,
            abort,
            playback: self.playback.clone(),
            task: Some(task),
        })
    }

    /// Downloads an artifact. Relative references resolve against the
    /// service origin.
    pub async fn fetch_artifact(&self, reference: &str) -> Result<Bytes, ClientError> {
        let url = self.config.resolve(reference);
        Ok(self.transport.fetch(&url).await?)
    }
}

/// Handle on one submission.
///
/// Dropping the handle abandons the generation.
pub struct GenerationHandle {
    session_id: uuid::Uuid,
    snapshots: watch::Receiver<SessionSnapshot>,
    abort: AbortHandle,
    playback: PlaybackController,
    task: Option<JoinHandle<Result<SessionSnapshot, ClientError>>>,
}

impl GenerationHandle {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Latest published session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Waits for the session to change. Returns `None` once the read loop
    /// has ended and every change has been observed.
    pub async fn next_snapshot(&mut self) -> Option<SessionSnapshot> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshots.borrow_and_update().clone())
    }

    /// Independent receiver for renderers.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Waits for the read loop to end and returns the final session state.
    ///
    /// Returns `ClientError::Cancelled` when the generation was abandoned.
    pub async fn finish(mut self) -> Result<SessionSnapshot, ClientError> {
        let Some(task) = self.task.take() else {
            return Err(ClientError::protocol_msg("generation already finished"));
        };
        match task.await {
            Ok(result) => result,
            Err(err) => Err(ClientError::protocol_msg(format!(
                "generation task ended abnormally: {err}"
            ))),
        }
    }
}

impl Drop for GenerationHandle {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            self.abort.abort();
        }
    }
}

async fn read_loop(
    transport: Arc<dyn GenerationTransport>,
    request: GenerationRequest,
    mut dispatcher: EventDispatcher,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    mut abort_rx: watch::Receiver<bool>,
) -> Result<SessionSnapshot, ClientError> {
    let session_id = dispatcher.session().id();

    let opened = tokio::select! {
        _ = aborted(&mut abort_rx) => {
            debug!(session_id = %session_id, "generation abandoned before the stream opened");
            return Err(ClientError::Cancelled);
        }
        opened = transport.open(&request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            dispatcher.transport_failed(&err);
            let snapshot = dispatcher.snapshot();
            snapshot_tx.send_replace(snapshot.clone());
            return Ok(snapshot);
        }
    };
    dispatcher.stream_opened();
    snapshot_tx.send_replace(dispatcher.snapshot());

    let mut decoder = StreamDecoder::default();
    let mut chunks = 0_u64;
    loop {
        tokio::select! {
            _ = aborted(&mut abort_rx) => {
                debug!(session_id = %session_id, chunks, "generation abandoned");
                return Err(ClientError::Cancelled);
            }
            next = stream.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        chunks = chunks.saturating_add(1);
                        for frame in decoder.push_chunk(&chunk) {
                            dispatcher.dispatch_frame(&frame);
                        }
                    }
                    Some(Err(err)) => {
                        dispatcher.transport_failed(&err);
                        break;
                    }
                    None => {
                        for frame in decoder.finish() {
                            dispatcher.dispatch_frame(&frame);
                        }
                        dispatcher.stream_ended();
                        break;
                    }
                }
                snapshot_tx.send_replace(dispatcher.snapshot());
            }
        }
    }

    let snapshot = dispatcher.snapshot();
    snapshot_tx.send_replace(snapshot.clone());
    debug!(
        session_id = %session_id,
        chunks,
        malformed = dispatcher.malformed_frames(),
        state = snapshot.state.name(),
        "generation stream closed"
    );
    Ok(snapshot)
}

/// Resolves once cancellation was requested. Never resolves if every abort
/// handle is gone without requesting it.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
