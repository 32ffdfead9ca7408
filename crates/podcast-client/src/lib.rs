//! Streaming client for progressive podcast generation.
//!
//! A submission posts a `GenerationRequest` to the generation service and
//! reads back a stream of `data:` frames. Frames are decoded into typed
//! `GenerationEvent`s that drive a `GenerationSession` and a dual-buffer
//! `PlaybackController` which keeps the growing audio playing while newer
//! versions arrive.
//!
//! ```no_run
//! use podcast_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let mut client = GenerationClient::from_env()?;
//! let mut handle = client.submit(GenerationRequest::new("api-key").topic("rust ownership"))?;
//!
//! while let Some(snapshot) = handle.next_snapshot().await {
//!     println!("{:?}", snapshot.progress);
//! }
//! let done = handle.finish().await?;
//! println!("media: {:?}", done.media_url);
//! # Ok(())
//! # }
//! ```

/// Client entry point, submission handle and cancellation.
pub mod client;
/// Service location, timeouts and playback timing.
pub mod config;
/// Event application: the only writer of session state.
pub mod dispatch;
/// Error types for every layer.
pub mod errors;
/// Typed stream events and frame payload parsing.
pub mod event;
/// Byte chunks to UTF-8 text to complete lines.
pub mod frame;
/// Tracing setup.
pub mod observability;
/// Dual-buffer playback controller and media element seam.
pub mod playback;
/// Common imports for typical usage.
pub mod prelude;
/// Submission model, validation and multipart encoding.
pub mod request;
/// Lifecycle state machine and snapshots.
pub mod session;
/// Transport seam and the reqwest implementation.
pub mod transport;

pub use client::{AbortHandle, GenerationClient, GenerationHandle};
pub use config::ClientConfig;
pub use dispatch::{DispatchOutcome, EventDispatcher};
pub use errors::{ClientError, EventParseError, PlaybackError, TransportError};
pub use event::{
    CompletePayload, GenerationEvent, InputWarning, InvalidVoice, ProgressiveMedia, parse_event,
    parse_frame,
};
pub use frame::{Frame, FrameDecoder, StreamDecoder, Utf8Decoder};
pub use observability::{ObservabilitySettings, init_observability, init_observability_with};
pub use playback::{
    ClockElement, MediaElement, MediaUpdate, PlaybackConfig, PlaybackController, PlaybackSnapshot,
    SlotId, SlotSnapshot, SwapHandle, SwapOutcome,
};
pub use request::{DocumentUpload, GenerationRequest, SpeakerSlot, SpeakerVoice};
pub use session::{GenerationSession, LifecycleState, LogEntry, SessionSnapshot, TraceEntry};
pub use transport::{ByteStream, GenerationTransport, ReqwestTransport};
