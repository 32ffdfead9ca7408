//! Common imports for submitting a generation and rendering its progress.
pub use crate::{
    AbortHandle, ClientConfig, ClientError, GenerationClient, GenerationEvent, GenerationHandle,
    GenerationRequest, LifecycleState, PlaybackConfig, PlaybackController, PlaybackSnapshot,
    SessionSnapshot, SlotId, SpeakerSlot, SpeakerVoice,
};
