/// Errors raised by a `GenerationTransport` while opening or reading the
/// response stream, or while fetching a finished artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, TLS, ...).
    #[error("request failed: {message}")]
    Request { message: String },
    /// The service answered with a non-success HTTP status.
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body failed mid-stream.
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a stream read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }
}

/// Failure to turn a `data:` payload into a `GenerationEvent`.
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    /// Payload is not valid JSON.
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload is JSON but carries no string `type` tag.
    #[error("event payload has no `type` field")]
    MissingKind,
    /// Known kind whose fields do not match the expected shape.
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by a `MediaElement` during a buffer handoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The element has no source or could not load it.
    #[error("media element not ready: {0}")]
    NotReady(String),
    /// The element did not become ready within the configured timeout.
    #[error("media element did not become ready within {timeout_ms}ms")]
    ReadyTimeout { timeout_ms: u64 },
    /// The element refused to start playback.
    #[error("playback rejected: {0}")]
    PlayRejected(String),
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid submission.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport failure outside the event stream (for example artifact download).
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The generation was abandoned before it reached a terminal state.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
