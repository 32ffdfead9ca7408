use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, TransportError};
use crate::request::GenerationRequest;

/// Raw response body chunks, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Seam between the client and the generation service.
#[async_trait::async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Submits `request` and returns the streamed response body.
    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream, TransportError>;

    /// Downloads a finished artifact from an absolute URL.
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError>;
}

/// HTTP transport built on reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl GenerationTransport for ReqwestTransport {
    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream, TransportError> {
        let form = request
            .to_multipart()
            .map_err(|e| TransportError::request(e.to_string()))?;
        let url = self.config.generate_url();
        debug!(url = %url, "opening generation stream");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let response = check_status(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        debug!(url = %url, "fetching artifact");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .bytes()
            .await
            .map_err(|e| TransportError::read(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(TransportError::status(status.as_u16(), body))
}
