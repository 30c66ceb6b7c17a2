use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

const FALLBACK_MIME: &str = "image/png";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API key not found. Set GEMINI_API_KEY or [api].key in the config file")]
    MissingApiKey,
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Provider error: {status} {body}")]
    Provider { status: u16, body: String },
    #[error("Malformed response stream: {0}")]
    MalformedStream(String),
    #[error("Generation cancelled")]
    Cancelled,
    #[error("Generation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// One classified piece of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    InlineBinary { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Guesses the MIME type from magic bytes, for payloads stored without one.
    pub fn sniffed(data: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&data)
            .map(|format| format.to_mime_type())
            .unwrap_or(FALLBACK_MIME);
        Self::new(data, mime_type)
    }
}

pub type FragmentStream = BoxStream<'static, Result<Fragment, GenerationError>>;

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Opens a lazy, non-restartable fragment stream. After the first `Err` the
    /// stream yields nothing more.
    async fn stream(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<FragmentStream, GenerationError>;
}
