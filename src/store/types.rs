use crate::codec::{self, CodecError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Stored images are corrupt: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A persisted prompt/response pair. Images are raw bytes, in generation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub id: i64,
    pub prompt: String,
    pub response_text: Option<String>,
    pub images: Vec<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExchange {
    pub prompt: String,
    pub response_text: Option<String>,
    pub images: Vec<Vec<u8>>,
}

/// Row layout shared by every backend; `images` holds `codec::encode_list` text.
#[derive(Debug, Clone)]
pub(super) struct ExchangeRecord {
    pub id: i64,
    pub prompt: String,
    pub response_text: Option<String>,
    pub images: Option<String>,
    pub created_at_us: i64,
}

impl NewExchange {
    pub(super) fn validate(&self) -> Result<(), StoreError> {
        if self.prompt.trim().is_empty() {
            return Err(StoreError::EmptyPrompt);
        }
        Ok(())
    }

    /// Encoded image column; `None` when there are no images.
    pub(super) fn encoded_images(&self) -> Option<String> {
        if self.images.is_empty() {
            None
        } else {
            Some(codec::encode_list(&self.images))
        }
    }
}

impl TryFrom<ExchangeRecord> for Exchange {
    type Error = StoreError;

    fn try_from(r: ExchangeRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            prompt: r.prompt,
            response_text: r.response_text,
            images: codec::decode_optional_list(r.images.as_deref())?,
            created_at: DateTime::from_timestamp_micros(r.created_at_us).unwrap_or_default(),
        })
    }
}

pub(super) fn matches_filter(prompt: &str, filter: Option<&str>) -> bool {
    filter.is_none_or(|f| prompt.contains(f))
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Assigns the next id and persists the exchange in one write.
    async fn append(&self, exchange: NewExchange) -> Result<Exchange, StoreError>;

    /// Most recent first. `filter` is a case-sensitive substring match on the prompt.
    async fn list(&self, filter: Option<&str>) -> Result<Vec<Exchange>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Exchange>, StoreError>;

    /// Removes every exchange. Ids handed out before are never reused.
    async fn clear(&self) -> Result<(), StoreError>;
}
