use super::types::{ChatStore, Exchange, ExchangeRecord, NewExchange, StoreError, matches_filter};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
struct Inner {
    last_id: i64,
    records: Vec<ExchangeRecord>,
}

/// Process-local store. Keeps rows in the same encoded layout as SQLite.
#[derive(Default)]
pub struct MemoryChatStore {
    inner: RwLock<Inner>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        info!("Chat history ready (in-memory)");
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn append(&self, exchange: NewExchange) -> Result<Exchange, StoreError> {
        exchange.validate()?;
        let images = exchange.encoded_images();

        let mut inner = self.inner.write().await;
        let record = ExchangeRecord {
            id: inner.last_id + 1,
            prompt: exchange.prompt,
            response_text: exchange.response_text,
            images,
            created_at_us: chrono::Utc::now().timestamp_micros(),
        };
        let saved = Exchange::try_from(record.clone())?;

        inner.last_id = record.id;
        inner.records.push(record);
        Ok(saved)
    }

    async fn list(&self, filter: Option<&str>) -> Result<Vec<Exchange>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| matches_filter(&r.prompt, filter))
            .cloned()
            .map(Exchange::try_from)
            .collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Exchange>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(Exchange::try_from)
            .transpose()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.records.len();
        inner.records.clear();
        info!("Cleared chat history ({} exchanges)", removed);
        Ok(())
    }
}
