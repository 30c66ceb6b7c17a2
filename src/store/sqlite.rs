use super::types::{ChatStore, Exchange, ExchangeRecord, NewExchange, StoreError, matches_filter};
use crate::entity::exchanges;
use async_trait::async_trait;
use sea_orm::*;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DB_FILE: &str = "history.db";

pub struct SqliteChatStore {
    db_url: String,
    // Serializes append/clear so ids follow lock order.
    write_lock: Mutex<()>,
}

impl SqliteChatStore {
    pub async fn new(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join(DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<(), StoreError> {
                let db = Database::connect(&db_url)?;
                db.get_schema_builder()
                    .register(exchanges::Entity)
                    .apply(&db)?;
                Ok(())
            }
        })
        .await??;

        info!("Chat history ready (SQLite at {})", db_path.display());
        Ok(Self {
            db_url,
            write_lock: Mutex::new(()),
        })
    }
}

impl From<exchanges::Model> for ExchangeRecord {
    fn from(m: exchanges::Model) -> Self {
        Self {
            id: m.id,
            prompt: m.prompt,
            response_text: m.response_text,
            images: m.images,
            created_at_us: m.created_at_us,
        }
    }
}

fn into_exchange(m: exchanges::Model) -> Result<Exchange, StoreError> {
    Exchange::try_from(ExchangeRecord::from(m))
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn append(&self, exchange: NewExchange) -> Result<Exchange, StoreError> {
        exchange.validate()?;
        let now = chrono::Utc::now().timestamp_micros();

        let record = exchanges::ActiveModel {
            id: NotSet,
            prompt: Set(exchange.prompt.clone()),
            response_text: Set(exchange.response_text.clone()),
            images: Set(exchange.encoded_images()),
            created_at_us: Set(now),
        };

        let _guard = self.write_lock.lock().await;
        let db_url = self.db_url.clone();
        let id = tokio::task::spawn_blocking(move || -> Result<i64, StoreError> {
            let db = Database::connect(&db_url)?;
            let result = exchanges::Entity::insert(record).exec(&db)?;
            Ok(result.last_insert_id)
        })
        .await??;

        debug!("Saved exchange {} ({} images)", id, exchange.images.len());
        Ok(Exchange {
            id,
            prompt: exchange.prompt,
            response_text: exchange.response_text,
            images: exchange.images,
            created_at: chrono::DateTime::from_timestamp_micros(now).unwrap_or_default(),
        })
    }

    async fn list(&self, filter: Option<&str>) -> Result<Vec<Exchange>, StoreError> {
        let db_url = self.db_url.clone();
        let filter = filter.filter(|f| !f.is_empty()).map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<Exchange>, StoreError> {
            let db = Database::connect(&db_url)?;
            let mut query = exchanges::Entity::find().order_by_desc(exchanges::Column::Id);
            if let Some(ref f) = filter {
                // LIKE narrows case-insensitively; the exact match is re-checked below.
                query = query.filter(exchanges::Column::Prompt.contains(f.as_str()));
            }

            query
                .all(&db)?
                .into_iter()
                .filter(|m| matches_filter(&m.prompt, filter.as_deref()))
                .map(into_exchange)
                .collect()
        })
        .await?
    }

    async fn get(&self, id: i64) -> Result<Option<Exchange>, StoreError> {
        let db_url = self.db_url.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<Exchange>, StoreError> {
            let db = Database::connect(&db_url)?;
            exchanges::Entity::find_by_id(id)
                .one(&db)?
                .map(into_exchange)
                .transpose()
        })
        .await?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let db_url = self.db_url.clone();

        let removed = tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let db = Database::connect(&db_url)?;
            let result = exchanges::Entity::delete_many().exec(&db)?;
            Ok(result.rows_affected)
        })
        .await??;

        info!("Cleared chat history ({} exchanges)", removed);
        Ok(())
    }
}
