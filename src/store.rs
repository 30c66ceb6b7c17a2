mod memory;
mod sqlite;
mod types;

use crate::config::Config;
use anyhow::Result;
pub use memory::MemoryChatStore;
pub use sqlite::SqliteChatStore;
use std::sync::Arc;
pub use types::{ChatStore, Exchange, NewExchange, StoreError};

pub async fn create_store(config: &Config) -> Result<Arc<dyn ChatStore>> {
    match config.storage_backend.as_str() {
        "memory" => Ok(Arc::new(MemoryChatStore::new())),
        _ => Ok(Arc::new(SqliteChatStore::new(&config.data_dir).await?)),
    }
}
