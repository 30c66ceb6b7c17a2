use crate::generator::{GenerationError, ReferenceImage};
use crate::pipeline::{GenerationPipeline, GenerationResult};
use crate::store::{ChatStore, Exchange, NewExchange, StoreError};
use futures_util::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Please enter a prompt")]
    EmptyPrompt,
    #[error("No saved chat with id {0}")]
    NotFound(i64),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fixed-instruction requests made against an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Caption,
    Variation,
}

impl Transform {
    pub fn instruction(self) -> &'static str {
        match self {
            Transform::Caption => "Describe this image",
            Transform::Variation => "Generate a variation of this image",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub exchange: Exchange,
    pub result: GenerationResult,
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub exchange: Option<Exchange>,
    pub result: GenerationResult,
}

pub struct ChatSession {
    pipeline: GenerationPipeline,
    store: Arc<dyn ChatStore>,
}

impl ChatSession {
    pub fn new(pipeline: GenerationPipeline, store: Arc<dyn ChatStore>) -> Self {
        Self { pipeline, store }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        reference: Option<ReferenceImage>,
    ) -> Result<SessionOutcome, SessionError> {
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let result = self.pipeline.generate(prompt, reference.as_ref()).await?;
        let exchange = self.save(prompt, &result).await?;
        Ok(SessionOutcome { exchange, result })
    }

    pub async fn transform(
        &self,
        kind: Transform,
        image: ReferenceImage,
        save: bool,
    ) -> Result<TransformOutcome, SessionError> {
        let prompt = kind.instruction();
        let result = self.pipeline.generate(prompt, Some(&image)).await?;

        let exchange = if save {
            Some(self.save(prompt, &result).await?)
        } else {
            None
        };
        Ok(TransformOutcome { exchange, result })
    }

    /// Re-runs the stored prompt once per stored image and saves the merged
    /// output as a new exchange. The original is left as is.
    pub async fn regenerate(&self, original: &Exchange) -> Result<SessionOutcome, SessionError> {
        let references: Vec<Option<ReferenceImage>> = if original.images.is_empty() {
            vec![None]
        } else {
            original
                .images
                .iter()
                .map(|data| Some(ReferenceImage::sniffed(data.clone())))
                .collect()
        };
        info!(
            "Regenerating exchange {} ({} sub-requests)",
            original.id,
            references.len()
        );

        let runs = references
            .iter()
            .map(|reference| self.pipeline.generate(&original.prompt, reference.as_ref()));
        let parts = try_join_all(runs).await.inspect_err(|e| {
            warn!("Regeneration of exchange {} aborted: {}", original.id, e);
        })?;

        let mut merged = GenerationResult::default();
        for part in parts {
            merged.append(part);
        }

        let exchange = self.save(&original.prompt, &merged).await?;
        Ok(SessionOutcome {
            exchange,
            result: merged,
        })
    }

    pub async fn regenerate_by_id(&self, id: i64) -> Result<SessionOutcome, SessionError> {
        let original = self.exchange(id).await?;
        self.regenerate(&original).await
    }

    pub async fn history(&self, filter: Option<&str>) -> Result<Vec<Exchange>, SessionError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn exchange(&self, id: i64) -> Result<Exchange, SessionError> {
        self.store.get(id).await?.ok_or(SessionError::NotFound(id))
    }

    pub async fn clear_history(&self) -> Result<(), SessionError> {
        Ok(self.store.clear().await?)
    }

    async fn save(&self, prompt: &str, result: &GenerationResult) -> Result<Exchange, StoreError> {
        let exchange = self
            .store
            .append(NewExchange {
                prompt: prompt.to_string(),
                response_text: result.joined_text(),
                images: result.clone().into_image_bytes(),
            })
            .await?;
        info!("Saved exchange {}", exchange.id);
        Ok(exchange)
    }
}
