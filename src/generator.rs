mod gemini;
#[cfg(test)]
pub mod scripted;
mod types;

use crate::config::Config;
pub use gemini::GeminiGenerator;
use std::sync::Arc;
pub use types::{ContentGenerator, Fragment, GenerationError, ReferenceImage};

pub fn create_generator(config: &Config) -> Arc<dyn ContentGenerator> {
    Arc::new(GeminiGenerator::new(
        config.api_key.as_deref(),
        config.api_url.as_deref(),
        config.model.as_deref(),
    ))
}
