use crate::generator::{ContentGenerator, Fragment, GenerationError, ReferenceImage};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TEXT_SEPARATOR: &str = " ";
const DEFAULT_EXTENSION: &str = "png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl GeneratedImage {
    pub fn file_name(&self, index: usize) -> String {
        format!("image_{}.{}", index, extension_for(&self.mime_type))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or(DEFAULT_EXTENSION),
    }
}

/// Text and images from one or more generation calls, in stream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: Vec<String>,
    pub images: Vec<GeneratedImage>,
}

impl GenerationResult {
    fn push(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Text(text) if !text.is_empty() => self.text.push(text),
            Fragment::InlineBinary { mime_type, data } if !data.is_empty() => {
                self.images.push(GeneratedImage { mime_type, data })
            }
            _ => debug!("Skipping empty fragment"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }

    /// Fragments joined by a single space, or `None` when no text came back.
    pub fn joined_text(&self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.join(TEXT_SEPARATOR))
        }
    }

    pub fn named_images(&self) -> impl Iterator<Item = (String, &[u8])> {
        self.images
            .iter()
            .enumerate()
            .map(|(i, image)| (image.file_name(i), image.data.as_slice()))
    }

    pub fn append(&mut self, other: GenerationResult) {
        self.text.extend(other.text);
        self.images.extend(other.images);
    }

    pub fn into_image_bytes(self) -> Vec<Vec<u8>> {
        self.images.into_iter().map(|image| image.data).collect()
    }
}

#[derive(Clone)]
pub struct GenerationPipeline {
    generator: Arc<dyn ContentGenerator>,
    timeout: Option<Duration>,
}

impl GenerationPipeline {
    pub fn new(generator: Arc<dyn ContentGenerator>, timeout: Option<Duration>) -> Self {
        Self { generator, timeout }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<GenerationResult, GenerationError> {
        self.generate_with_cancel(prompt, reference, &CancellationToken::new())
            .await
    }

    /// Runs one request to completion. Any failure, cancellation or timeout drops
    /// everything accumulated so far.
    pub async fn generate_with_cancel(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        info!(
            "Generating (prompt: {} chars, reference: {})",
            prompt.chars().count(),
            reference.map_or("none", |r| r.mime_type.as_str())
        );

        let bounded = async {
            let run = self.consume(prompt, reference);
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .unwrap_or_else(|_| Err(GenerationError::TimedOut(limit))),
                None => run.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            res = bounded => res,
        };

        match &result {
            Ok(r) => info!(
                "Generation finished ({} text fragments, {} images)",
                r.text.len(),
                r.images.len()
            ),
            Err(e) => warn!("Generation failed: {}", e),
        }
        result
    }

    async fn consume(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<GenerationResult, GenerationError> {
        let mut stream = self.generator.stream(prompt, reference).await?;
        let mut result = GenerationResult::default();
        while let Some(fragment) = stream.next().await {
            result.push(fragment?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::scripted::{ScriptedGenerator, Step, png, text};

    fn pipeline(script: Vec<Step>, timeout: Option<Duration>) -> GenerationPipeline {
        GenerationPipeline::new(Arc::new(ScriptedGenerator::repeating(script)), timeout)
    }

    #[tokio::test]
    async fn routes_fragments_in_stream_order() {
        let p = pipeline(vec![text("a"), png(b"img1"), text("b"), png(b"img2")], None);
        let result = p.generate("draw", None).await.unwrap();

        assert_eq!(result.text, ["a", "b"]);
        assert_eq!(result.joined_text().as_deref(), Some("a b"));
        assert_eq!(
            result.into_image_bytes(),
            vec![b"img1".to_vec(), b"img2".to_vec()]
        );
    }

    #[tokio::test]
    async fn failure_discards_partial_output() {
        let p = pipeline(vec![text("a"), Step::Fail], None);
        assert!(matches!(
            p.generate("draw", None).await,
            Err(GenerationError::MalformedStream(_))
        ));
    }

    #[tokio::test]
    async fn empty_stream_is_an_empty_result() {
        let p = pipeline(vec![text(""), png(b"")], None);
        let result = p.generate("draw", None).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.joined_text(), None);
    }

    #[tokio::test]
    async fn cancellation_aborts_a_stalled_stream() {
        let p = pipeline(vec![text("partial"), Step::Stall], None);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(matches!(
            p.generate_with_cancel("draw", None, &token).await,
            Err(GenerationError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_yields_output() {
        let p = pipeline(vec![text("a")], None);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            p.generate_with_cancel("draw", None, &token).await,
            Err(GenerationError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn timeout_aborts_a_stalled_stream() {
        let p = pipeline(vec![Step::Stall], Some(Duration::from_millis(30)));
        assert!(matches!(
            p.generate("draw", None).await,
            Err(GenerationError::TimedOut(_))
        ));
    }

    #[test]
    fn image_names_follow_mime_type() {
        let image = |mime: &str| GeneratedImage {
            mime_type: mime.to_string(),
            data: vec![1],
        };
        assert_eq!(image("image/png").file_name(0), "image_0.png");
        assert_eq!(image("image/jpeg").file_name(1), "image_1.jpg");
        assert_eq!(image("image/webp").file_name(2), "image_2.webp");
        assert_eq!(image("application/x-unknown-thing").file_name(3), "image_3.png");
    }

    #[test]
    fn append_keeps_call_order() {
        let mut first = GenerationResult {
            text: vec!["one".into()],
            images: vec![image_of(b"1")],
        };
        first.append(GenerationResult {
            text: vec!["two".into()],
            images: vec![image_of(b"2")],
        });

        let names: Vec<String> = first.named_images().map(|(name, _)| name).collect();
        assert_eq!(names, ["image_0.png", "image_1.png"]);
        assert_eq!(first.joined_text().as_deref(), Some("one two"));
    }

    fn image_of(data: &[u8]) -> GeneratedImage {
        GeneratedImage {
            mime_type: "image/png".into(),
            data: data.to_vec(),
        }
    }
}
