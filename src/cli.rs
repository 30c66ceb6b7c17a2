use crate::generator::ReferenceImage;
use crate::pipeline::{GeneratedImage, GenerationResult};
use crate::session::{ChatSession, Transform};
use crate::store::Exchange;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

const UPLOAD_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const PREVIEW_CHARS: usize = 60;
const NO_OUTPUT: &str = "No output generated. Try a different prompt or check your API key.";

#[derive(Debug, Parser)]
#[command(name = "rustcanvas", version, about = "Generate and edit images from the terminal")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate text and images from a prompt
    Generate(GenerateArgs),
    /// Describe an uploaded image
    Caption(TransformArgs),
    /// Produce a variation of an uploaded image
    Variation(TransformArgs),
    /// List saved chats, newest first
    History(HistoryArgs),
    /// Print a saved chat and write its images
    Show { id: i64 },
    /// Re-run a saved chat as a new chat
    Regenerate { id: i64 },
    /// Delete every saved chat
    Clear,
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    /// Optional reference image (png, jpg, jpeg)
    #[arg(long)]
    image: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct TransformArgs {
    #[arg(long)]
    image: PathBuf,
    /// Save the result to chat history
    #[arg(long)]
    save: bool,
}

#[derive(Debug, Parser)]
pub struct HistoryArgs {
    /// Only chats whose prompt contains this text (case-sensitive)
    #[arg(long)]
    search: Option<String>,
}

pub async fn run(session: &ChatSession, command: Command, output_dir: &Path) -> Result<()> {
    match command {
        Command::Generate(args) => {
            let reference = match args.image {
                Some(path) => Some(load_reference(&path).await?),
                None => None,
            };
            let outcome = session.generate(&args.prompt, reference).await?;
            println!("Saved chat #{}", outcome.exchange.id);
            present(&outcome.result, output_dir, &outcome.exchange.id.to_string()).await
        }
        Command::Caption(args) => transform(session, Transform::Caption, args, output_dir).await,
        Command::Variation(args) => {
            transform(session, Transform::Variation, args, output_dir).await
        }
        Command::History(args) => {
            let exchanges = session.history(args.search.as_deref()).await?;
            if exchanges.is_empty() {
                println!("No saved chats.");
            }
            for exchange in &exchanges {
                print_summary(exchange);
            }
            Ok(())
        }
        Command::Show { id } => {
            let exchange = session.exchange(id).await?;
            print_summary(&exchange);
            present(&stored_result(&exchange), output_dir, &id.to_string()).await
        }
        Command::Regenerate { id } => {
            let outcome = session.regenerate_by_id(id).await?;
            println!("Regenerated chat #{} as #{}", id, outcome.exchange.id);
            present(&outcome.result, output_dir, &outcome.exchange.id.to_string()).await
        }
        Command::Clear => {
            session.clear_history().await?;
            println!("Chat history cleared.");
            Ok(())
        }
    }
}

async fn transform(
    session: &ChatSession,
    kind: Transform,
    args: TransformArgs,
    output_dir: &Path,
) -> Result<()> {
    let image = load_reference(&args.image).await?;
    let outcome = session.transform(kind, image, args.save).await?;
    let prefix = match &outcome.exchange {
        Some(exchange) => {
            println!("Saved chat #{}", exchange.id);
            exchange.id.to_string()
        }
        None => "unsaved".to_string(),
    };
    present(&outcome.result, output_dir, &prefix).await
}

async fn load_reference(path: &Path) -> Result<ReferenceImage> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "Unsupported image type '{}': expected one of {}",
            path.display(),
            UPLOAD_EXTENSIONS.join(", ")
        );
    }

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image: {}", path.display()))?;
    Ok(match mime_guess::from_path(path).first_raw() {
        Some(mime) => ReferenceImage::new(data, mime),
        None => ReferenceImage::sniffed(data),
    })
}

async fn present(result: &GenerationResult, output_dir: &Path, prefix: &str) -> Result<()> {
    if result.is_empty() {
        println!("{}", NO_OUTPUT);
        return Ok(());
    }
    if let Some(text) = result.joined_text() {
        println!("Generated Text:\n{}", text);
    }
    write_images(result, output_dir, prefix).await
}

async fn write_images(result: &GenerationResult, output_dir: &Path, prefix: &str) -> Result<()> {
    if result.images.is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;

    println!("Generated Images:");
    for (name, data) in result.named_images() {
        let path = output_dir.join(format!("{}_{}", prefix, name));
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write image: {}", path.display()))?;
        info!("Wrote {} ({} bytes)", path.display(), data.len());
        println!("  {}", path.display());
    }
    Ok(())
}

/// Stored chats keep no MIME types, so image names come from sniffed bytes.
fn stored_result(exchange: &Exchange) -> GenerationResult {
    let images = exchange
        .images
        .iter()
        .map(|data| {
            let sniffed = ReferenceImage::sniffed(data.clone());
            GeneratedImage {
                mime_type: sniffed.mime_type,
                data: sniffed.data,
            }
        })
        .collect();
    GenerationResult {
        text: exchange.response_text.iter().cloned().collect(),
        images,
    }
}

fn print_summary(exchange: &Exchange) {
    let preview: String = exchange
        .response_text
        .as_deref()
        .unwrap_or("-")
        .chars()
        .take(PREVIEW_CHARS)
        .collect();
    println!(
        "#{} [{}] {}\n    {} ({} images)",
        exchange.id,
        exchange.created_at.format("%Y-%m-%d %H:%M:%S"),
        exchange.prompt,
        preview,
        exchange.images.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unsupported_uploads() {
        let err = load_reference(Path::new("picture.gif")).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported image type"));
    }

    #[tokio::test]
    async fn loads_upload_with_guessed_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.JPG");
        tokio::fs::write(&path, b"\xff\xd8\xffdata").await.unwrap();

        let image = load_reference(&path).await.unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, b"\xff\xd8\xffdata");
    }

    #[tokio::test]
    async fn writes_images_with_prefixed_names() {
        let dir = tempfile::tempdir().unwrap();
        let result = GenerationResult {
            text: Vec::new(),
            images: vec![GeneratedImage {
                mime_type: "image/png".into(),
                data: b"png".to_vec(),
            }],
        };

        write_images(&result, dir.path(), "7").await.unwrap();
        let written = tokio::fs::read(dir.path().join("7_image_0.png")).await.unwrap();
        assert_eq!(written, b"png");
    }

    #[test]
    fn stored_chat_names_images_by_content() {
        let exchange = Exchange {
            id: 3,
            prompt: "p".into(),
            response_text: Some("kept".into()),
            images: vec![b"\xff\xd8\xff\xe0jpeg".to_vec(), b"????".to_vec()],
            created_at: chrono::Utc::now(),
        };

        let result = stored_result(&exchange);
        let names: Vec<String> = result.named_images().map(|(name, _)| name).collect();
        assert_eq!(names, ["image_0.jpg", "image_1.png"]);
        assert_eq!(result.joined_text().as_deref(), Some("kept"));
    }
}
