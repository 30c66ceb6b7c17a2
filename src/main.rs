mod cli;
mod codec;
mod config;
mod entity;
mod generator;
mod pipeline;
mod session;
mod store;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Cli::parse();
    let config = config::Config::load(args.config.as_deref())?;

    let store = store::create_store(&config).await?;
    let generator = generator::create_generator(&config);
    let pipeline = pipeline::GenerationPipeline::new(generator, config.generation_timeout);
    let session = session::ChatSession::new(pipeline, store);

    tokio::select! {
        result = cli::run(&session, args.command, &config.output_dir) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning the current request");
            return Ok(());
        }
    }

    info!("Done");
    Ok(())
}
