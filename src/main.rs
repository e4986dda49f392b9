use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transformers_serve::pipelines::utils::DeviceSelectable;
use transformers_serve::pipelines::{MaskFiller, SentenceEncoder};
use transformers_serve::{server, BertPipelinesBuilder, ServerConfig, ServiceContext};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("transformers_serve=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let config = ServerConfig::parse();
    info!("Model: {}", config.model_dir);

    let start_time = Instant::now();
    let pipelines = {
        let mut builder = BertPipelinesBuilder::new(config.model_dir.clone())
            .revision(config.revision.clone())
            .top_k(config.top_k);
        if config.cpu {
            builder = builder.cpu();
        } else if let Some(index) = config.cuda_device {
            builder = builder.cuda_device(index);
        }
        tokio::task::spawn_blocking(move || builder.build())
            .await
            .context("model loading task panicked")??
    };
    info!(
        "Model loaded in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let encoder: Arc<dyn SentenceEncoder> = Arc::new(pipelines.embeddings);
    let mask_filler = pipelines
        .fill_mask
        .map(|pipeline| Arc::new(pipeline) as Arc<dyn MaskFiller>);

    let ctx = ServiceContext::new(encoder, mask_filler, config.cache_sizes());
    server::serve(&config.bind_address(), ctx).await
}
