// Generate thumbnails for every stored image that lacks one

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kira_market::{
    config::Config,
    infrastructure::{BlobStore, FsBlobStore, JpegThumbnailer, MarketDatabase},
    services::thumbnails::{self, ThumbnailContext},
};

#[derive(Parser, Debug)]
#[command(name = "backfill_thumbnails")]
#[command(about = "Render missing thumbnails for legacy and universal listing images", long_about = None)]
struct Args {
    /// Longest side of the generated thumbnails; defaults to THUMBNAIL_SIZE
    #[arg(long, value_name = "PIXELS")]
    size: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let db = Arc::new(MarketDatabase::connect(&config.database.url).await?);
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::from_config(&config.media));
    let size = args.size.unwrap_or(config.media.thumbnail_size);

    let context = ThumbnailContext {
        db,
        blobs,
        thumbnailer: Arc::new(JpegThumbnailer::new(size)),
    };
    let report = thumbnails::backfill(&context).await?;

    println!(
        "Processed {} images: {} thumbnails generated, {} failed",
        report.processed, report.generated, report.failed
    );
    Ok(())
}
