use std::sync::Arc;
use tracing::info;

use crate::{
    config::Config,
    infrastructure::{
        database::MarketDatabase,
        media::{BlobStore, FsBlobStore, JpegThumbnailer},
        security::SecurityService,
    },
    services::thumbnails::{ThumbnailContext, ThumbnailQueue},
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<MarketDatabase>,
    pub security: Arc<SecurityService>,
    pub blobs: Arc<dyn BlobStore>,
    pub thumbnails: ThumbnailQueue,
    pub config: Config,
}

impl AppState {
    /// Connect the database, set up file storage and start the thumbnail worker.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db = Arc::new(MarketDatabase::connect(&config.database.url).await?);
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::from_config(&config.media));

        let (thumbnails, _worker) = ThumbnailQueue::spawn(ThumbnailContext {
            db: Arc::clone(&db),
            blobs: Arc::clone(&blobs),
            thumbnailer: Arc::new(JpegThumbnailer::new(config.media.thumbnail_size)),
        });
        info!(media_root = %config.media.root.display(), "media storage ready");

        Ok(Self::with_parts(config, db, blobs, thumbnails))
    }

    /// Assemble state from already constructed collaborators.
    pub fn with_parts(
        config: Config,
        db: Arc<MarketDatabase>,
        blobs: Arc<dyn BlobStore>,
        thumbnails: ThumbnailQueue,
    ) -> Self {
        Self {
            security: Arc::new(SecurityService::new(config.security.clone())),
            db,
            blobs,
            thumbnails,
            config,
        }
    }
}
