// Thumbnail worker - best-effort thumbnails for uploaded images
//
// Uploads enqueue jobs after their transaction commits. The worker renders on a
// blocking thread and records the thumbnail only if the row still lacks one.
// Failures are logged and dropped; the upload is never affected.

use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domains::{images, ListingGeneration};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::MarketDatabase;
use crate::infrastructure::media::{thumbnail_hint, BlobStore, Thumbnailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub generation: ListingGeneration,
    pub image_id: i64,
}

/// Collaborators the worker needs to render and record thumbnails
#[derive(Clone)]
pub struct ThumbnailContext {
    pub db: Arc<MarketDatabase>,
    pub blobs: Arc<dyn BlobStore>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
}

/// Sending half of the thumbnail worker
#[derive(Clone)]
pub struct ThumbnailQueue {
    sender: UnboundedSender<ThumbnailJob>,
}

impl ThumbnailQueue {
    /// A queue plus its receiving end, for callers that drive the jobs themselves.
    pub fn channel() -> (Self, UnboundedReceiver<ThumbnailJob>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Start the background worker and return its queue.
    pub fn spawn(context: ThumbnailContext) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = Self::channel();
        let handle = tokio::spawn(run_worker(context, receiver));
        (queue, handle)
    }

    pub fn enqueue(&self, generation: ListingGeneration, image_id: i64) {
        let job = ThumbnailJob {
            generation,
            image_id,
        };
        if self.sender.send(job).is_err() {
            warn!(image_id, "thumbnail worker is gone, dropping job");
        }
    }
}

async fn run_worker(context: ThumbnailContext, mut receiver: UnboundedReceiver<ThumbnailJob>) {
    info!("thumbnail worker started");
    while let Some(job) = receiver.recv().await {
        process_job(&context, job).await;
    }
    info!("thumbnail worker stopped");
}

/// Run one job, swallowing its failure.
pub async fn process_job(context: &ThumbnailContext, job: ThumbnailJob) -> bool {
    match generate_thumbnail(context, job.generation, job.image_id).await {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(image_id = job.image_id, generation = ?job.generation, error = %e, "thumbnail generation failed");
            false
        }
    }
}

/// Render and record the thumbnail of one image row.
///
/// Returns false when there was nothing to do: the row is gone or already has one.
pub async fn generate_thumbnail(
    context: &ThumbnailContext,
    generation: ListingGeneration,
    image_id: i64,
) -> AppResult<bool> {
    let image = {
        let mut conn = context.db.acquire().await?;
        images::get_image(&mut conn, generation, image_id).await?
    };
    let Some(image) = image.filter(|image| image.thumbnail_ref.is_none()) else {
        debug!(image_id, "no thumbnail needed");
        return Ok(false);
    };

    let original = context.blobs.load(&image.image_ref).await?;
    let thumbnailer = Arc::clone(&context.thumbnailer);
    let rendered = tokio::task::spawn_blocking(move || thumbnailer.thumbnail(&original))
        .await
        .map_err(|e| AppError::Internal(format!("Thumbnail task failed: {}", e)))??;

    let reference = context
        .blobs
        .store(&thumbnail_hint(&image.image_ref), &rendered)
        .await?;

    let recorded = {
        let mut conn = context.db.acquire().await?;
        images::set_thumbnail(&mut conn, generation, image_id, &reference).await?
    };
    if !recorded {
        // Raced with another run or the row was deleted
        if let Err(e) = context.blobs.delete(&reference).await {
            warn!(reference = %reference, error = %e, "failed to remove unused thumbnail");
        }
        return Ok(false);
    }

    debug!(image_id, reference = %reference, "thumbnail recorded");
    Ok(true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub processed: usize,
    pub generated: usize,
    pub failed: usize,
}

/// Generate every missing thumbnail of both generations, one at a time.
pub async fn backfill(context: &ThumbnailContext) -> AppResult<BackfillReport> {
    let mut report = BackfillReport::default();
    for generation in [ListingGeneration::Legacy, ListingGeneration::Universal] {
        let pending = {
            let mut conn = context.db.acquire().await?;
            images::missing_thumbnails(&mut conn, generation).await?
        };
        info!(generation = ?generation, pending = pending.len(), "backfilling thumbnails");

        for image_id in pending {
            report.processed += 1;
            match generate_thumbnail(context, generation, image_id).await {
                Ok(true) => report.generated += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(image_id, generation = ?generation, error = %e, "thumbnail backfill failed");
                }
            }
        }
    }
    Ok(report)
}
