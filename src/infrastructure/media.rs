// Media - blob storage and thumbnail rendering collaborators

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};

pub const THUMBNAIL_QUALITY: u8 = 82;

/// Opaque storage for uploaded files. References returned by `store` are relative paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a name derived from `path_hint`; returns the reference.
    async fn store(&self, path_hint: &str, bytes: &[u8]) -> AppResult<String>;

    async fn load(&self, reference: &str) -> AppResult<Vec<u8>>;

    /// Delete a stored blob. Deleting a missing blob succeeds.
    async fn delete(&self, reference: &str) -> AppResult<()>;

    /// Public URL of a stored blob.
    fn url(&self, reference: &str) -> String;
}

/// Renders a bounded thumbnail. CPU bound; callers run it on a blocking thread.
pub trait Thumbnailer: Send + Sync {
    fn thumbnail(&self, bytes: &[u8]) -> AppResult<Vec<u8>>;
}

/// Blobs as files under a root directory
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            root: root.into(),
            base_url,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.root.clone(), &config.url)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, reference: &str) -> AppResult<PathBuf> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(AppError::Validation(format!("Invalid media reference '{}'", reference)));
        }
        Ok(self.root.join(relative))
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Turn a client-influenced hint into a unique relative reference: every segment is
/// sanitized and the file name gets a short random prefix.
pub fn unique_reference(path_hint: &str) -> String {
    let mut segments: Vec<String> = path_hint
        .split('/')
        .map(sanitize_segment)
        .filter(|segment| !segment.is_empty())
        .collect();
    let file_name = segments.pop().unwrap_or_else(|| "upload".to_string());
    let token = Uuid::new_v4().simple().to_string();
    segments.push(format!("{}_{}", &token[..8], file_name));
    segments.join("/")
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, path_hint: &str, bytes: &[u8]) -> AppResult<String> {
        let reference = unique_reference(path_hint);
        let path = self.resolve(&reference)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", path.display(), e)))
    }

    async fn delete(&self, reference: &str) -> AppResult<()> {
        let path = self.resolve(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn url(&self, reference: &str) -> String {
        format!("{}{}", self.base_url, reference)
    }
}

/// Downscales to fit a square box and re-encodes as JPEG
pub struct JpegThumbnailer {
    max_side: u32,
    quality: u8,
}

impl JpegThumbnailer {
    pub fn new(max_side: u32) -> Self {
        Self {
            max_side,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

impl Thumbnailer for JpegThumbnailer {
    fn thumbnail(&self, bytes: &[u8]) -> AppResult<Vec<u8>> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| AppError::Validation(format!("Unreadable image: {}", e)))?;
        let rgb = image.thumbnail(self.max_side, self.max_side).to_rgb8();

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(&rgb)
            .map_err(|e| AppError::Internal(format!("Failed to encode thumbnail: {}", e)))?;
        Ok(encoded)
    }
}

/// Reference for the thumbnail of `image_ref`: `<dir>/thumbs/<stem>_thumb.jpg`.
pub fn thumbnail_hint(image_ref: &str) -> String {
    let path = Path::new(image_ref);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    match path.parent().and_then(|p| p.to_str()).filter(|p| !p.is_empty()) {
        Some(dir) => format!("{}/thumbs/{}_thumb.jpg", dir, stem),
        None => format!("thumbs/{}_thumb.jpg", stem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_unique_reference_is_sanitized() {
        let reference = unique_reference("listings/v2/9/../My Photo (1).jpg");
        let segments: Vec<&str> = reference.split('/').collect();
        assert_eq!(&segments[..3], &["listings", "v2", "9"]);
        assert_eq!(segments.len(), 4);
        assert!(segments[3].ends_with("_My_Photo__1_.jpg"));
        assert_ne!(reference, unique_reference("listings/v2/9/../My Photo (1).jpg"));
    }

    #[test]
    fn test_thumbnail_hint() {
        assert_eq!(
            thumbnail_hint("listings/4/ab12cd34_front.png"),
            "listings/4/thumbs/ab12cd34_front_thumb.jpg"
        );
        assert_eq!(thumbnail_hint("front.png"), "thumbs/front_thumb.jpg");
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "/media");

        let reference = store.store("listings/1/front.jpg", b"jpeg-bytes").await.unwrap();
        assert!(reference.starts_with("listings/1/"));
        assert_eq!(store.load(&reference).await.unwrap(), b"jpeg-bytes");
        assert_eq!(store.url(&reference), format!("/media/{}", reference));

        store.delete(&reference).await.unwrap();
        store.delete(&reference).await.unwrap();
        assert!(store.load(&reference).await.is_err());

        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_thumbnail_fits_box_and_keeps_aspect() {
        let thumbnailer = JpegThumbnailer::new(700);
        let thumb = thumbnailer.thumbnail(&png(1400, 700)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (700, 350));

        assert!(matches!(
            thumbnailer.thumbnail(b"not an image"),
            Err(AppError::Validation(_))
        ));
    }
}
