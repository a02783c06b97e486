//! Per-page decode, downscale, re-encode and store; series cover thumbnails.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::db::models::{NewPage, PAGE_MIME};
use crate::storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("failed to read page source: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("failed to write page: {0}")]
    Write(#[source] std::io::Error),
    #[error("image task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of one page: stored, or skipped with the reason.
#[derive(Debug)]
pub enum PageOutcome {
    Stored(NewPage),
    Skipped(String),
}

/// A page re-encoded in memory, not yet written.
#[derive(Debug)]
pub struct RenderedPage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// sha256 of the source image bytes.
    pub source_hash: String,
}

#[derive(Debug, Clone)]
pub struct PageProcessor {
    storage: Storage,
    config: ProcessingConfig,
}

impl PageProcessor {
    pub fn new(storage: Storage, config: ProcessingConfig) -> Self {
        Self { storage, config }
    }

    /// Turn one extracted image into page `number` of `chapter_id`.
    /// Failures are reported as `Skipped`; they never abort the caller.
    pub async fn process(
        &self,
        source: &Path,
        series_id: i64,
        chapter_id: i64,
        number: i64,
    ) -> PageOutcome {
        match self.try_process(source, series_id, chapter_id, number).await {
            Ok(page) => PageOutcome::Stored(page),
            Err(e) => {
                warn!("Skipping page {} ({}): {e}", number, source.display());
                PageOutcome::Skipped(e.to_string())
            }
        }
    }

    async fn try_process(
        &self,
        source: &Path,
        series_id: i64,
        chapter_id: i64,
        number: i64,
    ) -> Result<NewPage, PageError> {
        let data = tokio::fs::read(source).await.map_err(PageError::Read)?;
        let max_dim = self.config.max_page_dimension_px;
        let quality = self.config.page_jpeg_quality;
        let rendered =
            tokio::task::spawn_blocking(move || render_page(&data, max_dim, quality)).await??;

        let key = Storage::page_key(series_id, chapter_id, number);
        self.storage
            .write(&key, &rendered.bytes)
            .await
            .map_err(PageError::Write)?;
        debug!(
            "Stored page {number} of chapter {chapter_id}: {}x{} ({} bytes)",
            rendered.width,
            rendered.height,
            rendered.bytes.len()
        );

        Ok(NewPage {
            chapter_id,
            number,
            image_path: key,
            width: rendered.width,
            height: rendered.height,
            size: rendered.bytes.len() as u64,
            image_hash: rendered.source_hash,
            mime_type: PAGE_MIME.to_string(),
        })
    }

    /// Build and store the series cover from `source`. Returns its storage key.
    pub async fn make_cover(&self, source: PathBuf, series_id: i64) -> Result<String, PageError> {
        let data = tokio::fs::read(&source).await.map_err(PageError::Read)?;
        let (w, h, q) = (
            self.config.cover_width_px,
            self.config.cover_height_px,
            self.config.cover_jpeg_quality,
        );
        let bytes = tokio::task::spawn_blocking(move || render_cover(&data, w, h, q)).await??;

        let key = Storage::cover_key(series_id);
        self.storage
            .write(&key, &bytes)
            .await
            .map_err(PageError::Write)?;
        Ok(key)
    }
}

/// Decode, downscale when the larger side exceeds `max_dim`, re-encode as JPEG.
pub fn render_page(data: &[u8], max_dim: u32, quality: u8) -> Result<RenderedPage, PageError> {
    let source_hash = hex::encode(Sha256::digest(data));
    let img = image::load_from_memory(data).map_err(PageError::Decode)?;
    let (width, height) = img.dimensions();

    let img = if width.max(height) > max_dim {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        img
    };
    let (width, height) = img.dimensions();

    let bytes = encode_jpeg(&img, quality).map_err(PageError::Encode)?;
    Ok(RenderedPage {
        bytes,
        width,
        height,
        source_hash,
    })
}

/// Resize to cover the `width`x`height` box, cropping the overflow.
pub fn render_cover(data: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, PageError> {
    let img = image::load_from_memory(data).map_err(PageError::Decode)?;
    let thumb = img.resize_to_fill(width, height, FilterType::Lanczos3);
    encode_jpeg(&thumb, quality).map_err(PageError::Encode)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}
