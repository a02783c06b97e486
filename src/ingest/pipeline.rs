//! Per-file processing: claim, extract, catalog, pages, cover, finalize.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::{self, ArchiveError, ExtractLimits};
use super::catalog::{CatalogAggregator, SeriesRef};
use super::metadata;
use super::pages::{PageOutcome, PageProcessor};
use crate::activity::{Activity, ActivityLog};
use crate::config::Config;
use crate::db::DbPool;
use crate::db::models::{FileKind, FileStatus, UploadedFile};
use crate::db::queries::files;
use crate::quota::QuotaError;
use crate::storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("file {0} not found")]
    NotFound(i64),
    #[error("file {id} is {status}, not pending")]
    AlreadyProcessed { id: i64, status: String },
    #[error("unsupported archive format: {}", .0.as_str())]
    UnsupportedFormat(FileKind),
    #[error("unreadable archive: {0}")]
    Extraction(#[source] zip::result::ZipError),
    #[error("no valid images found in archive")]
    NoImages,
    #[error(transparent)]
    ArchiveLimit(ArchiveError),
    #[error("chapter {number} already exists in series {series_id}")]
    ChapterExists { series_id: i64, number: f64 },
    #[error("processing cancelled after {pages} pages")]
    Cancelled { pages: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ArchiveError> for PipelineError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Unsupported(kind) => PipelineError::UnsupportedFormat(kind),
            ArchiveError::Open(e) => PipelineError::Extraction(e),
            ArchiveError::Io(e) => PipelineError::Io(e),
            ArchiveError::NoImages => PipelineError::NoImages,
            e @ (ArchiveError::TooManyEntries { .. } | ArchiveError::EntryTooLarge { .. }) => {
                PipelineError::ArchiveLimit(e)
            }
        }
    }
}

/// Catalog records produced by one successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedChapter {
    pub series_id: i64,
    pub chapter_id: i64,
    pub page_count: u32,
    pub skipped_pages: u32,
}

/// Outcome reported to callers of [`Pipeline::process_file`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub series_id: Option<i64>,
    pub chapter_id: Option<i64>,
    pub page_count: u32,
    pub message: String,
}

impl ProcessingResult {
    pub fn from_outcome(outcome: &Result<ProcessedChapter, PipelineError>) -> Self {
        match outcome {
            Ok(done) => Self::ok(done),
            Err(e) => Self::failed(e),
        }
    }

    fn ok(done: &ProcessedChapter) -> Self {
        let message = if done.skipped_pages > 0 {
            format!(
                "processed {} pages, skipped {}",
                done.page_count, done.skipped_pages
            )
        } else {
            format!("processed {} pages", done.page_count)
        };
        Self {
            success: true,
            series_id: Some(done.series_id),
            chapter_id: Some(done.chapter_id),
            page_count: done.page_count,
            message,
        }
    }

    fn failed(e: &PipelineError) -> Self {
        Self {
            success: false,
            series_id: None,
            chapter_id: None,
            page_count: 0,
            message: e.to_string(),
        }
    }
}

/// Which stored states a run may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Queue path: only `pending` files.
    Pending,
    /// Explicit "process now": `pending` or a previously `failed` file.
    PendingOrFailed,
}

#[derive(Clone)]
pub struct Pipeline {
    db: DbPool,
    storage: Storage,
    config: Arc<Config>,
    pages: PageProcessor,
    catalog: CatalogAggregator,
    activity: Arc<dyn ActivityLog>,
}

impl Pipeline {
    pub fn new(
        db: DbPool,
        storage: Storage,
        config: Arc<Config>,
        catalog: CatalogAggregator,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        let pages = PageProcessor::new(storage.clone(), config.processing.clone());
        Self {
            db,
            storage,
            config,
            pages,
            catalog,
            activity,
        }
    }

    /// Synchronous "process now" path. Failed files may be retried.
    pub async fn process_file(&self, file_id: i64, cancel: &CancellationToken) -> ProcessingResult {
        self.process(file_id, cancel, Claim::PendingOrFailed).await
    }

    /// Run one file to a terminal status and fold the outcome.
    pub async fn process(
        &self,
        file_id: i64,
        cancel: &CancellationToken,
        claim: Claim,
    ) -> ProcessingResult {
        ProcessingResult::from_outcome(&self.execute(file_id, cancel, claim).await)
    }

    /// Run one file to a terminal status. Errors after the file was claimed
    /// are also recorded on the file row; errors before it leave the row as is.
    pub async fn execute(
        &self,
        file_id: i64,
        cancel: &CancellationToken,
        claim: Claim,
    ) -> Result<ProcessedChapter, PipelineError> {
        let file = self
            .claim(file_id, cancel, claim)
            .await
            .inspect_err(|e| debug!("File {file_id} not processed: {e}"))?;

        match self.run(&file, cancel).await {
            Ok(done) => {
                if let Err(e) = files::set_status(&self.db, file.id, FileStatus::Processed, None).await
                {
                    error!("Failed to mark file {} processed: {e}", file.id);
                }
                info!(
                    "Processed file {} into chapter {} ({} pages)",
                    file.id, done.chapter_id, done.page_count
                );
                self.activity.record(Activity::Processed {
                    file_id: file.id,
                    chapter_id: done.chapter_id,
                    pages: done.page_count,
                });
                Ok(done)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Processing file {} failed: {message}", file.id);
                if let Err(db_err) =
                    files::set_status(&self.db, file.id, FileStatus::Failed, Some(&message)).await
                {
                    error!("Failed to mark file {} failed: {db_err}", file.id);
                }
                self.activity.record(Activity::Failed {
                    file_id: file.id,
                    message,
                });
                Err(e)
            }
        }
    }

    async fn claim(
        &self,
        file_id: i64,
        cancel: &CancellationToken,
        claim: Claim,
    ) -> Result<UploadedFile, PipelineError> {
        let file = files::get_by_id(&self.db, file_id)
            .await?
            .ok_or(PipelineError::NotFound(file_id))?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { pages: 0 });
        }
        if !files::claim(&self.db, file_id, claim == Claim::PendingOrFailed).await? {
            let status = files::get_by_id(&self.db, file_id)
                .await?
                .map(|f| f.status)
                .unwrap_or_else(|| file.status.clone());
            return Err(PipelineError::AlreadyProcessed {
                id: file_id,
                status,
            });
        }
        Ok(file)
    }

    async fn run(
        &self,
        file: &UploadedFile,
        cancel: &CancellationToken,
    ) -> Result<ProcessedChapter, PipelineError> {
        let kind = file.file_kind();
        if kind != FileKind::Zip {
            return Err(PipelineError::UnsupportedFormat(kind));
        }

        let source = self.storage.resolve(&file.stored_path)?;
        let scratch_root = self.config.storage.scratch_dir();
        let limits = ExtractLimits::from_config(&self.config.processing);
        let filename = file.original_filename.clone();
        let (extracted, mut meta) = tokio::task::spawn_blocking(move || {
            let extracted = archive::extract_archive(&source, kind, &scratch_root, &limits)?;
            let meta = metadata::from_directory(extracted.dir(), &filename);
            Ok::<_, ArchiveError>((extracted, meta))
        })
        .await??;
        meta.sanitize(metadata::current_year());
        debug!(
            "File {}: extracted {} of {} images, metadata {:?}",
            file.id,
            extracted.images.len(),
            extracted.qualifying_entries,
            meta
        );

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { pages: 0 });
        }

        let series = self.catalog.resolve_series(file, &meta).await?;
        let chapter_id = match self.catalog.create_chapter(series.id, &meta, file.user_id).await {
            Ok(id) => id,
            Err(e) => {
                self.catalog.discard_series(series).await?;
                return Err(e);
            }
        };

        let mut stored: u32 = 0;
        let mut skipped: u32 = 0;
        let mut first_source = None;
        let mut cancelled = false;
        let mut failure = None;

        for image in &extracted.images {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let number = i64::from(stored) + 1;
            match self
                .pages
                .process(&image.path, series.id, chapter_id, number)
                .await
            {
                PageOutcome::Stored(page) => {
                    if let Err(e) = self.catalog.attach_page(&page).await {
                        if let Err(del) = self.storage.delete(&page.image_path).await {
                            warn!("Failed to remove orphan page {}: {del}", page.image_path);
                        }
                        failure = Some(e);
                        break;
                    }
                    stored += 1;
                    self.activity.page_stored(file.id, stored);
                    if first_source.is_none() {
                        first_source = Some(image.path.clone());
                    }
                }
                PageOutcome::Skipped(reason) => {
                    debug!("Page {} skipped: {reason}", image.name);
                    skipped += 1;
                }
            }
        }

        if stored == 0 {
            self.catalog.discard(series, chapter_id).await?;
            return Err(failure.unwrap_or(if cancelled {
                PipelineError::Cancelled { pages: 0 }
            } else {
                PipelineError::NoImages
            }));
        }

        self.catalog
            .finalize_chapter(series.id, chapter_id, stored)
            .await?;
        self.catalog.confirm_series(series, file.user_id).await?;

        if let Some(source) = first_source {
            self.generate_cover(series, source).await;
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled {
            return Err(PipelineError::Cancelled { pages: stored });
        }

        Ok(ProcessedChapter {
            series_id: series.id,
            chapter_id,
            page_count: stored,
            skipped_pages: skipped,
        })
    }

    /// Best-effort: failures are logged and never fail the file.
    async fn generate_cover(&self, series: SeriesRef, source: std::path::PathBuf) {
        match self.catalog.needs_cover(series.id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("Cover check for series {} failed: {e}", series.id);
                return;
            }
        }
        match self.pages.make_cover(source, series.id).await {
            Ok(key) => {
                if let Err(e) = self.catalog.set_cover(series.id, &key).await {
                    warn!("Failed to record cover for series {}: {e}", series.id);
                }
            }
            Err(e) => warn!("Cover generation for series {} failed: {e}", series.id),
        }
    }
}
