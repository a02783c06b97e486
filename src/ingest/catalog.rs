//! Series/chapter get-or-create and page attachment.

use tracing::{debug, info};

use super::metadata::{self, ExtractedMetadata};
use super::pipeline::PipelineError;
use crate::db::models::{CHAPTER_DRAFT, CHAPTER_PUBLISHED, NewPage, UploadedFile};
use crate::db::queries::{chapters, files, pages, series};
use crate::db::{self, DbPool};
use crate::quota::QuotaGuard;

const DEFAULT_CHAPTER_NUMBER: f64 = 1.0;
const UNTITLED: &str = "Untitled";

/// Series chosen for a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRef {
    pub id: i64,
    /// True when this run inserted the series.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct CatalogAggregator {
    db: DbPool,
    quota: QuotaGuard,
}

impl CatalogAggregator {
    pub fn new(db: DbPool, quota: QuotaGuard) -> Self {
        Self { db, quota }
    }

    /// Reuse the series the file is linked to, or create one from `meta`.
    pub async fn resolve_series(
        &self,
        file: &UploadedFile,
        meta: &ExtractedMetadata,
    ) -> Result<SeriesRef, PipelineError> {
        if let Some(id) = file.series_id
            && series::get_by_id(&self.db, id).await?.is_some()
        {
            series::update_basic_info(&self.db, id, meta.author.as_deref(), meta.year).await?;
            debug!("File {} reuses series {id}", file.id);
            return Ok(SeriesRef { id, created: false });
        }

        let title = series_title(meta, &file.original_filename);
        let id = series::insert(
            &self.db,
            &title,
            meta.author.as_deref(),
            meta.year,
            file.user_id,
        )
        .await?;
        files::set_series(&self.db, file.id, id).await?;
        info!("Created series {id} \"{title}\" for file {}", file.id);
        Ok(SeriesRef { id, created: true })
    }

    /// Insert the file's chapter as a draft. An existing chapter with the
    /// same number is never reused or overwritten.
    pub async fn create_chapter(
        &self,
        series_id: i64,
        meta: &ExtractedMetadata,
        created_by: i64,
    ) -> Result<i64, PipelineError> {
        let number = meta.chapter.unwrap_or(DEFAULT_CHAPTER_NUMBER);
        if chapters::find_by_series_and_number(&self.db, series_id, number)
            .await?
            .is_some()
        {
            return Err(PipelineError::ChapterExists { series_id, number });
        }

        let title = chapter_title(meta, number);
        match chapters::insert(&self.db, series_id, &title, number, meta.volume, created_by).await {
            Ok(id) => {
                debug!("Created chapter {id} ({number}) in series {series_id}");
                Ok(id)
            }
            Err(e) if db::is_unique_violation(&e) => {
                Err(PipelineError::ChapterExists { series_id, number })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn attach_page(&self, page: &NewPage) -> Result<i64, PipelineError> {
        Ok(pages::insert(&self.db, page).await?)
    }

    /// Record the final page count and publish the chapter if it has pages.
    pub async fn finalize_chapter(
        &self,
        series_id: i64,
        chapter_id: i64,
        page_count: u32,
    ) -> Result<(), PipelineError> {
        let status = if page_count > 0 {
            CHAPTER_PUBLISHED
        } else {
            CHAPTER_DRAFT
        };
        chapters::finalize(&self.db, chapter_id, i64::from(page_count), status).await?;
        series::refresh_chapter_count(&self.db, series_id).await?;
        Ok(())
    }

    /// Count a newly created series against its creator.
    pub async fn confirm_series(&self, series: SeriesRef, user_id: i64) -> Result<(), PipelineError> {
        if series.created {
            self.quota.track_series_created(user_id).await?;
        }
        Ok(())
    }

    /// Remove an empty chapter, and the series too if this run created it.
    pub async fn discard(&self, series: SeriesRef, chapter_id: i64) -> Result<(), PipelineError> {
        chapters::delete(&self.db, chapter_id).await?;
        debug!("Discarded empty chapter {chapter_id}");
        self.discard_series(series).await
    }

    /// Delete a series created by this run; a reused series only has its
    /// chapter count refreshed.
    pub async fn discard_series(&self, series: SeriesRef) -> Result<(), PipelineError> {
        if series.created {
            series::delete(&self.db, series.id).await?;
        } else {
            series::refresh_chapter_count(&self.db, series.id).await?;
        }
        Ok(())
    }

    pub async fn needs_cover(&self, series_id: i64) -> Result<bool, PipelineError> {
        Ok(series::get_by_id(&self.db, series_id)
            .await?
            .is_some_and(|s| s.cover_path.is_none()))
    }

    pub async fn set_cover(&self, series_id: i64, cover_path: &str) -> Result<(), PipelineError> {
        Ok(series::set_cover(&self.db, series_id, cover_path).await?)
    }
}

/// Extracted title, else the cleaned file stem, else the raw stem. Never empty.
fn series_title(meta: &ExtractedMetadata, filename: &str) -> String {
    if let Some(title) = meta.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.to_string();
    }
    let stem = metadata::strip_extension(filename);
    let cleaned = metadata::clean_name(stem);
    if !cleaned.is_empty() {
        return cleaned;
    }
    let raw = stem.trim();
    if raw.is_empty() {
        UNTITLED.to_string()
    } else {
        raw.to_string()
    }
}

fn chapter_title(meta: &ExtractedMetadata, number: f64) -> String {
    meta.chapter_title
        .clone()
        .unwrap_or_else(|| format!("Chapter {number}"))
}
