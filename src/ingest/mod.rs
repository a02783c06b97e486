//! Upload intake and the archive processing pipeline.

pub mod archive;
pub mod catalog;
pub mod metadata;
pub mod pages;
pub mod pipeline;
pub mod queue;
pub mod validate;

use std::io::Cursor;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::{Activity, ActivityLog};
use crate::config::Config;
use crate::db::models::{FileStatus, UploadedFile};
use crate::db::queries::{files, series};
use crate::db::{self, DbPool};
use crate::policy::{Actor, AuditEvent, AuditSink, Role};
use crate::quota::{QuotaError, QuotaGuard};
use crate::storage::Storage;

use self::catalog::CatalogAggregator;
use self::pipeline::{Claim, Pipeline, PipelineError, ProcessedChapter, ProcessingResult};
use self::queue::{QueueHandle, QueueReceiver, Worker};
use self::validate::{IntakeError, IntakeValidator};

/// Errors from removing an upload.
#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error("file {0} not found")]
    NotFound(i64),
    #[error("file {0} belongs to another user")]
    NotOwner(i64),
    #[error("file {0} is being processed")]
    InProgress(i64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// Entry point for uploads, deletion and processing. Cheap to clone.
#[derive(Clone)]
pub struct Ingestor {
    db: DbPool,
    storage: Storage,
    validator: IntakeValidator,
    quota: QuotaGuard,
    pipeline: Pipeline,
    queue: QueueHandle,
    activity: Arc<dyn ActivityLog>,
    audit: Arc<dyn AuditSink>,
}

impl Ingestor {
    /// Wire up the ingestion services. The returned receiver feeds
    /// [`Ingestor::worker`].
    pub fn new(
        db: DbPool,
        config: Arc<Config>,
        activity: Arc<dyn ActivityLog>,
        audit: Arc<dyn AuditSink>,
    ) -> (Self, QueueReceiver) {
        let storage = Storage::new(&config.storage.root_path);
        let quota = QuotaGuard::new(db.clone(), config.quota.clone(), &config.rate_limit);
        let catalog = CatalogAggregator::new(db.clone(), quota.clone());
        let pipeline = Pipeline::new(
            db.clone(),
            storage.clone(),
            config.clone(),
            catalog,
            activity.clone(),
        );
        let validator = IntakeValidator::new(config.intake.allowed_extensions.clone());
        let (queue, receiver) = queue::channel();

        let ingestor = Self {
            db,
            storage,
            validator,
            quota,
            pipeline,
            queue,
            activity,
            audit,
        };
        (ingestor, receiver)
    }

    /// Background consumer for the queue fed by this ingestor.
    pub fn worker(&self, receiver: QueueReceiver) -> Worker {
        Worker::new(
            self.db.clone(),
            self.pipeline.clone(),
            self.queue.clone(),
            receiver,
        )
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn activity(&self) -> &Arc<dyn ActivityLog> {
        &self.activity
    }

    /// Validate, deduplicate, quota-check and store an upload, then queue
    /// it. Nothing is written unless every check passes.
    pub async fn accept_upload(
        &self,
        actor: &Actor,
        filename: &str,
        data: &[u8],
        series_id: Option<i64>,
    ) -> Result<UploadedFile, IntakeError> {
        let limits = self.quota.policy().limits(actor.role);
        if !limits.can_upload {
            return Err(QuotaError::UploadNotAllowed(actor.role).into());
        }

        let size = data.len() as u64;
        let mut stream = Cursor::new(data);
        let upload = self
            .validator
            .validate(&mut stream, filename, size, limits.max_file_bytes())?;
        let content_hash = validate::content_hash(&mut stream)?;

        if let Some(existing) = files::find_by_hash(&self.db, &content_hash).await? {
            info!(
                "Rejected duplicate upload {filename:?} from user {} (file {})",
                actor.user_id, existing.id
            );
            return Err(IntakeError::Duplicate {
                existing_id: existing.id,
            });
        }

        if let Some(id) = series_id
            && series::get_by_id(&self.db, id).await?.is_none()
        {
            return Err(IntakeError::SeriesNotFound(id));
        }

        self.quota.check_upload(actor, size).await?;

        let stored_path = Storage::upload_key(&content_hash, &upload.extension);
        self.storage.write(&stored_path, data).await?;

        let mime = mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let new_file = files::NewFile {
            original_filename: filename,
            stored_path: &stored_path,
            size: size as i64,
            mime_type: &mime,
            content_hash: &content_hash,
            kind: upload.kind,
            user_id: actor.user_id,
            series_id,
        };
        let file_id = match files::insert(&self.db, &new_file).await {
            Ok(id) => id,
            Err(e) if db::is_unique_violation(&e) => {
                // A concurrent upload of the same bytes won; the blob is
                // shared by content address and stays.
                let existing_id = files::find_by_hash(&self.db, &content_hash)
                    .await?
                    .map(|f| f.id)
                    .unwrap_or_default();
                return Err(IntakeError::Duplicate { existing_id });
            }
            Err(e) => {
                if let Err(del) = self.storage.delete(&stored_path).await {
                    warn!("Failed to remove blob {stored_path}: {del}");
                }
                return Err(e.into());
            }
        };

        // The row exists now; a counter failure must not strand it unqueued.
        if let Err(e) = self.quota.track_upload(actor.user_id, size).await {
            error!(
                "Failed to record upload of file {file_id} for user {}: {e}",
                actor.user_id
            );
        }

        self.audit.record(AuditEvent {
            user_id: actor.user_id,
            action: "upload",
            target: file_id.to_string(),
            detail: format!("{filename} ({size} bytes)"),
        });
        self.activity.record(Activity::Uploaded {
            file_id,
            user_id: actor.user_id,
            size,
        });
        info!(
            "Accepted upload {filename:?} as file {file_id} ({size} bytes, user {})",
            actor.user_id
        );

        if !self.queue.enqueue(file_id) {
            warn!("File {file_id} stored but not queued; it stays pending");
        }

        files::get_by_id(&self.db, file_id)
            .await?
            .ok_or(IntakeError::Db(sqlx::Error::RowNotFound))
    }

    /// Run a file inline on the caller's task, bypassing the queue.
    pub async fn process_file(&self, file_id: i64, cancel: &CancellationToken) -> ProcessingResult {
        self.pipeline.process_file(file_id, cancel).await
    }

    /// Inline processing with the typed outcome.
    pub async fn process_now(
        &self,
        actor: &Actor,
        file_id: i64,
        cancel: &CancellationToken,
    ) -> Result<ProcessedChapter, PipelineError> {
        self.audit.record(AuditEvent {
            user_id: actor.user_id,
            action: "process",
            target: file_id.to_string(),
            detail: "process now".to_string(),
        });
        self.pipeline
            .execute(file_id, cancel, Claim::PendingOrFailed)
            .await
    }

    pub async fn get_file(&self, file_id: i64) -> Result<Option<UploadedFile>, sqlx::Error> {
        files::get_by_id(&self.db, file_id).await
    }

    /// Delete an upload's row and blob and release its storage quota.
    /// Catalog records built from it are kept.
    pub async fn remove_upload(
        &self,
        actor: &Actor,
        file_id: i64,
    ) -> Result<UploadedFile, RemoveError> {
        let file = files::get_by_id(&self.db, file_id)
            .await?
            .ok_or(RemoveError::NotFound(file_id))?;

        let privileged = matches!(actor.role, Role::Moderator | Role::Admin);
        if file.user_id != actor.user_id && !privileged {
            return Err(RemoveError::NotOwner(file_id));
        }
        if file.file_status() == Some(FileStatus::Processing) {
            return Err(RemoveError::InProgress(file_id));
        }

        if !files::delete(&self.db, file_id).await? {
            return Err(RemoveError::NotFound(file_id));
        }
        self.storage.delete(&file.stored_path).await?;
        self.quota
            .track_deletion(file.user_id, file.size.max(0) as u64)
            .await?;

        self.audit.record(AuditEvent {
            user_id: actor.user_id,
            action: "delete_upload",
            target: file_id.to_string(),
            detail: file.original_filename.clone(),
        });
        info!("Removed upload {file_id} ({} bytes)", file.size);
        Ok(file)
    }
}
