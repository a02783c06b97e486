//! In-process FIFO of pending file ids with a single background consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pipeline::{Claim, Pipeline};
use crate::db::DbPool;
use crate::db::models::FileStatus;
use crate::db::queries::files;

/// Producer side of the queue. Cheap to clone; enqueue never blocks.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<i64>,
    shutdown: CancellationToken,
}

impl QueueHandle {
    /// Queue `file_id` for processing. Returns false once shutdown began.
    pub fn enqueue(&self, file_id: i64) -> bool {
        if self.shutdown.is_cancelled() {
            debug!("Queue closed, not enqueuing file {file_id}");
            return false;
        }
        self.tx.send(file_id).is_ok()
    }

    /// Stop accepting work and let the worker exit after its current item.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Consumer side, owned by the [`Worker`].
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<i64>,
    shutdown: CancellationToken,
}

/// Create a connected queue handle and receiver.
pub fn channel() -> (QueueHandle, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    (
        QueueHandle {
            tx,
            shutdown: shutdown.clone(),
        },
        QueueReceiver { rx, shutdown },
    )
}

/// Drains the queue one file at a time, in enqueue order.
pub struct Worker {
    db: DbPool,
    pipeline: Pipeline,
    /// Used by the recovery sweep only; released before the loop starts.
    handle: Option<QueueHandle>,
    queue: QueueReceiver,
}

impl Worker {
    pub fn new(db: DbPool, pipeline: Pipeline, handle: QueueHandle, queue: QueueReceiver) -> Self {
        Self {
            db,
            pipeline,
            handle: Some(handle),
            queue,
        }
    }

    /// Requeue work left behind by an earlier process: rows stuck in
    /// `processing` go back to `pending`, then every pending id is queued
    /// in id order. Returns the number of ids queued.
    pub async fn recover(&self) -> Result<usize, sqlx::Error> {
        let reset = files::reset_processing(&self.db).await?;
        if reset > 0 {
            warn!("Reset {reset} interrupted file(s) to pending");
        }
        let Some(handle) = &self.handle else {
            return Ok(0);
        };
        let pending = files::pending_ids(&self.db).await?;
        let queued = pending
            .into_iter()
            .filter(|id| handle.enqueue(*id))
            .count();
        if queued > 0 {
            info!("Recovered {queued} pending file(s)");
        }
        Ok(queued)
    }

    /// Run the recovery sweep, then process until shutdown or until every
    /// producer is gone.
    pub async fn run(mut self) {
        if let Err(e) = self.recover().await {
            error!("Recovery sweep failed: {e}");
        }
        self.handle = None;
        info!("Processing worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.queue.shutdown.cancelled() => None,
                next = self.queue.rx.recv() => next,
            };
            let Some(file_id) = next else { break };
            self.process_one(file_id).await;
        }

        let abandoned = self.queue.rx.len();
        if abandoned > 0 {
            info!("Processing worker stopped, {abandoned} queued file(s) left pending");
        } else {
            info!("Processing worker stopped");
        }
    }

    async fn process_one(&self, file_id: i64) {
        let pipeline = self.pipeline.clone();
        // Each item gets its own token: shutdown never interrupts a file.
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async move { pipeline.process(file_id, &cancel, Claim::Pending).await });

        match task.await {
            Ok(result) if result.success => debug!("File {file_id}: {}", result.message),
            Ok(result) => debug!("File {file_id} not processed: {}", result.message),
            Err(e) => {
                error!("Processing task for file {file_id} panicked: {e}");
                let message = format!("internal error: {e}");
                if let Err(db_err) =
                    files::set_status(&self.db, file_id, FileStatus::Failed, Some(&message)).await
                {
                    error!("Failed to mark file {file_id} failed: {db_err}");
                }
            }
        }
    }
}
