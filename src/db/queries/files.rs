use chrono::Utc;

use crate::db::DbPool;
use crate::db::models::{FileKind, FileStatus, UploadedFile};

/// Columns of a new `uploaded_files` row.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub original_filename: &'a str,
    pub stored_path: &'a str,
    pub size: i64,
    pub mime_type: &'a str,
    pub content_hash: &'a str,
    pub kind: FileKind,
    pub user_id: i64,
    pub series_id: Option<i64>,
}

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<UploadedFile>, sqlx::Error> {
    sqlx::query_as::<_, UploadedFile>("SELECT * FROM uploaded_files WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_hash(
    pool: &DbPool,
    content_hash: &str,
) -> Result<Option<UploadedFile>, sqlx::Error> {
    sqlx::query_as::<_, UploadedFile>("SELECT * FROM uploaded_files WHERE content_hash = ?")
        .bind(content_hash)
        .fetch_optional(pool)
        .await
}

/// Insert a new file row in `pending` state. Returns the new id.
pub async fn insert(pool: &DbPool, file: &NewFile<'_>) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO uploaded_files (original_filename, stored_path, size, mime_type, \
         content_hash, kind, status, user_id, series_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file.original_filename)
    .bind(file.stored_path)
    .bind(file.size)
    .bind(file.mime_type)
    .bind(file.content_hash)
    .bind(file.kind.as_str())
    .bind(FileStatus::Pending.as_str())
    .bind(file.user_id)
    .bind(file.series_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Move a file to `status`, replacing the error message.
pub async fn set_status(
    pool: &DbPool,
    id: i64,
    status: FileStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE uploaded_files SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Claim a file for processing. Pending files are always claimable; failed
/// files only when `retry_failed` is set. Returns false if nothing was claimed.
pub async fn claim(pool: &DbPool, id: i64, retry_failed: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE uploaded_files SET status = 'processing', error_message = NULL, updated_at = ? \
         WHERE id = ? AND (status = 'pending' OR (? AND status = 'failed'))",
    )
    .bind(Utc::now())
    .bind(id)
    .bind(retry_failed)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_series(pool: &DbPool, id: i64, series_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE uploaded_files SET series_id = ?, updated_at = ? WHERE id = ?")
        .bind(series_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reset rows interrupted mid-processing back to `pending`. Returns the count.
pub async fn reset_processing(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE uploaded_files SET status = 'pending', updated_at = ? WHERE status = 'processing'",
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn pending_ids(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM uploaded_files WHERE status = 'pending' ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn delete(pool: &DbPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM uploaded_files WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM uploaded_files")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
