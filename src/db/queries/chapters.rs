use chrono::Utc;

use crate::db::DbPool;
use crate::db::models::{CHAPTER_DRAFT, Chapter};

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Chapter>, sqlx::Error> {
    sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_by_series(pool: &DbPool, series_id: i64) -> Result<Vec<Chapter>, sqlx::Error> {
    sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE series_id = ? ORDER BY number")
        .bind(series_id)
        .fetch_all(pool)
        .await
}

pub async fn find_by_series_and_number(
    pool: &DbPool,
    series_id: i64,
    number: f64,
) -> Result<Option<Chapter>, sqlx::Error> {
    sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE series_id = ? AND number = ?")
        .bind(series_id)
        .bind(number)
        .fetch_optional(pool)
        .await
}

/// Insert a draft chapter. Fails with a unique violation if the number is taken.
pub async fn insert(
    pool: &DbPool,
    series_id: i64,
    title: &str,
    number: f64,
    volume: Option<f64>,
    created_by: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO chapters (series_id, title, number, volume, page_count, status, \
         created_by, created_at) VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(series_id)
    .bind(title)
    .bind(number)
    .bind(volume)
    .bind(CHAPTER_DRAFT)
    .bind(created_by)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn finalize(
    pool: &DbPool,
    id: i64,
    page_count: i64,
    status: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE chapters SET page_count = ?, status = ? WHERE id = ?")
        .bind(page_count)
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &DbPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM chapters WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chapters")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
