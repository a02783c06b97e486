use chrono::Utc;

use crate::db::DbPool;
use crate::db::models::Series;

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Series>, sqlx::Error> {
    sqlx::query_as::<_, Series>("SELECT * FROM series WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn insert(
    pool: &DbPool,
    title: &str,
    author: Option<&str>,
    year: Option<i32>,
    created_by: i64,
) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO series (title, author, year, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(title)
    .bind(author)
    .bind(year)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Fill author/year only where the series has none yet.
pub async fn update_basic_info(
    pool: &DbPool,
    id: i64,
    author: Option<&str>,
    year: Option<i32>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE series SET author = COALESCE(author, ?), year = COALESCE(year, ?), \
         updated_at = ? WHERE id = ?",
    )
    .bind(author)
    .bind(year)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_cover(pool: &DbPool, id: i64, cover_path: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE series SET cover_path = ?, updated_at = ? WHERE id = ?")
        .bind(cover_path)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Recalculate `chapter_count` from the chapters table.
pub async fn refresh_chapter_count(pool: &DbPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE series SET chapter_count = (SELECT COUNT(*) FROM chapters WHERE series_id = ?), \
         updated_at = ? WHERE id = ?",
    )
    .bind(id)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &DbPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM series WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM series")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
