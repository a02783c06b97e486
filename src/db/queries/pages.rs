use crate::db::DbPool;
use crate::db::models::{NewPage, Page};

pub async fn get_by_chapter(pool: &DbPool, chapter_id: i64) -> Result<Vec<Page>, sqlx::Error> {
    sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE chapter_id = ? ORDER BY number")
        .bind(chapter_id)
        .fetch_all(pool)
        .await
}

pub async fn insert(pool: &DbPool, page: &NewPage) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO pages (chapter_id, number, image_path, width, height, size, image_hash, \
         mime_type) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(page.chapter_id)
    .bind(page.number)
    .bind(&page.image_path)
    .bind(i64::from(page.width))
    .bind(i64::from(page.height))
    .bind(page.size as i64)
    .bind(&page.image_hash)
    .bind(&page.mime_type)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
