use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::db::models::RateLimitEntry;

pub async fn get(
    pool: &DbPool,
    user_id: i64,
    endpoint: &str,
) -> Result<Option<RateLimitEntry>, sqlx::Error> {
    sqlx::query_as::<_, RateLimitEntry>(
        "SELECT * FROM rate_limits WHERE user_id = ? AND endpoint = ?",
    )
    .bind(user_id)
    .bind(endpoint)
    .fetch_optional(pool)
    .await
}

/// Start a fresh window with a count of 1, creating the row if needed.
pub async fn start_window(
    pool: &DbPool,
    user_id: i64,
    endpoint: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rate_limits (user_id, endpoint, request_count, window_start, last_request) \
         VALUES (?, ?, 1, ?, ?) \
         ON CONFLICT (user_id, endpoint) DO UPDATE SET request_count = 1, \
         window_start = excluded.window_start, last_request = excluded.last_request",
    )
    .bind(user_id)
    .bind(endpoint)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count one more request if the window is still below `ceiling`.
/// Returns false when the ceiling was already reached.
pub async fn try_increment(
    pool: &DbPool,
    id: i64,
    ceiling: i64,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE rate_limits SET request_count = request_count + 1, last_request = ? \
         WHERE id = ? AND request_count < ?",
    )
    .bind(now)
    .bind(id)
    .bind(ceiling)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
