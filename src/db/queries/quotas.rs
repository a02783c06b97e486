use chrono::NaiveDate;

use crate::db::DbPool;
use crate::db::models::UserQuota;

/// Load the quota row for `user_id`, creating it on first access and
/// zeroing the daily counters (uploads and series created) when the stored
/// reset date is before `today`.
pub async fn get_or_create(
    pool: &DbPool,
    user_id: i64,
    today: NaiveDate,
) -> Result<UserQuota, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO user_quotas (user_id, last_reset_date) VALUES (?, ?)")
        .bind(user_id)
        .bind(today)
        .execute(pool)
        .await?;

    let reset = sqlx::query(
        "UPDATE user_quotas SET uploads_today = 0, series_created = 0, last_reset_date = ? \
         WHERE user_id = ? AND last_reset_date < ?",
    )
    .bind(today)
    .bind(user_id)
    .bind(today)
    .execute(pool)
    .await?;
    if reset.rows_affected() > 0 {
        tracing::debug!("Daily counters reset for user {user_id}");
    }

    sqlx::query_as::<_, UserQuota>("SELECT * FROM user_quotas WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// Add `size` bytes to storage used and count one upload for today.
pub async fn add_upload(pool: &DbPool, user_id: i64, size: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE user_quotas SET storage_used = storage_used + ?, \
         uploads_today = uploads_today + 1 WHERE user_id = ?",
    )
    .bind(size)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Subtract `size` bytes from storage used, never going below zero.
pub async fn release_storage(pool: &DbPool, user_id: i64, size: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE user_quotas SET storage_used = MAX(storage_used - ?, 0) WHERE user_id = ?")
        .bind(size)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn add_series_created(pool: &DbPool, user_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE user_quotas SET series_created = series_created + 1 WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
