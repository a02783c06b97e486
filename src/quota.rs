//! Per-user storage/upload counters and per-endpoint rate-limit windows.
//!
//! Every counter update is a single-row SQL statement, so the unit of
//! atomicity is one row. Checks read first and update later; concurrent
//! uploads for the same user may overshoot the storage quota by at most
//! the in-flight files. Rate-limit increments are conditional on the
//! ceiling and cannot overshoot it.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::db::DbPool;
use crate::db::models::UserQuota;
use crate::db::queries::{quotas, rate_limits};
use crate::policy::{Actor, Role, RolePolicy};

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("role {} may not upload", .0.as_str())]
    UploadNotAllowed(Role),
    #[error("file is {size} bytes, limit is {max}")]
    FileTooLarge { size: u64, max: u64 },
    #[error("storage quota exceeded: {used} used + {size} new > {quota}")]
    StorageExceeded { used: u64, size: u64, quota: u64 },
    #[error("daily upload limit of {limit} reached")]
    DailyLimitReached { limit: u32 },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct QuotaGuard {
    pool: DbPool,
    policy: RolePolicy,
    window: TimeDelta,
}

impl QuotaGuard {
    pub fn new(pool: DbPool, policy: RolePolicy, rate_limit: &RateLimitConfig) -> Self {
        let window = TimeDelta::seconds(rate_limit.window_secs.min(i64::MAX as u64) as i64);
        Self {
            pool,
            policy,
            window,
        }
    }

    pub fn policy(&self) -> &RolePolicy {
        &self.policy
    }

    /// Current counters for `user_id`, after any pending daily reset.
    pub async fn usage(&self, user_id: i64) -> Result<UserQuota, QuotaError> {
        Ok(quotas::get_or_create(&self.pool, user_id, today()).await?)
    }

    pub async fn check_upload(&self, actor: &Actor, size: u64) -> Result<(), QuotaError> {
        self.check_upload_on(actor, size, today()).await
    }

    /// Pre-upload check against the caller's role limits as of `today`.
    pub async fn check_upload_on(
        &self,
        actor: &Actor,
        size: u64,
        today: NaiveDate,
    ) -> Result<(), QuotaError> {
        let limits = self.policy.limits(actor.role);
        if !limits.can_upload {
            return Err(QuotaError::UploadNotAllowed(actor.role));
        }
        let max = limits.max_file_bytes();
        if size > max {
            return Err(QuotaError::FileTooLarge { size, max });
        }

        let usage = quotas::get_or_create(&self.pool, actor.user_id, today).await?;
        let used = usage.storage_used.max(0) as u64;
        let quota = limits.storage_quota_bytes();
        if used.saturating_add(size) > quota {
            return Err(QuotaError::StorageExceeded { used, size, quota });
        }
        if usage.uploads_today >= i64::from(limits.daily_uploads) {
            return Err(QuotaError::DailyLimitReached {
                limit: limits.daily_uploads,
            });
        }
        Ok(())
    }

    /// Record a completed upload of `size` bytes.
    pub async fn track_upload(&self, user_id: i64, size: u64) -> Result<(), QuotaError> {
        quotas::get_or_create(&self.pool, user_id, today()).await?;
        quotas::add_upload(&self.pool, user_id, size as i64).await?;
        debug!("Tracked upload of {size} bytes for user {user_id}");
        Ok(())
    }

    /// Release `size` bytes after a stored upload is deleted.
    pub async fn track_deletion(&self, user_id: i64, size: u64) -> Result<(), QuotaError> {
        quotas::get_or_create(&self.pool, user_id, today()).await?;
        quotas::release_storage(&self.pool, user_id, size as i64).await?;
        Ok(())
    }

    pub async fn track_series_created(&self, user_id: i64) -> Result<(), QuotaError> {
        quotas::get_or_create(&self.pool, user_id, today()).await?;
        quotas::add_series_created(&self.pool, user_id).await?;
        Ok(())
    }

    pub async fn check_rate_limit(&self, actor: &Actor, endpoint: &str) -> Result<bool, QuotaError> {
        self.check_rate_limit_at(actor, endpoint, Utc::now()).await
    }

    /// Returns true if the request is allowed, counting it against the window.
    pub async fn check_rate_limit_at(
        &self,
        actor: &Actor,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QuotaError> {
        let ceiling = i64::from(self.policy.limits(actor.role).requests_per_minute);

        let entry = rate_limits::get(&self.pool, actor.user_id, endpoint).await?;
        let Some(entry) = entry else {
            rate_limits::start_window(&self.pool, actor.user_id, endpoint, now).await?;
            return Ok(true);
        };

        if now - entry.window_start >= self.window {
            rate_limits::start_window(&self.pool, actor.user_id, endpoint, now).await?;
            return Ok(true);
        }

        let allowed = rate_limits::try_increment(&self.pool, entry.id, ceiling, now).await?;
        if !allowed {
            debug!(
                "Rate limit hit: user={} endpoint={} count={}",
                actor.user_id, endpoint, entry.request_count
            );
        }
        Ok(allowed)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
