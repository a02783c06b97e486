use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UploadedFile {
    pub id: i64,
    pub original_filename: String,
    pub stored_path: String,
    pub size: i64,
    pub mime_type: String,
    pub content_hash: String,
    pub kind: String,
    pub status: String,
    pub error_message: Option<String>,
    pub user_id: i64,
    pub series_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn file_kind(&self) -> FileKind {
        FileKind::from_db(&self.kind)
    }

    pub fn file_status(&self) -> Option<FileStatus> {
        FileStatus::from_db(&self.status)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Series {
    pub id: i64,
    pub title: String,
    pub alt_title: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub year: Option<i32>,
    pub chapter_count: i64,
    pub cover_path: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub series_id: i64,
    pub title: String,
    pub number: f64,
    pub volume: Option<f64>,
    pub page_count: i64,
    pub status: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Page {
    pub id: i64,
    pub chapter_id: i64,
    pub number: i64,
    pub image_path: String,
    pub width: i64,
    pub height: i64,
    pub size: i64,
    pub image_hash: String,
    pub mime_type: String,
}

/// Page row before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub chapter_id: i64,
    pub number: i64,
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub image_hash: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserQuota {
    pub user_id: i64,
    pub storage_used: i64,
    pub uploads_today: i64,
    pub series_created: i64,
    pub last_reset_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow)]
pub struct RateLimitEntry {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub request_count: i64,
    pub window_start: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Zip,
    Rar,
    Pdf,
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Zip => "zip",
            FileKind::Rar => "rar",
            FileKind::Pdf => "pdf",
            FileKind::Unknown => "unknown",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "zip" => FileKind::Zip,
            "rar" => FileKind::Rar,
            "pdf" => FileKind::Pdf,
            _ => FileKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "processed" => Some(FileStatus::Processed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

// Chapter status values
pub const CHAPTER_DRAFT: &str = "draft";
pub const CHAPTER_PUBLISHED: &str = "published";

// MIME type of re-encoded pages and covers
pub const PAGE_MIME: &str = "image/jpeg";
