//! Blob storage on the local filesystem.
//!
//! Paths handed out and stored in the database are relative to the
//! storage root and always use `/` separators.

use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a stored relative path to an absolute one. Rejects paths
    /// that would escape the root.
    pub fn resolve(&self, rel: &str) -> io::Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage path: {rel}"),
            ));
        }
        Ok(self.root.join(rel_path))
    }

    /// Content-addressed location of a raw upload.
    pub fn upload_key(content_hash: &str, ext: &str) -> String {
        let prefix = content_hash.get(..2).unwrap_or("00");
        format!("uploads/{prefix}/{content_hash}.{ext}")
    }

    pub fn page_key(series_id: i64, chapter_id: i64, page_number: i64) -> String {
        format!("series/{series_id}/chapters/{chapter_id}/{page_number:04}.jpg")
    }

    pub fn cover_key(series_id: i64) -> String {
        format!("series/{series_id}/cover.jpg")
    }

    pub async fn write(&self, rel: &str, data: &[u8]) -> io::Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await
    }

    pub async fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.resolve(rel)?).await
    }

    /// Delete a single blob. A missing blob is not an error.
    pub async fn delete(&self, rel: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.resolve(rel)?).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    pub async fn exists(&self, rel: &str) -> bool {
        match self.resolve(rel) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
