//! Size, extension and signature checks on an incoming upload, plus the
//! content hash used for deduplication.

use std::io::{self, Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

use crate::db::models::FileKind;
use crate::quota::QuotaError;

const ZIP_MAGIC: &[u8] = b"PK";
const RAR_MAGIC: &[u8] = b"Rar!";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("file is {size} bytes, limit is {max}")]
    SizeExceeded { size: u64, max: u64 },
    #[error("file type not allowed: {0}")]
    InvalidType(String),
    #[error("unreadable archive")]
    Unreadable,
    #[error("duplicate upload of file {existing_id}")]
    Duplicate { existing_id: i64 },
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("series {0} not found")]
    SeriesNotFound(i64),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Upload that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpload {
    /// Lowercase extension without the dot.
    pub extension: String,
    pub kind: FileKind,
}

/// Stateless checks over an upload stream. The stream is always left
/// rewound to the start.
#[derive(Debug, Clone)]
pub struct IntakeValidator {
    allowed_extensions: Vec<String>,
}

impl IntakeValidator {
    pub fn new(allowed_extensions: Vec<String>) -> Self {
        Self { allowed_extensions }
    }

    /// Check size against `max_size`, then extension, then the archive
    /// signature in the first four bytes.
    pub fn validate<R: Read + Seek>(
        &self,
        stream: &mut R,
        filename: &str,
        size: u64,
        max_size: u64,
    ) -> Result<ValidatedUpload, IntakeError> {
        if size > max_size {
            return Err(IntakeError::SizeExceeded {
                size,
                max: max_size,
            });
        }

        let extension = validate_extension(filename, &self.allowed_extensions)
            .ok_or_else(|| IntakeError::InvalidType(filename.to_string()))?;

        let mut head = [0u8; 4];
        stream.seek(SeekFrom::Start(0))?;
        let read = read_up_to(stream, &mut head)?;
        stream.seek(SeekFrom::Start(0))?;

        // Kind comes from the signature, not the extension.
        let kind = sniff_kind(&head[..read]).ok_or(IntakeError::Unreadable)?;

        Ok(ValidatedUpload { extension, kind })
    }
}

/// Archive kind from leading bytes, if the signature is known.
pub fn sniff_kind(head: &[u8]) -> Option<FileKind> {
    if head.starts_with(RAR_MAGIC) {
        Some(FileKind::Rar)
    } else if head.starts_with(ZIP_MAGIC) {
        Some(FileKind::Zip)
    } else {
        None
    }
}

/// Returns the lowercase extension of `filename` if it is in `allowed`.
pub fn validate_extension(filename: &str, allowed: &[String]) -> Option<String> {
    let ext = std::path::Path::new(filename)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    allowed
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&ext))
        .then_some(ext)
}

fn read_up_to<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// sha256 over the whole stream, hex-encoded. Rewinds before and after.
pub fn content_hash<R: Read + Seek>(stream: &mut R) -> io::Result<String> {
    stream.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    stream.seek(SeekFrom::Start(0))?;
    Ok(hex::encode(hasher.finalize()))
}
