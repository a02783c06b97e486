//! Archive opening, image-entry selection and natural ordering.

use std::cmp::Ordering;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::metadata::SIDECAR_FILE;
use crate::config::ProcessingConfig;
use crate::db::models::FileKind;

/// Extensions treated as page images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive format: {}", .0.as_str())]
    Unsupported(FileKind),
    #[error("unreadable archive: {0}")]
    Open(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no valid images found in archive")]
    NoImages,
    #[error("archive has {count} image entries, limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },
    #[error("entry is larger than {limit} bytes")]
    EntryTooLarge { limit: u64 },
}

/// Bounds applied while extracting one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_entries: usize,
    /// Decompressed size cap per entry.
    pub max_entry_bytes: u64,
}

impl ExtractLimits {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            max_entries: config.max_archive_entries,
            max_entry_bytes: config.max_entry_size_mb.saturating_mul(1024 * 1024),
        }
    }
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Minimal view of an archive: entry names and per-entry extraction.
pub trait ArchiveReader {
    /// Names of all file entries, indexed by position.
    fn entry_names(&self) -> &[String];

    /// Write entry `index` to `dest`, refusing entries larger than `limit`
    /// bytes. Returns the number of bytes written.
    fn extract_to(&mut self, index: usize, dest: &Path, limit: u64) -> Result<u64, ArchiveError>;
}

pub struct ZipReader {
    archive: zip::ZipArchive<BufReader<fs::File>>,
    names: Vec<String>,
    indices: Vec<usize>,
}

impl ZipReader {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
        let mut names = Vec::with_capacity(archive.len());
        let mut indices = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = match archive.by_index(i) {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable zip entry {i}: {e}");
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            names.push(entry.name().to_string());
            indices.push(i);
        }
        Ok(Self {
            archive,
            names,
            indices,
        })
    }
}

impl ArchiveReader for ZipReader {
    fn entry_names(&self) -> &[String] {
        &self.names
    }

    fn extract_to(&mut self, index: usize, dest: &Path, limit: u64) -> Result<u64, ArchiveError> {
        let entry = self.archive.by_index(self.indices[index])?;
        if entry.size() > limit {
            return Err(ArchiveError::EntryTooLarge { limit });
        }
        let mut out = fs::File::create(dest)?;
        // Declared sizes can lie; never write more than limit + 1 bytes.
        let written = std::io::copy(&mut entry.take(limit.saturating_add(1)), &mut out)?;
        if written > limit {
            drop(out);
            if let Err(e) = fs::remove_file(dest) {
                debug!("Failed to remove oversized entry {dest:?}: {e}");
            }
            return Err(ArchiveError::EntryTooLarge { limit });
        }
        Ok(written)
    }
}

/// Open an archive with the reader matching its kind.
pub fn open_archive(path: &Path, kind: FileKind) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    match kind {
        FileKind::Zip => Ok(Box::new(ZipReader::open(path)?)),
        other => Err(ArchiveError::Unsupported(other)),
    }
}

/// One ordered page image extracted to scratch space.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// Entry name inside the archive.
    pub name: String,
    pub path: PathBuf,
}

/// Result of extracting an archive; the scratch directory is removed on drop.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub images: Vec<ExtractedImage>,
    pub scratch: ScratchDir,
    /// Number of image entries that qualified before extraction.
    pub qualifying_entries: usize,
}

impl ExtractedArchive {
    pub fn dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Open `path`, keep image entries in natural order and write them (plus
/// any ComicInfo sidecar) into a fresh scratch directory under `scratch_root`.
/// Entries over the size limit are skipped.
pub fn extract_archive(
    path: &Path,
    kind: FileKind,
    scratch_root: &Path,
    limits: &ExtractLimits,
) -> Result<ExtractedArchive, ArchiveError> {
    let mut reader = open_archive(path, kind)?;

    let mut selected: Vec<(usize, String)> = reader
        .entry_names()
        .iter()
        .enumerate()
        .filter(|(_, name)| is_image_entry(name))
        .map(|(i, name)| (i, name.clone()))
        .collect();
    if selected.is_empty() {
        return Err(ArchiveError::NoImages);
    }
    if selected.len() > limits.max_entries {
        return Err(ArchiveError::TooManyEntries {
            count: selected.len(),
            limit: limits.max_entries,
        });
    }
    selected.sort_by(|a, b| natural_cmp(&a.1, &b.1));

    let sidecar = reader
        .entry_names()
        .iter()
        .position(|name| base_name(name).eq_ignore_ascii_case(SIDECAR_FILE));

    let scratch = ScratchDir::create(scratch_root)?;
    let qualifying_entries = selected.len();
    let mut images = Vec::with_capacity(selected.len());

    for (seq, (index, name)) in selected.into_iter().enumerate() {
        let dest = scratch.path().join(scratch_file_name(seq, &name));
        match reader.extract_to(index, &dest, limits.max_entry_bytes) {
            Ok(bytes) => {
                debug!("Extracted {name} ({bytes} bytes)");
                images.push(ExtractedImage { name, path: dest });
            }
            Err(e) => warn!("Failed to extract {name}: {e}"),
        }
    }

    if let Some(index) = sidecar {
        let dest = scratch.path().join(SIDECAR_FILE);
        if let Err(e) = reader.extract_to(index, &dest, limits.max_entry_bytes) {
            warn!("Failed to extract ComicInfo.xml: {e}");
        }
    }

    if images.is_empty() {
        return Err(ArchiveError::NoImages);
    }

    Ok(ExtractedArchive {
        images,
        scratch,
        qualifying_entries,
    })
}

/// True for non-empty entry names with an image extension, outside macOS
/// resource-fork folders.
pub fn is_image_entry(name: &str) -> bool {
    if name.contains("__MACOSX") {
        return false;
    }
    let base = base_name(name);
    if base.is_empty() || base.starts_with("._") {
        return false;
    }
    Path::new(base)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Flat, collision-free scratch name; entry paths never reach the filesystem.
fn scratch_file_name(seq: usize, name: &str) -> String {
    let ext = Path::new(base_name(name))
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    format!("{seq:05}.{ext}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn runs(s: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;
    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != digit => {
                out.push(make_run(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(digit);
    }
    if let Some(digit) = in_digits {
        out.push(make_run(&s[start..], digit));
    }
    out
}

fn make_run(s: &str, digits: bool) -> Run<'_> {
    if digits { Run::Digits(s) } else { Run::Text(s) }
}

fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Natural string order: digit runs compare by value, text runs
/// case-insensitively, and fewer runs sort first on a tie.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let ra = runs(a);
    let rb = runs(b);
    for (x, y) in ra.iter().zip(rb.iter()) {
        let ord = match (x, y) {
            (Run::Digits(x), Run::Digits(y)) => cmp_numeric(x, y),
            (Run::Text(x), Run::Text(y))
            | (Run::Digits(x), Run::Text(y))
            | (Run::Text(x), Run::Digits(y)) => cmp_text(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ra.len().cmp(&rb.len()).then_with(|| a.cmp(b))
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scratch directory removed when dropped, on every exit path.
#[derive(Debug)]
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn create(root: &Path) -> std::io::Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let count = SCRATCH_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        let path = root.join(format!(
            "manga-ingest-{}-{now}-{count}",
            std::process::id()
        ));
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            tracing::debug!("Failed to cleanup scratch dir {:?}: {}", self.0, e);
        }
    }
}
