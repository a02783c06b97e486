//! Series/chapter metadata from archive file names and ComicInfo sidecars.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{Datelike, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::{Captures, Regex};
use tracing::{debug, warn};

/// Sidecar file name as written into the scratch directory.
pub const SIDECAR_FILE: &str = "ComicInfo.xml";

const MIN_YEAR: i32 = 1900;

/// Transient metadata handed from extraction to the catalog step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub chapter: Option<f64>,
    pub volume: Option<f64>,
    pub chapter_title: Option<String>,
    pub author: Option<String>,
    pub group: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("title is empty")]
    EmptyTitle,
    #[error("chapter number {0} is negative")]
    NegativeChapter(f64),
    #[error("volume number {0} is negative")]
    NegativeVolume(f64),
    #[error("year {year} outside {min}..={max}")]
    YearOutOfRange { year: i32, min: i32, max: i32 },
}

impl ExtractedMetadata {
    /// Copy every field of `other` that is unset here. Values already
    /// present are never replaced.
    pub fn fill_missing_from(&mut self, other: ExtractedMetadata) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.title, other.title);
        fill(&mut self.chapter, other.chapter);
        fill(&mut self.volume, other.volume);
        fill(&mut self.chapter_title, other.chapter_title);
        fill(&mut self.author, other.author);
        fill(&mut self.group, other.group);
        fill(&mut self.year, other.year);
    }

    /// Every validation failure, in field order.
    pub fn validate(&self, current_year: i32) -> Vec<MetadataError> {
        let mut problems = Vec::new();
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            problems.push(MetadataError::EmptyTitle);
        }
        if let Some(n) = self.chapter.filter(|n| !valid_number(*n)) {
            problems.push(MetadataError::NegativeChapter(n));
        }
        if let Some(v) = self.volume.filter(|v| !valid_number(*v)) {
            problems.push(MetadataError::NegativeVolume(v));
        }
        if let Some(year) = self.year {
            let max = current_year + 1;
            if !(MIN_YEAR..=max).contains(&year) {
                problems.push(MetadataError::YearOutOfRange {
                    year,
                    min: MIN_YEAR,
                    max,
                });
            }
        }
        problems
    }

    /// Drop every field that fails validation, logging what was dropped.
    pub fn sanitize(&mut self, current_year: i32) {
        for problem in self.validate(current_year) {
            warn!("Dropping invalid metadata: {problem}");
            match problem {
                MetadataError::EmptyTitle => self.title = None,
                MetadataError::NegativeChapter(_) => self.chapter = None,
                MetadataError::NegativeVolume(_) => self.volume = None,
                MetadataError::YearOutOfRange { .. } => self.year = None,
            }
        }
    }
}

fn valid_number(n: f64) -> bool {
    n.is_finite() && n >= 0.0
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

// Filename rules, tried top to bottom; the first match wins.
static FILENAME_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // [Group] Title - Chapter N - Subtitle [extra]
        r"(?i)^\[(?P<group>[^\]]+)\]\s*(?P<title>.+?)\s*-\s*(?:Chapter|Ch\.?)\s*(?P<chapter>\d+(?:\.\d+)?)\s*(?:-\s*(?P<subtitle>.+?))?\s*(?:\[[^\]]*\])?$",
        // Title - Chapter N - Subtitle (Year)
        r"(?i)^(?P<title>.+?)\s*-\s*(?:Chapter|Ch\.?)\s*(?P<chapter>\d+(?:\.\d+)?)\s*(?:-\s*(?P<subtitle>.+?))?\s*(?:\((?P<year>\d{4})\))?$",
        // Title v01 c003
        r"(?i)^(?P<title>.+?)\s+v(?:ol\.?)?\s*(?P<volume>\d+(?:\.\d+)?)\s*c(?:h\.?)?\s*(?P<chapter>\d+(?:\.\d+)?)",
        // Title - Volume V Chapter N
        r"(?i)^(?P<title>.+?)\s*-\s*(?:Volume|Vol\.?)\s*(?P<volume>\d+(?:\.\d+)?)\s*(?:Chapter|Ch\.?)\s*(?P<chapter>\d+(?:\.\d+)?)",
        // Title Chapter N
        r"(?i)^(?P<title>.+?)\s+(?:Chapter|Ch\.?)\s*(?P<chapter>\d+(?:\.\d+)?)",
        // Title - N
        r"(?i)^(?P<title>.+?)\s*-\s*(?P<chapter>\d+(?:\.\d+)?)$",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Underscores become spaces, whitespace runs collapse, ends are trimmed.
pub fn clean_name(name: &str) -> String {
    WHITESPACE
        .replace_all(&name.replace('_', " "), " ")
        .trim()
        .to_string()
}

/// Remove a trailing file extension. Numeric suffixes such as the `.5` in
/// `Chapter 10.5` are not extensions.
pub fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Metadata from a file name alone.
pub fn from_filename(filename: &str) -> ExtractedMetadata {
    let cleaned = clean_name(strip_extension(filename));

    for (index, rule) in FILENAME_RULES.iter().enumerate() {
        if let Some(caps) = rule.captures(&cleaned) {
            debug!("Filename {filename:?} matched rule {}", index + 1);
            return from_captures(&caps);
        }
    }

    debug!("Filename {filename:?} matched no rule");
    ExtractedMetadata {
        title: non_empty(&cleaned),
        ..Default::default()
    }
}

fn from_captures(caps: &Captures<'_>) -> ExtractedMetadata {
    let text = |name: &str| caps.name(name).and_then(|m| non_empty(m.as_str()));
    let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());
    ExtractedMetadata {
        title: text("title"),
        chapter: number("chapter"),
        volume: number("volume"),
        chapter_title: text("subtitle"),
        author: None,
        group: text("group"),
        year: caps.name("year").and_then(|m| m.as_str().parse().ok()),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Metadata for an extracted archive directory: the file name first, then
/// any `ComicInfo.xml` in `dir` fills what the name left unset.
pub fn from_directory(dir: &Path, filename: &str) -> ExtractedMetadata {
    let mut meta = from_filename(filename);
    let sidecar = dir.join(SIDECAR_FILE);
    if sidecar.is_file() {
        match std::fs::read(&sidecar) {
            Ok(bytes) => meta.fill_missing_from(parse_comic_info(&bytes)),
            Err(e) => warn!("Failed to read {}: {e}", sidecar.display()),
        }
    }
    meta
}

#[derive(Clone, Copy)]
enum ComicInfoField {
    Series,
    Title,
    Number,
    Volume,
    Writer,
    Year,
}

impl ComicInfoField {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag.to_ascii_lowercase().as_slice() {
            b"series" => Some(Self::Series),
            b"title" => Some(Self::Title),
            b"number" => Some(Self::Number),
            b"volume" => Some(Self::Volume),
            b"writer" => Some(Self::Writer),
            b"year" => Some(Self::Year),
            _ => None,
        }
    }

    fn apply(self, value: &str, meta: &mut ExtractedMetadata) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        match self {
            Self::Series => meta.title = Some(value.to_string()),
            Self::Title => meta.chapter_title = Some(value.to_string()),
            Self::Number => meta.chapter = value.parse().ok(),
            Self::Volume => meta.volume = value.parse().ok(),
            Self::Writer => meta.author = Some(value.to_string()),
            Self::Year => meta.year = value.parse().ok(),
        }
    }
}

/// Scrape Series/Title/Number/Volume/Writer/Year from a ComicInfo document.
/// Malformed XML yields whatever was read before the error.
pub fn parse_comic_info(data: &[u8]) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata::default();
    let mut xml = Reader::from_reader(data);
    xml.config_mut().check_end_names = false;

    let mut buf = Vec::new();
    let mut current: Option<ComicInfoField> = None;
    let mut text = String::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("ComicInfo parse stopped: {e}");
                break;
            }
            Ok(Event::Start(ref e)) => {
                current = ComicInfoField::from_tag(e.local_name().as_ref());
                text.clear();
            }
            Ok(Event::Text(ref e)) => {
                if current.is_some() {
                    text.push_str(&e.decode().unwrap_or_default());
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                if current.is_some() {
                    if let Ok(Some(c)) = e.resolve_char_ref() {
                        text.push(c);
                    } else if let Some(s) =
                        quick_xml::escape::resolve_predefined_entity(&e.decode().unwrap_or_default())
                    {
                        text.push_str(s);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(field) = current.take() {
                    field.apply(&text, &mut meta);
                }
                text.clear();
            }
            _ => {}
        }
        buf.clear();
    }

    meta
}
