//! The review CSV: one row per PDF with the suggested new name.
//!
//! The CSV is the hand-off point between the model and the filesystem. A
//! human opens it in a spreadsheet, fixes titles, flips the `approve` column
//! and only then runs `rename`. Files are written with a UTF-8 BOM so Excel
//! shows Arabic and accented titles correctly.

use crate::error::OcrRenameError;
use crate::metadata::{BookMetadata, UNKNOWN};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Title written when rendering or the API call failed.
pub const ERROR_TITLE: &str = "ERROR";
/// Title written when the model's reply could not be parsed.
pub const PARSE_ERROR_TITLE: &str = "PARSE_ERROR";
/// Title written when a batch request errored, was canceled or expired.
pub const API_ERROR_TITLE: &str = "API_ERROR";

/// Column order of the review CSV.
pub const FIELDNAMES: [&str; 9] = [
    "original_filename",
    "suggested_title",
    "suggested_author",
    "new_filename",
    "confidence",
    "approve",
    "language",
    "edition",
    "notes",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Longest file name, in bytes, that ext4, APFS and NTFS all accept.
pub const MAX_FILENAME_BYTES: usize = 255;
/// Stem budget: leaves room for `.pdf` and a ` (NN)` conflict suffix.
pub const MAX_STEM_BYTES: usize = MAX_FILENAME_BYTES - ".pdf".len() - " (99)".len();

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
pub fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reviewer decision for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Approval {
    /// Rename this file.
    Yes,
    /// Needs a human look; not renamed.
    Review,
    /// Anything else the reviewer typed ("no", "skip", …); not renamed.
    Other(String),
}

impl From<&str> for Approval {
    fn from(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "yes" => Approval::Yes,
            "review" => Approval::Review,
            _ => Approval::Other(s),
        }
    }
}

impl From<String> for Approval {
    fn from(s: String) -> Self {
        Approval::from(s.as_str())
    }
}

impl From<Approval> for String {
    fn from(a: Approval) -> Self {
        a.to_string()
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approval::Yes => f.write_str("yes"),
            Approval::Review => f.write_str("review"),
            Approval::Other(s) => f.write_str(s),
        }
    }
}

/// One row of the review CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub original_filename: String,
    pub suggested_title: String,
    pub suggested_author: String,
    pub new_filename: String,
    #[serde(deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    pub approve: Approval,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub edition: String,
    #[serde(default)]
    pub notes: String,
}

impl ReviewEntry {
    /// Whether the reviewer approved this rename.
    pub fn is_approved(&self) -> bool {
        self.approve == Approval::Yes
    }

    /// Whether the row records a failure rather than a real suggestion.
    pub fn is_sentinel(&self) -> bool {
        is_sentinel_title(&self.suggested_title)
    }
}

/// Spreadsheets write `0,95` in some locales and leave cells blank; both
/// must survive a round trip.
fn lenient_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(raw.trim().replace(',', ".").parse().unwrap_or(0.0))
}

/// Whether `title` is one of the failure sentinels.
pub fn is_sentinel_title(title: &str) -> bool {
    matches!(title, ERROR_TITLE | PARSE_ERROR_TITLE | API_ERROR_TITLE)
}

/// Strip characters that are invalid in file names on common filesystems,
/// collapse whitespace and cap the length at [`MAX_STEM_BYTES`] bytes.
pub fn sanitize_filename(name: &str) -> String {
    const INVALID: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID.contains(c))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated = truncate_to_bytes(&collapsed, MAX_STEM_BYTES).trim_end();
    if truncated.is_empty() {
        UNKNOWN.to_string()
    } else {
        truncated.to_string()
    }
}

/// Build `"Title - Author.pdf"`, or `"Title.pdf"` when the author is unknown.
pub fn build_new_filename(title: &str, author: &str) -> String {
    let author = author.trim();
    let stem = if author.is_empty() || author == UNKNOWN {
        title.to_string()
    } else {
        format!("{title} - {author}")
    };
    format!("{}.pdf", sanitize_filename(&stem))
}

/// Turn model metadata into a review row, pre-approving confident answers.
pub fn make_entry(original_filename: &str, meta: &BookMetadata, threshold: f64) -> ReviewEntry {
    let approve = if meta.confidence >= threshold {
        Approval::Yes
    } else {
        Approval::Review
    };
    ReviewEntry {
        original_filename: original_filename.to_string(),
        suggested_title: meta.title.clone(),
        suggested_author: meta.author.clone(),
        new_filename: build_new_filename(&meta.title, &meta.author),
        confidence: meta.confidence,
        approve,
        language: meta.language.clone(),
        edition: meta.edition.clone(),
        notes: meta.notes.clone(),
    }
}

/// Write `entries` to a new `review_<timestamp>.csv` in `output_dir`.
///
/// The header row is always written, even for an empty slice. An existing
/// review file is never replaced: a second run within the same second gets
/// a `_2` suffix.
pub fn write_review_csv(
    entries: &[ReviewEntry],
    output_dir: &Path,
) -> Result<PathBuf, OcrRenameError> {
    let (path, file) = crate::create_unique_file(output_dir, "review", "csv")?;
    write_entries(entries, file, &path)?;
    Ok(path)
}

/// Write `entries` to exactly `path`, replacing it.
pub fn write_review_csv_to(entries: &[ReviewEntry], path: &Path) -> Result<(), OcrRenameError> {
    let file = std::fs::File::create(path).map_err(|e| OcrRenameError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_entries(entries, file, path)
}

fn write_entries(
    entries: &[ReviewEntry],
    mut file: std::fs::File,
    path: &Path,
) -> Result<(), OcrRenameError> {
    let write_err = |e| OcrRenameError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let csv_err = |e| OcrRenameError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    file.write_all(UTF8_BOM).map_err(write_err)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(FIELDNAMES).map_err(csv_err)?;
    for entry in entries {
        writer.serialize(entry).map_err(csv_err)?;
    }
    writer.flush().map_err(write_err)?;

    debug!("Wrote {} review rows to {}", entries.len(), path.display());
    Ok(())
}

/// Read a review CSV, with or without a BOM.
pub fn read_review_csv(path: &Path) -> Result<Vec<ReviewEntry>, OcrRenameError> {
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OcrRenameError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            OcrRenameError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body);
    reader
        .deserialize()
        .collect::<Result<Vec<ReviewEntry>, _>>()
        .map_err(|e| OcrRenameError::Csv {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Names of files already identified by an earlier run.
///
/// Scans every `review_*.csv` in `output_dir`. Rows carrying a failure
/// sentinel are not counted, so failed files are retried on resume. A
/// missing directory yields an empty set; unreadable CSVs are skipped.
pub fn already_processed(output_dir: &Path) -> HashSet<String> {
    let mut done = HashSet::new();
    let Ok(dir) = std::fs::read_dir(output_dir) else {
        return done;
    };

    for item in dir.flatten() {
        let path = item.path();
        let is_review = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("review_") && n.ends_with(".csv"));
        if !is_review {
            continue;
        }
        match read_review_csv(&path) {
            Ok(entries) => done.extend(
                entries
                    .into_iter()
                    .filter(|e| !e.is_sentinel())
                    .map(|e| e.original_filename),
            ),
            Err(e) => warn!("Skipping unreadable review file: {}", e),
        }
    }

    debug!("{} files already processed in {}", done.len(), output_dir.display());
    done
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, author: &str, confidence: f64) -> BookMetadata {
        BookMetadata {
            title: title.into(),
            author: author.into(),
            language: "en".into(),
            confidence,
            edition: String::new(),
            notes: String::new(),
        }
    }

    #[test]
    fn sanitize_removes_invalid_chars_and_collapses_spaces() {
        assert_eq!(
            sanitize_filename("What/Is: \"Life\"?  <A>  Study*|\\"),
            "WhatIs Life A Study"
        );
        assert_eq!(sanitize_filename("tab\there\nnew\u{7}line"), "tab here newline");
    }

    #[test]
    fn sanitize_caps_bytes_not_chars() {
        // Two bytes per letter: 300 letters would be 600 bytes.
        let long = "ب".repeat(300);
        let s = sanitize_filename(&long);
        assert!(s.len() <= MAX_STEM_BYTES, "{} bytes", s.len());
        assert_eq!(s.chars().count(), MAX_STEM_BYTES / 2);

        let ascii = sanitize_filename(&"a".repeat(400));
        assert_eq!(ascii.len(), MAX_STEM_BYTES);
    }

    #[test]
    fn truncate_never_splits_a_character() {
        assert_eq!(truncate_to_bytes("abc", 10), "abc");
        assert_eq!(truncate_to_bytes("ابن", 3), "ا");
        assert_eq!(truncate_to_bytes("日本語", 7), "日本");
        assert_eq!(truncate_to_bytes("日本語", 2), "");
    }

    #[test]
    fn long_arabic_title_fits_filename_limit() {
        let title = "كتاب الأغاني في أخبار العرب وأشعارهم ".repeat(10);
        let name = build_new_filename(&title, "أبو الفرج الأصفهاني");
        assert!(name.len() <= MAX_FILENAME_BYTES, "{} bytes", name.len());
        assert!(name.ends_with(".pdf"));
        assert!(!name.trim_end_matches(".pdf").ends_with(' '));
    }

    #[test]
    fn sanitize_empty_becomes_unknown() {
        assert_eq!(sanitize_filename("???"), UNKNOWN);
        assert_eq!(sanitize_filename("   "), UNKNOWN);
    }

    #[test]
    fn new_filename_with_and_without_author() {
        assert_eq!(build_new_filename("Dune", "Frank Herbert"), "Dune - Frank Herbert.pdf");
        assert_eq!(build_new_filename("Dune", "Unknown"), "Dune.pdf");
        assert_eq!(build_new_filename("Dune", ""), "Dune.pdf");
        assert_eq!(
            build_new_filename("Logic: A Primer", "Anon"),
            "Logic A Primer - Anon.pdf"
        );
    }

    #[test]
    fn make_entry_applies_threshold() {
        let yes = make_entry("a.pdf", &meta("A", "B", 0.8), 0.8);
        assert_eq!(yes.approve, Approval::Yes);
        let review = make_entry("a.pdf", &meta("A", "B", 0.79), 0.8);
        assert_eq!(review.approve, Approval::Review);
        assert_eq!(review.new_filename, "A - B.pdf");
    }

    #[test]
    fn approval_parsing_is_lenient() {
        assert_eq!(Approval::from(" YES "), Approval::Yes);
        assert_eq!(Approval::from("Review"), Approval::Review);
        assert_eq!(Approval::from("No"), Approval::Other("no".into()));
        assert_eq!(Approval::Other("no".into()).to_string(), "no");
    }

    #[test]
    fn csv_round_trip_keeps_bom_and_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            make_entry("scan 001.pdf", &meta("كليلة ودمنة", "ابن المقفع", 0.95), 0.8),
            make_entry("scan, 002.pdf", &meta("Les Misérables", "Victor Hugo", 0.5), 0.8),
        ];
        let path = write_review_csv(&entries, dir.path()).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(UTF8_BOM));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("review_") && name.ends_with(".csv"));

        let back = read_review_csv(&path).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn review_files_written_back_to_back_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let first = vec![make_entry("a.pdf", &meta("A", "B", 0.9), 0.8)];
        let second = vec![make_entry("b.pdf", &meta("C", "D", 0.9), 0.8)];
        let p1 = write_review_csv(&first, dir.path()).unwrap();
        let p2 = write_review_csv(&second, dir.path()).unwrap();

        assert_ne!(p1, p2);
        assert_eq!(read_review_csv(&p1).unwrap(), first);
        assert_eq!(read_review_csv(&p2).unwrap(), second);
        let done = already_processed(dir.path());
        assert!(done.contains("a.pdf") && done.contains("b.pdf"));
    }

    #[test]
    fn empty_csv_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_review_csv(&[], dir.path()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.trim_start_matches('\u{feff}').starts_with("original_filename,"));
        assert!(read_review_csv(&path).unwrap().is_empty());
    }

    #[test]
    fn reads_hand_edited_csv_without_bom_or_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.csv");
        std::fs::write(
            &path,
            "original_filename,suggested_title,suggested_author,new_filename,confidence,approve\n\
             a.pdf,A,B,A - B.pdf,\"0,9\", Yes \n\
             b.pdf,C,D,C - D.pdf,,review\n",
        )
        .unwrap();
        let entries = read_review_csv(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_approved());
        assert_eq!(entries[0].confidence, 0.9);
        assert_eq!(entries[1].confidence, 0.0);
        assert_eq!(entries[1].notes, "");
    }

    #[test]
    fn read_missing_csv_is_file_not_found() {
        let err = read_review_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, OcrRenameError::FileNotFound { .. }));
    }

    #[test]
    fn already_processed_skips_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            make_entry("done.pdf", &meta("A", "B", 0.9), 0.8),
            make_entry("failed.pdf", &BookMetadata::failed(ERROR_TITLE, "boom"), 0.8),
            make_entry("garbled.pdf", &BookMetadata::failed(PARSE_ERROR_TITLE, "bad"), 0.8),
            make_entry("low.pdf", &meta("C", "D", 0.2), 0.8),
        ];
        write_review_csv_to(&entries, &dir.path().join("review_20250101_000000.csv")).unwrap();
        // Not a review file: ignored.
        write_review_csv_to(&entries[..1], &dir.path().join("other.csv")).unwrap();
        std::fs::write(dir.path().join("review_broken.csv"), "not,a,review\n1,2,3\n").unwrap();

        let done = already_processed(dir.path());
        assert_eq!(done.len(), 2);
        assert!(done.contains("done.pdf"));
        assert!(done.contains("low.pdf"));
    }

    #[test]
    fn already_processed_on_missing_dir_is_empty() {
        assert!(already_processed(Path::new("/no/such/output")).is_empty());
    }
}
