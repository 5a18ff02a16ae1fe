//! Apply approved review rows to the filesystem, and undo them again.
//!
//! Every real rename is recorded in a JSON rename log so that a later
//! `undo` can restore the original names in reverse order.

use crate::error::OcrRenameError;
use crate::review::{truncate_to_bytes, ReviewEntry, MAX_FILENAME_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome recorded for one rename in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RenameStatus {
    Pending,
    DryRun,
    Renamed,
    Error(String),
}

impl fmt::Display for RenameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameStatus::Pending => f.write_str("pending"),
            RenameStatus::DryRun => f.write_str("dry_run"),
            RenameStatus::Renamed => f.write_str("renamed"),
            RenameStatus::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl TryFrom<String> for RenameStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        match s.as_str() {
            "pending" => Ok(RenameStatus::Pending),
            "dry_run" => Ok(RenameStatus::DryRun),
            "renamed" => Ok(RenameStatus::Renamed),
            other => match other.strip_prefix("error:") {
                Some(msg) => Ok(RenameStatus::Error(msg.trim_start().to_string())),
                None => Err(format!("unknown rename status '{other}'")),
            },
        }
    }
}

impl From<RenameStatus> for String {
    fn from(s: RenameStatus) -> Self {
        s.to_string()
    }
}

/// One element of the rename log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameLogEntry {
    pub original: String,
    pub new: String,
    pub status: RenameStatus,
}

/// Why a rename or undo step was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Target has an empty stem or contains a path separator.
    InvalidName,
    /// Source file does not exist.
    NotFound,
    /// Target equals the source.
    SameName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::InvalidName => "invalid name",
            SkipReason::NotFound => "not found",
            SkipReason::SameName => "same name",
        })
    }
}

/// A rename or undo step that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub original: String,
    pub new: String,
    pub reason: SkipReason,
}

/// Summary of [`rename_files`].
#[derive(Debug, Default)]
pub struct RenameReport {
    /// Attempted renames (`dry_run`, `renamed` or `error: …`), in CSV order.
    pub log: Vec<RenameLogEntry>,
    pub skipped: Vec<Skipped>,
    pub renamed: usize,
    pub errors: usize,
    /// Where the log was saved; `None` on dry runs or when nothing was attempted.
    pub log_path: Option<PathBuf>,
}

/// Summary of [`apply_undo`].
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Log entries restored to their original name, newest first.
    pub reversed: Vec<RenameLogEntry>,
    pub skipped: Vec<Skipped>,
    /// Entries that could not be restored, with the reason.
    pub errors: Vec<(RenameLogEntry, String)>,
}

/// Exact names of the PDFs in `dir`.
fn pdf_names_in(dir: &Path) -> Result<HashSet<String>, OcrRenameError> {
    let read_err = |e| OcrRenameError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut names = HashSet::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && crate::pipeline::input::has_pdf_extension(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Trim, append a missing `.pdf` and shorten the stem to fit
/// [`MAX_FILENAME_BYTES`]. An existing `.PDF` keeps its case.
fn normalize_target(name: &str) -> String {
    let name = name.trim();
    let has_ext = name
        .len()
        .checked_sub(".pdf".len())
        .and_then(|i| name.get(i..))
        .is_some_and(|ext| ext.eq_ignore_ascii_case(".pdf"));
    let (stem, ext) = if has_ext {
        name.split_at(name.len() - ".pdf".len())
    } else {
        (name, ".pdf")
    };
    let stem = truncate_to_bytes(stem, MAX_FILENAME_BYTES - ext.len()).trim_end();
    format!("{stem}{ext}")
}

/// A single path component with a non-blank stem. Dots inside a title
/// ("Wait... What.pdf") are fine.
fn is_valid_target(name: &str) -> bool {
    let stem = name
        .len()
        .checked_sub(".pdf".len())
        .and_then(|i| name.get(..i))
        .unwrap_or("");
    !stem.trim().is_empty() && !name.contains(['/', '\\', '\0'])
}

/// Insert ` (n)` before the extension: `"Dune.pdf"` → `"Dune (2).pdf"`.
/// The stem is shortened when the result would exceed [`MAX_FILENAME_BYTES`].
fn with_suffix(name: &str, n: usize) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    };
    let suffix = format!(" ({n}){ext}");
    let budget = MAX_FILENAME_BYTES.saturating_sub(suffix.len());
    let stem = truncate_to_bytes(stem, budget).trim_end();
    format!("{stem}{suffix}")
}

/// Give every entry a target name that is unique within `dir`.
///
/// Targets are normalised first (see [`rename_files`]). Names are compared
/// case-insensitively against the PDFs already in `dir` and against targets
/// chosen for earlier entries. A clash gets the first free ` (2)`, ` (3)`, …
/// suffix. An entry whose target only differs from its source in case is left
/// alone, unless another file already carries exactly that name (possible on
/// case-sensitive filesystems).
pub fn resolve_conflicts(
    dir: &Path,
    entries: &[ReviewEntry],
) -> Result<Vec<ReviewEntry>, OcrRenameError> {
    let mut exact = pdf_names_in(dir)?;
    let mut seen: HashSet<String> = exact.iter().map(|n| n.to_lowercase()).collect();
    let mut resolved = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut entry = entry.clone();
        entry.new_filename = normalize_target(&entry.new_filename);
        let target_lower = entry.new_filename.to_lowercase();

        let case_only = target_lower == entry.original_filename.to_lowercase();
        let clash = if case_only {
            entry.new_filename != entry.original_filename && exact.contains(&entry.new_filename)
        } else {
            seen.contains(&target_lower)
        };

        if clash {
            let mut n = 2;
            let mut candidate = with_suffix(&entry.new_filename, n);
            while seen.contains(&candidate.to_lowercase()) {
                n += 1;
                candidate = with_suffix(&entry.new_filename, n);
            }
            debug!("{} already taken, using {}", entry.new_filename, candidate);
            entry.new_filename = candidate;
        }

        seen.insert(entry.new_filename.to_lowercase());
        exact.insert(entry.new_filename.clone());
        resolved.push(entry);
    }

    Ok(resolved)
}

/// Rename the approved entries inside `dir`.
///
/// Targets without a `.pdf` extension get one, and overlong targets are cut
/// to [`MAX_FILENAME_BYTES`]. Invalid targets, missing sources and no-op
/// renames are skipped. Unless `dry_run` is set, a non-empty log is written
/// to `log_dir`.
pub fn rename_files(
    dir: &Path,
    entries: &[ReviewEntry],
    dry_run: bool,
    log_dir: &Path,
) -> Result<RenameReport, OcrRenameError> {
    crate::pipeline::input::ensure_directory(dir)?;

    let mut report = RenameReport::default();
    let mut candidates = Vec::new();

    for entry in entries.iter().filter(|e| e.is_approved()) {
        let mut entry = entry.clone();
        entry.new_filename = normalize_target(&entry.new_filename);
        if is_valid_target(&entry.new_filename) {
            candidates.push(entry);
        } else {
            warn!("Skipping {}: invalid name {:?}", entry.original_filename, entry.new_filename);
            report.skipped.push(Skipped {
                original: entry.original_filename,
                new: entry.new_filename,
                reason: SkipReason::InvalidName,
            });
        }
    }

    for entry in resolve_conflicts(dir, &candidates)? {
        let src = dir.join(&entry.original_filename);
        let dst = dir.join(&entry.new_filename);

        let reason = if !src.is_file() {
            Some(SkipReason::NotFound)
        } else if entry.original_filename == entry.new_filename {
            Some(SkipReason::SameName)
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!("Skipping {}: {}", entry.original_filename, reason);
            report.skipped.push(Skipped {
                original: entry.original_filename,
                new: entry.new_filename,
                reason,
            });
            continue;
        }

        // On a case-insensitive filesystem a case-only target is the source itself.
        let case_only =
            entry.original_filename.to_lowercase() == entry.new_filename.to_lowercase();
        let status = if dry_run {
            RenameStatus::DryRun
        } else if dst.exists() && !case_only {
            warn!(
                "Not renaming {}: {} already exists",
                entry.original_filename, entry.new_filename
            );
            report.errors += 1;
            RenameStatus::Error(format!("{} already exists", entry.new_filename))
        } else {
            match std::fs::rename(&src, &dst) {
                Ok(()) => {
                    info!("Renamed {} → {}", entry.original_filename, entry.new_filename);
                    report.renamed += 1;
                    RenameStatus::Renamed
                }
                Err(e) => {
                    warn!("Failed to rename {}: {}", entry.original_filename, e);
                    report.errors += 1;
                    RenameStatus::Error(e.to_string())
                }
            }
        };

        report.log.push(RenameLogEntry {
            original: entry.original_filename,
            new: entry.new_filename,
            status,
        });
    }

    if !dry_run && !report.log.is_empty() {
        report.log_path = Some(save_log(&report.log, log_dir)?);
    }

    Ok(report)
}

/// Write `log` to a new `rename_log_<timestamp>.json` in `log_dir`.
///
/// Earlier logs are never replaced, so every run stays undoable.
pub fn save_log(log: &[RenameLogEntry], log_dir: &Path) -> Result<PathBuf, OcrRenameError> {
    let (path, mut file) = crate::create_unique_file(log_dir, "rename_log", "json")?;
    let json = serde_json::to_string_pretty(log).map_err(|e| OcrRenameError::RenameLog {
        path: path.clone(),
        source: e,
    })?;
    file.write_all(json.as_bytes())
        .map_err(|e| OcrRenameError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    info!("Rename log saved to {}", path.display());
    Ok(path)
}

pub fn read_log(path: &Path) -> Result<Vec<RenameLogEntry>, OcrRenameError> {
    if !path.is_file() {
        return Err(OcrRenameError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|e| OcrRenameError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| OcrRenameError::RenameLog {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Entries an undo would restore, newest first.
pub fn preview_undo(log: &[RenameLogEntry]) -> Vec<&RenameLogEntry> {
    log.iter()
        .rev()
        .filter(|e| e.status == RenameStatus::Renamed)
        .collect()
}

/// Restore the original names recorded in `log`. Never overwrites a file.
pub fn apply_undo(log: &[RenameLogEntry], dir: &Path) -> Result<UndoReport, OcrRenameError> {
    crate::pipeline::input::ensure_directory(dir)?;
    let mut report = UndoReport::default();

    for entry in preview_undo(log) {
        let current = dir.join(&entry.new);
        let original = dir.join(&entry.original);

        if !current.exists() {
            warn!("Cannot undo {}: {} not found", entry.original, entry.new);
            report.skipped.push(Skipped {
                original: entry.original.clone(),
                new: entry.new.clone(),
                reason: SkipReason::NotFound,
            });
            continue;
        }

        // Same file on a case-insensitive filesystem is not a clash.
        let case_only = entry.original.to_lowercase() == entry.new.to_lowercase();
        if original.exists() && !case_only {
            warn!("Cannot undo {}: file already exists", entry.original);
            report
                .errors
                .push((entry.clone(), format!("{} already exists", entry.original)));
            continue;
        }

        match std::fs::rename(&current, &original) {
            Ok(()) => {
                info!("Restored {} → {}", entry.new, entry.original);
                report.reversed.push(entry.clone());
            }
            Err(e) => {
                warn!("Failed to restore {}: {}", entry.original, e);
                report.errors.push((entry.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}
