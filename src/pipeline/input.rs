//! Input discovery: list the scanned PDFs in a directory.
//!
//! Only the directory's own entries are considered (no recursion), because
//! renames happen in place and the rename log stores bare file names.

use crate::error::OcrRenameError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether `path` has a `.pdf` extension, in any letter case.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Validate that `dir` exists and is a directory.
pub fn ensure_directory(dir: &Path) -> Result<(), OcrRenameError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(OcrRenameError::DirectoryNotFound {
            path: dir.to_path_buf(),
        })
    }
}

/// List every `*.pdf` regular file directly inside `dir`, sorted by file name.
///
/// # Errors
/// `DirectoryNotFound` when `dir` is not a directory, `NoPdfFiles` when it
/// contains no PDFs.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, OcrRenameError> {
    ensure_directory(dir)?;

    let entries = std::fs::read_dir(dir).map_err(|e| OcrRenameError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_pdf_extension(p))
        .collect();

    if files.is_empty() {
        return Err(OcrRenameError::NoPdfFiles {
            dir: dir.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} PDF files in {}", files.len(), dir.display());
    Ok(files)
}

/// Check the `%PDF` magic bytes so a mislabelled file yields a clear error
/// instead of a pdfium failure.
pub fn check_pdf_magic(path: &Path) -> Result<(), OcrRenameError> {
    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => OcrRenameError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => OcrRenameError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        warn!("{} does not start with %PDF", path.display());
        return Err(OcrRenameError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// The file name of `path` as a `String` (lossy for non-UTF-8 names).
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
