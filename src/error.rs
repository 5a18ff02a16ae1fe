//! Error types for the ocr-rename library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrRenameError`] — **Fatal**: the command cannot proceed at all
//!   (missing directory, unreadable review CSV, provider not configured,
//!   batch API rejected the request). Returned as `Err(OcrRenameError)` from
//!   the top-level entry points.
//!
//! * [`FileError`] — **Non-fatal**: a single PDF could not be identified
//!   (render glitch, transient API error, unparseable reply) but every other
//!   book is fine. It is turned into a sentinel row of the review CSV so the
//!   reviewer sees what went wrong instead of losing the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr-rename library.
#[derive(Debug, Error)]
pub enum OcrRenameError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The directory to scan or rename in does not exist.
    #[error("Directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// The directory exists but holds no `*.pdf` files.
    #[error("No PDF files found in '{dir}'")]
    NoPdfFiles { dir: PathBuf },

    /// A file named on the command line does not exist.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A required API key environment variable is unset or empty.
    #[error("Environment variable {var} is not set.\nExport it or add it to a .env file.")]
    MissingApiKey { var: &'static str },

    // ── Batch API errors ──────────────────────────────────────────────────
    /// The HTTP request to the batch API could not be sent or read.
    #[error("Batch API request failed: {reason}")]
    BatchRequestFailed { reason: String },

    /// The batch API answered with a non-success status code.
    #[error("Batch API returned HTTP {status}: {message}")]
    BatchApi { status: u16, message: String },

    /// Results were requested for a batch that is still running.
    #[error("Batch '{id}' is not done yet (status: {status})")]
    BatchNotEnded { id: String, status: String },

    // ── Review CSV / rename log errors ────────────────────────────────────
    /// The review CSV could not be read or written.
    #[error("Review CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The rename log could not be parsed.
    #[error("Invalid rename log '{path}': {source}")]
    RenameLog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file (CSV, log, manifest).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read an input file or list a directory.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single PDF.
///
/// Converted into a sentinel [`crate::review::ReviewEntry`] so the run
/// continues with the remaining books.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// Opening or rasterising the PDF failed.
    #[error("{file}: rendering failed: {detail}")]
    RenderFailed { file: String, detail: String },

    /// LLM call failed after retries.
    #[error("{file}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        file: String,
        retries: u32,
        detail: String,
    },

    /// The model replied, but not with the expected JSON object.
    #[error("{file}: could not parse model reply: {detail}")]
    ParseFailed { file: String, detail: String },
}

impl FileError {
    /// Sentinel title written to the review CSV for this failure.
    pub fn sentinel(&self) -> &'static str {
        match self {
            FileError::RenderFailed { .. } | FileError::LlmFailed { .. } => {
                crate::review::ERROR_TITLE
            }
            FileError::ParseFailed { .. } => crate::review::PARSE_ERROR_TITLE,
        }
    }

    /// Human-readable detail without the file name prefix, for the `notes` column.
    pub fn detail(&self) -> &str {
        match self {
            FileError::RenderFailed { detail, .. }
            | FileError::LlmFailed { detail, .. }
            | FileError::ParseFailed { detail, .. } => detail,
        }
    }
}
