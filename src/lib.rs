//! # ocr-rename
//!
//! Give scanned PDF books meaningful file names by letting a Vision Language
//! Model (VLM) read their first pages.
//!
//! Scans usually arrive as `scan_0042.pdf` with no text layer and no usable
//! metadata. The title page, however, is right there: this crate rasterises
//! the first few pages, asks a VLM for title, author, language and edition,
//! and proposes `"Title - Author.pdf"`.
//!
//! ## Workflow
//!
//! ```text
//! DIR of PDFs
//!  │
//!  ├─ 1. Analyze  render → encode → VLM → parse    (real-time or batch)
//!  ├─ 2. Review   review_<ts>.csv, edited by a human (approve = yes)
//!  ├─ 3. Rename   approved rows only, conflicts get " (2)", " (3)" …
//!  └─ 4. Undo     rename_log_<ts>.json restores the original names
//! ```
//!
//! Nothing on disk is renamed until a human has looked at the CSV.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_rename::{analyze_directory, review, AnalyzeConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY
//!     let config = AnalyzeConfig::builder().max_pages(4).build()?;
//!     let output = analyze_directory(Path::new("scans"), &config).await?;
//!     let csv = review::write_review_csv(&output.entries, &config.output_dir)?;
//!     println!("review {} before renaming", csv.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `ocr-rename` binary (clap + anyhow + indicatif) |
//! | `bundled` | off     | Embed the PDFium library in the binary |
//!
//! ## Choosing a Model
//!
//! | Model | $/1M tokens | Notes |
//! |-------|------------|-------|
//! | `claude-haiku-4-5-20251001`  | $1.00/$5.00  | Default; batch mode halves the price |
//! | `claude-sonnet-4-5-20250929` | $3.00/$15.00 | Hard scans, non-Latin scripts |
//! | `gpt-4.1-mini`               | $0.40/$1.60  | Real-time only |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod batch;
pub mod config;
pub mod error;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rename;
pub mod review;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_directory, resolve_provider};
pub use batch::{batch_results, submit_batch, BatchClient, MessageBatch};
pub use config::{AnalyzeConfig, AnalyzeConfigBuilder};
pub use error::{FileError, OcrRenameError};
pub use metadata::BookMetadata;
pub use output::{AnalysisOutput, AnalysisStats};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use rename::{apply_undo, preview_undo, rename_files, RenameLogEntry, RenameStatus};
pub use review::{Approval, ReviewEntry};

/// Local-time stamp used in output file names, e.g. `20250301_142501`.
pub(crate) fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Create `<prefix>_<timestamp>.<ext>` in `dir`, never replacing a file.
///
/// A second file within the same second becomes `<prefix>_<timestamp>_2.<ext>`,
/// then `_3`, and so on.
pub(crate) fn create_unique_file(
    dir: &std::path::Path,
    prefix: &str,
    ext: &str,
) -> Result<(std::path::PathBuf, std::fs::File), OcrRenameError> {
    std::fs::create_dir_all(dir).map_err(|e| OcrRenameError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let stamp = timestamp();
    let mut n = 1;
    loop {
        let name = if n == 1 {
            format!("{prefix}_{stamp}.{ext}")
        } else {
            format!("{prefix}_{stamp}_{n}.{ext}")
        };
        let path = dir.join(name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(OcrRenameError::OutputWriteFailed { path, source: e }),
        }
    }
}
