//! Progress-callback trait for per-file analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalyzeConfigBuilder::progress_callback`] to receive
//! events as each PDF is rendered, sent to the model and parsed.
//!
//! # Example
//!
//! ```rust
//! use ocr_rename::{AnalysisProgressCallback, AnalyzeConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, file: &str, title: &str, _confidence: f64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{file} → {title}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = AnalyzeConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the analysis pipeline as it processes each PDF.
///
/// Implementations must be `Send + Sync`: files are processed concurrently,
/// so `on_file_*` may be called from several tasks at once. All methods have
/// default no-op implementations.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any file is rendered.
    ///
    /// # Arguments
    /// * `total_files` — number of files that will be analysed (after resume filtering)
    fn on_analysis_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before a file is rendered and sent to the model.
    fn on_file_start(&self, file: &str) {
        let _ = file;
    }

    /// Called when a file was identified.
    ///
    /// # Arguments
    /// * `file`       — original file name
    /// * `title`      — suggested title
    /// * `confidence` — model confidence, 0.0–1.0
    fn on_file_complete(&self, file: &str, title: &str, confidence: f64) {
        let _ = (file, title, confidence);
    }

    /// Called when a file failed (render, API or parse error).
    fn on_file_error(&self, file: &str, error: &str) {
        let _ = (file, error);
    }

    /// Called once after all files have been attempted.
    fn on_analysis_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalyzeConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
