//! Configuration types for book identification.
//!
//! All analysis behaviour is controlled through [`AnalyzeConfig`], built via
//! its [`AnalyzeConfigBuilder`]. Rename and undo take no configuration
//! beyond their arguments, so this is the only config struct in the crate.

use crate::error::OcrRenameError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default model; cheap and good enough to read a title page.
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// Page counts tried, in order, after `max_pages` when the request is too large.
pub const FALLBACK_PAGES: [usize; 2] = [2, 1];

/// Suggestions at or above this confidence are pre-approved in the review CSV.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Configuration for identifying the books in a directory.
///
/// Built via [`AnalyzeConfig::builder()`] or using
/// [`AnalyzeConfig::default()`].
///
/// # Example
/// ```rust
/// use ocr_rename::AnalyzeConfig;
///
/// let config = AnalyzeConfig::builder()
///     .max_pages(3)
///     .concurrency(8)
///     .model("claude-sonnet-4-5-20250929")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalyzeConfig {
    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`] for Anthropic
    /// and the provider default otherwise.
    pub model: Option<String>,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Number of leading pages sent to the model. Default: 4.
    ///
    /// Cover, title page and copyright page are almost always within the
    /// first four pages of a scan.
    pub max_pages: usize,

    /// Upper bound for the encoded images of one request, in MiB. Default: 30.
    ///
    /// When the first `max_pages` pages exceed it, [`FALLBACK_PAGES`] are
    /// tried. A single page is sent even if it is still too large.
    pub max_payload_mb: usize,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 1568.
    pub max_rendered_pixels: u32,

    /// Number of PDFs analysed concurrently. Default: 5.
    pub concurrency: usize,

    /// Request starts allowed per minute across all workers. Default: 50.
    pub requests_per_minute: u32,

    /// Maximum tokens the LLM may generate per book. Default: 1024.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Retry attempts on a failed VLM call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-VLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Confidence at or above which a suggestion is pre-approved. Default: 0.8.
    pub confidence_threshold: f64,

    /// Directory receiving review CSVs, batch ids and manifests. Default: `output`.
    pub output_dir: PathBuf,

    /// Skip files already identified in an existing review CSV. Default: false.
    pub resume: bool,

    /// PDF user password for encrypted scans.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Optional per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            max_pages: 4,
            max_payload_mb: 30,
            max_rendered_pixels: 1568,
            concurrency: 5,
            requests_per_minute: 50,
            max_tokens: 1024,
            temperature: 0.0,
            max_retries: 2,
            retry_backoff_ms: 1000,
            api_timeout_secs: 120,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            output_dir: PathBuf::from("output"),
            resume: false,
            password: None,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalyzeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzeConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_pages", &self.max_pages)
            .field("max_payload_mb", &self.max_payload_mb)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("output_dir", &self.output_dir)
            .field("resume", &self.resume)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AnalyzeConfig {
    /// Create a new builder for `AnalyzeConfig`.
    pub fn builder() -> AnalyzeConfigBuilder {
        AnalyzeConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model name to report and price, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Page counts to try in order: `max_pages`, then the fallbacks, each
    /// capped at `available` and deduplicated.
    pub fn page_attempts(&self, available: usize) -> Vec<usize> {
        let mut attempts = Vec::with_capacity(1 + FALLBACK_PAGES.len());
        for n in std::iter::once(self.max_pages).chain(FALLBACK_PAGES) {
            let n = n.min(available).min(self.max_pages);
            if n > 0 && !attempts.contains(&n) {
                attempts.push(n);
            }
        }
        attempts
    }
}

/// Builder for [`AnalyzeConfig`].
pub struct AnalyzeConfigBuilder {
    config: AnalyzeConfig,
}

impl fmt::Debug for AnalyzeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.config.fmt(f)
    }
}

impl AnalyzeConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_payload_mb(mut self, mb: usize) -> Self {
        self.config.max_payload_mb = mb.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn requests_per_minute(mut self, n: u32) -> Self {
        self.config.requests_per_minute = n;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn confidence_threshold(mut self, t: f64) -> Self {
        self.config.confidence_threshold = t;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalyzeConfig, OcrRenameError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(OcrRenameError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.requests_per_minute == 0 {
            return Err(OcrRenameError::InvalidConfig(
                "Requests per minute must be ≥ 1".into(),
            ));
        }
        if c.max_pages == 0 {
            return Err(OcrRenameError::InvalidConfig(
                "At least one page must be sent per PDF".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(OcrRenameError::InvalidConfig(format!(
                "Confidence threshold must be 0.0–1.0, got {}",
                c.confidence_threshold
            )));
        }
        Ok(self.config)
    }
}
