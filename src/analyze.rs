//! Real-time analysis: identify every PDF of a directory now.
//!
//! Files are processed concurrently (`config.concurrency` in flight, request
//! starts paced by a shared [`RateLimiter`]). A file that fails to render,
//! times out or returns garbage becomes a sentinel row of the review CSV; it
//! never aborts the run. Use [`crate::batch`] instead for large libraries
//! where half-price, next-day results are acceptable.

use crate::config::{AnalyzeConfig, DEFAULT_MODEL};
use crate::error::{FileError, OcrRenameError};
use crate::metadata::{self, BookMetadata};
use crate::output::{estimate_cost, AnalysisOutput, AnalysisStats};
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::{self, input, llm};
use crate::review::{self, Approval, ReviewEntry};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one file, before aggregation into [`AnalysisStats`].
struct FileOutcome {
    entry: ReviewEntry,
    usage: Spent,
    failed: bool,
}

/// Identify the books in `dir` and return one review row per PDF.
///
/// # Returns
/// `Ok(AnalysisOutput)` even if some files failed (check
/// `output.stats.failed_files`); an empty `entries` when resume skipped
/// everything.
///
/// # Errors
/// Only for fatal errors: missing directory, no PDFs, no LLM provider.
pub async fn analyze_directory(
    dir: &Path,
    config: &AnalyzeConfig,
) -> Result<AnalysisOutput, OcrRenameError> {
    let total_start = Instant::now();
    info!("Analyzing PDFs in {}", dir.display());

    // ── Step 1: Discover and filter files ────────────────────────────────
    let all_files = input::discover_pdfs(dir)?;
    let total_files = all_files.len();
    let pending = pending_files(all_files, config);
    let skipped_files = total_files - pending.len();
    if skipped_files > 0 {
        info!("Resuming: skipping {} already-processed files", skipped_files);
    }

    if pending.is_empty() {
        return Ok(AnalysisOutput {
            entries: Vec::new(),
            stats: AnalysisStats {
                total_files,
                skipped_files,
                total_duration_ms: total_start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        });
    }

    // ── Step 2: Get/create provider ──────────────────────────────────────
    let (provider, model) = resolve_provider(config)?;
    info!("Using model {}", model);

    if let Some(ref cb) = config.progress_callback {
        cb.on_analysis_start(pending.len());
    }

    // ── Step 3: Process files concurrently ───────────────────────────────
    let limiter = RateLimiter::per_minute(config.requests_per_minute);
    let mut outcomes: Vec<FileOutcome> = stream::iter(
        pending
            .iter()
            .map(|path| analyze_file(&provider, &limiter, path, config)),
    )
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    outcomes.sort_by(|a, b| a.entry.original_filename.cmp(&b.entry.original_filename));

    // ── Step 4: Aggregate ────────────────────────────────────────────────
    let failed_files = outcomes.iter().filter(|o| o.failed).count();
    let analyzed_files = outcomes.len() - failed_files;
    let total_input_tokens = outcomes.iter().map(|o| o.usage.input_tokens).sum();
    let total_output_tokens = outcomes.iter().map(|o| o.usage.output_tokens).sum();
    let total_retries = outcomes.iter().map(|o| u64::from(o.usage.retries)).sum();

    if let Some(ref cb) = config.progress_callback {
        cb.on_analysis_complete(outcomes.len(), analyzed_files);
    }

    let stats = AnalysisStats {
        total_files,
        analyzed_files,
        failed_files,
        skipped_files,
        total_input_tokens,
        total_output_tokens,
        total_retries,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        estimated_cost_usd: estimate_cost(&model, total_input_tokens, total_output_tokens, false),
    };

    info!(
        "Analysis complete: {}/{} files, {} tokens in / {} out, {} retries, {}ms",
        analyzed_files,
        outcomes.len(),
        stats.total_input_tokens,
        stats.total_output_tokens,
        stats.total_retries,
        stats.total_duration_ms
    );

    Ok(AnalysisOutput {
        entries: outcomes.into_iter().map(|o| o.entry).collect(),
        stats,
    })
}

/// Drop files already identified by an earlier run when resuming.
pub(crate) fn pending_files(files: Vec<PathBuf>, config: &AnalyzeConfig) -> Vec<PathBuf> {
    if !config.resume {
        return files;
    }
    let done = review::already_processed(&config.output_dir);
    files
        .into_iter()
        .filter(|p| !done.contains(&input::file_name_of(p)))
        .collect()
}

/// Review row recording a failure; never pre-approved.
pub fn failed_entry(file: &str, sentinel: &str, detail: &str) -> ReviewEntry {
    let mut entry = review::make_entry(file, &BookMetadata::failed(sentinel, detail), 1.0);
    entry.approve = Approval::Review;
    entry
}

/// Render, ask and parse one file. Never fails; errors become sentinel rows.
async fn analyze_file(
    provider: &Arc<dyn LLMProvider>,
    limiter: &RateLimiter,
    path: &Path,
    config: &AnalyzeConfig,
) -> FileOutcome {
    let file = input::file_name_of(path);
    if let Some(ref cb) = config.progress_callback {
        cb.on_file_start(&file);
    }

    let result = identify(provider, limiter, path, &file, config).await;

    match result {
        Ok((meta, reply)) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_complete(&file, &meta.title, meta.confidence);
            }
            debug!("{} → {:?} (confidence {})", file, meta.title, meta.confidence);
            FileOutcome {
                entry: review::make_entry(&file, &meta, config.confidence_threshold),
                usage: Spent::from(&reply),
                failed: false,
            }
        }
        Err((err, usage)) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_error(&file, &err.to_string());
            }
            FileOutcome {
                entry: failed_entry(&file, err.sentinel(), err.detail()),
                usage,
                failed: true,
            }
        }
    }
}

/// Tokens and retries spent on one file, whether or not it succeeded.
#[derive(Debug, Default, Clone, Copy)]
struct Spent {
    input_tokens: u64,
    output_tokens: u64,
    retries: u32,
}

impl From<&llm::LlmReply> for Spent {
    fn from(reply: &llm::LlmReply) -> Self {
        Self {
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            retries: reply.retries,
        }
    }
}

async fn identify(
    provider: &Arc<dyn LLMProvider>,
    limiter: &RateLimiter,
    path: &Path,
    file: &str,
    config: &AnalyzeConfig,
) -> Result<(BookMetadata, llm::LlmReply), (FileError, Spent)> {
    let images = pipeline::prepare_pages(path, file, config)
        .await
        .map_err(|e| (e, Spent::default()))?;
    debug!("{}: sending {} page images", file, images.len());

    let reply = llm::identify_book(provider, limiter, file, images, config)
        .await
        .map_err(|e| {
            let retries = match &e {
                FileError::LlmFailed { retries, .. } => *retries,
                _ => 0,
            };
            (e, Spent { retries, ..Spent::default() })
        })?;

    match metadata::parse_reply(&reply.text) {
        Ok(meta) => Ok((meta, reply)),
        Err(e) => Err((
            FileError::ParseFailed {
                file: file.to_string(),
                detail: format!("Response parse error: {}", e),
            },
            Spent::from(&reply),
        )),
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default model for a named provider when `--model` is not given.
fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" | "azure" => "gpt-4.1-nano",
        "gemini" => "gemini-2.0-flash",
        "ollama" => "llama3.2-vision",
        _ => DEFAULT_MODEL,
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, OcrRenameError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        OcrRenameError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// Resolve the LLM provider and the model name used for cost reporting.
///
/// From most to least specific:
///
/// 1. **Pre-built provider** (`config.provider`).
/// 2. **Named provider** (`config.provider_name`) with `config.model` or the
///    provider's default model.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Anthropic** when `ANTHROPIC_API_KEY` is set, then **OpenAI** when
///    `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(
    config: &AnalyzeConfig,
) -> Result<(Arc<dyn LLMProvider>, String), OcrRenameError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), config.model_or_default().to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| default_model_for(name).to_string());
        return Ok((create_vision_provider(name, &model)?, model));
    }

    if let (Some(prov), Some(model)) = (
        env_non_empty("EDGEQUAKE_LLM_PROVIDER"),
        env_non_empty("EDGEQUAKE_MODEL"),
    ) {
        let model = config.model.clone().unwrap_or(model);
        return Ok((create_vision_provider(&prov, &model)?, model));
    }

    for (var, name) in [("ANTHROPIC_API_KEY", "anthropic"), ("OPENAI_API_KEY", "openai")] {
        if env_non_empty(var).is_some() {
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| default_model_for(name).to_string());
            return Ok((create_vision_provider(name, &model)?, model));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| OcrRenameError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, config.model_or_default().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{write_review_csv_to, ERROR_TITLE, PARSE_ERROR_TITLE};

    #[test]
    fn failed_entry_is_never_approved() {
        let e = failed_entry("x.pdf", PARSE_ERROR_TITLE, "bad json");
        assert_eq!(e.approve, Approval::Review);
        assert_eq!(e.suggested_title, "PARSE_ERROR");
        assert_eq!(e.suggested_author, "Unknown");
        assert_eq!(e.new_filename, "PARSE_ERROR.pdf");
        assert_eq!(e.notes, "bad json");
        assert!(e.is_sentinel());
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model_for("anthropic"), DEFAULT_MODEL);
        assert_eq!(default_model_for("openai"), "gpt-4.1-nano");
    }

    #[test]
    fn pending_files_respects_resume() {
        let out = tempfile::tempdir().unwrap();
        let done = review::make_entry(
            "a.pdf",
            &BookMetadata {
                title: "A".into(),
                author: "B".into(),
                language: String::new(),
                confidence: 0.9,
                edition: String::new(),
                notes: String::new(),
            },
            0.8,
        );
        let failed = failed_entry("b.pdf", ERROR_TITLE, "boom");
        write_review_csv_to(&[done, failed], &out.path().join("review_1.csv")).unwrap();

        let files = vec![
            PathBuf::from("/scans/a.pdf"),
            PathBuf::from("/scans/b.pdf"),
            PathBuf::from("/scans/c.pdf"),
        ];

        let config = AnalyzeConfig::builder()
            .output_dir(out.path())
            .build()
            .unwrap();
        assert_eq!(pending_files(files.clone(), &config).len(), 3);

        let config = AnalyzeConfig::builder()
            .output_dir(out.path())
            .resume(true)
            .build()
            .unwrap();
        let pending = pending_files(files, &config);
        assert_eq!(
            pending,
            vec![PathBuf::from("/scans/b.pdf"), PathBuf::from("/scans/c.pdf")]
        );
    }
}
