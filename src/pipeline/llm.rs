//! VLM interaction: ask the model who wrote the book in the page images.
//!
//! All prompt text lives in [`crate::prompts`]; this module owns the message
//! layout, the per-call timeout and the retry loop.
//!
//! ## Retry Strategy
//!
//! Rate-limit and overload errors are frequent under concurrent load and
//! usually clear within seconds. Failed calls are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`): 1 s → 2 s with the defaults.

use crate::config::AnalyzeConfig;
use crate::error::FileError;
use crate::pipeline::rate_limit::RateLimiter;
use crate::prompts::{SYSTEM_PROMPT, USER_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Raw model reply plus token usage for one book.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u32,
}

/// Send the page images of `file` to the model and return its reply text.
///
/// ## Message Layout
///
/// 1. **System message** — the librarian prompt (or user-supplied override)
/// 2. **User message** — [`USER_PROMPT`] with every page image attached
///
/// Every attempt, retries included, waits on `limiter` first.
pub async fn identify_book(
    provider: &Arc<dyn LLMProvider>,
    limiter: &RateLimiter,
    file: &str,
    images: Vec<ImageData>,
    config: &AnalyzeConfig,
) -> Result<LlmReply, FileError> {
    let system_prompt = config.system_prompt.as_deref().unwrap_or(SYSTEM_PROMPT);
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images(USER_PROMPT, images),
    ];
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                file, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        limiter.wait().await;

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    file, response.prompt_tokens, response.completion_tokens
                );
                return Ok(LlmReply {
                    text: response.content,
                    input_tokens: response.prompt_tokens as u64,
                    output_tokens: response.completion_tokens as u64,
                    retries: attempt,
                });
            }
            Ok(Err(e)) => {
                let err_msg = format!("{}", e);
                warn!("{}: attempt {} failed — {}", file, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
            Err(_) => {
                let err_msg = format!("timed out after {}s", config.api_timeout_secs);
                warn!("{}: attempt {} {}", file, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(FileError::LlmFailed {
        file: file.to_string(),
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalyzeConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
