//! Batch mode: submit every book to the Anthropic Message Batches API.
//!
//! Batches cost half as much as real-time calls and finish within 24 hours.
//! The workflow spans three commands:
//!
//! 1. [`submit_batch`] renders every pending PDF, uploads one batch and
//!    saves the batch id plus a manifest mapping request ids to file names.
//! 2. [`BatchClient::retrieve`] reports progress.
//! 3. [`batch_results`] downloads the JSONL results once the batch has ended
//!    and turns them into review rows plus token usage at batch prices.
//!
//! Request ids must match `[A-Za-z0-9_-]{1,64}`, which most book file names
//! do not, so requests are numbered (`file-00001`) and the manifest maps them
//! back.

use crate::analyze::{failed_entry, pending_files};
use crate::config::AnalyzeConfig;
use crate::error::{FileError, OcrRenameError};
use crate::metadata;
use crate::output::{estimate_cost, AnalysisOutput, AnalysisStats};
use crate::pipeline::{self, input};
use crate::prompts::{SYSTEM_PROMPT, USER_PROMPT};
use crate::review::{self, ReviewEntry, API_ERROR_TITLE, PARSE_ERROR_TITLE};
use edgequake_llm::ImageData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default API endpoint; override with `ANTHROPIC_BASE_URL`.
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// File holding the id of the most recently submitted batch.
pub const LAST_BATCH_ID_FILE: &str = "last_batch_id.txt";

// ── Wire types: requests ─────────────────────────────────────────────────

/// One entry of a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub params: MessageParams,
}

/// Body of a Messages API call.
#[derive(Debug, Clone, Serialize)]
pub struct MessageParams {
    pub model: String,
    pub max_tokens: usize,
    pub system: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

impl BatchRequest {
    /// Build the request for one book from its encoded pages.
    pub fn new(custom_id: String, images: Vec<ImageData>, config: &AnalyzeConfig) -> Self {
        let mut content: Vec<ContentBlock> = images
            .into_iter()
            .map(|img| ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: img.mime_type,
                    data: img.data,
                },
            })
            .collect();
        content.push(ContentBlock::Text {
            text: USER_PROMPT.to_string(),
        });

        Self {
            custom_id,
            params: MessageParams {
                model: config.model_or_default().to_string(),
                max_tokens: config.max_tokens,
                system: config
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
                messages: vec![Message {
                    role: "user",
                    content,
                }],
                temperature: config.temperature,
            },
        }
    }
}

// ── Wire types: responses ────────────────────────────────────────────────

/// A message batch as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub id: String,
    /// `in_progress`, `canceling` or `ended`.
    pub processing_status: String,
    #[serde(default)]
    pub request_counts: RequestCounts,
    #[serde(default)]
    pub results_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
}

impl MessageBatch {
    pub fn is_ended(&self) -> bool {
        self.processing_status == "ended"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

/// One line of the JSONL results file.
#[derive(Debug, Deserialize)]
pub struct BatchResultLine {
    pub custom_id: String,
    pub result: BatchResult,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchResult {
    Succeeded {
        message: ResultMessage,
    },
    Errored {
        #[serde(default)]
        error: serde_json::Value,
    },
    Canceled,
    Expired,
    #[serde(other)]
    Unknown,
}

impl BatchResult {
    fn kind(&self) -> &'static str {
        match self {
            BatchResult::Succeeded { .. } => "succeeded",
            BatchResult::Errored { .. } => "errored",
            BatchResult::Canceled => "canceled",
            BatchResult::Expired => "expired",
            BatchResult::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ResultContent>,
    #[serde(default)]
    pub usage: ResultUsage,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ResultMessage {
    /// Text of the first text block, if any.
    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            ResultContent::Text { text } => Some(text.as_str()),
            ResultContent::Other => None,
        })
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// Maps request ids back to the PDF file names of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: String,
    pub directory: PathBuf,
    /// custom_id → original file name
    pub files: BTreeMap<String, String>,
}

/// Path of the manifest for `batch_id` inside `output_dir`.
pub fn manifest_path(output_dir: &Path, batch_id: &str) -> PathBuf {
    output_dir.join(format!("batch_{batch_id}.manifest.json"))
}

fn save_manifest(output_dir: &Path, manifest: &BatchManifest) -> Result<PathBuf, OcrRenameError> {
    let path = manifest_path(output_dir, &manifest.batch_id);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| OcrRenameError::Internal(format!("manifest serialisation: {e}")))?;
    std::fs::write(&path, json).map_err(|e| OcrRenameError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

/// Load the manifest for `batch_id`, if one was saved in `output_dir`.
pub fn load_manifest(output_dir: &Path, batch_id: &str) -> Option<BatchManifest> {
    let path = manifest_path(output_dir, batch_id);
    let text = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&text) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
            None
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Minimal client for the Message Batches endpoints.
#[derive(Clone)]
pub struct BatchClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for BatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl BatchClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client from `ANTHROPIC_API_KEY` and optional `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, OcrRenameError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(OcrRenameError::MissingApiKey {
                var: "ANTHROPIC_API_KEY",
            })?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    fn batches_url(&self) -> String {
        format!("{}/v1/messages/batches", self.base_url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, OcrRenameError> {
        let response = req
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| OcrRenameError::BatchRequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OcrRenameError::BatchApi {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, OcrRenameError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| OcrRenameError::BatchRequestFailed {
                reason: format!("unexpected response body: {e}"),
            })
    }

    /// Submit a new batch.
    pub async fn create(&self, requests: &[BatchRequest]) -> Result<MessageBatch, OcrRenameError> {
        #[derive(Serialize)]
        struct CreateBody<'a> {
            requests: &'a [BatchRequest],
        }
        info!("Submitting batch of {} requests", requests.len());
        self.send_json(self.http.post(self.batches_url()).json(&CreateBody { requests }))
            .await
    }

    /// Fetch the current state of a batch.
    pub async fn retrieve(&self, batch_id: &str) -> Result<MessageBatch, OcrRenameError> {
        let url = format!("{}/{}", self.batches_url(), batch_id);
        self.send_json(self.http.get(url)).await
    }

    /// Download the raw JSONL results of an ended batch.
    pub async fn results_jsonl(&self, batch: &MessageBatch) -> Result<String, OcrRenameError> {
        let url = batch
            .results_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}/results", self.batches_url(), batch.id));
        self.send(self.http.get(url))
            .await?
            .text()
            .await
            .map_err(|e| OcrRenameError::BatchRequestFailed {
                reason: e.to_string(),
            })
    }
}

// ── Workflow ─────────────────────────────────────────────────────────────

/// What [`submit_batch`] sent.
#[derive(Debug)]
pub struct BatchSubmission {
    pub batch: MessageBatch,
    pub manifest_path: PathBuf,
    /// Number of requests in the batch.
    pub submitted: usize,
    /// Files that could not be prepared and were left out.
    pub failed: Vec<FileError>,
    /// Files skipped because an earlier review CSV already covers them.
    pub skipped: usize,
}

/// Request id of the `index`-th (0-based) file of a batch.
pub fn custom_id_for(index: usize) -> String {
    format!("file-{:05}", index + 1)
}

/// Render every pending PDF of `dir` and submit them as one batch.
///
/// Writes [`LAST_BATCH_ID_FILE`] and the manifest into `config.output_dir`.
///
/// # Returns
/// `Ok(None)` when nothing was left to submit.
pub async fn submit_batch(
    client: &BatchClient,
    dir: &Path,
    config: &AnalyzeConfig,
) -> Result<Option<BatchSubmission>, OcrRenameError> {
    let all_files = input::discover_pdfs(dir)?;
    let total = all_files.len();
    let pending = pending_files(all_files, config);
    let skipped = total - pending.len();
    info!("Preparing {} files for batch submission", pending.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_analysis_start(pending.len());
    }

    let mut requests = Vec::with_capacity(pending.len());
    let mut files = BTreeMap::new();
    let mut failed = Vec::new();

    for path in &pending {
        let file = input::file_name_of(path);
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_start(&file);
        }
        match pipeline::prepare_pages(path, &file, config).await {
            Ok(images) => {
                let custom_id = custom_id_for(files.len());
                debug!("{} → {} ({} pages)", file, custom_id, images.len());
                requests.push(BatchRequest::new(custom_id.clone(), images, config));
                files.insert(custom_id, file.clone());
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_complete(&file, "prepared", 1.0);
                }
            }
            Err(e) => {
                warn!("Skipping {}: {}", file, e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_error(&file, &e.to_string());
                }
                failed.push(e);
            }
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_analysis_complete(pending.len(), requests.len());
    }

    if requests.is_empty() {
        info!("No files to submit");
        return Ok(None);
    }

    let batch = client.create(&requests).await?;
    info!("Batch submitted: {} ({})", batch.id, batch.processing_status);

    std::fs::create_dir_all(&config.output_dir).map_err(|e| OcrRenameError::OutputWriteFailed {
        path: config.output_dir.clone(),
        source: e,
    })?;
    let id_path = config.output_dir.join(LAST_BATCH_ID_FILE);
    std::fs::write(&id_path, &batch.id).map_err(|e| OcrRenameError::OutputWriteFailed {
        path: id_path,
        source: e,
    })?;
    let manifest_path = save_manifest(
        &config.output_dir,
        &BatchManifest {
            batch_id: batch.id.clone(),
            directory: dir.to_path_buf(),
            files,
        },
    )?;

    Ok(Some(BatchSubmission {
        batch,
        manifest_path,
        submitted: requests.len(),
        failed,
        skipped,
    }))
}

/// Review rows and token usage for an ended batch.
///
/// # Errors
/// `BatchNotEnded` while the batch is still processing.
pub async fn batch_results(
    client: &BatchClient,
    batch_id: &str,
    output_dir: &Path,
    threshold: f64,
) -> Result<AnalysisOutput, OcrRenameError> {
    let batch = client.retrieve(batch_id).await?;
    if !batch.is_ended() {
        return Err(OcrRenameError::BatchNotEnded {
            id: batch.id,
            status: batch.processing_status,
        });
    }

    let names = load_manifest(output_dir, batch_id)
        .map(|m| m.files)
        .unwrap_or_default();
    if names.is_empty() {
        warn!("No manifest for batch {}; using request ids as file names", batch_id);
    }

    let jsonl = client.results_jsonl(&batch).await?;
    Ok(output_from_jsonl(&jsonl, &names, threshold))
}

/// Turn a JSONL results body into review rows, sorted by file name, and
/// usage stats priced at the batch discount.
///
/// Unparseable lines are logged and skipped.
pub fn output_from_jsonl(
    jsonl: &str,
    names: &BTreeMap<String, String>,
    threshold: f64,
) -> AnalysisOutput {
    let lines: Vec<BatchResultLine> = jsonl
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<BatchResultLine>(line) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Skipping malformed result line: {}", e);
                None
            }
        })
        .collect();

    let mut model: Option<&str> = None;
    let (mut input_tokens, mut output_tokens) = (0u64, 0u64);
    for line in &lines {
        if let BatchResult::Succeeded { message } = &line.result {
            input_tokens += message.usage.input_tokens;
            output_tokens += message.usage.output_tokens;
            if model.is_none() && !message.model.is_empty() {
                model = Some(&message.model);
            }
        }
    }

    let mut entries: Vec<ReviewEntry> = lines
        .iter()
        .map(|line| {
            let file = names
                .get(&line.custom_id)
                .cloned()
                .unwrap_or_else(|| line.custom_id.clone());
            entry_from_result(&file, &line.result, threshold)
        })
        .collect();
    entries.sort_by(|a, b| a.original_filename.cmp(&b.original_filename));

    let failed_files = entries.iter().filter(|e| e.is_sentinel()).count();
    let stats = AnalysisStats {
        total_files: entries.len(),
        analyzed_files: entries.len() - failed_files,
        failed_files,
        total_input_tokens: input_tokens,
        total_output_tokens: output_tokens,
        estimated_cost_usd: model
            .and_then(|m| estimate_cost(m, input_tokens, output_tokens, true)),
        ..Default::default()
    };
    AnalysisOutput { entries, stats }
}

fn entry_from_result(file: &str, result: &BatchResult, threshold: f64) -> ReviewEntry {
    match result {
        BatchResult::Succeeded { message } => {
            let parsed = message
                .first_text()
                .ok_or_else(|| "reply has no text block".to_string())
                .and_then(|text| metadata::parse_reply(text).map_err(|e| e.to_string()));
            match parsed {
                Ok(meta) => review::make_entry(file, &meta, threshold),
                Err(e) => failed_entry(file, PARSE_ERROR_TITLE, &format!("Parse error: {e}")),
            }
        }
        BatchResult::Errored { error } => failed_entry(
            file,
            API_ERROR_TITLE,
            &format!("Batch error: errored {error}"),
        ),
        other => failed_entry(
            file,
            API_ERROR_TITLE,
            &format!("Batch error: {}", other.kind()),
        ),
    }
}
