//! Result types of an analysis run.

use crate::review::ReviewEntry;
use serde::{Deserialize, Serialize};

/// Everything produced by [`crate::analyze::analyze_directory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// One row per analysed file, sorted by original file name.
    pub entries: Vec<ReviewEntry>,
    pub stats: AnalysisStats,
}

/// Counters and token usage of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// PDFs found in the directory.
    pub total_files: usize,
    /// Files identified without error.
    pub analyzed_files: usize,
    /// Files that produced a sentinel row.
    pub failed_files: usize,
    /// Files skipped because an earlier review CSV already covers them.
    pub skipped_files: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Failed API attempts that were retried, summed over all files.
    #[serde(default)]
    pub total_retries: u64,
    pub total_duration_ms: u64,
    /// `None` when the model is not in the price table.
    pub estimated_cost_usd: Option<f64>,
}

/// Approximate list prices in USD per million (input, output) tokens.
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-haiku-4-5-20251001", 1.00, 5.00),
    ("claude-sonnet-4-5-20250929", 3.00, 15.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
];

/// Estimated cost of a run; batch requests are billed at half price.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64, batch: bool) -> Option<f64> {
    let (_, in_price, out_price) = PRICING.iter().find(|(m, _, _)| *m == model)?;
    let cost = input_tokens as f64 / 1_000_000.0 * in_price
        + output_tokens as f64 / 1_000_000.0 * out_price;
    Some(if batch { cost / 2.0 } else { cost })
}
