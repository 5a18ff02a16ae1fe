//! Parsing of the model's JSON reply into [`BookMetadata`].
//!
//! Models are told to answer with a bare JSON object but regularly wrap it in
//! a ```` ```json ```` fence or add a sentence before it. Parsing therefore
//! strips fences first and, failing that, falls back to the outermost
//! `{ … }` span of the reply.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder used when the model could not identify a title or author.
pub const UNKNOWN: &str = "Unknown";

/// Title/author metadata returned by the model for one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    /// ISO-ish language code as reported by the model ("ar", "en", …).
    pub language: String,
    /// 0.0–1.0
    pub confidence: f64,
    pub edition: String,
    pub notes: String,
}

impl BookMetadata {
    /// Metadata for a book that could not be identified; `title` carries the
    /// sentinel and `notes` the reason.
    pub fn failed(sentinel: &str, notes: impl Into<String>) -> Self {
        Self {
            title: sentinel.to_string(),
            author: UNKNOWN.to_string(),
            language: String::new(),
            confidence: 0.0,
            edition: String::new(),
            notes: notes.into(),
        }
    }
}

/// Wire shape of the reply. Every field is optional, may be `null`, and may
/// come back as a number or a list instead of a string (`"edition": 2`,
/// `"author": ["A", "B"]`).
#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    title: Option<serde_json::Value>,
    #[serde(default)]
    author: Option<serde_json::Value>,
    #[serde(default)]
    language: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    edition: Option<serde_json::Value>,
    #[serde(default)]
    notes: Option<serde_json::Value>,
}

impl From<RawReply> for BookMetadata {
    fn from(raw: RawReply) -> Self {
        Self {
            title: non_empty_or_unknown(raw.title.as_ref()),
            author: non_empty_or_unknown(raw.author.as_ref()),
            language: text_or_empty(raw.language.as_ref()),
            confidence: raw.confidence.as_ref().map_or(0.0, confidence_from_json),
            edition: text_or_empty(raw.edition.as_ref()),
            notes: text_or_empty(raw.notes.as_ref()),
        }
    }
}

/// Text form of a scalar or a list of scalars; `None` for null and objects.
fn text_from_json(v: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|i| !i.is_array())
                .filter_map(text_from_json)
                .filter(|s| !s.is_empty())
                .collect();
            Some(parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn text_or_empty(v: Option<&serde_json::Value>) -> String {
    v.and_then(text_from_json).unwrap_or_default()
}

fn non_empty_or_unknown(v: Option<&serde_json::Value>) -> String {
    match v.and_then(text_from_json) {
        Some(s) if !s.is_empty() => s,
        _ => UNKNOWN.to_string(),
    }
}

/// Accept `0.9`, `"0.9"` and `"0,9"`; anything else is 0. Clamped to [0, 1].
fn confidence_from_json(v: &serde_json::Value) -> f64 {
    let c = match v {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

static RE_FENCE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*```.*$\n?").unwrap());

/// Remove every markdown fence line (```` ``` ```` or ```` ```json ````).
fn strip_fences(text: &str) -> String {
    RE_FENCE_LINE.replace_all(text, "").trim().to_string()
}

/// Parse the model's reply into [`BookMetadata`].
///
/// # Errors
/// Returns the JSON error of the fence-stripped reply when neither it nor its
/// outermost `{ … }` span is a JSON object.
pub fn parse_reply(text: &str) -> Result<BookMetadata, serde_json::Error> {
    let cleaned = strip_fences(text);
    match serde_json::from_str::<RawReply>(&cleaned) {
        Ok(raw) => Ok(raw.into()),
        Err(first_err) => {
            let span = cleaned
                .find('{')
                .zip(cleaned.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &cleaned[start..=end]);
            match span.map(serde_json::from_str::<RawReply>) {
                Some(Ok(raw)) => Ok(raw.into()),
                _ => Err(first_err),
            }
        }
    }
}
