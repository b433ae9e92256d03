//! Ordered chunk classifier.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! 1. thread-id key present → metadata (thread id extracted if possible)
//! 2. other JSON field markers, a complete JSON object, or a single-line
//!    `{...}` fragment → metadata
//! 3. server-error noise per the active [`NoisePolicy`] → error page
//! 4. anything else → content
//!
//! Markers are matched as raw substrings of the chunk, so prose that
//! quotes one of the field names verbatim (with the double quotes) is
//! classified as metadata.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::noise::{NoisePolicy, NoiseSignal};

const THREAD_ID_KEY: &str = "\"thread_id\"";

/// JSON field names the backend uses in its status envelopes.
const METADATA_MARKERS: &[&str] = &[
    "\"success\"",
    "\"data\"",
    "\"timestamp\"",
    "\"status\"",
    "\"message\"",
    "\"response\"",
];

/// Fallback for envelopes that are cut off or otherwise not valid JSON.
static THREAD_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""thread_id":\s*"([a-zA-Z0-9\-_]+)""#).expect("static regex")
});

/// A brace-delimited fragment on a single line.
static BARE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\{.*\}\s*$").expect("static regex"));

/// What a decoded chunk turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    /// Token delta to forward verbatim.
    Content,
    /// Structured side-channel data; consumed, never forwarded.
    Metadata { thread_id: Option<String> },
    /// Server error framing; dropped silently.
    ErrorPage,
}

/// Classify one decoded chunk.
pub fn classify_chunk(chunk: &str, policy: &dyn NoisePolicy) -> ChunkKind {
    if chunk.contains(THREAD_ID_KEY) {
        return ChunkKind::Metadata {
            thread_id: extract_thread_id(chunk),
        };
    }

    if METADATA_MARKERS.iter().any(|m| chunk.contains(m))
        || is_complete_json_object(chunk)
        || BARE_OBJECT.is_match(chunk)
    {
        return ChunkKind::Metadata { thread_id: None };
    }

    if policy.is_ignorable(NoiseSignal::Chunk(chunk)) {
        return ChunkKind::ErrorPage;
    }

    ChunkKind::Content
}

/// True when `text`, trimmed, is a syntactically valid JSON object.
pub fn is_complete_json_object(text: &str) -> bool {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return false;
    }
    serde_json::from_str::<serde_json::Map<String, Value>>(trimmed).is_ok()
}

/// Pull a thread id out of a metadata chunk.
///
/// Valid JSON is read structurally: `data.thread_id` of a successful
/// envelope first, then a top-level `thread_id`. Anything that fails to
/// parse falls back to pattern extraction.
pub fn extract_thread_id(chunk: &str) -> Option<String> {
    match serde_json::from_str::<Value>(chunk.trim()) {
        Ok(value) => thread_id_from_json(&value),
        Err(_) => THREAD_ID_PATTERN
            .captures(chunk)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()),
    }
}

fn thread_id_from_json(value: &Value) -> Option<String> {
    let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
    let nested = value
        .get("data")
        .and_then(|data| data.get("thread_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());

    if success {
        if let Some(id) = nested {
            return Some(id.to_string());
        }
    }

    value
        .get("thread_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
