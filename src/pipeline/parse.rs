//! Decoding backend replies into [`ClassificationResult`]s.
//!
//! Models wrap JSON in markdown fences, prepend chatter, invent categories or
//! drop fields. None of that may abort a run: [`parse_reply`] either yields a
//! well-formed result or says the reply was unparseable, and the caller
//! substitutes the UNKNOWN sentinel.

use crate::output::{Category, ClassificationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Captures the body of the first fenced block, with or without a language tag.
static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)\s*```").unwrap());

/// Outcome of decoding one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    Parsed(ClassificationResult),
    /// The raw reply, kept for the sentinel's reasoning.
    Unparseable(String),
}

impl BackendReply {
    pub fn into_result(self) -> ClassificationResult {
        match self {
            BackendReply::Parsed(result) => result,
            BackendReply::Unparseable(raw) => ClassificationResult::unrecognized(format!(
                "Could not parse backend reply: {}",
                raw.trim()
            )),
        }
    }
}

#[derive(Deserialize)]
struct RawReply {
    category: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Decode `reply`, accepting fenced or bare JSON.
pub fn parse_reply(reply: &str) -> BackendReply {
    let Some(candidate) = json_candidate(reply) else {
        debug!("Reply contains no JSON object");
        return BackendReply::Unparseable(reply.to_string());
    };

    let raw: RawReply = match serde_json::from_str(candidate) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Reply JSON rejected: {}", e);
            return BackendReply::Unparseable(reply.to_string());
        }
    };

    match Category::from_label(&raw.category) {
        Some(category) => {
            BackendReply::Parsed(ClassificationResult::new(category, raw.confidence, raw.reasoning))
        }
        None => {
            debug!("Reply named unknown category '{}'", raw.category);
            BackendReply::Unparseable(reply.to_string())
        }
    }
}

/// The text most likely to be the JSON object: a fenced body if present,
/// else the span from the first `{` to the last `}`.
fn json_candidate(reply: &str) -> Option<&str> {
    let text = FENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or(reply, |m| m.as_str());
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
