//! Proxy wire envelope and reply extraction

use crate::models::Turn;
use serde::Serialize;
use serde_json::Value;

/// Shown when the reply carries neither text nor an error message
pub const EMPTY_REPLY_PLACEHOLDER: &str = "No text in the model response.";

#[derive(Debug, Serialize)]
pub struct ProxyEnvelope<'a> {
    pub model: &'a str,
    pub args: ProxyArgs<'a>,
}

#[derive(Debug, Serialize)]
pub struct ProxyArgs<'a> {
    pub contents: &'a [Turn],
}

/// Pull the answer out of a proxy reply.
///
/// Reads `candidates[0].content.parts[0].text`; when that is missing or empty,
/// falls back to the top-level `error` field, then to a fixed placeholder.
pub fn extract_text(body: &Value) -> String {
    let text = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());

    if let Some(text) = text {
        return text.to_string();
    }

    match body.get("error") {
        Some(Value::String(message)) if !message.is_empty() => message.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => EMPTY_REPLY_PLACEHOLDER.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Same as [`extract_text`] for a raw body; a body that is not JSON counts as empty
pub fn extract_text_from_bytes(bytes: &[u8]) -> String {
    let body: Value = serde_json::from_slice(bytes).unwrap_or(Value::Null);
    extract_text(&body)
}
