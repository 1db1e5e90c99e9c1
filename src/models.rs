//! Core data models for the relay
//!
//! Wire shapes follow the model proxy's `contents` format:
//! `{"role": "user", "parts": [{"inlineData": {...}}, {"text": "..."}]}`

use serde::{Deserialize, Serialize};

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

//
// ================= Turn =================
//

/// Base64 file payload embedded directly in a turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Part {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData")]
    InlineData(InlineData),
}

/// One role-tagged message unit of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts, inline data skipped
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineData(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_attachment(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::InlineData(_)))
    }
}

//
// ================= Request =================
//

/// A file the user attached to the current prompt.
///
/// Either field may be empty when the caller only knows half of it; such an
/// attachment is dropped when the request is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.mime_type.is_empty() && !self.data.is_empty()
    }
}

/// Ordered turns ready to be sent to the proxy
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelRequest {
    pub contents: Vec<Turn>,
}

impl ModelRequest {
    /// The turn carrying the current prompt
    pub fn current_turn(&self) -> Option<&Turn> {
        self.contents.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_wire_shape() {
        let turn = Turn {
            role: Role::User,
            parts: vec![
                Part::InlineData(InlineData {
                    mime_type: "image/png".to_string(),
                    data: "aGk=".to_string(),
                }),
                Part::Text("what is this?".to_string()),
            ],
        };

        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "aGk="}},
                    {"text": "what is this?"}
                ]
            })
        );
    }

    #[test]
    fn test_turn_text_skips_inline_data() {
        let turn = Turn {
            role: Role::User,
            parts: vec![
                Part::InlineData(InlineData {
                    mime_type: "text/plain".to_string(),
                    data: "eA==".to_string(),
                }),
                Part::Text("summarize".to_string()),
            ],
        };
        assert_eq!(turn.text(), "summarize");
        assert!(turn.has_attachment());
        assert!(!Turn::model_text("ok").has_attachment());
    }

    #[test]
    fn test_partial_attachment_is_incomplete() {
        assert!(Attachment::new("image/png", "aGk=").is_complete());
        assert!(!Attachment::new("", "aGk=").is_complete());
        assert!(!Attachment::new("image/png", "").is_complete());
    }
}
