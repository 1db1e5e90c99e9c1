//! Request assembly
//!
//! Turns a prompt, an optional attachment and the prior history into the
//! ordered `contents` list the proxy expects.

use crate::models::{Attachment, InlineData, ModelRequest, Part, Role, Turn};

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    system_instruction: String,
}

impl RequestBuilder {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Build a request from the current prompt and the prior turns.
    ///
    /// The system instruction is only seeded into a conversation with no
    /// history. An attachment missing either its MIME type or its data is
    /// dropped. `history` is copied, never modified.
    pub fn build(
        &self,
        prompt: &str,
        history: &[Turn],
        attachment: Option<&Attachment>,
    ) -> ModelRequest {
        let mut contents = Vec::with_capacity(history.len() + 2);

        if history.is_empty() {
            contents.push(Turn::user_text(self.system_instruction.clone()));
        } else {
            contents.extend_from_slice(history);
        }

        let mut parts = Vec::with_capacity(2);

        if let Some(file) = attachment.filter(|a| a.is_complete()) {
            parts.push(Part::InlineData(InlineData {
                mime_type: file.mime_type.clone(),
                data: file.data.clone(),
            }));
        }

        parts.push(Part::Text(prompt.to_string()));

        contents.push(Turn {
            role: Role::User,
            parts,
        });

        ModelRequest { contents }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SYSTEM_INSTRUCTION)
    }
}
