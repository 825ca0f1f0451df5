use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a chat-message array as it flows through the preprocessor
/// pipeline. `content` is either a plain string or a structured array
/// (multimodal parts); the runtime only rewrites string contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: Value::String(content.into()) }
    }

    /// The content as text, if it is a plain string.
    pub fn content_text(&self) -> Option<&str> {
        self.content.as_str()
    }
}
