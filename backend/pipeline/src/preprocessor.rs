use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use vcp_core::ChatMessage;

/// An in-process transformation applied to the chat-message array before it
/// leaves for the LLM.
///
/// Implementations receive their effective config on every call and must
/// not cache it between calls.
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    /// Name for logging; matches the manifest name it is selected by.
    fn name(&self) -> &str;

    async fn process(
        &self,
        messages: Vec<ChatMessage>,
        config: &HashMap<String, String>,
    ) -> Result<Vec<ChatMessage>>;
}
