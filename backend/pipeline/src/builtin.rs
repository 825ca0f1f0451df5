//! Built-in preprocessor modules.
//!
//! Preprocessors are compiled in and selected by manifest name; a
//! `messagePreprocessor` manifest whose name has no registered module is
//! skipped when the chain is built.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use vcp_core::ChatMessage;
use vcp_plugins::PlaceholderTable;

use crate::preprocessor::MessagePreprocessor;

/// Shared dependencies handed to built-in constructors.
#[derive(Clone)]
pub struct BuiltinDeps {
    pub placeholders: Arc<PlaceholderTable>,
}

/// Instantiate a built-in module by manifest name.
pub fn instantiate(name: &str, deps: &BuiltinDeps) -> Option<Arc<dyn MessagePreprocessor>> {
    match name {
        RoleDivider::NAME => Some(Arc::new(RoleDivider)),
        PlaceholderExpander::NAME => Some(Arc::new(PlaceholderExpander {
            placeholders: deps.placeholders.clone(),
        })),
        _ => None,
    }
}

/// Merges runs of same-role messages so roles strictly alternate.
///
/// Some chat frontends send several consecutive user turns; most model APIs
/// want one message per role turn. Merged bodies are joined with a divider.
pub struct RoleDivider;

impl RoleDivider {
    pub const NAME: &'static str = "role-divider";
    const DIVIDER: &'static str = "\n\n---\n\n";
}

#[async_trait]
impl MessagePreprocessor for RoleDivider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        messages: Vec<ChatMessage>,
        _config: &HashMap<String, String>,
    ) -> Result<Vec<ChatMessage>> {
        let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
        for msg in messages {
            if let Some(prev) = out.last_mut() {
                // Structured contents are not merged.
                if prev.role == msg.role {
                    if let (Some(a), Some(b)) = (prev.content.as_str(), msg.content.as_str()) {
                        let merged = format!("{a}{}{b}", Self::DIVIDER);
                        prev.content = Value::String(merged);
                        continue;
                    }
                }
            }
            out.push(msg);
        }
        Ok(out)
    }
}

/// Substitutes `{{Key}}` placeholders in every string message body.
pub struct PlaceholderExpander {
    placeholders: Arc<PlaceholderTable>,
}

impl PlaceholderExpander {
    pub const NAME: &'static str = "placeholder-expander";
}

#[async_trait]
impl MessagePreprocessor for PlaceholderExpander {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        mut messages: Vec<ChatMessage>,
        _config: &HashMap<String, String>,
    ) -> Result<Vec<ChatMessage>> {
        for msg in &mut messages {
            if let Some(text) = msg.content.as_str() {
                let resolved = self.placeholders.resolve_text(text).await;
                msg.content = Value::String(resolved);
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> BuiltinDeps {
        BuiltinDeps { placeholders: Arc::new(PlaceholderTable::new()) }
    }

    #[tokio::test]
    async fn role_divider_merges_consecutive_same_role() {
        let messages = vec![
            ChatMessage::text("user", "first"),
            ChatMessage::text("user", "second"),
            ChatMessage::text("assistant", "reply"),
        ];
        let out = RoleDivider
            .process(messages, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        let merged = out[0].content_text().unwrap();
        assert!(merged.contains("first"));
        assert!(merged.contains("second"));
        assert!(merged.contains("---"));
    }

    #[tokio::test]
    async fn role_divider_leaves_alternating_roles_alone() {
        let messages = vec![
            ChatMessage::text("user", "a"),
            ChatMessage::text("assistant", "b"),
            ChatMessage::text("user", "c"),
        ];
        let out = RoleDivider
            .process(messages.clone(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out, messages);
    }

    #[tokio::test]
    async fn placeholder_expander_rewrites_string_bodies() {
        let deps = deps();
        deps.placeholders.set("Weather", "sunny".into()).await;
        let module = instantiate(PlaceholderExpander::NAME, &deps).unwrap();
        let out = module
            .process(vec![ChatMessage::text("system", "It is {{Weather}}.")], &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out[0].content_text().unwrap(), "It is sunny.");
    }

    #[test]
    fn unknown_builtin_name_yields_none() {
        assert!(instantiate("no-such-module", &deps()).is_none());
    }
}
