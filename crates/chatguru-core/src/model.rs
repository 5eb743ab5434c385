//! The narrow contract between a chat session and the generative model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatResult;
use crate::state::ChatMessage;

/// Sampling parameters, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

/// How much of the conversation each request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    /// Only the latest user message; every turn starts from an empty history.
    #[default]
    Isolated,
    /// Every earlier message is replayed as history.
    Replay,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Isolated => "isolated",
            ContextMode::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// Prior turns, oldest first. Empty in `ContextMode::Isolated`.
    pub history: Vec<ChatMessage>,
    pub text: String,
    pub generation: GenerationConfig,
}

/// A model that answers one message at a time.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short name shown in the UI
    fn name(&self) -> &str;

    async fn send_message(&self, request: &ModelRequest) -> ChatResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.top_k, 64);
        assert_eq!(config.max_output_tokens, 8192);
        assert_eq!(config.response_mime_type, "text/plain");
    }

    #[test]
    fn test_generation_config_serializes_camel_case() {
        let value = serde_json::to_value(GenerationConfig::default()).unwrap();
        assert_eq!(value["topK"], 64);
        assert_eq!(value["maxOutputTokens"], 8192);
        assert_eq!(value["responseMimeType"], "text/plain");
    }
}
