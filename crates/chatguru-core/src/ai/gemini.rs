use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::model::{ChatModel, GenerationConfig, ModelRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the model refused rather than failed
const POLICY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent>,
    generation_config: &'a GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> ChatResult<Self> {
        if api_key.trim().is_empty() {
            return Err(ChatError::Configuration("Gemini API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, request: &ModelRequest) -> ChatResult<String> {
        let url = self.endpoint();
        let body = build_request(request);

        debug!(%url, history = request.history.len(), "sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(http_error(status, &text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)?;
        extract_reply(parsed)
    }
}

fn build_request(request: &ModelRequest) -> GeminiRequest<'_> {
    let mut contents: Vec<GeminiContent> = request
        .history
        .iter()
        .map(|msg| text_content(msg.role().as_str(), msg.content()))
        .collect();
    contents.push(text_content("user", &request.text));

    GeminiRequest {
        contents,
        generation_config: &request.generation,
    }
}

fn text_content(role: &str, text: &str) -> GeminiContent {
    GeminiContent {
        role: Some(role.to_string()),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
        }],
    }
}

fn extract_reply(response: GeminiResponse) -> ChatResult<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        warn!(%reason, "prompt blocked by Gemini");
        return Err(ChatError::ContentPolicy(reason));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ChatError::Transport("empty response".to_string()));
    };

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(text);
    }

    match candidate.finish_reason {
        Some(reason) if POLICY_FINISH_REASONS.contains(&reason.as_str()) => {
            warn!(%reason, "reply withheld by Gemini");
            Err(ChatError::ContentPolicy(reason))
        }
        _ => Err(ChatError::Transport("empty response".to_string())),
    }
}

fn http_error(status: StatusCode, body: &str) -> ChatError {
    let detail = serde_json::from_str::<GeminiErrorBody>(body)
        .map(|b| match b.error.status {
            Some(code) => format!("{} ({})", b.error.message, code),
            None => b.error.message,
        })
        .unwrap_or_else(|_| body.chars().take(200).collect());

    ChatError::Transport(format!("Gemini API error {}: {}", status, detail))
}
