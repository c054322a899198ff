/// Chat-completion service client
///
/// The workflow only needs "text in, text out": a system prompt and a user message go
/// in, the first choice's message content comes back.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use log::debug;

use crate::config_loader::{ModelSettings, ServiceSettings};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ContentPart { kind: "text".to_string(), text: text.to_string() }],
        }
    }

    /// Concatenated text of all parts
    pub fn joined_text(&self) -> String {
        self.content.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    pub store: bool,
}

impl CompletionRequest {
    /// Developer (system) prompt followed by one user message
    pub fn new(settings: &ModelSettings, system_prompt: &str, user_message: &str) -> Self {
        Self {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::text("developer", system_prompt),
                ChatMessage::text("user", user_message),
            ],
            response_format: ResponseFormat { kind: "text".to_string() },
            reasoning_effort: settings.reasoning_effort.clone(),
            store: settings.store,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service response contained no message content")]
    NoContent,
}

/// Anything that can answer a completion request
pub trait CompletionService: Send + Sync {
    fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ServiceError>;
}

/// Hosted chat-completion API over HTTPS
pub struct OpenAiClient {
    http: Client,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()?;
        let endpoint = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CompletionService for OpenAiClient {
    fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<String, ServiceError> {
        debug!(target: "completion_client", "→ POST {} model={} store={}", self.endpoint, request.model, request.store);

        let response = self.http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: ChatCompletionResponse = response.json()?;
        let content = first_content(parsed)?;
        debug!(target: "completion_client", "← {} chars from {}", content.len(), request.model);
        Ok(content)
    }
}

fn first_content(response: ChatCompletionResponse) -> Result<String, ServiceError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(ServiceError::NoContent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let req = CompletionRequest::new(&ModelSettings::reasoner_default(), "sys", "2x+1=5");
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({
            "model": "o3-mini",
            "messages": [
                {"role": "developer", "content": [{"type": "text", "text": "sys"}]},
                {"role": "user", "content": [{"type": "text", "text": "2x+1=5"}]}
            ],
            "response_format": {"type": "text"},
            "reasoning_effort": "medium",
            "store": false
        }));
    }

    #[test]
    fn test_hint_request_omits_reasoning_effort() {
        let req = CompletionRequest::new(&ModelSettings::hint_default(), "sys", "user");
        let body = serde_json::to_value(&req).unwrap();
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["store"], json!(true));
        assert_eq!(body["model"], json!("gpt-4o-mini"));
    }

    #[test]
    fn test_first_choice_content_is_returned() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Step 1: isolate x"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ]
        })).unwrap();
        assert_eq!(first_content(resp).unwrap(), "Step 1: isolate x");
    }

    #[test]
    fn test_missing_content_is_an_error() {
        let empty: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(first_content(empty), Err(ServiceError::NoContent)));

        let null: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        })).unwrap();
        assert!(matches!(first_content(null), Err(ServiceError::NoContent)));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let settings = ServiceSettings {
            base_url: "http://localhost:8080/v1/".to_string(),
            request_timeout_secs: 5,
        };
        let client = OpenAiClient::new(&settings).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
