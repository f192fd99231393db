//! OpenAI-compatible backend implementation
//!
//! Works with any server that implements the OpenAI chat completions API and
//! accepts image data URLs (vLLM, LocalAI, llama-server with a vision model,
//! hosted OpenAI-style gateways).
//!
//! # Configuration
//!
//! Environment variables:
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-4o-mini)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::parsing::{parse_agent_action, parse_extraction};
use super::prompts::extraction_prompt;
use super::types::{AgentAction, DocumentInput, ExtractedTransaction};
use super::AIBackend;

/// Model used when `OPENAI_COMPATIBLE_MODEL` is unset
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible backend
///
/// # Example
///
/// ```rust,ignore
/// // vLLM serving a vision model
/// export OPENAI_COMPATIBLE_HOST="http://192.168.1.100:8000"
/// export OPENAI_COMPATIBLE_MODEL="Qwen/Qwen2-VL-7B-Instruct"
/// ```
#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleBackend {
    /// Create a new OpenAI-compatible backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    /// Create with an API key
    pub fn with_api_key(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url, model)
        }
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Create from environment variables
    ///
    /// Required: `OPENAI_COMPATIBLE_HOST`
    /// Optional: `OPENAI_COMPATIBLE_MODEL` (default: gpt-4o-mini)
    /// Optional: `OPENAI_COMPATIBLE_API_KEY`
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OPENAI_COMPATIBLE_HOST").ok()?;
        let model = std::env::var("OPENAI_COMPATIBLE_MODEL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());
        let api_key = std::env::var("OPENAI_COMPATIBLE_API_KEY").ok();

        let mut backend = Self::new(&host, &model);
        backend.api_key = api_key;
        Some(backend)
    }

    /// Send one user message and return the first choice's text
    async fn complete(&self, content: ChatContent, max_tokens: Option<u32>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature: Some(0.1),
            max_tokens,
            stream: false,
        };

        let mut req_builder = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Ai(format!("OpenAI API error {}: {}", status, body)));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Ai("No response from OpenAI API".into()))
    }
}

/// OpenAI chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Chat message
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: ChatContent,
}

/// Chat message content (text or multimodal)
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Content part for multimodal messages
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL for vision requests
#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// OpenAI chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completion choice
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

/// Chat response message
#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl AIBackend for OpenAICompatibleBackend {
    async fn extract_transactions(&self, doc: &DocumentInput) -> Result<Vec<ExtractedTransaction>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&doc.data);
        let content = ChatContent::Parts(vec![
            ContentPart::Text {
                text: extraction_prompt(doc.user_note.as_deref()),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", doc.mime_type, encoded),
                },
            },
        ]);

        let response = self.complete(content, Some(4096)).await?;
        debug!("OpenAI-compatible extraction response: {}", response);

        parse_extraction(&response)
    }

    async fn agent_step(&self, transcript: &str) -> Result<AgentAction> {
        let response = self
            .complete(ChatContent::Text(transcript.to_string()), None)
            .await?;
        debug!("OpenAI-compatible agent response: {}", response);

        parse_agent_action(&response)
    }

    async fn health_check(&self) -> bool {
        // Try /v1/models first (standard OpenAI endpoint)
        if let Ok(resp) = self
            .http_client
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }

        // Try /health (LocalAI, llama-server)
        if let Ok(resp) = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }

        false
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_new() {
        let backend = OpenAICompatibleBackend::new("http://localhost:8000", "qwen2-vl");
        assert_eq!(backend.model(), "qwen2-vl");
        assert_eq!(backend.host(), "http://localhost:8000");
    }

    #[test]
    fn test_backend_new_trims_trailing_slash() {
        let backend = OpenAICompatibleBackend::new("http://localhost:8000/", "qwen2-vl");
        assert_eq!(backend.host(), "http://localhost:8000");
    }

    #[test]
    fn test_backend_with_api_key() {
        let backend =
            OpenAICompatibleBackend::with_api_key("http://localhost:8000", "gpt-4o", "sk-test123");
        assert_eq!(backend.model(), "gpt-4o");
        assert_eq!(backend.api_key, Some("sk-test123".to_string()));
        assert_eq!(backend.with_model("other").api_key, Some("sk-test123".to_string()));
    }

    #[test]
    fn test_backend_from_env_missing() {
        std::env::remove_var("OPENAI_COMPATIBLE_HOST");

        let result = OpenAICompatibleBackend::from_env();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let backend = OpenAICompatibleBackend::new("http://localhost:99999", "qwen2-vl");
        let healthy = backend.health_check().await;
        assert!(!healthy);
    }

    #[test]
    fn test_chat_completion_request_serialization() {
        let request = ChatCompletionRequest {
            model: "qwen2-vl".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: ChatContent::Text("Hello".to_string()),
            }],
            temperature: Some(0.1),
            max_tokens: None,
            stream: false,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen2-vl");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
        // Use approximate comparison for floating point
        let temp = json["temperature"].as_f64().unwrap();
        assert!((temp - 0.1).abs() < 0.001);
        assert_eq!(json["stream"], false);
        // max_tokens should be omitted when None
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_chat_content_text_serialization() {
        let content = ChatContent::Text("Hello world".to_string());
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json, "Hello world");
    }

    #[test]
    fn test_chat_content_parts_serialization() {
        let content = ChatContent::Parts(vec![
            ContentPart::Text {
                text: "Extract transactions".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:application/pdf;base64,abc123".to_string(),
                },
            },
        ]);

        let json = serde_json::to_value(&content).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["type"], "text");
        assert_eq!(json[0]["text"], "Extract transactions");
        assert_eq!(json[1]["type"], "image_url");
        assert_eq!(json[1]["image_url"]["url"], "data:application/pdf;base64,abc123");
    }

    #[test]
    fn test_chat_completion_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "qwen2-vl",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "[{\"amount\": 5}]"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices.len(), 1);
        assert_eq!(
            response.choices[0].message.content,
            "[{\"amount\": 5}]"
        );
    }
}
