//! Google Gemini backend
//!
//! Documents are sent as inline base64 data next to the extraction prompt and
//! the model is asked for `application/json` output.
//!
//! # Configuration
//!
//! Environment variables:
//! - `GOOGLE_GENAI_KEY`: API key (required)
//! - `GOOGLE_GENAI_MODEL`: Model name (default: gemini-2.0-flash)
//! - `GEMINI_BASE_URL`: API root (default: the public v1beta endpoint)

use std::time::Duration;

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

/// Gemini API base URL
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when `GOOGLE_GENAI_MODEL` is unset
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Gemini `generateContent` backend
#[derive(Clone)]
pub struct GeminiBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiBackend {
    /// Create a backend against the public Gemini endpoint
    pub fn new(api_key: &str, model: &str) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            base_url: GEMINI_API_BASE.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Point the backend at a different API root (proxies, test servers)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
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
    /// Required: `GOOGLE_GENAI_KEY`
    /// Optional: `GOOGLE_GENAI_MODEL`, `GEMINI_BASE_URL`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GOOGLE_GENAI_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        let model = std::env::var("GOOGLE_GENAI_MODEL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());

        let backend = Self::new(&api_key, &model);
        Some(match std::env::var("GEMINI_BASE_URL") {
            Ok(base) if !base.trim().is_empty() => backend.with_base_url(&base),
            _ => backend,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    /// Run `generateContent` and return the first candidate's text
    async fn generate(&self, parts: Vec<ContentPart>) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.1),
                response_mime_type: Some("application/json".to_string()),
            }),
        };

        debug!(model = %self.model, "Sending request to Gemini API");

        let response = self
            .http_client
            .post(self.api_url("generateContent"))
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Ai(format!("Gemini API error {}: {}", status, body)));
        }

        let body: GenerateContentResponse = response.json().await?;
        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| Error::Ai("Empty response from Gemini API".into()))
    }
}

#[async_trait]
impl AIBackend for GeminiBackend {
    async fn extract_transactions(&self, doc: &DocumentInput) -> Result<Vec<ExtractedTransaction>> {
        let parts = vec![
            ContentPart::Text {
                text: extraction_prompt(doc.user_note.as_deref()),
            },
            ContentPart::InlineData {
                inline_data: InlineData {
                    mime_type: doc.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&doc.data),
                },
            },
        ];

        let response = self.generate(parts).await?;
        debug!("Gemini extraction response: {}", response);

        parse_extraction(&response)
    }

    async fn agent_step(&self, transcript: &str) -> Result<AgentAction> {
        let response = self
            .generate(vec![ContentPart::Text {
                text: transcript.to_string(),
            }])
            .await?;
        debug!("Gemini agent response: {}", response);

        parse_agent_action(&response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/models/{}", self.base_url, self.model))
            .query(&[("key", &self.api_key)])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

// ========== Gemini API request/response types ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_new() {
        let backend = GeminiBackend::new("key", "gemini-2.0-flash");
        assert_eq!(backend.model(), "gemini-2.0-flash");
        assert_eq!(backend.host(), GEMINI_API_BASE);
    }

    #[test]
    fn test_api_url_and_base_override() {
        let backend = GeminiBackend::new("key", "gemini-2.0-flash")
            .with_base_url("http://127.0.0.1:9000/v1beta/");
        assert_eq!(backend.host(), "http://127.0.0.1:9000/v1beta");
        assert_eq!(
            backend.api_url("generateContent"),
            "http://127.0.0.1:9000/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!backend.api_url("generateContent").contains("key"));
    }

    #[test]
    fn test_with_model_keeps_key() {
        let backend = GeminiBackend::new("secret", "a").with_model("b");
        assert_eq!(backend.model(), "b");
        assert_eq!(backend.api_key, "secret");
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![
                    ContentPart::Text { text: "Extract".into() },
                    ContentPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png".into(),
                            data: "aGk=".into(),
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig {
                temperature: None,
                response_mime_type: Some("application/json".into()),
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Extract");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "aGk=");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert!(json["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "[{\"amount\": 5}]"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10}
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let text = response.candidates[0].content.as_ref().unwrap().parts[0].text.clone();
        assert_eq!(text.as_deref(), Some("[{\"amount\": 5}]"));

        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert!(blocked.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let backend = GeminiBackend::new("key", "m").with_base_url("http://localhost:99999");
        assert!(!backend.health_check().await);
    }
}
