//! Pluggable AI backend abstraction
//!
//! This module provides a backend-agnostic interface for the two AI
//! operations the document pipeline needs: reading transactions out of a
//! receipt or statement, and stepping the matching agent.
//!
//! # Architecture
//!
//! - `AIBackend` trait: defines the interface for all AI operations
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `GeminiBackend`, `OpenAICompatibleBackend`, `MockBackend`
//!
//! # Usage
//!
//! ```rust,ignore
//! if let Some(ai) = AIClient::from_env() {
//!     let items = ai.extract_transactions(&input).await?;
//!     println!("{} candidate transactions", items.len());
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (gemini, openai_compatible, mock). Default: gemini
//! - `GOOGLE_GENAI_KEY`: Gemini API key (required for gemini backend)
//! - `GOOGLE_GENAI_MODEL`: Gemini model (default: gemini-2.0-flash)
//! - `GEMINI_BASE_URL`: Gemini API root override
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required for openai_compatible backend)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-4o-mini)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

mod gemini;
mod mock;
mod openai_compatible;
pub mod parsing;
pub mod prompts;
pub mod types;

pub use gemini::{GeminiBackend, DEFAULT_GEMINI_MODEL, GEMINI_API_BASE};
pub use mock::MockBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use types::*;

use async_trait::async_trait;

use crate::error::Result;

/// Trait defining the interface for all AI backends
///
/// Backends should be Send + Sync to allow use across async tasks.
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Read candidate transactions out of a receipt image or statement PDF
    async fn extract_transactions(&self, doc: &DocumentInput) -> Result<Vec<ExtractedTransaction>>;

    /// Ask the matching agent for its next action given the transcript so far
    async fn agent_step(&self, transcript: &str) -> Result<AgentAction>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Get the model name
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete AI client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AIClient {
    /// Google Gemini (`generateContent`)
    Gemini(GeminiBackend),
    /// OpenAI-compatible chat completions with vision input
    OpenAICompatible(OpenAICompatibleBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Checks `AI_BACKEND` to determine which backend to use:
    /// - `gemini` (default): Uses GOOGLE_GENAI_KEY and GOOGLE_GENAI_MODEL
    /// - `openai_compatible`: Uses OPENAI_COMPATIBLE_HOST and OPENAI_COMPATIBLE_MODEL
    /// - `mock`: Creates a mock backend for testing
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "gemini".to_string());

        match backend.to_lowercase().as_str() {
            "gemini" | "google" => GeminiBackend::from_env().map(AIClient::Gemini),
            "openai_compatible" | "openai" | "vllm" | "localai" => {
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to gemini");
                GeminiBackend::from_env().map(AIClient::Gemini)
            }
        }
    }

    /// Create a Gemini backend directly
    pub fn gemini(api_key: &str, model: &str) -> Self {
        AIClient::Gemini(GeminiBackend::new(api_key, model))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            AIClient::Gemini(b) => AIClient::Gemini(b.with_model(model)),
            AIClient::OpenAICompatible(b) => AIClient::OpenAICompatible(b.with_model(model)),
            AIClient::Mock(b) => AIClient::Mock(b.with_model(model)),
        }
    }
}

// Implement AIBackend for AIClient by delegating to the inner backend
#[async_trait]
impl AIBackend for AIClient {
    async fn extract_transactions(&self, doc: &DocumentInput) -> Result<Vec<ExtractedTransaction>> {
        match self {
            AIClient::Gemini(b) => b.extract_transactions(doc).await,
            AIClient::OpenAICompatible(b) => b.extract_transactions(doc).await,
            AIClient::Mock(b) => b.extract_transactions(doc).await,
        }
    }

    async fn agent_step(&self, transcript: &str) -> Result<AgentAction> {
        match self {
            AIClient::Gemini(b) => b.agent_step(transcript).await,
            AIClient::OpenAICompatible(b) => b.agent_step(transcript).await,
            AIClient::Mock(b) => b.agent_step(transcript).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::Gemini(b) => b.health_check().await,
            AIClient::OpenAICompatible(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::Gemini(b) => b.model(),
            AIClient::OpenAICompatible(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::Gemini(b) => b.host(),
            AIClient::OpenAICompatible(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_client_mock() {
        let client = AIClient::mock();
        assert_eq!(client.model(), "mock");
        assert_eq!(client.host(), "mock://localhost");
    }

    #[test]
    fn test_ai_client_gemini_with_model() {
        let client = AIClient::gemini("key", DEFAULT_GEMINI_MODEL).with_model("gemini-1.5-pro");
        assert_eq!(client.model(), "gemini-1.5-pro");
        assert_eq!(client.host(), GEMINI_API_BASE);
    }

    #[tokio::test]
    async fn test_mock_health_check() {
        let client = AIClient::mock();
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_mock_extracts_nothing_by_default() {
        let client = AIClient::mock();
        let doc = DocumentInput {
            data: b"%PDF-1.4".to_vec(),
            mime_type: "application/pdf".into(),
            user_note: None,
            filename: "statement.pdf".into(),
        };
        assert!(client.extract_transactions(&doc).await.unwrap().is_empty());
    }
}
