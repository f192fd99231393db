//! Mock backend for testing
//!
//! Replays scripted extractions and agent actions in order. Useful for unit
//! tests and development without an API key.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{AgentAction, DocumentInput, ExtractedTransaction};
use super::AIBackend;

/// Mock AI backend for testing
///
/// Clones share the same script, so a test can keep a handle while the
/// processor consumes it. With nothing scripted, extraction returns no items
/// and `agent_step` fails, which sends the processor down its heuristic path.
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    /// Every call fails with an AI error
    pub failing: bool,
    extractions: Arc<Mutex<VecDeque<Vec<ExtractedTransaction>>>>,
    actions: Arc<Mutex<VecDeque<AgentAction>>>,
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    /// Create an unhealthy mock backend
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Default::default()
        }
    }

    /// Create a backend whose calls all fail
    pub fn failing() -> Self {
        Self {
            healthy: true,
            failing: true,
            ..Default::default()
        }
    }

    /// Queue the result of one `extract_transactions` call
    pub fn with_extraction(self, items: Vec<ExtractedTransaction>) -> Self {
        if let Ok(mut queue) = self.extractions.lock() {
            queue.push_back(items);
        }
        self
    }

    /// Queue agent actions, returned one per `agent_step` call
    pub fn with_agent_actions(self, actions: Vec<AgentAction>) -> Self {
        if let Ok(mut queue) = self.actions.lock() {
            queue.extend(actions);
        }
        self
    }

    /// Agent actions not yet consumed
    pub fn remaining_actions(&self) -> usize {
        self.actions.lock().map(|q| q.len()).unwrap_or_default()
    }

    /// Create a new instance with a different model (no-op for mock)
    pub fn with_model(&self, _model: &str) -> Self {
        self.clone()
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing {
            return Err(Error::Ai("Mock backend failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn extract_transactions(&self, _doc: &DocumentInput) -> Result<Vec<ExtractedTransaction>> {
        self.check_failing()?;
        let mut queue = self
            .extractions
            .lock()
            .map_err(|_| Error::Ai("Mock script lock poisoned".into()))?;
        Ok(queue.pop_front().unwrap_or_default())
    }

    async fn agent_step(&self, _transcript: &str) -> Result<AgentAction> {
        self.check_failing()?;
        let mut queue = self
            .actions
            .lock()
            .map_err(|_| Error::Ai("Mock script lock poisoned".into()))?;
        queue
            .pop_front()
            .ok_or_else(|| Error::Ai("Mock agent has no scripted action".into()))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentInput {
        DocumentInput {
            data: vec![1, 2, 3],
            mime_type: "image/png".into(),
            user_note: None,
            filename: "r.png".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_replays_extractions_in_order() {
        let first = ExtractedTransaction {
            amount: Some(1.0),
            ..Default::default()
        };
        let mock = MockBackend::new()
            .with_extraction(vec![first.clone()])
            .with_extraction(vec![]);

        assert_eq!(mock.extract_transactions(&doc()).await.unwrap(), vec![first]);
        assert!(mock.extract_transactions(&doc()).await.unwrap().is_empty());
        assert!(mock.extract_transactions(&doc()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_agent_queue_shared_between_clones() {
        let mock = MockBackend::new().with_agent_actions(vec![AgentAction::ListAccounts]);
        let handle = mock.clone();

        assert_eq!(mock.agent_step("").await.unwrap(), AgentAction::ListAccounts);
        assert_eq!(handle.remaining_actions(), 0);
        assert!(handle.agent_step("").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_failing_and_unhealthy() {
        let failing = MockBackend::failing();
        assert!(matches!(
            failing.extract_transactions(&doc()).await,
            Err(Error::Ai(_))
        ));
        assert!(!MockBackend::unhealthy().health_check().await);
        assert!(MockBackend::new().health_check().await);
    }
}
