//! Tally Core Library
//!
//! Shared functionality for the Tally personal finance tracker:
//! - Domain models and value coercion
//! - Database access and migrations (SQLCipher, pooled)
//! - Proposal review state machine
//! - Pluggable AI backends (Gemini, OpenAI-compatible, mock)
//! - Document processor turning uploads into proposals

pub mod ai;
pub mod db;
pub mod error;
pub mod models;
pub mod processor;

/// Test utilities including mock Gemini server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{
    AIBackend, AIClient, AgentAction, AgentDecision, DocumentInput, ExtractedTransaction,
    GeminiBackend, MockBackend, NewAccountSpec, OpenAICompatibleBackend,
};
pub use db::{AuditEntry, Database, TransactionSearch};
pub use error::{Error, Result};
pub use processor::{DocumentProcessor, ProcessingSummary};
