//! Chat-completion client.
//!
//! One operation, [`CompletionProvider::complete`]: role-tagged messages in,
//! reply text out. The HTTP adapter speaks the OpenAI-compatible
//! `/chat/completions` protocol; [`testing::ScriptedProvider`] stands in for it
//! in tests.

pub mod openai;
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::{OpenAiClient, OpenAiConfig};

/// Errors surfaced by a completion provider. All of them are fatal for the
/// call; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("provider rejected credentials (status {status})")]
    Auth { status: u16 },

    #[error("provider quota exceeded: {0}")]
    Quota(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into() }
    }
}

/// Stateless completion backend.
///
/// A malformed or empty provider response is an empty string, not an error.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Runs `complete` under a caller-set deadline.
pub async fn complete_with_timeout(
    provider: &dyn CompletionProvider,
    messages: &[ChatMessage],
    timeout: Duration,
) -> Result<String, CompletionError> {
    match tokio::time::timeout(timeout, provider.complete(messages)).await {
        Ok(result) => result,
        Err(_) => Err(CompletionError::Timeout(timeout)),
    }
}
