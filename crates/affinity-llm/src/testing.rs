//! Deterministic provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ChatMessage, CompletionError, CompletionProvider};

/// Replays queued results in order and records every request it receives.
/// Once the queue runs dry it answers with an empty string.
#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.lock_queue().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, err: CompletionError) {
        self.lock_queue().push_back(Err(err));
    }

    /// Every message list passed to `complete`, oldest call first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, CompletionError>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(messages.to_vec());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut queue = self.lock_queue();
            queue.pop_front()
        };
        next.unwrap_or_else(|| Ok(String::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
