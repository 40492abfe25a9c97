use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use affinity_llm::{ChatMessage, CompletionProvider, complete_with_timeout};

/// Bound on a single favor change, in either direction.
pub const MAX_DELTA: i64 = 100;

/// Only the tail of a long transcript is sent for judgment.
const MAX_TRANSCRIPT_LINES: usize = 20;

/// One speaker-labelled line of the transcript under judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: String,
    pub text: String,
}

impl TranscriptLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Asks the model how much a character's favor toward the user should move.
#[derive(Clone)]
pub struct FavorEvaluator {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl FavorEvaluator {
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Returns a delta in `[-MAX_DELTA, MAX_DELTA]`. Any failure, from the
    /// provider or from parsing, yields 0.
    pub async fn evaluate(&self, character_name: &str, transcript: &[TranscriptLine]) -> i64 {
        if transcript.is_empty() {
            return 0;
        }

        let messages = judgment_messages(character_name, transcript);
        match complete_with_timeout(self.provider.as_ref(), &messages, self.timeout).await {
            Ok(text) => {
                let delta = parse_delta(&text);
                debug!("Favor judgment for {}: {:?} -> {}", character_name, text.trim(), delta);
                delta
            }
            Err(e) => {
                warn!("Favor judgment failed, treating as no change: {}", e);
                0
            }
        }
    }
}

pub fn judgment_messages(character_name: &str, transcript: &[TranscriptLine]) -> Vec<ChatMessage> {
    let start = transcript.len().saturating_sub(MAX_TRANSCRIPT_LINES);
    let lines = transcript[start..]
        .iter()
        .map(|l| format!("{}: {}", l.speaker, l.text.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You judge relationships in role-play conversations. Read the conversation and decide \
         how much {name}'s affection toward the other speaker changed because of it. \
         Answer with a single signed integer between -{max} and {max}, where negative means \
         {name} now likes them less and positive means more. Output only the number.",
        name = character_name,
        max = MAX_DELTA,
    );
    let user = format!("Conversation:\n{}\n\nFavor change for {}:", lines, character_name);

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Reads the leading signed integer of `text` and clamps it to
/// `[-MAX_DELTA, MAX_DELTA]`. Anything without one parses as 0.
pub fn parse_delta(text: &str) -> i64 {
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits: &str = &rest[..rest.bytes().take_while(u8::is_ascii_digit).count()];
    if digits.is_empty() {
        return 0;
    }

    // Only overflow can fail here; it saturates like any other oversized value.
    let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX).min(MAX_DELTA);
    if negative { -magnitude } else { magnitude }
}
