use affinity_db::Database;
use affinity_llm::ChatMessage;
use affinity_types::models::{ConversationKey, Sender, Turn};
use anyhow::Result;

use crate::convert;

/// Rough token cost of one message: a chars/4 estimate plus per-message framing.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4) + 4
}

/// Loads up to `limit` turns stored before `before_id`, oldest first.
pub fn load_history(
    db: &Database,
    key: &ConversationKey,
    limit: u32,
    before_id: Option<i64>,
) -> Result<Vec<Turn>> {
    let mut rows = db.recent_turns(&key.persona_id, &key.character_id, limit, before_id)?;
    // Store reads newest-first.
    rows.reverse();
    Ok(rows.into_iter().map(convert::turn).collect())
}

/// Builds `[system, ...history, current]` for the completion call.
///
/// History is trimmed from the oldest end until the estimate fits
/// `token_budget`. The system prompt and the current message are always sent,
/// even if they alone exceed the budget; the provider reports that case.
pub fn assemble(
    system_prompt: &str,
    history: &[Turn],
    current: &str,
    token_budget: Option<usize>,
) -> Vec<ChatMessage> {
    let mut used = estimate_tokens(system_prompt) + estimate_tokens(current);
    let mut kept = 0;
    for turn in history.iter().rev() {
        let cost = estimate_tokens(&turn.text);
        if let Some(budget) = token_budget {
            if used + cost > budget {
                break;
            }
        }
        used += cost;
        kept += 1;
    }

    let window = &history[history.len() - kept..];
    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    for turn in window {
        messages.push(match turn.sender {
            Sender::User => ChatMessage::user(turn.text.clone()),
            Sender::Assistant => ChatMessage::assistant(turn.text.clone()),
        });
    }
    messages.push(ChatMessage::user(current));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use affinity_db::models::NewTurn;
    use affinity_llm::Role;
    use affinity_types::models::CharacterSnapshot;

    fn turn(id: i64, sender: Sender, text: &str) -> Turn {
        Turn {
            id,
            persona_id: "p1".into(),
            character_id: "c1".into(),
            sender,
            text: text.into(),
            character: CharacterSnapshot::default(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn orders_system_history_then_current() {
        let history = vec![
            turn(1, Sender::User, "hi"),
            turn(2, Sender::Assistant, "hello"),
        ];
        let msgs = assemble("sys", &history, "how are you?", None);

        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(msgs[0].content, "sys");
        assert_eq!(msgs[3].content, "how are you?");
    }

    #[test]
    fn budget_drops_oldest_turns_first() {
        let long = "x".repeat(400); // ~104 tokens
        let history = vec![
            turn(1, Sender::User, &long),
            turn(2, Sender::Assistant, &long),
            turn(3, Sender::User, "recent"),
        ];
        // system(5) + current(5) + recent(6) + one long(104) = 120
        let msgs = assemble("sys", &history, "now", Some(125));

        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[2].content, "recent");
    }

    #[test]
    fn tiny_budget_keeps_system_and_current() {
        let history = vec![turn(1, Sender::User, "hello there")];
        let msgs = assemble("a long system prompt", &history, "current", Some(1));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "current");
    }

    #[test]
    fn load_history_returns_chronological_window() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new("p1", "c1");
        let mut last = 0;
        for i in 0..12 {
            last = db
                .insert_turn(&NewTurn {
                    persona_id: "p1",
                    character_id: "c1",
                    sender: if i % 2 == 0 { "user" } else { "assistant" },
                    text: &format!("t{}", i),
                    character_name: "Mira",
                    character_image: None,
                    character_age: None,
                    character_job: None,
                })
                .unwrap();
        }

        let history = load_history(&db, &key, 10, Some(last)).unwrap();
        let texts: Vec<_> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts.len(), 10);
        assert_eq!(texts.first(), Some(&"t1"));
        assert_eq!(texts.last(), Some(&"t10"));
        assert_eq!(history[0].sender, Sender::Assistant);
    }
}
