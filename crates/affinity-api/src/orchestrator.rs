//! Handles one inbound message end to end: persist it, build the context,
//! get the character's reply, persist that, and occasionally re-judge favor.
//!
//! There is no transaction across the two writes and the completion call. A
//! crash in between leaves a user turn with no reply after it; callers see
//! that through `awaiting_reply` and recover by retrying, which appends a
//! fresh user turn.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use affinity_db::Database;
use affinity_db::models::NewTurn;
use affinity_llm::{CompletionProvider, complete_with_timeout};
use affinity_types::api::{HistoryEntry, SendMessageRequest};
use affinity_types::models::{Character, CharacterSnapshot, ConversationKey, Sender};

use crate::context;
use crate::convert;
use crate::error::ApiError;
use crate::evaluator::{FavorEvaluator, TranscriptLine};
use crate::prompt::build_system_prompt;
use crate::scheduler::FavorScheduler;
use crate::state::run_db;

const USER_LABEL: &str = "User";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Most recent stored turns sent as context.
    pub context_turns: u32,
    /// Estimated-token ceiling for prompt + history + message; `None` disables trimming.
    pub token_budget: Option<usize>,
    pub completion_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_turns: 10,
            token_budget: Some(6000),
            completion_timeout: Duration::from_secs(60),
        }
    }
}

/// A validated inbound message.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub key: ConversationKey,
    pub message: String,
    pub sender: Sender,
    pub history: Vec<HistoryEntry>,
}

impl TryFrom<SendMessageRequest> for TurnRequest {
    type Error = ApiError;

    fn try_from(req: SendMessageRequest) -> Result<Self, ApiError> {
        let persona_id = required(req.persona_id, "personaId")?;
        let character_id = required(req.character_id, "characterId")?;
        let message = required(req.message, "message")?;
        let sender = match req.sender.as_deref() {
            None => Sender::User,
            Some(s) => s.parse().map_err(ApiError::Validation)?,
        };

        Ok(Self {
            key: ConversationKey::new(persona_id.trim(), character_id.trim()),
            message,
            sender,
            history: req.history.unwrap_or_default(),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing(field))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Favor change applied during this turn; 0 when none was.
    pub favor_delta: i64,
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Arc<Database>,
    provider: Arc<dyn CompletionProvider>,
    scheduler: Arc<FavorScheduler>,
    evaluator: FavorEvaluator,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn CompletionProvider>,
        scheduler: Arc<FavorScheduler>,
        config: EngineConfig,
    ) -> Self {
        let evaluator = FavorEvaluator::new(provider.clone(), config.completion_timeout);
        Self {
            db,
            provider,
            scheduler,
            evaluator,
            config,
        }
    }

    pub async fn send(&self, req: TurnRequest) -> Result<TurnOutcome, ApiError> {
        let key = req.key.clone();

        let (character, persona_name) = self.resolve(&key).await?;
        let snapshot = CharacterSnapshot::from(&character);

        let inbound_id = self.append(&key, req.sender, &req.message, &snapshot).await?;

        let history = {
            let key = key.clone();
            let limit = self.config.context_turns;
            run_db(&self.db, move |db| context::load_history(db, &key, limit, Some(inbound_id)))
                .await?
        };

        let system_prompt = build_system_prompt(&character, persona_name.as_deref());
        let messages =
            context::assemble(&system_prompt, &history, &req.message, self.config.token_budget);

        let reply = complete_with_timeout(
            self.provider.as_ref(),
            &messages,
            self.config.completion_timeout,
        )
        .await
        .map_err(|e| {
            error!("Completion failed for {} via {}: {}", key, self.provider.name(), e);
            ApiError::Provider(e)
        })?;

        self.append(&key, Sender::Assistant, &reply, &snapshot).await?;

        let favor_delta = if req.sender == Sender::User {
            let persona_label = persona_name.as_deref().unwrap_or(USER_LABEL);
            let transcript = build_transcript(&req, persona_label, &character.name, &reply);
            self.reassess(&key, &character.name, !req.history.is_empty(), &transcript).await
        } else {
            0
        };

        info!(
            "Turn for {}: {} history turns, reply {} chars, favor delta {}",
            key,
            history.len(),
            reply.len(),
            favor_delta
        );
        Ok(TurnOutcome { reply, favor_delta })
    }

    /// Loads the character (required) and persona name (optional), and warns
    /// when the previous exchange never got its reply.
    async fn resolve(&self, key: &ConversationKey) -> Result<(Character, Option<String>), ApiError> {
        let lookup = key.clone();
        let (character, persona, last) = run_db(&self.db, move |db| {
            let character = db.get_character(&lookup.character_id)?;
            let persona = db.get_persona(&lookup.persona_id)?;
            let last = db.last_turn(&lookup.persona_id, &lookup.character_id)?;
            Ok((character, persona, last))
        })
        .await?;

        let character = character
            .map(convert::character)
            .ok_or_else(|| ApiError::NotFound(format!("character '{}' not found", key.character_id)))?;

        if let Some(last) = last {
            if Sender::from_stored(&last.sender) == Sender::User {
                warn!("Conversation {} has an unanswered user turn ({}); continuing", key, last.id);
            }
        }

        Ok((character, persona.map(|p| p.display_name)))
    }

    async fn append(
        &self,
        key: &ConversationKey,
        sender: Sender,
        text: &str,
        snapshot: &CharacterSnapshot,
    ) -> Result<i64, ApiError> {
        let key = key.clone();
        let text = text.to_string();
        let snapshot = snapshot.clone();
        run_db(&self.db, move |db| {
            db.insert_turn(&NewTurn {
                persona_id: &key.persona_id,
                character_id: &key.character_id,
                sender: sender.as_str(),
                text: &text,
                character_name: &snapshot.name,
                character_image: snapshot.image_url.as_deref(),
                character_age: snapshot.age,
                character_job: snapshot.job.as_deref(),
            })
        })
        .await
    }

    /// Ticks the schedule and, when due, judges and stores a favor change.
    /// Never fails: a judgment or store problem means no change this turn.
    async fn reassess(
        &self,
        key: &ConversationKey,
        character_name: &str,
        has_prior_transcript: bool,
        transcript: &[TranscriptLine],
    ) -> i64 {
        let decision = self.scheduler.tick(key, has_prior_transcript);
        if !decision.should_reassess() {
            return 0;
        }

        let delta = self.evaluator.evaluate(character_name, transcript).await;
        if delta == 0 {
            return 0;
        }

        let (persona_id, character_id) = (key.persona_id.clone(), key.character_id.clone());
        match run_db(&self.db, move |db| db.upsert_add_favor(&persona_id, &character_id, delta)).await {
            Ok(total) => {
                info!("Favor for {} moved by {} to {}", key, delta, total);
                delta
            }
            Err(e) => {
                warn!("Failed to store favor delta {} for {}: {}", delta, key, e);
                0
            }
        }
    }
}

/// The conversation shown to the favor judge: the client's transcript
/// followed by this exchange.
fn build_transcript(
    req: &TurnRequest,
    persona_label: &str,
    character_name: &str,
    reply: &str,
) -> Vec<TranscriptLine> {
    let mut lines: Vec<TranscriptLine> = req
        .history
        .iter()
        .map(|h| {
            let speaker = if Sender::from_stored(&h.sender) == Sender::User {
                persona_label
            } else {
                character_name
            };
            TranscriptLine::new(speaker, h.text.as_str())
        })
        .collect();

    lines.push(TranscriptLine::new(persona_label, req.message.as_str()));
    if !reply.trim().is_empty() {
        lines.push(TranscriptLine::new(character_name, reply));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{FixedDraw, ScheduleConfig, SystemClock};
    use affinity_llm::testing::ScriptedProvider;
    use affinity_llm::{CompletionError, Role};

    struct Harness {
        db: Arc<Database>,
        provider: Arc<ScriptedProvider>,
        scheduler: Arc<FavorScheduler>,
        orchestrator: Orchestrator,
    }

    /// `cadence` fixes every scheduler draw, so a reassessment fires every `cadence` user turns.
    fn harness(cadence: u32) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_character(&Character {
            id: "c1".into(),
            name: "Mira".into(),
            age: Some(24),
            job: Some("barista".into()),
            image_url: Some("mira.png".into()),
            ..Default::default()
        })
        .unwrap();
        db.create_persona("p1", "Ren").unwrap();

        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = Arc::new(FavorScheduler::with_parts(
            ScheduleConfig::default(),
            Box::new(FixedDraw(cadence)),
            Box::new(SystemClock),
        ));
        let orchestrator = Orchestrator::new(
            db.clone(),
            provider.clone(),
            scheduler.clone(),
            EngineConfig {
                completion_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );
        Harness { db, provider, scheduler, orchestrator }
    }

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            key: ConversationKey::new("p1", "c1"),
            message: message.into(),
            sender: Sender::User,
            history: vec![],
        }
    }

    /// A user message sent along with one earlier line from the character.
    fn request_after(message: &str, earlier: &str) -> TurnRequest {
        TurnRequest {
            history: vec![HistoryEntry {
                sender: "assistant".into(),
                text: earlier.into(),
            }],
            ..request(message)
        }
    }

    #[tokio::test]
    async fn successful_turn_appends_user_and_assistant() {
        let h = harness(5);
        h.provider.push_reply("*smiles* Welcome back.");

        let outcome = h.orchestrator.send(request("Hi Mira")).await.unwrap();
        assert_eq!(outcome.reply, "*smiles* Welcome back.");
        assert_eq!(outcome.favor_delta, 0);

        let turns = h.db.list_turns("p1", "c1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].sender, "user");
        assert_eq!(turns[0].text, "Hi Mira");
        assert_eq!(turns[1].sender, "assistant");
        assert_eq!(turns[1].character_name, "Mira");
        assert_eq!(turns[1].character_job.as_deref(), Some("barista"));
    }

    #[tokio::test]
    async fn provider_failure_keeps_only_user_turn() {
        let h = harness(5);
        h.provider.push_error(CompletionError::Auth { status: 401 });

        let err = h.orchestrator.send(request("Hi")).await.unwrap_err();
        assert!(matches!(err, ApiError::Provider(_)));
        assert_eq!(h.db.count_turns("p1", "c1").unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_character_is_not_found_and_writes_nothing() {
        let h = harness(5);
        let mut req = request("Hi");
        req.key = ConversationKey::new("p1", "ghost");

        let err = h.orchestrator.send(req).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(h.db.count_turns("p1", "ghost").unwrap(), 0);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn context_has_system_prior_turns_then_current() {
        let h = harness(5);
        h.provider.push_reply("first reply");
        h.orchestrator.send(request("first")).await.unwrap();
        h.provider.push_reply("second reply");
        h.orchestrator.send(request("second")).await.unwrap();

        let calls = h.provider.calls();
        let last = &calls[1];
        assert_eq!(last[0].role, Role::System);
        assert!(last[0].content.contains("You are Mira"));
        assert!(last[0].content.contains("with Ren"));
        let rest: Vec<(Role, &str)> = last[1..].iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            rest,
            vec![
                (Role::User, "first"),
                (Role::Assistant, "first reply"),
                (Role::User, "second"),
            ]
        );
    }

    #[tokio::test]
    async fn context_is_capped_at_configured_turns() {
        let h = harness(5);
        for i in 0..8 {
            h.provider.push_reply(format!("r{}", i));
            h.orchestrator.send(request(&format!("m{}", i))).await.unwrap();
        }
        h.provider.push_reply("done");
        h.orchestrator.send(request("last")).await.unwrap();

        let calls = h.provider.calls();
        let final_call = calls.last().unwrap();
        // system + 10 history + current
        assert_eq!(final_call.len(), 12);
        assert_eq!(final_call[1].content, "m3");
        assert_eq!(final_call[11].content, "last");
    }

    #[tokio::test]
    async fn reassessment_merges_delta_into_favor() {
        let h = harness(1);
        h.provider.push_reply("That's sweet of you.");
        h.provider.push_reply("12");

        let outcome = h.orchestrator.send(request_after("I made you tea", "You look cold.")).await.unwrap();
        assert_eq!(outcome.favor_delta, 12);
        assert_eq!(h.db.get_favor("p1", "c1").unwrap(), 12);

        h.provider.push_reply("Hmph.");
        h.provider.push_reply("-5");
        let outcome = h
            .orchestrator
            .send(request_after("Just kidding, it's cold", "That's sweet of you."))
            .await
            .unwrap();
        assert_eq!(outcome.favor_delta, -5);
        assert_eq!(h.db.get_favor("p1", "c1").unwrap(), 7);

        let judge = &h.provider.calls()[1];
        assert!(judge[1].content.contains("Mira: You look cold."));
        assert!(judge[1].content.contains("Ren: I made you tea"));
        assert!(judge[1].content.contains("Mira: That's sweet of you."));
    }

    #[tokio::test]
    async fn unparseable_judgment_leaves_favor_untouched() {
        let h = harness(1);
        h.provider.push_reply("Sure.");
        h.provider.push_reply("I think she likes it a lot");

        let outcome = h.orchestrator.send(request_after("hello", "Oh, it's you.")).await.unwrap();
        assert_eq!(outcome.favor_delta, 0);
        assert_eq!(h.provider.call_count(), 2);
        assert!(h.db.get_favor_row("p1", "c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_judgment_does_not_fail_the_reply() {
        let h = harness(1);
        h.provider.push_reply("Good morning!");
        h.provider.push_error(CompletionError::Network("reset".into()));

        let outcome = h.orchestrator.send(request_after("morning", "You're up early.")).await.unwrap();
        assert_eq!(outcome.reply, "Good morning!");
        assert_eq!(outcome.favor_delta, 0);
    }

    #[tokio::test]
    async fn client_history_is_used_as_transcript() {
        let h = harness(1);
        h.provider.push_reply("Of course I remember.");
        h.provider.push_reply("3");

        let mut req = request("Remember the festival?");
        req.history = vec![HistoryEntry { sender: "assistant".into(), text: "Lanterns everywhere.".into() }];
        h.orchestrator.send(req).await.unwrap();

        let judge = &h.provider.calls()[1];
        assert!(judge[1].content.contains("Mira: Lanterns everywhere."));
        assert!(judge[1].content.contains("Ren: Remember the festival?"));
    }

    #[tokio::test]
    async fn no_reassessment_without_client_transcript() {
        let h = harness(1);
        h.provider.push_reply("hi");
        h.provider.push_reply("hi again");

        for message in ["hello", "hello again"] {
            let outcome = h.orchestrator.send(request(message)).await.unwrap();
            assert_eq!(outcome.favor_delta, 0);
        }
        assert_eq!(h.provider.call_count(), 2);
        assert!(h.db.get_favor_row("p1", "c1").unwrap().is_none());
        assert_eq!(h.scheduler.remaining(&ConversationKey::new("p1", "c1")), Some(0));

        // The counter waited at zero, so the first turn with a transcript fires.
        h.provider.push_reply("You came back.");
        h.provider.push_reply("6");
        let outcome = h.orchestrator.send(request_after("I missed you", "hi again")).await.unwrap();
        assert_eq!(outcome.favor_delta, 6);
    }

    #[tokio::test]
    async fn assistant_authored_turns_do_not_tick_the_schedule() {
        let h = harness(1);
        h.provider.push_reply("...");
        let mut req = request("(narration) The rain stops.");
        req.sender = Sender::Assistant;

        let outcome = h.orchestrator.send(req).await.unwrap();
        assert_eq!(outcome.favor_delta, 0);
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.scheduler.remaining(&ConversationKey::new("p1", "c1")), None);
    }

    #[tokio::test]
    async fn stored_snapshot_survives_character_edit() {
        let h = harness(5);
        h.provider.push_reply("hey");
        h.orchestrator.send(request("hi")).await.unwrap();

        h.db.upsert_character(&Character {
            id: "c1".into(),
            name: "Mira Vale".into(),
            job: Some("florist".into()),
            ..Default::default()
        })
        .unwrap();

        let turns = h.db.list_turns("p1", "c1").unwrap();
        assert!(turns.iter().all(|t| t.character_name == "Mira"));
        assert!(turns.iter().all(|t| t.character_job.as_deref() == Some("barista")));
        assert!(turns.iter().all(|t| t.character_image.as_deref() == Some("mira.png")));
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let err = TurnRequest::try_from(SendMessageRequest {
            persona_id: Some("p1".into()),
            character_id: None,
            message: Some("hi".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = TurnRequest::try_from(SendMessageRequest {
            persona_id: Some("p1".into()),
            character_id: Some("c1".into()),
            message: Some("   ".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("message"));

        let err = TurnRequest::try_from(SendMessageRequest {
            persona_id: Some("p1".into()),
            character_id: Some("c1".into()),
            message: Some("hi".into()),
            sender: Some("narrator".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn sender_defaults_to_user() {
        let req = TurnRequest::try_from(SendMessageRequest {
            persona_id: Some("p1".into()),
            character_id: Some("c1".into()),
            message: Some("hi".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(req.sender, Sender::User);
        assert!(req.history.is_empty());
    }
}
