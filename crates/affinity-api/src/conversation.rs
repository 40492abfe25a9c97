use axum::{
    Json,
    extract::{Query, State},
};
use tracing::{error, info};

use affinity_types::api::{
    ConversationQuery, ConversationResponse, DeleteConversationRequest,
    DeleteConversationResponse, SendMessageRequest, SendMessageResponse,
};
use affinity_types::models::{ConversationKey, Sender};

use crate::convert;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::orchestrator::TurnRequest;
use crate::state::{AppState, run_db};

/// POST /conversation: Send one message and get the character's reply.
///
/// The turn runs in its own task so that a client hanging up mid-request does
/// not cancel the store writes.
pub async fn send_message(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let turn = TurnRequest::try_from(req)?;

    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(async move { orchestrator.send(turn).await })
        .await
        .map_err(|e| {
            error!("Turn task join error: {}", e);
            ApiError::Store(e.to_string())
        })??;

    Ok(Json(SendMessageResponse {
        ok: true,
        reply: outcome.reply,
        favor_delta: outcome.favor_delta,
    }))
}

/// GET /conversation?personaId&characterId: Full history, oldest first, plus current favor.
pub async fn get_conversation(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let key = key_from(query.persona_id, query.character_id)?;

    let (rows, favor) = run_db(&state.db, move |db| {
        let rows = db.list_turns(&key.persona_id, &key.character_id)?;
        let favor = db.get_favor(&key.persona_id, &key.character_id)?;
        Ok((rows, favor))
    })
    .await?;

    let turns: Vec<_> = rows.into_iter().map(convert::turn).collect();
    let awaiting_reply = turns.last().is_some_and(|t| t.sender == Sender::User);

    Ok(Json(ConversationResponse {
        ok: true,
        turns,
        favor,
        awaiting_reply,
    }))
}

/// DELETE /conversation: Abandon a conversation. Removes every turn; deleting
/// an empty conversation succeeds. Favor is kept.
pub async fn delete_conversation(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteConversationRequest>,
) -> Result<Json<DeleteConversationResponse>, ApiError> {
    let key = key_from(req.persona_id, req.character_id)?;

    let lookup = key.clone();
    let deleted = run_db(&state.db, move |db| {
        db.delete_turns(&lookup.persona_id, &lookup.character_id)
    })
    .await?;
    state.scheduler.forget(&key);

    info!("Deleted {} turns for {}", deleted, key);
    Ok(Json(DeleteConversationResponse { ok: true, deleted }))
}

fn key_from(persona_id: Option<String>, character_id: Option<String>) -> Result<ConversationKey, ApiError> {
    let persona_id = persona_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing("personaId"))?;
    let character_id = character_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing("characterId"))?;
    Ok(ConversationKey::new(persona_id.trim(), character_id.trim()))
}
