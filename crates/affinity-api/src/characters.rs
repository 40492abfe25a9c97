use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use affinity_types::api::CharacterResponse;
use affinity_types::models::Character;

use crate::convert;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_db};

/// PUT /characters/{id}: Create or replace a character. Turns already stored
/// keep the snapshot they were written with.
pub async fn put_character(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(mut character): ApiJson<Character>,
) -> Result<Json<CharacterResponse>, ApiError> {
    if character.name.trim().is_empty() {
        return Err(ApiError::missing("name"));
    }
    character.id = id.clone();

    let stored = run_db(&state.db, move |db| {
        db.upsert_character(&character)?;
        db.get_character(&character.id)
    })
    .await?
    .map(convert::character)
    .ok_or_else(|| ApiError::Store(format!("character '{}' vanished after upsert", id)))?;

    info!("Character {} saved", stored.id);
    Ok(Json(CharacterResponse { ok: true, character: stored }))
}

/// GET /characters/{id}
pub async fn get_character(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CharacterResponse>, ApiError> {
    let lookup = id.clone();
    let character = run_db(&state.db, move |db| db.get_character(&lookup))
        .await?
        .map(convert::character)
        .ok_or_else(|| ApiError::NotFound(format!("character '{}' not found", id)))?;

    Ok(Json(CharacterResponse { ok: true, character }))
}
