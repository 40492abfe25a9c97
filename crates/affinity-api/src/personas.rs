use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use affinity_types::api::{CreatePersonaRequest, PersonaResponse};

use crate::convert;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_db};

const MAX_DISPLAY_NAME: usize = 64;

/// POST /personas: Register a persona. The id is generated unless supplied.
pub async fn create_persona(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreatePersonaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let display_name = req
        .display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::missing("displayName"))?;
    if display_name.chars().count() > MAX_DISPLAY_NAME {
        return Err(ApiError::Validation(format!(
            "displayName longer than {} characters",
            MAX_DISPLAY_NAME
        )));
    }

    let id = req
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let lookup = id.clone();
    let created = run_db(&state.db, move |db| {
        if !db.create_persona(&lookup, &display_name)? {
            return Ok(None);
        }
        db.get_persona(&lookup)
    })
    .await?;

    let persona = created
        .map(convert::persona)
        .ok_or_else(|| ApiError::Validation(format!("persona '{}' already exists", id)))?;

    Ok((StatusCode::CREATED, Json(PersonaResponse { ok: true, persona })))
}

/// GET /personas/{id}
pub async fn get_persona(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PersonaResponse>, ApiError> {
    let lookup = id.clone();
    let persona = run_db(&state.db, move |db| db.get_persona(&lookup))
        .await?
        .map(convert::persona)
        .ok_or_else(|| ApiError::NotFound(format!("persona '{}' not found", id)))?;

    Ok(Json(PersonaResponse { ok: true, persona }))
}
