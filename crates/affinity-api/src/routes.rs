use axum::{
    Json, Router,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::{characters, conversation, personas};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversation",
            post(conversation::send_message)
                .get(conversation::get_conversation)
                .delete(conversation::delete_conversation),
        )
        .route(
            "/characters/{id}",
            put(characters::put_character).get(characters::get_character),
        )
        .route("/personas", post(personas::create_persona))
        .route("/personas/{id}", get(personas::get_persona))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
