use serde::{Deserialize, Serialize};

use crate::models::{Character, Persona, Turn};

// -- Conversation --

/// One line of a client-held transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub text: String,
}

/// Body of `POST /conversation`. Fields are optional at the serde level so
/// that missing values surface as validation errors rather than JSON rejections.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub ok: bool,
    pub reply: String,
    pub favor_delta: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub ok: bool,
    pub turns: Vec<Turn>,
    pub favor: i64,
    /// True when the newest stored turn is a user turn with no reply after it.
    pub awaiting_reply: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConversationRequest {
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteConversationResponse {
    pub ok: bool,
    pub deleted: usize,
}

// -- Characters --

#[derive(Debug, Serialize)]
pub struct CharacterResponse {
    pub ok: bool,
    pub character: Character,
}

// -- Personas --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonaRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PersonaResponse {
    pub ok: bool,
    pub persona: Persona,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}
