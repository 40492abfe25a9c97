use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one ongoing roleplay thread: a persona talking to a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub persona_id: String,
    pub character_id: String,
}

impl ConversationKey {
    pub fn new(persona_id: impl Into<String>, character_id: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            character_id: character_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.persona_id, self.character_id)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Stored sender strings other than "user" are treated as the character's side.
    pub fn from_stored(value: &str) -> Self {
        if value == "user" { Self::User } else { Self::Assistant }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown sender '{}'", other)),
        }
    }
}

/// A roleplay character. Every descriptive field is optional; the prompt
/// builder fills gaps with placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub speaking_style: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub world_setting: Option<String>,
    #[serde(default)]
    pub first_scene: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Snapshot of the character fields copied onto every stored turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub name: String,
    pub image_url: Option<String>,
    pub age: Option<u32>,
    pub job: Option<String>,
}

impl From<&Character> for CharacterSnapshot {
    fn from(c: &Character) -> Self {
        Self {
            name: c.name.clone(),
            image_url: c.image_url.clone(),
            age: c.age,
            job: c.job.clone(),
        }
    }
}

/// The user-controlled identity speaking in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// One stored message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: i64,
    pub persona_id: String,
    pub character_id: String,
    pub sender: Sender,
    pub text: String,
    pub character: CharacterSnapshot,
    pub created_at: DateTime<Utc>,
}
