/// Database row types that map directly to SQLite rows.
/// Distinct from affinity-types models to keep the DB layer independent.

pub struct TurnRow {
    pub id: i64,
    pub persona_id: String,
    pub character_id: String,
    pub sender: String,
    pub text: String,
    pub character_name: String,
    pub character_image: Option<String>,
    pub character_age: Option<u32>,
    pub character_job: Option<String>,
    pub created_at: String,
}

/// Values written for a new turn; id and created_at come from SQLite.
pub struct NewTurn<'a> {
    pub persona_id: &'a str,
    pub character_id: &'a str,
    pub sender: &'a str,
    pub text: &'a str,
    pub character_name: &'a str,
    pub character_image: Option<&'a str>,
    pub character_age: Option<u32>,
    pub character_job: Option<&'a str>,
}

pub struct FavorRow {
    pub persona_id: String,
    pub character_id: String,
    pub favor: i64,
    pub updated_at: String,
}

pub struct CharacterRow {
    pub id: String,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub job: Option<String>,
    pub personality: Option<String>,
    pub background: Option<String>,
    pub appearance: Option<String>,
    pub speaking_style: Option<String>,
    pub relationship: Option<String>,
    pub world_setting: Option<String>,
    pub first_scene: Option<String>,
    pub first_message: Option<String>,
    pub image_url: Option<String>,
    pub updated_at: String,
}

pub struct PersonaRow {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}
