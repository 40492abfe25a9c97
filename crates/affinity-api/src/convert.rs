//! Row → model conversions. Corrupt values are logged and defaulted rather
//! than failing the whole read.

use chrono::{DateTime, Utc};
use tracing::warn;

use affinity_db::models::{CharacterRow, PersonaRow, TurnRow};
use affinity_types::models::{Character, CharacterSnapshot, Persona, Sender, Turn};

pub fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Plain SQLite datetime() output has no zone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
            DateTime::default()
        })
}

pub fn turn(row: TurnRow) -> Turn {
    let created_at = parse_timestamp(&row.created_at, &format!("turn {}", row.id));
    Turn {
        id: row.id,
        sender: Sender::from_stored(&row.sender),
        text: row.text,
        character: CharacterSnapshot {
            name: row.character_name,
            image_url: row.character_image,
            age: row.character_age,
            job: row.character_job,
        },
        persona_id: row.persona_id,
        character_id: row.character_id,
        created_at,
    }
}

pub fn character(row: CharacterRow) -> Character {
    let updated_at = parse_timestamp(&row.updated_at, &format!("character {}", row.id));
    Character {
        id: row.id,
        name: row.name,
        age: row.age,
        gender: row.gender,
        job: row.job,
        personality: row.personality,
        background: row.background,
        appearance: row.appearance,
        speaking_style: row.speaking_style,
        relationship: row.relationship,
        world_setting: row.world_setting,
        first_scene: row.first_scene,
        first_message: row.first_message,
        image_url: row.image_url,
        updated_at: Some(updated_at),
    }
}

pub fn persona(row: PersonaRow) -> Persona {
    let created_at = parse_timestamp(&row.created_at, &format!("persona {}", row.id));
    Persona {
        id: row.id,
        display_name: row.display_name,
        created_at,
    }
}
