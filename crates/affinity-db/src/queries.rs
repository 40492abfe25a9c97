use crate::Database;
use crate::models::{CharacterRow, FavorRow, NewTurn, PersonaRow, TurnRow};
use affinity_types::models::Character;
use anyhow::Result;
use rusqlite::{Connection, Row};

const TURN_COLUMNS: &str = "id, persona_id, character_id, sender, text, character_name, \
     character_image, character_age, character_job, created_at";

impl Database {
    // -- Turns --

    /// Appends a turn and returns its id.
    pub fn insert_turn(&self, turn: &NewTurn<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turns (persona_id, character_id, sender, text, character_name,
                                    character_image, character_age, character_job)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    turn.persona_id,
                    turn.character_id,
                    turn.sender,
                    turn.text,
                    turn.character_name,
                    turn.character_image,
                    turn.character_age,
                    turn.character_job,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest-first page of turns for a key. With `before_id`, only turns
    /// stored before that turn are considered.
    pub fn recent_turns(
        &self,
        persona_id: &str,
        character_id: &str,
        limit: u32,
        before_id: Option<i64>,
    ) -> Result<Vec<TurnRow>> {
        self.with_conn(|conn| query_recent_turns(conn, persona_id, character_id, limit, before_id))
    }

    /// Every turn for a key, oldest first.
    pub fn list_turns(&self, persona_id: &str, character_id: &str) -> Result<Vec<TurnRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TURN_COLUMNS} FROM turns
                 WHERE persona_id = ?1 AND character_id = ?2
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([persona_id, character_id], turn_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_turn(&self, persona_id: &str, character_id: &str) -> Result<Option<TurnRow>> {
        let mut rows = self.recent_turns(persona_id, character_id, 1, None)?;
        Ok(rows.pop())
    }

    pub fn count_turns(&self, persona_id: &str, character_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE persona_id = ?1 AND character_id = ?2",
                [persona_id, character_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Removes the whole conversation. Returns how many turns were deleted;
    /// zero is not an error.
    pub fn delete_turns(&self, persona_id: &str, character_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM turns WHERE persona_id = ?1 AND character_id = ?2",
                [persona_id, character_id],
            )?;
            Ok(n)
        })
    }

    // -- Favor --

    /// Adds `delta` to the key's favor, creating the row on first use.
    /// A single statement, so concurrent deltas never overwrite each other.
    /// Returns the new total.
    pub fn upsert_add_favor(&self, persona_id: &str, character_id: &str, delta: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let total = conn.query_row(
                "INSERT INTO favors (persona_id, character_id, favor)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(persona_id, character_id) DO UPDATE SET
                     favor = favor + excluded.favor,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 RETURNING favor",
                rusqlite::params![persona_id, character_id, delta],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }

    pub fn get_favor_row(&self, persona_id: &str, character_id: &str) -> Result<Option<FavorRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT persona_id, character_id, favor, updated_at FROM favors
                 WHERE persona_id = ?1 AND character_id = ?2",
                [persona_id, character_id],
                |row| {
                    Ok(FavorRow {
                        persona_id: row.get(0)?,
                        character_id: row.get(1)?,
                        favor: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Current favor, 0 when no delta was ever applied.
    pub fn get_favor(&self, persona_id: &str, character_id: &str) -> Result<i64> {
        Ok(self
            .get_favor_row(persona_id, character_id)?
            .map(|r| r.favor)
            .unwrap_or(0))
    }

    // -- Characters --

    pub fn upsert_character(&self, c: &Character) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO characters (id, name, age, gender, job, personality, background,
                                         appearance, speaking_style, relationship, world_setting,
                                         first_scene, first_message, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     age = excluded.age,
                     gender = excluded.gender,
                     job = excluded.job,
                     personality = excluded.personality,
                     background = excluded.background,
                     appearance = excluded.appearance,
                     speaking_style = excluded.speaking_style,
                     relationship = excluded.relationship,
                     world_setting = excluded.world_setting,
                     first_scene = excluded.first_scene,
                     first_message = excluded.first_message,
                     image_url = excluded.image_url,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                rusqlite::params![
                    c.id,
                    c.name,
                    c.age,
                    c.gender,
                    c.job,
                    c.personality,
                    c.background,
                    c.appearance,
                    c.speaking_style,
                    c.relationship,
                    c.world_setting,
                    c.first_scene,
                    c.first_message,
                    c.image_url,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_character(&self, id: &str) -> Result<Option<CharacterRow>> {
        self.with_conn(|conn| query_character(conn, id))
    }

    // -- Personas --

    /// Inserts a persona. Returns false, leaving the stored row alone, when the id is taken.
    pub fn create_persona(&self, id: &str, display_name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO personas (id, display_name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                (id, display_name),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_persona(&self, id: &str) -> Result<Option<PersonaRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, display_name, created_at FROM personas WHERE id = ?1",
                [id],
                |row| {
                    Ok(PersonaRow {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn query_recent_turns(
    conn: &Connection,
    persona_id: &str,
    character_id: &str,
    limit: u32,
    before_id: Option<i64>,
) -> Result<Vec<TurnRow>> {
    let sql = format!(
        "SELECT {TURN_COLUMNS} FROM turns
         WHERE persona_id = ?1 AND character_id = ?2 AND (?3 IS NULL OR id < ?3)
         ORDER BY created_at DESC, id DESC
         LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![persona_id, character_id, before_id, limit],
            turn_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_character(conn: &Connection, id: &str) -> Result<Option<CharacterRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, gender, job, personality, background, appearance, speaking_style,
                relationship, world_setting, first_scene, first_message, image_url, updated_at
         FROM characters WHERE id = ?1",
    )?;

    stmt.query_row([id], |row| {
        Ok(CharacterRow {
            id: row.get(0)?,
            name: row.get(1)?,
            age: row.get(2)?,
            gender: row.get(3)?,
            job: row.get(4)?,
            personality: row.get(5)?,
            background: row.get(6)?,
            appearance: row.get(7)?,
            speaking_style: row.get(8)?,
            relationship: row.get(9)?,
            world_setting: row.get(10)?,
            first_scene: row.get(11)?,
            first_message: row.get(12)?,
            image_url: row.get(13)?,
            updated_at: row.get(14)?,
        })
    })
    .optional()
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        id: row.get(0)?,
        persona_id: row.get(1)?,
        character_id: row.get(2)?,
        sender: row.get(3)?,
        text: row.get(4)?,
        character_name: row.get(5)?,
        character_image: row.get(6)?,
        character_age: row.get(7)?,
        character_job: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_turn<'a>(text: &'a str) -> NewTurn<'a> {
        NewTurn {
            persona_id: "p1",
            character_id: "c1",
            sender: "user",
            text,
            character_name: "Mira",
            character_image: Some("mira.png"),
            character_age: Some(24),
            character_job: Some("barista"),
        }
    }

    #[test]
    fn recent_turns_are_newest_first_and_limited() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_turn(&user_turn(&format!("m{}", i))).unwrap();
        }

        let rows = db.recent_turns("p1", "c1", 3, None).unwrap();
        let texts: Vec<_> = rows.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m3", "m2"]);
    }

    #[test]
    fn recent_turns_before_excludes_anchor() {
        let db = Database::open_in_memory().unwrap();
        db.insert_turn(&user_turn("a")).unwrap();
        db.insert_turn(&user_turn("b")).unwrap();
        let anchor = db.insert_turn(&user_turn("c")).unwrap();

        let rows = db.recent_turns("p1", "c1", 10, Some(anchor)).unwrap();
        let texts: Vec<_> = rows.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "a"]);
    }

    #[test]
    fn list_turns_is_chronological_and_scoped_to_key() {
        let db = Database::open_in_memory().unwrap();
        db.insert_turn(&user_turn("first")).unwrap();
        db.insert_turn(&NewTurn { persona_id: "p2", ..user_turn("other") }).unwrap();
        db.insert_turn(&NewTurn { sender: "assistant", ..user_turn("second") }).unwrap();

        let rows = db.list_turns("p1", "c1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text, "first");
        assert_eq!(rows[1].text, "second");
        assert!(rows[0].created_at <= rows[1].created_at);
        assert_eq!(rows[0].character_age, Some(24));
    }

    #[test]
    fn delete_turns_on_empty_key_is_noop() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.delete_turns("p1", "c1").unwrap(), 0);

        db.insert_turn(&user_turn("x")).unwrap();
        db.insert_turn(&user_turn("y")).unwrap();
        assert_eq!(db.delete_turns("p1", "c1").unwrap(), 2);
        assert_eq!(db.count_turns("p1", "c1").unwrap(), 0);
    }

    #[test]
    fn favor_deltas_accumulate() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_favor("p1", "c1").unwrap(), 0);
        assert!(db.get_favor_row("p1", "c1").unwrap().is_none());

        assert_eq!(db.upsert_add_favor("p1", "c1", 15).unwrap(), 15);
        assert_eq!(db.upsert_add_favor("p1", "c1", -40).unwrap(), -25);
        assert_eq!(db.get_favor("p1", "c1").unwrap(), -25);
        assert_eq!(db.get_favor("p1", "c2").unwrap(), 0);
    }

    #[test]
    fn character_upsert_replaces_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut c = Character {
            id: "c1".into(),
            name: "Mira".into(),
            age: Some(24),
            ..Default::default()
        };
        db.upsert_character(&c).unwrap();

        c.name = "Mira Vale".into();
        c.job = Some("florist".into());
        db.upsert_character(&c).unwrap();

        let row = db.get_character("c1").unwrap().unwrap();
        assert_eq!(row.name, "Mira Vale");
        assert_eq!(row.job.as_deref(), Some("florist"));
        assert!(db.get_character("missing").unwrap().is_none());
    }

    #[test]
    fn persona_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_persona("p1", "Ren").unwrap());
        let row = db.get_persona("p1").unwrap().unwrap();
        assert_eq!(row.display_name, "Ren");

        assert!(!db.create_persona("p1", "Dup").unwrap());
        assert_eq!(db.get_persona("p1").unwrap().unwrap().display_name, "Ren");
    }
}
