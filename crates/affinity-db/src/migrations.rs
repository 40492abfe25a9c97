use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE characters (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                age             INTEGER,
                gender          TEXT,
                job             TEXT,
                personality     TEXT,
                background      TEXT,
                appearance      TEXT,
                speaking_style  TEXT,
                relationship    TEXT,
                world_setting   TEXT,
                first_scene     TEXT,
                first_message   TEXT,
                image_url       TEXT,
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE personas (
                id              TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            -- Character fields are copied onto each turn so history survives edits.
            CREATE TABLE turns (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                persona_id      TEXT NOT NULL,
                character_id    TEXT NOT NULL,
                sender          TEXT NOT NULL,
                text            TEXT NOT NULL,
                character_name  TEXT NOT NULL,
                character_image TEXT,
                character_age   INTEGER,
                character_job   TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_turns_key
                ON turns(persona_id, character_id, created_at, id);

            CREATE TABLE favors (
                persona_id      TEXT NOT NULL,
                character_id    TEXT NOT NULL,
                favor           INTEGER NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(persona_id, character_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
