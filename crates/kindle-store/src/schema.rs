use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 2;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Small WAL: one tick writes a single short transaction.
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fold stale WAL data into the main file. In-memory and fresh databases
    // legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::info!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id              TEXT PRIMARY KEY,
            node_type       TEXT NOT NULL,
            pooled          REAL NOT NULL DEFAULT 0,
            emotion         TEXT,
            embedding       TEXT,
            wm_presence     REAL,
            unresolved_goal INTEGER NOT NULL DEFAULT 0,
            traversable     INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS node_channels (
            node_id  TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            channel  TEXT NOT NULL,
            energy   REAL NOT NULL,
            PRIMARY KEY (node_id, channel)
        );

        CREATE TABLE IF NOT EXISTS links (
            source       TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            target       TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            weight       REAL NOT NULL,
            relatedness  REAL,
            emotion      TEXT,
            PRIMARY KEY (source, target)
        );

        CREATE TABLE IF NOT EXISTS tick_events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            instance_id  TEXT NOT NULL,
            tick         INTEGER NOT NULL,
            mechanism    TEXT NOT NULL,
            timestamp    TEXT NOT NULL,
            payload      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_links_target ON links(target);
        CREATE INDEX IF NOT EXISTS idx_events_tick ON tick_events(tick);
        ",
    )?;

    // v1 databases predate incomplete nodes
    if conn
        .prepare("SELECT traversable FROM nodes LIMIT 0")
        .is_err()
    {
        conn.execute_batch(
            "ALTER TABLE nodes ADD COLUMN traversable INTEGER NOT NULL DEFAULT 1;",
        )?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
