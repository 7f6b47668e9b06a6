use rusqlite::{Connection, Result};

/// Initialise the archive schema and its indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. WAL mode
/// lets the retrieval engine, alert monitor, and dashboard read while the
/// ingest pipeline writes.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
        PRAGMA busy_timeout=3000;

        CREATE TABLE IF NOT EXISTS events (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp            TEXT NOT NULL,
            agent_id             TEXT NOT NULL DEFAULT '',
            agent_name           TEXT NOT NULL DEFAULT '',
            agent_ip             TEXT NOT NULL DEFAULT '',
            manager_name         TEXT NOT NULL DEFAULT '',
            rule_id              INTEGER NOT NULL DEFAULT 0,
            rule_level           INTEGER NOT NULL DEFAULT 0,
            rule_description     TEXT NOT NULL DEFAULT '',
            rule_mitre_id        TEXT NOT NULL DEFAULT '',
            rule_mitre_tactic    TEXT NOT NULL DEFAULT '',
            rule_mitre_technique TEXT NOT NULL DEFAULT '',
            location             TEXT NOT NULL DEFAULT '',
            decoder_name         TEXT NOT NULL DEFAULT '',
            full_log             TEXT NOT NULL DEFAULT '',
            json_data            TEXT NOT NULL DEFAULT '',
            content_hash         TEXT NOT NULL,
            created_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_timestamp  ON events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_rule_level ON events(rule_level);
        CREATE INDEX IF NOT EXISTS idx_events_agent_name ON events(agent_name);
        CREATE INDEX IF NOT EXISTS idx_events_rule_id    ON events(rule_id);
        CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
        CREATE INDEX IF NOT EXISTS idx_events_hash       ON events(content_hash, timestamp);

        CREATE TABLE IF NOT EXISTS ingest_meta (
            id             INTEGER PRIMARY KEY CHECK (id = 1),
            watermark      TEXT,
            total_appended INTEGER NOT NULL DEFAULT 0,
            last_fetch_at  TEXT
        );
        INSERT OR IGNORE INTO ingest_meta (id, watermark, total_appended)
            VALUES (1, NULL, 0);",
    )
}
