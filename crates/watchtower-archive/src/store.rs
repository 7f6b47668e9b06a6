use std::sync::Mutex;

use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use watchtower_core::types::{AgentStats, Event, NewEvent, RuleStats};

use crate::db::init_db;
use crate::error::{ArchiveError, Result};

/// Ingest watermark snapshot: the greatest committed timestamp plus the
/// running total of appended rows.
#[derive(Debug, Clone, Default)]
pub struct Watermark {
    pub timestamp: Option<String>,
    pub total_appended: i64,
}

/// Result of committing one ingest batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub watermark: Option<String>,
}

/// Thread-safe handle to the event archive.
///
/// Single-writer discipline: only the ingest pipeline calls the mutating
/// methods; every other component (retrieval, alerts, dashboard) opens its
/// reads through the same handle or its own `open` of the same file — WAL
/// mode gives readers a consistent snapshot while a write is in flight.
pub struct ArchiveStore {
    db: Mutex<Connection>,
}

const EVENT_SELECT: &str =
    "SELECT id, timestamp, agent_id, agent_name, agent_ip, manager_name,
            rule_id, rule_level, rule_description, rule_mitre_id,
            rule_mitre_tactic, rule_mitre_technique, location, decoder_name,
            full_log, json_data
     FROM events";

impl ArchiveStore {
    /// Open (or create) the archive file and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory archive for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // ── writer side (ingest pipeline only) ──────────────────────────────────

    /// Commit a batch of new events atomically.
    ///
    /// Inserts every row, advances the watermark to the batch's maximum
    /// timestamp, and bumps the appended total — all in one transaction, so a
    /// failure rolls the whole batch back and leaves the watermark untouched.
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    pub fn insert_batch(&self, batch: &[NewEvent]) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome {
                inserted: 0,
                watermark: self.watermark()?.timestamp,
            });
        }

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut max_ts: Option<&str> = None;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events (
                    timestamp, agent_id, agent_name, agent_ip, manager_name,
                    rule_id, rule_level, rule_description, rule_mitre_id,
                    rule_mitre_tactic, rule_mitre_technique, location,
                    decoder_name, full_log, json_data, content_hash, created_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            )?;
            for ev in batch {
                stmt.execute(params![
                    ev.timestamp,
                    ev.agent_id,
                    ev.agent_name,
                    ev.agent_ip,
                    ev.manager_name,
                    ev.rule_id,
                    ev.rule_level,
                    ev.rule_description,
                    ev.rule_mitre_id,
                    ev.rule_mitre_tactic,
                    ev.rule_mitre_technique,
                    ev.location,
                    ev.decoder_name,
                    ev.full_log,
                    ev.json_data,
                    ev.content_hash,
                    now,
                ])?;
                if max_ts.map_or(true, |m| ev.timestamp.as_str() > m) {
                    max_ts = Some(&ev.timestamp);
                }
            }
        }

        // Watermark never decreases: only overwrite when the batch max is newer.
        tx.execute(
            "UPDATE ingest_meta
             SET watermark = CASE
                     WHEN watermark IS NULL OR ?1 > watermark THEN ?1
                     ELSE watermark
                 END,
                 total_appended = total_appended + ?2,
                 last_fetch_at = ?3
             WHERE id = 1",
            params![max_ts, batch.len() as i64, now],
        )?;
        tx.commit()?;

        debug!(inserted = batch.len(), "batch committed");
        Ok(BatchOutcome {
            inserted: batch.len(),
            watermark: self.read_watermark_locked(&db)?.timestamp,
        })
    }

    /// Current ingest watermark.
    pub fn watermark(&self) -> Result<Watermark> {
        let db = self.db.lock().unwrap();
        self.read_watermark_locked(&db)
    }

    fn read_watermark_locked(&self, db: &Connection) -> Result<Watermark> {
        let wm = db.query_row(
            "SELECT watermark, total_appended FROM ingest_meta WHERE id = 1",
            [],
            |row| {
                Ok(Watermark {
                    timestamp: row.get(0)?,
                    total_appended: row.get(1)?,
                })
            },
        )?;
        Ok(wm)
    }

    /// True when an event with this content hash exists in the hour before
    /// `timestamp` (inclusive of later rows in the same window).
    pub fn has_recent_duplicate(&self, content_hash: &str, timestamp: &str) -> Result<bool> {
        let window_start = window_start(timestamp)?;
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM events
             WHERE content_hash = ?1 AND timestamp >= ?2",
            params![content_hash, window_start],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    // ── reader side ─────────────────────────────────────────────────────────

    /// Events from the last `hours` hours at or above `min_level`, newest first.
    pub fn recent_events(&self, hours: i64, min_level: i64, limit: usize) -> Result<Vec<Event>> {
        let since = cutoff(hours);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "{EVENT_SELECT}
             WHERE timestamp >= ?1 AND rule_level >= ?2
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![since, min_level, limit as i64], row_to_event)?;
        collect(rows)
    }

    /// Candidate pool for the hybrid retriever: events in `[start, end]`,
    /// optionally restricted to a set of agent names, at or above `min_level`.
    pub fn events_between(
        &self,
        start: &str,
        end: &str,
        min_level: i64,
        agents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let db = self.db.lock().unwrap();

        let mut sql = format!(
            "{EVENT_SELECT}
             WHERE timestamp >= ?1 AND timestamp <= ?2 AND rule_level >= ?3"
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(start.to_string()),
            Box::new(end.to_string()),
            Box::new(min_level),
        ];
        if let Some(agents) = agents.filter(|a| !a.is_empty()) {
            let placeholders: Vec<String> = (0..agents.len())
                .map(|i| format!("?{}", bound.len() + i + 1))
                .collect();
            sql.push_str(&format!(
                " AND (agent_name IN ({0}) OR agent_id IN ({0}))",
                placeholders.join(",")
            ));
            for a in agents {
                bound.push(Box::new(a.clone()));
            }
        }
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            bound.len() + 1
        ));
        bound.push(Box::new(limit as i64));

        let mut stmt = db.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_event)?;
        collect(rows)
    }

    /// Highest-severity events within the window, severity then recency order.
    pub fn top_by_severity(&self, hours: i64, limit: usize) -> Result<Vec<Event>> {
        let since = cutoff(hours);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "{EVENT_SELECT}
             WHERE timestamp >= ?1
             ORDER BY rule_level DESC, timestamp DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![since, limit as i64], row_to_event)?;
        collect(rows)
    }

    /// Latest rows at or above `min_level` — the alert monitor's poll query.
    pub fn latest_high_severity(&self, min_level: i64, limit: usize) -> Result<Vec<Event>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "{EVENT_SELECT}
             WHERE rule_level >= ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![min_level, limit as i64], row_to_event)?;
        collect(rows)
    }

    /// Distinct agents with counts, busiest first.
    pub fn agent_statistics(&self) -> Result<Vec<AgentStats>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT agent_id, agent_name, COUNT(*), MAX(rule_level),
                    MIN(timestamp), MAX(timestamp)
             FROM events
             WHERE agent_id != ''
             GROUP BY agent_id, agent_name
             ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AgentStats {
                agent_id: row.get(0)?,
                agent_name: row.get(1)?,
                event_count: row.get(2)?,
                max_rule_level: row.get(3)?,
                first_seen: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })?;
        collect(rows)
    }

    /// Most frequently triggered rules.
    pub fn rule_statistics(&self, limit: usize) -> Result<Vec<RuleStats>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT rule_id, rule_description, rule_level, COUNT(*), MAX(timestamp)
             FROM events
             WHERE rule_id > 0
             GROUP BY rule_id, rule_description, rule_level
             ORDER BY COUNT(*) DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RuleStats {
                rule_id: row.get(0)?,
                rule_description: row.get(1)?,
                rule_level: row.get(2)?,
                trigger_count: row.get(3)?,
                last_triggered: row.get(4)?,
            })
        })?;
        collect(rows)
    }

    /// Substring search over rule descriptions and raw logs, newest first.
    pub fn search_logs(&self, term: &str, limit: usize) -> Result<Vec<Event>> {
        let pattern = format!("%{}%", term);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "{EVENT_SELECT}
             WHERE full_log LIKE ?1 OR rule_description LIKE ?1
             ORDER BY timestamp DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], row_to_event)?;
        collect(rows)
    }

    /// Total archived events.
    pub fn count_events(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let n = db.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Events at or above `min_level` within the last `hours` hours.
    pub fn count_at_least(&self, min_level: i64, hours: i64) -> Result<i64> {
        let since = cutoff(hours);
        let db = self.db.lock().unwrap();
        let n = db.query_row(
            "SELECT COUNT(*) FROM events WHERE rule_level >= ?1 AND timestamp >= ?2",
            params![min_level, since],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// The most recent `limit` events, oldest of them first — the semantic
    /// index build window and the CAG window.
    pub fn recent_for_index(&self, limit: usize) -> Result<Vec<Event>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "{EVENT_SELECT} ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;
        let mut events = collect(rows)?;
        events.reverse();
        Ok(events)
    }

    /// Fetch full rows for a set of ids; missing ids are silently skipped
    /// (the semantic index may briefly lag a maintenance deletion).
    pub fn events_by_ids(&self, ids: &[i64]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "{EVENT_SELECT} WHERE id IN ({})",
            placeholders.join(",")
        );
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_event)?;
        collect(rows)
    }
}

/// Now minus `hours`, rendered in the canonical timestamp shape the ingest
/// pipeline writes (RFC3339 UTC, fixed millisecond precision) so string
/// comparison stays chronological.
fn cutoff(hours: i64) -> String {
    (Utc::now() - Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Start of the 1-hour dedupe window preceding `timestamp`.
fn window_start(timestamp: &str) -> Result<String> {
    let ts = chrono::DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| ArchiveError::InvalidTimestamp(timestamp.to_string()))?;
    Ok((ts - Duration::hours(1))
        .to_utc()
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        agent_id: row.get(2)?,
        agent_name: row.get(3)?,
        agent_ip: row.get(4)?,
        manager_name: row.get(5)?,
        rule_id: row.get(6)?,
        rule_level: row.get(7)?,
        rule_description: row.get(8)?,
        rule_mitre_id: row.get(9)?,
        rule_mitre_tactic: row.get(10)?,
        rule_mitre_technique: row.get(11)?,
        location: row.get(12)?,
        decoder_name: row.get(13)?,
        full_log: row.get(14)?,
        json_data: row.get(15)?,
    })
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(ArchiveError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: &str, level: i64, desc: &str, hash: &str) -> NewEvent {
        NewEvent {
            timestamp: ts.to_string(),
            agent_id: "001".to_string(),
            agent_name: "web-01".to_string(),
            agent_ip: "10.0.0.5".to_string(),
            manager_name: "manager".to_string(),
            rule_id: 31103,
            rule_level: level,
            rule_description: desc.to_string(),
            rule_mitre_id: "T1190".to_string(),
            rule_mitre_tactic: "Initial Access".to_string(),
            rule_mitre_technique: "Exploit Public-Facing Application".to_string(),
            location: "/var/log/nginx/access.log".to_string(),
            decoder_name: "web-accesslog".to_string(),
            full_log: format!("GET /index.php?id=1 [{desc}]"),
            json_data: format!("{{\"full_log\":\"GET /index.php?id=1 [{desc}]\"}}"),
            content_hash: hash.to_string(),
        }
    }

    #[test]
    fn batch_insert_advances_watermark_and_total() {
        let store = ArchiveStore::open_in_memory().expect("open");
        assert!(store.watermark().unwrap().timestamp.is_none());

        let outcome = store
            .insert_batch(&[
                event("2025-01-01T00:00:01+00:00", 3, "a", "h1"),
                event("2025-01-01T00:00:05+00:00", 7, "b", "h2"),
            ])
            .expect("insert");

        assert_eq!(outcome.inserted, 2);
        let wm = store.watermark().unwrap();
        assert_eq!(wm.timestamp.as_deref(), Some("2025-01-01T00:00:05+00:00"));
        assert_eq!(wm.total_appended, 2);
    }

    #[test]
    fn watermark_never_decreases() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[event("2025-06-01T12:00:00+00:00", 5, "new", "h1")])
            .unwrap();
        // A batch of strictly older rows (possible only via out-of-order
        // source replay) must not move the watermark backwards.
        store
            .insert_batch(&[event("2025-06-01T11:00:00+00:00", 5, "old", "h2")])
            .unwrap();

        let wm = store.watermark().unwrap();
        assert_eq!(wm.timestamp.as_deref(), Some("2025-06-01T12:00:00+00:00"));
        assert_eq!(wm.total_appended, 2);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = ArchiveStore::open_in_memory().expect("open");
        let outcome = store.insert_batch(&[]).expect("insert");
        assert_eq!(outcome.inserted, 0);
        assert!(store.watermark().unwrap().timestamp.is_none());
        assert_eq!(store.count_events().unwrap(), 0);
    }

    #[test]
    fn duplicate_detection_is_window_scoped() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[event("2025-01-01T10:00:00+00:00", 5, "x", "samehash")])
            .unwrap();

        // Same hash 30 minutes later: inside the window.
        assert!(store
            .has_recent_duplicate("samehash", "2025-01-01T10:30:00+00:00")
            .unwrap());
        // Same hash 2 hours later: the window has passed.
        assert!(!store
            .has_recent_duplicate("samehash", "2025-01-01T12:30:00+00:00")
            .unwrap());
        // Different hash, same instant.
        assert!(!store
            .has_recent_duplicate("otherhash", "2025-01-01T10:30:00+00:00")
            .unwrap());
    }

    #[test]
    fn raw_log_round_trips_through_json_blob() {
        let store = ArchiveStore::open_in_memory().expect("open");
        let raw = "Oct 10 12:00:01 host sshd[123]: Failed password for root";
        let record = serde_json::json!({"full_log": raw, "rule": {"id": 5716}});
        let mut ev = event("2025-02-02T00:00:00+00:00", 5, "sshd auth failure", "h1");
        ev.full_log = raw.to_string();
        ev.json_data = record.to_string();
        store.insert_batch(&[ev]).unwrap();

        let fetched = &store.recent_events(24 * 365 * 10, 0, 10).unwrap()[0];
        let decoded: serde_json::Value = serde_json::from_str(&fetched.json_data).unwrap();
        assert_eq!(decoded["full_log"].as_str().unwrap(), fetched.full_log);
    }

    #[test]
    fn search_matches_description_and_raw_log() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[
                event("2025-03-01T00:00:00+00:00", 8, "SQL injection attempt", "h1"),
                event("2025-03-01T00:00:01+00:00", 3, "login ok", "h2"),
            ])
            .unwrap();

        let hits = store.search_logs("injection", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_description, "SQL injection attempt");
        assert!(store.search_logs("nomatch-term", 10).unwrap().is_empty());
    }

    #[test]
    fn agent_and_rule_statistics_aggregate() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[
                event("2025-03-01T00:00:00+00:00", 8, "a", "h1"),
                event("2025-03-01T00:00:01+00:00", 3, "a", "h2"),
            ])
            .unwrap();

        let agents = store.agent_statistics().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].event_count, 2);
        assert_eq!(agents[0].max_rule_level, 8);

        let rules = store.rule_statistics(10).unwrap();
        assert!(!rules.is_empty());
        assert_eq!(rules[0].rule_id, 31103);
    }

    #[test]
    fn events_by_ids_skips_missing() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[event("2025-03-01T00:00:00+00:00", 5, "a", "h1")])
            .unwrap();
        let got = store.events_by_ids(&[1, 999]).unwrap();
        assert_eq!(got.len(), 1);
        assert!(store.events_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn latest_high_severity_orders_newest_first() {
        let store = ArchiveStore::open_in_memory().expect("open");
        store
            .insert_batch(&[
                event("2025-03-01T00:00:00+00:00", 9, "older critical", "h1"),
                event("2025-03-01T00:05:00+00:00", 6, "newer high", "h2"),
                event("2025-03-01T00:03:00+00:00", 2, "noise", "h3"),
            ])
            .unwrap();

        let hits = store.latest_high_severity(5, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rule_description, "newer high");
        assert_eq!(hits[1].rule_description, "older critical");
    }
}
