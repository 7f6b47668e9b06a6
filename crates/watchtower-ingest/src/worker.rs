use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use watchtower_archive::ArchiveStore;
use watchtower_core::config::ConfigHandle;
use watchtower_core::types::NewEvent;

use crate::error::Result;
use crate::parse::normalize_record;
use crate::source::TailSource;

/// Per-tick statistics, mostly for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub lines_read: usize,
    pub parse_failures: usize,
    pub rejected_old: usize,
    pub rejected_duplicate: usize,
    pub inserted: usize,
}

/// The realtime ingest worker: tails the container log at a fixed cadence
/// and appends new events to the archive.
///
/// Single long-running task; the archive's single-writer discipline means
/// nothing else may call the store's mutating methods while this runs.
pub struct IngestWorker<S: TailSource> {
    source: S,
    archive: Arc<ArchiveStore>,
    config: ConfigHandle,
}

impl<S: TailSource> IngestWorker<S> {
    pub fn new(source: S, archive: Arc<ArchiveStore>, config: ConfigHandle) -> Self {
        Self {
            source,
            archive,
            config,
        }
    }

    /// Poll loop. Runs until `shutdown` flips to true; reacts within one tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval_secs = self.config.current().ingest.interval_secs;
        info!(interval_secs, "ingest worker started");

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(stats) if stats.inserted > 0 => {
                            info!(
                                inserted = stats.inserted,
                                lines = stats.lines_read,
                                duplicates = stats.rejected_duplicate,
                                old = stats.rejected_old,
                                "ingest tick committed new events"
                            );
                        }
                        Ok(stats) => {
                            debug!(lines = stats.lines_read, "ingest tick: nothing new");
                        }
                        // Source and commit errors are retried next tick.
                        Err(e) => error!(error = %e, "ingest tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ingest worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: probe, read, parse, filter, commit.
    pub async fn tick(&self) -> Result<TickStats> {
        let mut stats = TickStats::default();

        if !self.source.recently_modified().await? {
            return Ok(stats);
        }

        let tail_lines = self.config.current().ingest.tail_lines;
        let lines = self.source.read_tail(tail_lines).await?;
        stats.lines_read = lines.len();
        if lines.is_empty() {
            return Ok(stats);
        }

        let watermark = self.archive.watermark()?.timestamp;
        let mut batch: Vec<NewEvent> = Vec::new();
        // Hashes already in this batch — the archive can't see them yet.
        let mut pending_hashes: HashSet<String> = HashSet::new();

        for line in &lines {
            if line.trim().is_empty() {
                continue;
            }
            let record: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    stats.parse_failures += 1;
                    let snippet: String = line.chars().take(100).collect();
                    warn!(error = %e, %snippet, "skipping malformed line");
                    continue;
                }
            };

            let Some(ev) = normalize_record(&record) else {
                stats.parse_failures += 1;
                warn!("skipping record with unreadable timestamp");
                continue;
            };

            // The tail re-reads the same window every tick; everything at or
            // below the watermark was already committed.
            if watermark.as_deref().is_some_and(|wm| ev.timestamp.as_str() <= wm) {
                stats.rejected_old += 1;
                continue;
            }

            if pending_hashes.contains(&ev.content_hash)
                || self.archive.has_recent_duplicate(&ev.content_hash, &ev.timestamp)?
            {
                stats.rejected_duplicate += 1;
                continue;
            }

            pending_hashes.insert(ev.content_hash.clone());
            batch.push(ev);
        }

        if !batch.is_empty() {
            let outcome = self.archive.insert_batch(&batch)?;
            stats.inserted = outcome.inserted;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use watchtower_core::config::{ConfigHandle, WatchtowerConfig};

    use crate::error::IngestError;
    use crate::source::TailSource;

    /// Scripted source: returns a fixed set of lines each tick.
    struct FixedSource {
        lines: Mutex<Vec<String>>,
        modified: bool,
    }

    impl FixedSource {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
                modified: true,
            }
        }
    }

    #[async_trait]
    impl TailSource for FixedSource {
        async fn recently_modified(&self) -> crate::error::Result<bool> {
            Ok(self.modified)
        }

        async fn read_tail(&self, _max_lines: usize) -> crate::error::Result<Vec<String>> {
            Ok(self.lines.lock().unwrap().clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TailSource for FailingSource {
        async fn recently_modified(&self) -> crate::error::Result<bool> {
            Err(IngestError::Source("container not found".to_string()))
        }

        async fn read_tail(&self, _max_lines: usize) -> crate::error::Result<Vec<String>> {
            Err(IngestError::Source("container not found".to_string()))
        }
    }

    fn worker_with(lines: &[&str]) -> IngestWorker<FixedSource> {
        let archive = Arc::new(ArchiveStore::open_in_memory().expect("archive"));
        IngestWorker::new(
            FixedSource::new(lines),
            archive,
            ConfigHandle::new(WatchtowerConfig::default()),
        )
    }

    fn line(ts: &str, log: &str, level: i64) -> String {
        serde_json::json!({
            "timestamp": ts,
            "agent": {"id": "001", "name": "web-01"},
            "rule": {"id": 100, "level": level, "description": "test rule"},
            "full_log": log
        })
        .to_string()
    }

    #[tokio::test]
    async fn empty_tail_changes_nothing() {
        let worker = worker_with(&[]);
        let stats = worker.tick().await.expect("tick");
        assert_eq!(stats.inserted, 0);
        assert!(worker.archive.watermark().unwrap().timestamp.is_none());
    }

    #[tokio::test]
    async fn watermark_rejects_old_records() {
        // Seed the archive so the watermark sits at 2025-01-01T00:00:00Z.
        let worker = worker_with(&[
            &line("2024-12-31T23:59:59Z", "old", 3),
            &line("2025-01-01T00:00:01Z", "new", 3),
        ]);
        worker
            .archive
            .insert_batch(&[NewEvent {
                timestamp: "2025-01-01T00:00:00.000Z".to_string(),
                agent_id: String::new(),
                agent_name: String::new(),
                agent_ip: String::new(),
                manager_name: String::new(),
                rule_id: 0,
                rule_level: 0,
                rule_description: String::new(),
                rule_mitre_id: String::new(),
                rule_mitre_tactic: String::new(),
                rule_mitre_technique: String::new(),
                location: String::new(),
                decoder_name: String::new(),
                full_log: String::new(),
                json_data: "{}".to_string(),
                content_hash: "seed".to_string(),
            }])
            .unwrap();

        let stats = worker.tick().await.expect("tick");
        assert_eq!(stats.rejected_old, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(
            worker.archive.watermark().unwrap().timestamp.as_deref(),
            Some("2025-01-01T00:00:01.000Z")
        );
    }

    #[tokio::test]
    async fn reingesting_the_same_tail_inserts_nothing() {
        let worker = worker_with(&[
            &line("2025-01-01T00:00:01Z", "a", 3),
            &line("2025-01-01T00:00:02Z", "b", 5),
        ]);

        let first = worker.tick().await.expect("tick");
        assert_eq!(first.inserted, 2);

        let second = worker.tick().await.expect("tick");
        assert_eq!(second.inserted, 0);
        assert_eq!(second.rejected_old, 2);
        assert_eq!(worker.archive.count_events().unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_in_same_batch_is_dropped() {
        // Same timestamp + log + rule id twice: identical content hash.
        let dup = line("2025-01-01T00:00:01Z", "same", 3);
        let worker = worker_with(&[&dup, &dup]);

        let stats = worker.tick().await.expect("tick");
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.rejected_duplicate, 1);
    }

    #[tokio::test]
    async fn malformed_lines_do_not_abort_the_batch() {
        let worker = worker_with(&[
            "{not valid json",
            &line("2025-01-01T00:00:01Z", "good", 3),
            "",
        ]);

        let stats = worker.tick().await.expect("tick");
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[tokio::test]
    async fn source_failure_surfaces_as_error() {
        let archive = Arc::new(ArchiveStore::open_in_memory().expect("archive"));
        let worker = IngestWorker::new(
            FailingSource,
            archive,
            ConfigHandle::new(WatchtowerConfig::default()),
        );
        assert!(worker.tick().await.is_err());
    }
}
