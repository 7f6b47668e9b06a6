use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use watchtower_archive::ArchiveStore;
use watchtower_core::config::ConfigHandle;
use watchtower_core::types::Event;

use crate::embed::{event_surrogate, Embedder};
use crate::error::{Result, RetrievalError};
use crate::index::VectorIndex;
use crate::keywords::{keyword_score, tokenize};

/// Cap on the archive candidate pool pulled per search.
const POOL_LIMIT: usize = 2000;

/// Weight applied to candidates found only by the semantic index.
const SEMANTIC_ONLY_WEIGHT: f32 = 0.9;
/// Weight applied to candidates found only by keyword match.
const KEYWORD_ONLY_WEIGHT: f32 = 0.7;

/// Optional restrictions on a search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to these agent names/ids.
    pub agents: Option<Vec<String>>,
    /// Look-back window in days; the config default applies when unset.
    pub days_range: Option<i64>,
    /// Minimum rule severity.
    pub min_level: Option<i64>,
}

/// How a result was found — mirrors the scoring branch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Semantic,
    Keyword,
    Hybrid,
}

/// One retrieval hit: the full event plus its merged score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEvent {
    #[serde(flatten)]
    pub event: Event,
    pub score: f32,
    pub source: MatchSource,
}

/// The hybrid retrieval engine: semantic index over the recent archive
/// window, merged with severity-weighted keyword matching.
///
/// Shared read-many: `search` takes `&self` and can run concurrently;
/// `rebuild_index` swaps the index pointer atomically.
pub struct RetrievalEngine {
    archive: Arc<ArchiveStore>,
    config: ConfigHandle,
    embedder: Option<Arc<dyn Embedder>>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    degraded_logged: AtomicBool,
}

impl RetrievalEngine {
    /// Build an engine. `embedder` is `None` when the embedding model failed
    /// to load — the engine then serves keyword-only results.
    pub fn new(
        archive: Arc<ArchiveStore>,
        config: ConfigHandle,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            archive,
            config,
            embedder,
            index: RwLock::new(None),
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// Whether semantic scoring is currently possible.
    pub fn semantic_ready(&self) -> bool {
        self.embedder.is_some() && self.index.read().unwrap().is_some()
    }

    /// Number of vectors in the live index (0 when not built).
    pub fn indexed_count(&self) -> usize {
        self.index
            .read()
            .unwrap()
            .as_ref()
            .map(|ix| ix.len())
            .unwrap_or(0)
    }

    /// (Re)build the semantic index from the recent archive window and swap
    /// it in. A no-op (returning 0) when no embedder is available.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let Some(embedder) = self.embedder.clone() else {
            self.note_degraded();
            return Ok(0);
        };

        let cfg = self.config.current();
        let events = self.archive.recent_for_index(cfg.retrieval.index_window)?;
        if events.is_empty() {
            let mut slot = self.index.write().unwrap();
            *slot = Some(Arc::new(VectorIndex::build(embedder.dim(), Vec::new())));
            return Ok(0);
        }

        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let texts: Vec<String> = events.iter().map(event_surrogate).collect();

        // Encoding is CPU-bound; keep it off the async workers.
        let dim = embedder.dim();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts))
            .await
            .map_err(|e| RetrievalError::Task(e.to_string()))??;

        let entries: Vec<(i64, Vec<f32>)> = ids.into_iter().zip(vectors).collect();
        let index = Arc::new(VectorIndex::build(dim, entries));
        let count = index.len();
        info!(vectors = count, dim, "semantic index rebuilt");

        let mut slot = self.index.write().unwrap();
        *slot = Some(index);
        Ok(count)
    }

    /// Hybrid search: never errors on an empty pool, never returns more than
    /// `k` results.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredEvent>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let cfg = self.config.current();
        let days = filters.days_range.unwrap_or(cfg.retrieval.default_days_range);
        // Render cutoffs in the archive's canonical timestamp shape so the
        // lexicographic range scan is exact.
        let now = Utc::now();
        let start =
            (now - Duration::days(days.max(0))).to_rfc3339_opts(SecondsFormat::Millis, true);
        let end = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let min_level = filters.min_level.unwrap_or(0);

        let pool = self.archive.events_between(
            &start,
            &end,
            min_level,
            filters.agents.as_deref(),
            POOL_LIMIT,
        )?;
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let terms = tokenize(query);
        let semantic = self.semantic_scores(query, k).await;
        if semantic.is_none() {
            self.note_degraded();
        }
        let semantic = semantic.unwrap_or_default();

        let mut hits: Vec<ScoredEvent> = pool
            .into_iter()
            .filter_map(|event| {
                let surrogate = event_surrogate(&event);
                let kw = keyword_score(&terms, &surrogate, event.rule_level);
                let sem = semantic.get(&event.id).copied();

                let (score, source) = match (sem, kw > 0.0) {
                    (Some(s), true) => (s.max(kw), MatchSource::Hybrid),
                    (Some(s), false) => (s * SEMANTIC_ONLY_WEIGHT, MatchSource::Semantic),
                    (None, true) => (kw * KEYWORD_ONLY_WEIGHT, MatchSource::Keyword),
                    (None, false) => return None,
                };
                Some(ScoredEvent {
                    event,
                    score,
                    source,
                })
            })
            .collect();

        hits.sort_by(rank_order);
        hits.truncate(k);
        debug!(query, k, results = hits.len(), "hybrid search complete");
        Ok(hits)
    }

    /// Embed the query and collect index similarities. `None` when semantic
    /// scoring is unavailable for any reason (missing model, empty index,
    /// encode failure) — the caller falls back to keyword-only.
    async fn semantic_scores(&self, query: &str, k: usize) -> Option<HashMap<i64, f32>> {
        let embedder = self.embedder.clone()?;
        let index = self.index.read().unwrap().clone()?;
        if index.is_empty() {
            return None;
        }

        let text = query.to_lowercase();
        let encoded = tokio::task::spawn_blocking(move || embedder.embed(&[text]))
            .await
            .ok()?
            .ok()?;
        let qvec = encoded.into_iter().next()?;

        // Over-fetch so post-filter intersection with the candidate pool
        // still fills K.
        let fetch = (k * 4).max(50).min(index.len());
        Some(index.query(&qvec, fetch).into_iter().collect())
    }

    fn note_degraded(&self) {
        if !self.degraded_logged.swap(true, AtomicOrdering::Relaxed) {
            warn!("semantic retrieval unavailable — serving keyword-only results");
        }
    }
}

/// Deterministic ranking: score desc, then rule_level desc, timestamp desc,
/// id asc.
fn rank_order(a: &ScoredEvent, b: &ScoredEvent) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.event.rule_level.cmp(&a.event.rule_level))
        .then_with(|| b.event.timestamp.cmp(&a.event.timestamp))
        .then_with(|| a.event.id.cmp(&b.event.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchtower_core::config::WatchtowerConfig;
    use watchtower_core::types::NewEvent;

    /// Deterministic fake: maps known phrases onto fixed directions so tests
    /// control which events look semantically close.
    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn dim(&self) -> usize {
            3
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("injection") {
                        vec![1.0, 0.0, 0.0]
                    } else if t.contains("password") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn new_event(ts: &str, level: i64, desc: &str, hash: &str) -> NewEvent {
        NewEvent {
            timestamp: ts.to_string(),
            agent_id: "001".to_string(),
            agent_name: "web-01".to_string(),
            agent_ip: String::new(),
            manager_name: String::new(),
            rule_id: 31103,
            rule_level: level,
            rule_description: desc.to_string(),
            rule_mitre_id: String::new(),
            rule_mitre_tactic: String::new(),
            rule_mitre_technique: String::new(),
            location: "/var/log/nginx/access.log".to_string(),
            decoder_name: String::new(),
            full_log: desc.to_string(),
            json_data: "{}".to_string(),
            content_hash: hash.to_string(),
        }
    }

    fn recent_ts(secs_ago: i64) -> String {
        (Utc::now() - Duration::seconds(secs_ago)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn engine(
        archive: Arc<ArchiveStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> RetrievalEngine {
        RetrievalEngine::new(
            archive,
            ConfigHandle::new(WatchtowerConfig::default()),
            embedder,
        )
    }

    #[tokio::test]
    async fn empty_archive_returns_empty_not_error() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        let eng = engine(archive, None);
        let hits = eng.search("anything", 5, &SearchFilters::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn k_zero_returns_empty() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive
            .insert_batch(&[new_event(&recent_ts(10), 5, "whatever", "h1")])
            .unwrap();
        let eng = engine(archive, None);
        let hits = eng.search("whatever", 0, &SearchFilters::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn keyword_only_finds_sql_injection_with_adequate_score() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive
            .insert_batch(&[
                new_event(&recent_ts(10), 8, "SQL injection attempt", "h1"),
                new_event(&recent_ts(20), 2, "user logged in", "h2"),
            ])
            .unwrap();

        let eng = engine(archive, None);
        let hits = eng
            .search("sql injection", 5, &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event.rule_description, "SQL injection attempt");
        assert!(hits[0].score >= 0.5, "score was {}", hits[0].score);
        assert_eq!(hits[0].source, MatchSource::Keyword);
    }

    #[tokio::test]
    async fn semantic_only_candidates_are_down_weighted() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive
            .insert_batch(&[new_event(&recent_ts(10), 5, "injection detected", "h1")])
            .unwrap();

        let eng = engine(archive, Some(Arc::new(StubEmbedder)));
        eng.rebuild_index().await.unwrap();
        assert!(eng.semantic_ready());

        // Query shares no keywords with the event but embeds identically.
        let hits = eng
            .search("injection", 5, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        // "injection" is also a keyword hit, so this merges as hybrid: max of
        // both branches.
        assert_eq!(hits[0].source, MatchSource::Hybrid);

        // A query that only matches semantically gets the 0.9 weight.
        let archive2 = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive2
            .insert_batch(&[new_event(&recent_ts(10), 5, "injection detected", "h1")])
            .unwrap();
        let eng2 = engine(archive2, Some(Arc::new(StubEmbedder)));
        eng2.rebuild_index().await.unwrap();
        let hits2 = eng2
            .search("injektion", 5, &SearchFilters::default())
            .await
            .unwrap();
        // StubEmbedder maps unknown text away from the event's direction, so
        // the similarity is the orthogonal 0.5 × 0.9.
        assert_eq!(hits2.len(), 1);
        assert_eq!(hits2[0].source, MatchSource::Semantic);
        assert!((hits2[0].score - 0.45).abs() < 1e-3);
    }

    #[tokio::test]
    async fn results_cap_at_k_with_deterministic_tiebreak() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        let ts = recent_ts(10);
        archive
            .insert_batch(&[
                new_event(&ts, 5, "failed password attempt", "h1"),
                new_event(&ts, 7, "failed password attempt", "h2"),
                new_event(&ts, 7, "failed password attempt", "h3"),
                new_event(&ts, 3, "failed password attempt", "h4"),
            ])
            .unwrap();

        let eng = engine(archive, None);
        let hits = eng
            .search("failed password", 3, &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        // Severity-weighted keyword scores already order by level; the two
        // level-7 ties break on ascending id.
        assert_eq!(hits[0].event.rule_level, 7);
        assert_eq!(hits[1].event.rule_level, 7);
        assert!(hits[0].event.id < hits[1].event.id);
        assert_eq!(hits[2].event.rule_level, 5);
    }

    #[tokio::test]
    async fn filters_restrict_by_agent_and_severity() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        let mut other_agent = new_event(&recent_ts(10), 9, "malware found", "h1");
        other_agent.agent_name = "db-01".to_string();
        archive
            .insert_batch(&[
                other_agent,
                new_event(&recent_ts(20), 4, "malware found", "h2"),
            ])
            .unwrap();

        let eng = engine(archive, None);

        let by_agent = eng
            .search(
                "malware",
                10,
                &SearchFilters {
                    agents: Some(vec!["db-01".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].event.agent_name, "db-01");

        let by_level = eng
            .search(
                "malware",
                10,
                &SearchFilters {
                    min_level: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_level.len(), 1);
        assert_eq!(by_level[0].event.rule_level, 9);
    }

    #[tokio::test]
    async fn double_rebuild_yields_identical_index_state() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive
            .insert_batch(&[
                new_event(&recent_ts(10), 5, "injection one", "h1"),
                new_event(&recent_ts(20), 5, "password two", "h2"),
            ])
            .unwrap();

        let eng = engine(archive, Some(Arc::new(StubEmbedder)));
        eng.rebuild_index().await.unwrap();
        let first_ids: Vec<i64> = eng.index.read().unwrap().as_ref().unwrap().ids().to_vec();
        let first_dim = eng.index.read().unwrap().as_ref().unwrap().dim();

        eng.rebuild_index().await.unwrap();
        let second_ids: Vec<i64> = eng.index.read().unwrap().as_ref().unwrap().ids().to_vec();
        let second_dim = eng.index.read().unwrap().as_ref().unwrap().dim();

        assert_eq!(first_ids, second_ids);
        assert_eq!(first_dim, second_dim);
    }

    #[tokio::test]
    async fn indexed_ids_are_a_subset_of_archive_ids() {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        archive
            .insert_batch(&[
                new_event(&recent_ts(10), 5, "a", "h1"),
                new_event(&recent_ts(20), 5, "b", "h2"),
            ])
            .unwrap();

        let eng = engine(archive.clone(), Some(Arc::new(StubEmbedder)));
        eng.rebuild_index().await.unwrap();

        let indexed: Vec<i64> = eng.index.read().unwrap().as_ref().unwrap().ids().to_vec();
        let fetched = archive.events_by_ids(&indexed).unwrap();
        assert_eq!(fetched.len(), indexed.len());
    }
}
