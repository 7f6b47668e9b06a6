use serde::{Deserialize, Serialize};

/// One archived security event — the unit of ingest and retrieval.
///
/// Timestamps are ISO-8601 strings normalized to UTC at the ingest boundary,
/// so lexicographic order matches chronological order everywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Archive-local id (SQLite rowid, monotonically assigned).
    pub id: i64,
    pub timestamp: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_ip: String,
    pub manager_name: String,
    pub rule_id: i64,
    /// Severity 0–15 per the Wazuh rule classification.
    pub rule_level: i64,
    pub rule_description: String,
    pub rule_mitre_id: String,
    pub rule_mitre_tactic: String,
    pub rule_mitre_technique: String,
    pub location: String,
    pub decoder_name: String,
    /// The raw single-line log text, kept verbatim.
    pub full_log: String,
    /// The original record as compact JSON.
    pub json_data: String,
}

/// A parsed, normalized record ready for archive insertion.
///
/// Produced by the ingest pipeline; `content_hash` is SHA-256 over
/// (timestamp, full_log, rule_id) and drives the 1-hour dedupe window.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub timestamp: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_ip: String,
    pub manager_name: String,
    pub rule_id: i64,
    pub rule_level: i64,
    pub rule_description: String,
    pub rule_mitre_id: String,
    pub rule_mitre_tactic: String,
    pub rule_mitre_technique: String,
    pub location: String,
    pub decoder_name: String,
    pub full_log: String,
    pub json_data: String,
    pub content_hash: String,
}

/// Per-agent aggregate for statistics tools and the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub agent_name: String,
    pub event_count: i64,
    pub max_rule_level: i64,
    pub first_seen: String,
    pub last_seen: String,
}

/// Per-rule aggregate for statistics tools and the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: i64,
    pub rule_description: String,
    pub rule_level: i64,
    pub trigger_count: i64,
    pub last_triggered: String,
}
