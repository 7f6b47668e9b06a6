use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use watchtower_core::types::NewEvent;

/// Normalize one parsed archives.json record into an insertable event.
///
/// Returns `None` when the record carries a timestamp that cannot be read as
/// ISO-8601 — such a record cannot participate in the watermark or dedupe
/// contracts, so it is dropped (and counted by the caller).
///
/// Field extraction mirrors the Wazuh archives layout: nested
/// `agent.{id,name,ip}`, `manager.name`, `rule.{id,level,description,mitre}`,
/// `decoder.name`, plus flat `location` and `full_log`. Rule id/level coerce
/// to integers with fallback 0; everything else is string-coerced.
pub fn normalize_record(record: &Value) -> Option<NewEvent> {
    let timestamp = match record.get("timestamp") {
        Some(v) => canonical_timestamp(v.as_str()?)?,
        // Wazuh always stamps archive lines; a missing field means the record
        // came from somewhere else. Stamp it on arrival.
        None => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    let agent = record.get("agent");
    let rule = record.get("rule");
    let mitre = rule.and_then(|r| r.get("mitre"));

    let rule_id = rule.map(|r| coerce_int(r.get("id"))).unwrap_or(0);
    let full_log = text_at(record.get("full_log"));

    Some(NewEvent {
        content_hash: content_hash(&timestamp, &full_log, rule_id),
        timestamp,
        agent_id: text_at(agent.and_then(|a| a.get("id"))),
        agent_name: text_at(agent.and_then(|a| a.get("name"))),
        agent_ip: text_at(agent.and_then(|a| a.get("ip"))),
        manager_name: text_at(record.get("manager").and_then(|m| m.get("name"))),
        rule_id,
        rule_level: rule.map(|r| coerce_int(r.get("level"))).unwrap_or(0),
        rule_description: text_at(rule.and_then(|r| r.get("description"))),
        rule_mitre_id: mitre_field(mitre, "id"),
        rule_mitre_tactic: mitre_field(mitre, "tactic"),
        rule_mitre_technique: mitre_field(mitre, "technique"),
        location: text_at(record.get("location")),
        decoder_name: text_at(record.get("decoder").and_then(|d| d.get("name"))),
        full_log,
        json_data: record.to_string(),
    })
}

/// Parse a Wazuh timestamp and re-render it as canonical RFC3339 UTC with
/// fixed millisecond precision, so lexicographic comparison is chronological
/// regardless of the producer's offset formatting (`+0000` vs `+00:00` vs
/// `Z`) or sub-second precision.
pub fn canonical_timestamp(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        // Wazuh emits offsets without a colon ("+0000"), which RFC3339
        // parsing rejects.
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()?;
    Some(parsed.to_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Content hash for the 1-hour dedupe window: SHA-256 over the fields that
/// identify a logical event regardless of archive replays.
pub fn content_hash(timestamp: &str, full_log: &str, rule_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(full_log.as_bytes());
    hasher.update(rule_id.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn text_at(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Integer coercion with fallback 0 — rule ids arrive as strings or numbers.
fn coerce_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// MITRE fields are arrays in recent Wazuh versions and scalars in older
/// ones; take the first element either way.
fn mitre_field(mitre: Option<&Value>, key: &str) -> String {
    match mitre.and_then(|m| m.get(key)) {
        Some(Value::Array(items)) => text_at(items.first()),
        other => text_at(other),
    }
}
