use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use watchtower_archive::ArchiveStore;
use watchtower_retrieval::{CagBuilder, RetrievalEngine, SearchFilters};

use crate::catalog::{CheckWazuhLogArgs, RecentEventsArgs, RuleStatsArgs, SearchLogsArgs};

/// Executes catalog tools against the shared retrieval engine.
///
/// Stateless between calls apart from the engine itself; every failure comes
/// back as a structured `{status:"error", message, tool_name}` value so the
/// chat model can read it — tool errors are data, not transport failures.
pub struct ToolHost {
    archive: Arc<ArchiveStore>,
    engine: Arc<RetrievalEngine>,
    cag: Arc<CagBuilder>,
}

impl ToolHost {
    pub fn new(
        archive: Arc<ArchiveStore>,
        engine: Arc<RetrievalEngine>,
        cag: Arc<CagBuilder>,
    ) -> Self {
        Self {
            archive,
            engine,
            cag,
        }
    }

    /// Execute `name` with `arguments`. Never returns a Rust error.
    pub async fn call(&self, name: &str, arguments: &Value) -> Value {
        debug!(tool = name, "executing tool");
        let result = match name {
            "check_wazuh_log" => self.check_wazuh_log(arguments).await,
            "get_recent_events" => self.get_recent_events(arguments),
            "get_agent_statistics" => self.get_agent_statistics(),
            "get_rule_statistics" => self.get_rule_statistics(arguments),
            "search_logs" => self.search_logs(arguments),
            other => Err(format!("unknown tool: {other}")),
        };

        match result {
            Ok(value) => value,
            Err(message) => {
                warn!(tool = name, %message, "tool call failed");
                json!({
                    "status": "error",
                    "message": message,
                    "tool_name": name,
                })
            }
        }
    }

    async fn check_wazuh_log(&self, arguments: &Value) -> Result<Value, String> {
        let args: CheckWazuhLogArgs = decode(arguments)?;

        let filters = SearchFilters {
            days_range: Some(args.days_range),
            ..Default::default()
        };
        let matches = self
            .engine
            .search(&args.query, args.max_results, &filters)
            .await
            .map_err(|e| format!("retrieval failed: {e}"))?;
        let context = self
            .cag
            .context()
            .map_err(|e| format!("context build failed: {e}"))?;

        Ok(json!({
            "status": "success",
            "query": args.query,
            "days_range": args.days_range,
            "match_count": matches.len(),
            "matches": matches,
            "context": context,
        }))
    }

    fn get_recent_events(&self, arguments: &Value) -> Result<Value, String> {
        let args: RecentEventsArgs = decode(arguments)?;
        let events = self
            .archive
            .recent_events(args.hours, 0, args.limit)
            .map_err(|e| format!("archive query failed: {e}"))?;
        Ok(json!({
            "status": "success",
            "hours": args.hours,
            "count": events.len(),
            "events": events,
        }))
    }

    fn get_agent_statistics(&self) -> Result<Value, String> {
        let agents = self
            .archive
            .agent_statistics()
            .map_err(|e| format!("archive query failed: {e}"))?;
        Ok(json!({
            "status": "success",
            "count": agents.len(),
            "agents": agents,
        }))
    }

    fn get_rule_statistics(&self, arguments: &Value) -> Result<Value, String> {
        let args: RuleStatsArgs = decode(arguments)?;
        let rules = self
            .archive
            .rule_statistics(args.limit)
            .map_err(|e| format!("archive query failed: {e}"))?;
        Ok(json!({
            "status": "success",
            "count": rules.len(),
            "rules": rules,
        }))
    }

    fn search_logs(&self, arguments: &Value) -> Result<Value, String> {
        let args: SearchLogsArgs = decode(arguments)?;
        let events = self
            .archive
            .search_logs(&args.term, args.limit)
            .map_err(|e| format!("archive query failed: {e}"))?;
        Ok(json!({
            "status": "success",
            "term": args.term,
            "count": events.len(),
            "events": events,
        }))
    }
}

/// Decode a tool's argument object into its typed struct; failures read as
/// bad input to the calling model.
fn decode<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    serde_json::from_value(arguments.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SecondsFormat, Utc};
    use watchtower_core::config::{ConfigHandle, WatchtowerConfig};
    use watchtower_core::types::NewEvent;

    fn host_with_events(events: &[NewEvent]) -> ToolHost {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        if !events.is_empty() {
            archive.insert_batch(events).unwrap();
        }
        let config = ConfigHandle::new(WatchtowerConfig::default());
        let engine = Arc::new(RetrievalEngine::new(archive.clone(), config.clone(), None));
        let cag = Arc::new(CagBuilder::new(archive.clone(), config));
        ToolHost::new(archive, engine, cag)
    }

    fn recent_event(desc: &str, level: i64, hash: &str) -> NewEvent {
        NewEvent {
            timestamp: (Utc::now() - Duration::minutes(5))
                .to_rfc3339_opts(SecondsFormat::Millis, true),
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
            full_log: format!("log body: {desc}"),
            json_data: "{}".to_string(),
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn check_wazuh_log_returns_matches_and_context() {
        let host = host_with_events(&[recent_event("SQL injection attempt", 8, "h1")]);
        let result = host
            .call("check_wazuh_log", &json!({"query": "sql injection"}))
            .await;

        assert_eq!(result["status"], "success");
        assert_eq!(result["match_count"], 1);
        assert!(result["context"].as_str().unwrap().contains("SQL injection"));
        assert_eq!(
            result["matches"][0]["rule_description"],
            "SQL injection attempt"
        );
    }

    #[tokio::test]
    async fn missing_required_argument_is_a_structured_error() {
        let host = host_with_events(&[]);
        let result = host.call("check_wazuh_log", &json!({})).await;

        assert_eq!(result["status"], "error");
        assert_eq!(result["tool_name"], "check_wazuh_log");
        assert!(result["message"]
            .as_str()
            .unwrap()
            .contains("invalid arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_error() {
        let host = host_with_events(&[]);
        let result = host.call("no_such_tool", &json!({})).await;
        assert_eq!(result["status"], "error");
        assert!(result["message"].as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn recent_events_and_stats_tools_answer() {
        let host = host_with_events(&[
            recent_event("a", 5, "h1"),
            recent_event("b", 9, "h2"),
        ]);

        let recent = host.call("get_recent_events", &json!({"hours": 1})).await;
        assert_eq!(recent["status"], "success");
        assert_eq!(recent["count"], 2);

        let agents = host.call("get_agent_statistics", &json!({})).await;
        assert_eq!(agents["agents"][0]["event_count"], 2);

        let rules = host.call("get_rule_statistics", &json!({"limit": 5})).await;
        assert_eq!(rules["status"], "success");

        let search = host.call("search_logs", &json!({"term": "log body"})).await;
        assert_eq!(search["count"], 2);
    }
}
