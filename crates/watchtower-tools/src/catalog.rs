//! Tool catalog: names, descriptions, argument schemas, and the typed
//! argument structs the host decodes into.

use serde::Deserialize;
use serde_json::{json, Value};

/// Arguments for `check_wazuh_log` — the main analytical entry point.
#[derive(Debug, Deserialize)]
pub struct CheckWazuhLogArgs {
    /// Natural-language question or search phrase.
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_days_range")]
    pub days_range: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsArgs {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct RuleStatsArgs {
    #[serde(default = "default_rule_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchLogsArgs {
    /// Literal substring to match against rule descriptions and raw logs.
    pub term: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_max_results() -> usize {
    10
}
fn default_days_range() -> i64 {
    7
}
fn default_hours() -> i64 {
    24
}
fn default_event_limit() -> usize {
    50
}
fn default_rule_limit() -> usize {
    20
}
fn default_search_limit() -> usize {
    50
}

/// The catalog advertised by `list_tools`, in the shape the chat bridge
/// translates into model function schemas.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "check_wazuh_log",
            "description": "Analyze archived Wazuh security events for a natural-language question. Runs hybrid semantic + keyword retrieval over the archive and returns the matching events together with a recent-events context block.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question or search phrase, e.g. 'any SQL injection attempts?'"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum matching events to return (default: 10)",
                        "default": 10
                    },
                    "days_range": {
                        "type": "integer",
                        "description": "How many days back to search (default: 7)",
                        "default": 7
                    }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "get_recent_events",
            "description": "Return the most recent archived security events within a time window, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "hours": {
                        "type": "integer",
                        "description": "Look-back window in hours (default: 24)",
                        "default": 24
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum events to return (default: 50)",
                        "default": 50
                    }
                }
            }
        }),
        json!({
            "name": "get_agent_statistics",
            "description": "Return per-agent event counts, maximum severity, and first/last activity across the whole archive.",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        }),
        json!({
            "name": "get_rule_statistics",
            "description": "Return the most frequently triggered detection rules with counts and last-trigger times.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum rules to return (default: 20)",
                        "default": 20
                    }
                }
            }
        }),
        json!({
            "name": "search_logs",
            "description": "Substring search over rule descriptions and raw log lines, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "term": {
                        "type": "string",
                        "description": "Text to look for"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum events to return (default: 50)",
                        "default": 50
                    }
                },
                "required": ["term"]
            }
        }),
    ]
}
