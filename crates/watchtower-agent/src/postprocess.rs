use std::sync::OnceLock;

use regex::Regex;

/// Split a model reply into its user-visible text and any `<think>` trace.
///
/// Reasoning models wrap their chain-of-thought in `<think>…</think>`
/// regions; those must never reach the user, but they are preserved for the
/// debugging field on the stored message. A trailing unclosed `<think>`
/// (truncated generation) is stripped too.
pub fn strip_thinking(text: &str) -> (String, Option<String>) {
    static CLOSED: OnceLock<Regex> = OnceLock::new();
    static OPEN: OnceLock<Regex> = OnceLock::new();
    let closed = CLOSED.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").unwrap());
    let open = OPEN.get_or_init(|| Regex::new(r"(?s)<think>.*$").unwrap());

    let mut traces: Vec<String> = Vec::new();
    for cap in closed.captures_iter(text) {
        let trace = cap[1].trim();
        if !trace.is_empty() {
            traces.push(trace.to_string());
        }
    }

    let without_closed = closed.replace_all(text, "");
    if let Some(m) = open.find(&without_closed) {
        let trace = without_closed[m.start() + "<think>".len()..].trim();
        if !trace.is_empty() {
            traces.push(trace.to_string());
        }
    }
    let visible = open.replace(&without_closed, "").trim().to_string();

    let thinking = if traces.is_empty() {
        None
    } else {
        Some(traces.join("\n\n"))
    };
    (visible, thinking)
}
