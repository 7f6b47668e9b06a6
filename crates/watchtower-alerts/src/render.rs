use chrono::{DateTime, Utc};

use watchtower_core::types::Event;

/// Transport hard cap minus a little headroom.
const MESSAGE_MAX_BYTES: usize = 4096;

/// Per-band line caps: the notification stays a summary, not a log dump.
const MAX_CRITICAL_LINES: usize = 3;
const MAX_HIGH_LINES: usize = 2;
const MAX_MEDIUM_LINES: usize = 1;

/// Render one compact notification for a tick's worth of new events,
/// grouped into severity bands. Bands are already split by the caller.
pub fn render_alert_message(
    critical: &[&Event],
    high: &[&Event],
    medium: &[&Event],
    now: DateTime<Utc>,
) -> String {
    let mut parts: Vec<String> = vec![
        "SECURITY ALERT".to_string(),
        format!("Time: {}", now.format("%d/%m/%Y %H:%M:%S")),
        String::new(),
    ];

    band(&mut parts, "CRITICAL", critical, MAX_CRITICAL_LINES);
    band(&mut parts, "HIGH", high, MAX_HIGH_LINES);
    band(&mut parts, "MEDIUM", medium, MAX_MEDIUM_LINES);

    parts.push("Review the listed events and ask for details here.".to_string());

    truncate_to_bytes(parts.join("\n"), MESSAGE_MAX_BYTES)
}

fn band(parts: &mut Vec<String>, label: &str, events: &[&Event], max_lines: usize) {
    if events.is_empty() {
        return;
    }
    parts.push(format!("{label} events: {}", events.len()));
    for event in events.iter().take(max_lines) {
        let desc = clip(&event.rule_description, 45);
        parts.push(format!("- [{}] L{} {}", event.id, event.rule_level, desc));
        parts.push(format!(
            "  agent: {} | rule: {}",
            event.agent_name, event.rule_id
        ));
    }
    if events.len() > max_lines {
        parts.push(format!("  ... and {} more", events.len() - max_lines));
    }
    parts.push(String::new());
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}...")
}

fn truncate_to_bytes(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: i64, level: i64, desc: &str) -> Event {
        Event {
            id,
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
            agent_id: "001".to_string(),
            agent_name: "web-01".to_string(),
            agent_ip: String::new(),
            manager_name: String::new(),
            rule_id: 5710,
            rule_level: level,
            rule_description: desc.to_string(),
            rule_mitre_id: String::new(),
            rule_mitre_tactic: String::new(),
            rule_mitre_technique: String::new(),
            location: String::new(),
            decoder_name: String::new(),
            full_log: String::new(),
            json_data: "{}".to_string(),
        }
    }

    #[test]
    fn includes_event_ids_and_band_labels() {
        let c = event(42, 9, "rootkit detected");
        let message = render_alert_message(&[&c], &[], &[], Utc::now());
        assert!(message.contains("CRITICAL events: 1"));
        assert!(message.contains("[42]"));
        assert!(!message.contains("HIGH events"));
    }

    #[test]
    fn overflow_gets_a_tail_count() {
        let events: Vec<Event> = (1..=5).map(|i| event(i, 9, "critical thing")).collect();
        let refs: Vec<&Event> = events.iter().collect();
        let message = render_alert_message(&refs, &[], &[], Utc::now());
        assert!(message.contains("CRITICAL events: 5"));
        assert!(message.contains("... and 2 more"));
    }

    #[test]
    fn long_descriptions_are_clipped() {
        let c = event(1, 9, &"x".repeat(200));
        let message = render_alert_message(&[&c], &[], &[], Utc::now());
        assert!(message.contains("..."));
        assert!(!message.contains(&"x".repeat(60)));
    }

    #[test]
    fn stays_under_transport_cap() {
        let events: Vec<Event> = (1..=100)
            .map(|i| event(i, 9, &format!("very long description {}", "y".repeat(100))))
            .collect();
        let refs: Vec<&Event> = events.iter().collect();
        let message = render_alert_message(&refs, &refs, &refs, Utc::now());
        assert!(message.len() <= 4096);
    }
}
