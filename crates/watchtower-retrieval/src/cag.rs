use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use watchtower_archive::ArchiveStore;
use watchtower_core::config::ConfigHandle;
use watchtower_core::types::Event;

use crate::error::Result;

/// Fixed instruction that heads every context block.
const CONTEXT_HEADER: &str = "You are a security-operations assistant for a Wazuh SIEM deployment. \
The following are the most recent archived security events. Ground every \
answer in these records; cite event ids when referencing specific activity.";

/// Rough chars-per-token ratio used to enforce the budget without a tokenizer.
const CHARS_PER_TOKEN: usize = 4;

/// A built context block plus the watermark it was built at.
#[derive(Debug, Clone)]
struct CagSnapshot {
    text: String,
    watermark: Option<String>,
}

/// Cache-augmented-generation context builder.
///
/// Produces one prompt-ready text block summarizing the recent archive
/// window. Deterministic for a fixed window, idempotent, and never over the
/// configured token budget (oldest events are dropped first). The snapshot
/// is cached and invalidated when the ingest watermark moves.
pub struct CagBuilder {
    archive: Arc<ArchiveStore>,
    config: ConfigHandle,
    cached: Mutex<Option<CagSnapshot>>,
}

impl CagBuilder {
    pub fn new(archive: Arc<ArchiveStore>, config: ConfigHandle) -> Self {
        Self {
            archive,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Return the current context block, rebuilding if the archive has moved
    /// past the snapshot's watermark.
    pub fn context(&self) -> Result<String> {
        let watermark = self.archive.watermark()?.timestamp;
        {
            let cached = self.cached.lock().unwrap();
            if let Some(snap) = cached.as_ref() {
                if snap.watermark == watermark {
                    debug!("cag snapshot still fresh");
                    return Ok(snap.text.clone());
                }
            }
        }
        self.rebuild()
    }

    /// Unconditionally rebuild the block from the archive window.
    pub fn rebuild(&self) -> Result<String> {
        let cfg = self.config.current();
        let events = self
            .archive
            .recent_for_index(cfg.retrieval.index_window)?;
        let watermark = self.archive.watermark()?.timestamp;

        let text = render_block(&events, cfg.retrieval.cag_token_budget);
        info!(
            events = events.len(),
            chars = text.len(),
            "cag context rebuilt"
        );

        let mut cached = self.cached.lock().unwrap();
        *cached = Some(CagSnapshot {
            text: text.clone(),
            watermark,
        });
        Ok(text)
    }
}

/// Render events (oldest first) into the context block, trimming oldest
/// entries until the whole block fits the token budget.
pub fn render_block(events: &[Event], token_budget: usize) -> String {
    let char_budget = token_budget.saturating_mul(CHARS_PER_TOKEN);
    let rendered: Vec<String> = events.iter().map(render_event).collect();

    let mut used = CONTEXT_HEADER.len();
    let mut keep_from = rendered.len();
    // Walk newest → oldest, keeping entries while they fit.
    for (i, entry) in rendered.iter().enumerate().rev() {
        if used + entry.len() + 2 > char_budget {
            break;
        }
        used += entry.len() + 2;
        keep_from = i;
    }

    let mut out = String::with_capacity(used + 16);
    out.push_str(CONTEXT_HEADER);
    for entry in &rendered[keep_from..] {
        out.push_str("\n\n");
        out.push_str(entry);
    }
    out
}

/// One compact record: identity, severity, and — critically — the raw log
/// line in full, since that is what the model quotes from.
fn render_event(event: &Event) -> String {
    format!(
        "[{id}] {ts} agent={agent} rule={rule_id} level={level}\n\
         desc: {desc}\n\
         location: {loc}\n\
         log: {log}",
        id = event.id,
        ts = event.timestamp,
        agent = event.agent_name,
        rule_id = event.rule_id,
        level = event.rule_level,
        desc = event.rule_description,
        loc = event.location,
        log = event.full_log,
    )
}
