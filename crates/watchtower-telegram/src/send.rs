//! Chunked sending for Telegram's 4096-character message limit.

use std::time::Duration;

use teloxide::prelude::*;
use tracing::warn;

/// Telegram's limit is 4096; leave a little slack.
const CHUNK_MAX: usize = 4090;

/// Split `text` into sendable chunks, preferring newline boundaries and
/// force-splitting single oversized lines as a last resort.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };
        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Force-split any chunk a single long line pushed over the cap.
    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
            continue;
        }
        let mut remaining = chunk.as_str();
        while remaining.len() > CHUNK_MAX {
            let mut cut = CHUNK_MAX;
            while cut > 0 && !remaining.is_char_boundary(cut) {
                cut -= 1;
            }
            let split_at = remaining[..cut]
                .rfind('\n')
                .or_else(|| remaining[..cut].rfind(' '))
                .unwrap_or(cut);
            result.push(remaining[..split_at].to_string());
            remaining = remaining[split_at..].trim_start();
        }
        if !remaining.is_empty() {
            result.push(remaining.to_string());
        }
    }
    result
}

/// Send `text` to `chat_id`, chunked, with a short pause between chunks to
/// stay under Telegram's rate limits.
pub async fn send_chunked(bot: &Bot, chat_id: ChatId, text: &str) {
    let chunks = split_chunks(text);
    for (i, chunk) in chunks.iter().enumerate() {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            warn!(error = %e, chunk_index = i, "telegram send failed");
        }
        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("hello");
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_newlines_under_cap() {
        let line = "a".repeat(2000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn force_splits_one_long_line() {
        let text = "x".repeat(9000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }
}
