//! Text dedup stage for backends that repeat themselves.
//!
//! Cursor's partial-output mode sends some text fragments twice and, at the
//! end of a turn, one more fragment replaying everything said so far. This
//! filter drops both. The replay check is a heuristic: it may swallow a
//! long, genuinely self-repeating answer.

use tracing::debug;

use super::events::{ContentBlock, ProviderMessage};

/// A fragment this much larger than what we have accumulated is a replay candidate.
const REPLAY_SIZE_RATIO: f64 = 0.8;
/// How much of the accumulated text a replay candidate must open with.
const REPLAY_PREFIX_CHARS: usize = 100;

#[derive(Debug, Default)]
pub struct TextDedup {
    last_text_block: Option<String>,
    accumulated_text: String,
}

impl TextDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter the text blocks of `message`. Returns `None` when nothing is left.
    pub fn filter(&mut self, message: ProviderMessage) -> Option<ProviderMessage> {
        let (session_id, mut message) = match message {
            ProviderMessage::Assistant {
                session_id,
                message,
            } => (session_id, message),
            other => return Some(other),
        };

        message.content.retain(|block| match block {
            ContentBlock::Text { text } => self.accept(text),
            _ => true,
        });

        if message.content.is_empty() {
            return None;
        }
        Some(ProviderMessage::Assistant {
            session_id,
            message,
        })
    }

    fn accept(&mut self, text: &str) -> bool {
        if self.last_text_block.as_deref() == Some(text) {
            debug!(len = text.len(), "Dropping duplicate text fragment");
            return false;
        }
        if self.is_replay(text) {
            debug!(
                len = text.len(),
                accumulated = self.accumulated_text.len(),
                "Dropping accumulated-text replay"
            );
            return false;
        }
        self.last_text_block = Some(text.to_string());
        self.accumulated_text.push_str(text);
        true
    }

    fn is_replay(&self, text: &str) -> bool {
        if self.accumulated_text.is_empty() {
            return false;
        }
        if (text.len() as f64) <= self.accumulated_text.len() as f64 * REPLAY_SIZE_RATIO {
            return false;
        }
        let accumulated = collapse_whitespace(&self.accumulated_text);
        let candidate = collapse_whitespace(text);
        if candidate.len() < accumulated.len() {
            return false;
        }
        let prefix: String = accumulated.chars().take(REPLAY_PREFIX_CHARS).collect();
        !prefix.is_empty() && candidate.starts_with(&prefix)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(messages: &[ProviderMessage]) -> Vec<String> {
        messages
            .iter()
            .flat_map(|m| m.content().unwrap_or(&[]).iter())
            .filter_map(|b| b.as_text().map(str::to_string))
            .collect()
    }

    fn run(dedup: &mut TextDedup, fragments: &[&str]) -> Vec<ProviderMessage> {
        fragments
            .iter()
            .filter_map(|f| dedup.filter(ProviderMessage::assistant_text(*f)))
            .collect()
    }

    #[test]
    fn duplicate_and_replay_are_dropped() {
        let mut dedup = TextDedup::new();
        let out = run(
            &mut dedup,
            &[
                "Let me check the file.",
                "Let me check the file.",
                "Let me check the file.\n\nThe file defines a parser and two helper functions.",
            ],
        );
        assert_eq!(texts(&out), vec!["Let me check the file."]);
    }

    #[test]
    fn replay_matches_despite_whitespace_differences() {
        let mut dedup = TextDedup::new();
        let out = run(
            &mut dedup,
            &[
                "First part. ",
                "Second part.",
                "First  part.\nSecond part. And the end.",
            ],
        );
        assert_eq!(texts(&out), vec!["First part. ", "Second part."]);
    }

    #[test]
    fn ordinary_deltas_pass_through() {
        let mut dedup = TextDedup::new();
        let out = run(&mut dedup, &["Hello", ", world", "!"]);
        assert_eq!(texts(&out), vec!["Hello", ", world", "!"]);
    }

    #[test]
    fn short_first_delta_does_not_swallow_the_next() {
        let mut dedup = TextDedup::new();
        let out = run(&mut dedup, &["I", " think I can help with that."]);
        assert_eq!(texts(&out), vec!["I", " think I can help with that."]);

        let mut dedup = TextDedup::new();
        let out = run(&mut dedup, &["Done.", " Anything else? Done."]);
        assert_eq!(texts(&out), vec!["Done.", " Anything else? Done."]);
    }

    #[test]
    fn non_text_blocks_survive_and_empty_messages_are_suppressed() {
        let mut dedup = TextDedup::new();
        assert!(dedup.filter(ProviderMessage::assistant_text("same")).is_some());

        let mixed = ProviderMessage::assistant(vec![
            ContentBlock::text("same"),
            ContentBlock::tool_use("Read", "c1", json!({"file_path": "x"})),
        ]);
        let filtered = dedup.filter(mixed).unwrap();
        let content = filtered.content().unwrap();
        assert_eq!(content.len(), 1);
        assert!(matches!(content[0], ContentBlock::ToolUse { .. }));

        assert!(dedup.filter(ProviderMessage::assistant_text("same")).is_none());
    }

    #[test]
    fn non_assistant_messages_are_untouched() {
        let mut dedup = TextDedup::new();
        let msg = ProviderMessage::error("boom");
        assert_eq!(dedup.filter(msg.clone()), Some(msg));
    }
}
