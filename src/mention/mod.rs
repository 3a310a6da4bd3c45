//! @mention extraction and ack wiring (spec §4.7).
//!
//! The [`crate::store::presence_store`] owns the `MentionAck` rows; this
//! module owns the parsing (`@name` token extraction) and the event
//! listener that turns `message_posted` events into new ack rows.

use crate::events::EventListener;
use crate::models::{Event, EventType};
use crate::store::presence_store::PresenceStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([a-zA-Z0-9_-]+)").unwrap());

pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    MENTION_RE
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

/// Registered on the event bus; creates one ack row per unique `@name` found
/// in a posted message (spec §4.7 "for each unique name, insert an ack row").
pub struct MentionListener {
    presence: Arc<dyn PresenceStore>,
}

impl MentionListener {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl EventListener for MentionListener {
    fn name(&self) -> &'static str {
        "mention-ack"
    }

    async fn on_event(&self, event: &Event) {
        if event.event_type != EventType::MessagePosted {
            return;
        }
        let from = event.data.get("from").and_then(|v| v.as_str()).unwrap_or_default();
        let content = event.data.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        let channel = event.data.get("channel").and_then(|v| v.as_str()).unwrap_or("general");
        let message_id = event.data.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        if from.is_empty() || content.is_empty() {
            return;
        }

        let mentioned = extract_mentions(content);
        if !mentioned.is_empty() {
            self.presence.record_mentions(message_id, channel, from, &mentioned, event.timestamp).await;
        }

        // Posting in a channel also acks any of the poster's own unacked
        // mentions in that same channel.
        self.presence.ack_mentions(from, channel, event.timestamp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_unique_case_insensitive_names() {
        let names = extract_mentions("hey @link and @Link, also @sage");
        assert_eq!(names, vec!["link".to_string(), "sage".to_string()]);
    }
}
