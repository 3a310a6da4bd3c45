//! Append-only chat store with edit/delete-by-author and reactions (spec §4.6).

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::EventSink;
use crate::models::{EventType, Message};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn post(&self, from: &str, content: &str, channel: Option<&str>, thread_id: Option<&str>, reply_to: Option<&str>) -> Message;
    async fn edit(&self, message_id: &str, author: &str, content: &str) -> Result<Message>;
    async fn delete(&self, message_id: &str, author: &str) -> Result<()>;
    async fn react(&self, message_id: &str, agent: &str, emoji: &str) -> Result<()>;
    async fn get(&self, message_id: &str) -> Option<Message>;
    async fn thread(&self, message_id: &str) -> Vec<Message>;
    async fn list_channel(&self, channel: &str, limit: Option<usize>) -> Vec<Message>;
    async fn channels(&self) -> Vec<String>;
    async fn search(&self, query: &str) -> Vec<Message>;
}

pub struct InMemoryChatStore {
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    messages: RwLock<HashMap<String, Message>>,
    /// (channel, timestamp) ordering index, mirrored from `messages`.
    by_channel: RwLock<HashMap<String, Vec<String>>>,
    reactions: RwLock<HashMap<String, HashMap<String, HashSet<String>>>>,
}

impl InMemoryChatStore {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            clock,
            events,
            messages: RwLock::new(HashMap::new()),
            by_channel: RwLock::new(HashMap::new()),
            reactions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn post(&self, from: &str, content: &str, channel: Option<&str>, thread_id: Option<&str>, reply_to: Option<&str>) -> Message {
        let channel = channel.unwrap_or("general").to_string();
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            content: content.to_string(),
            channel: channel.clone(),
            timestamp: self.clock.now_ms(),
            thread_id: thread_id.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
            metadata: Default::default(),
        };

        self.messages.write().await.insert(message.id.clone(), message.clone());
        self.by_channel.write().await.entry(channel).or_default().push(message.id.clone());

        self.events
            .publish(EventType::MessagePosted, Some(from.to_string()), None, json!(&message))
            .await;

        message
    }

    async fn edit(&self, message_id: &str, author: &str, content: &str) -> Result<Message> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(message_id).ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
        if message.from != author {
            return Err(CoreError::Forbidden("only the original author may edit this message".into()));
        }
        message.content = content.to_string();
        message.metadata.insert("editedAt".to_string(), json!(self.clock.now_ms()));
        Ok(message.clone())
    }

    async fn delete(&self, message_id: &str, author: &str) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages.get(message_id).ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
        if message.from != author {
            return Err(CoreError::Forbidden("only the original author may delete this message".into()));
        }
        let channel = message.channel.clone();
        messages.remove(message_id);
        drop(messages);
        if let Some(ids) = self.by_channel.write().await.get_mut(&channel) {
            ids.retain(|id| id != message_id);
        }
        Ok(())
    }

    async fn react(&self, message_id: &str, agent: &str, emoji: &str) -> Result<()> {
        if !self.messages.read().await.contains_key(message_id) {
            return Err(CoreError::NotFound(format!("message {message_id}")));
        }
        self.reactions
            .write()
            .await
            .entry(message_id.to_string())
            .or_default()
            .entry(emoji.to_string())
            .or_default()
            .insert(agent.to_string());
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Option<Message> {
        self.messages.read().await.get(message_id).cloned()
    }

    async fn thread(&self, message_id: &str) -> Vec<Message> {
        let messages = self.messages.read().await;
        let mut out: Vec<Message> = messages
            .values()
            .filter(|m| m.thread_id.as_deref() == Some(message_id) || m.id == message_id || m.reply_to.as_deref() == Some(message_id))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.timestamp);
        out
    }

    async fn list_channel(&self, channel: &str, limit: Option<usize>) -> Vec<Message> {
        let by_channel = self.by_channel.read().await;
        let messages = self.messages.read().await;
        let mut out: Vec<Message> = by_channel
            .get(channel)
            .map(|ids| ids.iter().filter_map(|id| messages.get(id).cloned()).collect())
            .unwrap_or_default();
        out.sort_by_key(|m| m.timestamp);
        if let Some(limit) = limit {
            if out.len() > limit {
                let excess = out.len() - limit;
                out.drain(0..excess);
            }
        }
        out
    }

    async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.by_channel.read().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    async fn search(&self, query: &str) -> Vec<Message> {
        let query = query.to_lowercase();
        let mut out: Vec<Message> = self
            .messages
            .read()
            .await
            .values()
            .filter(|m| m.content.to_lowercase().contains(&query))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.timestamp);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;

    fn store() -> InMemoryChatStore {
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        InMemoryChatStore::new(clock, events)
    }

    #[tokio::test]
    async fn post_and_list_channel() {
        let store = store();
        store.post("link", "hello", Some("general"), None, None).await;
        store.post("link", "default channel", None, None, None).await;

        let general = store.list_channel("general", None).await;
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].content, "hello");
    }

    #[tokio::test]
    async fn only_author_may_edit_or_delete() {
        let store = store();
        let message = store.post("link", "hello", None, None, None).await;

        let err = store.edit(&message.id, "sage", "hijacked").await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let edited = store.edit(&message.id, "link", "hello, edited").await.unwrap();
        assert_eq!(edited.content, "hello, edited");
        assert!(edited.metadata.contains_key("editedAt"));

        let err = store.delete(&message.id, "sage").await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        store.delete(&message.id, "link").await.unwrap();
        assert!(store.get(&message.id).await.is_none());
    }

    #[tokio::test]
    async fn react_requires_existing_message() {
        let store = store();
        let err = store.react("missing", "link", "+1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let message = store.post("link", "hello", None, None, None).await;
        store.react(&message.id, "sage", "+1").await.unwrap();
    }

    #[tokio::test]
    async fn thread_collects_replies_and_root() {
        let store = store();
        let root = store.post("link", "root", None, None, None).await;
        store.post("sage", "reply one", None, Some(&root.id), Some(&root.id)).await;
        store.post("kai", "reply two", None, Some(&root.id), Some(&root.id)).await;

        let thread = store.thread(&root.id).await;
        assert_eq!(thread.len(), 3);
    }

    #[tokio::test]
    async fn search_matches_content_case_insensitively() {
        let store = store();
        store.post("link", "Ship the release", None, None, None).await;
        store.post("link", "unrelated message", None, None, None).await;

        let hits = store.search("release").await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn list_channel_respects_limit() {
        let store = store();
        for i in 0..5 {
            store.post("link", &format!("msg {i}"), Some("general"), None, None).await;
        }
        let limited = store.list_channel("general", Some(2)).await;
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].content, "msg 3");
        assert_eq!(limited[1].content, "msg 4");
    }
}
