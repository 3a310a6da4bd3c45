//! Presence snapshots, activity heartbeats, and mention-ack tracking (spec §4.7).

use crate::clock::Clock;
use crate::constants::PRESENCE_ACTIVE_WINDOW_MIN;
use crate::events::EventSink;
use crate::models::{Focus, MentionAck, PresenceStatus, Presence, EventType};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const OFFLINE_AFTER_MIN: i64 = 10;

#[derive(Debug, Clone, Default)]
struct ActivityRow {
    last_update: i64,
    tasks_completed_today: u32,
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn update_presence(&self, agent: &str, status: PresenceStatus, current_task: Option<String>, since: Option<i64>) -> Presence;
    async fn record_activity(&self, agent: &str, kind: &str);
    async fn set_focus(&self, agent: &str, focus: Focus) -> Option<Presence>;
    async fn get(&self, agent: &str) -> Option<Presence>;
    async fn list(&self) -> Vec<Presence>;
    async fn is_active(&self, agent: &str) -> bool;
    async fn record_mentions(&self, message_id: &str, channel: &str, from: &str, mentioned: &[String], created_at: i64);
    async fn ack_mentions(&self, agent: &str, channel: &str, at: i64);
    async fn unacked_mentions(&self, older_than: i64) -> Vec<MentionAck>;
    async fn mentions_for(&self, agent: &str) -> Vec<MentionAck>;
}

pub struct InMemoryPresenceStore {
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    presence: RwLock<HashMap<String, Presence>>,
    activity: RwLock<HashMap<String, ActivityRow>>,
    mentions: RwLock<Vec<MentionAck>>,
}

impl InMemoryPresenceStore {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            clock,
            events,
            presence: RwLock::new(HashMap::new()),
            activity: RwLock::new(HashMap::new()),
            mentions: RwLock::new(Vec::new()),
        }
    }

    /// For agents with no explicit presence row, synthesize one from the
    /// activity row (spec §4.7): working if any tasks completed today,
    /// otherwise idle; offline past the inactivity threshold either way.
    fn infer(agent: &str, row: &ActivityRow, now: i64) -> Presence {
        let inactive_min = (now - row.last_update) / 60_000;
        let status = if inactive_min > OFFLINE_AFTER_MIN {
            PresenceStatus::Offline
        } else if row.tasks_completed_today > 0 {
            PresenceStatus::Working
        } else {
            PresenceStatus::Idle
        };
        Presence {
            agent: agent.to_string(),
            status,
            since: row.last_update,
            last_update: row.last_update,
            current_task: None,
            focus: None,
        }
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn update_presence(&self, agent: &str, status: PresenceStatus, current_task: Option<String>, since: Option<i64>) -> Presence {
        let now = self.clock.now_ms();
        let presence = Presence {
            agent: agent.to_string(),
            status,
            since: since.unwrap_or(now),
            last_update: now,
            current_task,
            focus: None,
        };
        self.presence.write().await.insert(agent.to_string(), presence.clone());
        self.activity.write().await.entry(agent.to_string()).or_default().last_update = now;

        self.events
            .publish(EventType::PresenceUpdated, Some(agent.to_string()), None, json!(&presence))
            .await;

        presence
    }

    async fn record_activity(&self, agent: &str, kind: &str) {
        let now = self.clock.now_ms();
        {
            let mut activity = self.activity.write().await;
            let row = activity.entry(agent.to_string()).or_default();
            row.last_update = now;
            if kind == "task_completed" {
                row.tasks_completed_today += 1;
            }
        }

        // Heartbeat: progress-implying activity nudges status to working
        // without clobbering an explicitly-set status like blocked.
        if matches!(kind, "message_posted" | "task_claimed" | "task_updated") {
            let mut presence = self.presence.write().await;
            match presence.get_mut(agent) {
                Some(row) if !matches!(row.status, PresenceStatus::Blocked) => {
                    row.status = PresenceStatus::Working;
                    row.last_update = now;
                }
                Some(row) => row.last_update = now,
                None => {
                    presence.insert(
                        agent.to_string(),
                        Presence {
                            agent: agent.to_string(),
                            status: PresenceStatus::Working,
                            since: now,
                            last_update: now,
                            current_task: None,
                            focus: None,
                        },
                    );
                }
            }
        }
    }

    async fn set_focus(&self, agent: &str, focus: Focus) -> Option<Presence> {
        let mut presence = self.presence.write().await;
        let row = presence.get_mut(agent)?;
        row.focus = Some(focus);
        row.last_update = self.clock.now_ms();
        Some(row.clone())
    }

    async fn get(&self, agent: &str) -> Option<Presence> {
        if let Some(presence) = self.presence.read().await.get(agent).cloned() {
            return Some(presence);
        }
        let activity = self.activity.read().await;
        activity.get(agent).map(|row| Self::infer(agent, row, self.clock.now_ms()))
    }

    async fn list(&self) -> Vec<Presence> {
        let now = self.clock.now_ms();
        let presence = self.presence.read().await;
        let activity = self.activity.read().await;
        let mut out: Vec<Presence> = presence.values().cloned().collect();
        for (agent, row) in activity.iter() {
            if !presence.contains_key(agent) {
                out.push(Self::infer(agent, row, now));
            }
        }
        out.sort_by(|a, b| a.agent.cmp(&b.agent));
        out
    }

    async fn is_active(&self, agent: &str) -> bool {
        match self.get(agent).await {
            Some(p) => (self.clock.now_ms() - p.last_update) <= PRESENCE_ACTIVE_WINDOW_MIN * 60_000,
            None => false,
        }
    }

    async fn record_mentions(&self, message_id: &str, channel: &str, from: &str, mentioned: &[String], created_at: i64) {
        if mentioned.is_empty() {
            return;
        }
        let mut rows = self.mentions.write().await;
        for name in mentioned {
            if name == from {
                continue;
            }
            rows.push(MentionAck {
                agent: name.clone(),
                message_id: message_id.to_string(),
                mentioned_by: from.to_string(),
                channel: channel.to_string(),
                created_at,
                acked_at: None,
            });
        }
    }

    async fn ack_mentions(&self, agent: &str, channel: &str, at: i64) {
        let mut rows = self.mentions.write().await;
        for row in rows.iter_mut().filter(|r| r.agent == agent && r.channel == channel && r.acked_at.is_none()) {
            row.acked_at = Some(at);
        }
    }

    async fn unacked_mentions(&self, older_than: i64) -> Vec<MentionAck> {
        self.mentions
            .read()
            .await
            .iter()
            .filter(|r| r.acked_at.is_none() && r.created_at < older_than)
            .cloned()
            .collect()
    }

    async fn mentions_for(&self, agent: &str) -> Vec<MentionAck> {
        self.mentions.read().await.iter().filter(|r| r.agent == agent).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;

    fn store() -> (InMemoryPresenceStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(0));
        let events = Arc::new(EventBus::new(clock.clone()));
        (InMemoryPresenceStore::new(clock.clone(), events), clock)
    }

    #[tokio::test]
    async fn activity_without_explicit_presence_is_inferred_working() {
        let (store, _clock) = store();
        store.record_activity("kai", "task_completed").await;
        let presence = store.get("kai").await.expect("inferred presence");
        assert_eq!(presence.status, PresenceStatus::Working);
    }

    #[tokio::test]
    async fn inactive_agent_is_inferred_offline() {
        let (store, clock) = store();
        store.record_activity("kai", "message_posted").await;
        clock.advance_ms(11 * 60_000);
        let presence = store.get("kai").await.expect("inferred presence");
        assert_eq!(presence.status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn mention_creates_unacked_row_until_agent_posts_in_channel() {
        let (store, clock) = store();
        store.record_mentions("m1", "general", "kai", &["sage".to_string()], clock.now_ms()).await;
        clock.advance_ms(5_000);
        let unacked = store.unacked_mentions(clock.now_ms()).await;
        assert_eq!(unacked.len(), 1);

        store.ack_mentions("sage", "general", clock.now_ms()).await;
        let unacked = store.unacked_mentions(clock.now_ms() + 1).await;
        assert!(unacked.is_empty());
    }
}
