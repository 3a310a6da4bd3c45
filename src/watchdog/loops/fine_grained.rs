//! The three fine-grained loops (spec §4.2): `idle-nudge`, `cadence`, and
//! `mention-rescue`. Each runs on a 30-60s cadence and posts a narrow,
//! targeted coaching/escalation message rather than mutating task state.

use crate::chat::{route_message, MessageCategory, RouteRequest};
use crate::clock::Clock;
use crate::constants::DEFAULT_MENTION_RESCUE_THRESHOLD_MIN;
use crate::models::{PresenceStatus, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{CooldownTracker, TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;

/// Nudges an agent sitting `idle` while ready work exists for them.
pub struct IdleNudgeLoop {
    tasks: Arc<dyn TaskStore>,
    presence: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownTracker,
    cooldown_min: i64,
}

impl IdleNudgeLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, presence: Arc<dyn PresenceStore>, chat: Arc<dyn ChatStore>, clock: Arc<dyn Clock>, cooldown_min: i64) -> Self {
        Self { tasks, presence, chat, clock, cooldown: CooldownTracker::new(), cooldown_min }
    }
}

#[async_trait]
impl WatchdogLoop for IdleNudgeLoop {
    fn name(&self) -> &'static str {
        "idle-nudge"
    }

    async fn tick(&self, force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;
        let mut suppressed = Vec::new();

        let tasks = self.tasks.list_tasks(Default::default()).await;
        let idle_agents: Vec<_> = self.presence.list().await.into_iter().filter(|p| p.status == PresenceStatus::Idle).collect();

        for presence in idle_agents {
            let agent = &presence.agent;

            if !force && self.presence.is_active(agent).await && (now - presence.last_update) < 60_000 {
                suppressed.push(format!("{agent}: recent-activity-suppressed"));
                continue;
            }

            let ready = tasks.iter().find(|t| {
                t.status == TaskStatus::Todo
                    && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(agent)).unwrap_or(false)
                    && t.blocked_by.iter().all(|dep| tasks.iter().find(|d| &d.id == dep).map(|d| d.status == TaskStatus::Done).unwrap_or(true))
            });

            let Some(ready) = ready else {
                suppressed.push(format!("{agent}: missing-active-task"));
                continue;
            };

            if !force && !self.cooldown.ready(agent, now, self.cooldown_min).await {
                suppressed.push(format!("{agent}: cooldown-active"));
                continue;
            }

            let routed = route_message(RouteRequest {
                from: "system".into(),
                content: format!("@{agent} you're idle with ready work: {} ({})", ready.title, ready.id),
                category: MessageCategory::WatchdogAlert,
                severity: None,
                task_id: Some(ready.id.clone()),
                mentions: vec![agent.clone()],
                force_channel: None,
            });
            self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed }
    }
}

/// Periodic check-in nudge for agents actively `doing` a task, independent
/// of the much longer `auto-block-stale` threshold.
pub struct CadenceLoop {
    tasks: Arc<dyn TaskStore>,
    chat: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownTracker,
    cadence_min: i64,
    cooldown_min: i64,
}

impl CadenceLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, chat: Arc<dyn ChatStore>, clock: Arc<dyn Clock>, cadence_min: i64, cooldown_min: i64) -> Self {
        Self { tasks, chat, clock, cooldown: CooldownTracker::new(), cadence_min, cooldown_min }
    }
}

#[async_trait]
impl WatchdogLoop for CadenceLoop {
    fn name(&self) -> &'static str {
        "cadence"
    }

    async fn tick(&self, force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;
        let mut suppressed = Vec::new();

        let tasks = self.tasks.list_tasks(Default::default()).await;

        for task in &tasks {
            let Some(assignee) = &task.assignee else { continue };

            if task.status == TaskStatus::Validating {
                suppressed.push(format!("{}: validating-task-suppressed", task.id));
                continue;
            }
            if task.status != TaskStatus::Doing {
                continue;
            }

            let last_comment = self.tasks.last_comment_timestamp(&task.id).await;
            let last_activity = last_comment.unwrap_or(task.updated_at).max(task.updated_at);
            let quiet_min = (now - last_activity) / 60_000;

            if quiet_min < self.cadence_min {
                suppressed.push(format!("{}: recent-activity-suppressed", task.id));
                continue;
            }

            if !force && !self.cooldown.ready(&task.id, now, self.cooldown_min).await {
                suppressed.push(format!("{}: cooldown-active", task.id));
                continue;
            }

            let routed = route_message(RouteRequest {
                from: "system".into(),
                content: format!("@{assignee} check-in: any update on {} ({})?", task.title, task.id),
                category: MessageCategory::WatchdogAlert,
                severity: None,
                task_id: Some(task.id.clone()),
                mentions: vec![assignee.clone()],
                force_channel: None,
            });
            self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed }
    }
}

/// Re-surfaces mentions an agent has left unacked past the rescue threshold.
pub struct MentionRescueLoop {
    presence: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    threshold_min: i64,
}

impl MentionRescueLoop {
    pub fn new(presence: Arc<dyn PresenceStore>, chat: Arc<dyn ChatStore>, clock: Arc<dyn Clock>) -> Self {
        Self { presence, chat, clock, threshold_min: DEFAULT_MENTION_RESCUE_THRESHOLD_MIN }
    }
}

#[async_trait]
impl WatchdogLoop for MentionRescueLoop {
    fn name(&self) -> &'static str {
        "mention-rescue"
    }

    async fn tick(&self, force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;
        let mut suppressed = Vec::new();

        let older_than = if force { now } else { now - self.threshold_min * 60_000 };
        let stale = self.presence.unacked_mentions(older_than).await;

        if stale.is_empty() {
            suppressed.push("no-stale-mentions".to_string());
        }

        for ack in stale {
            let routed = route_message(RouteRequest {
                from: "system".into(),
                content: format!("@{} you were mentioned by @{} in #{} and haven't responded yet", ack.agent, ack.mentioned_by, ack.channel),
                category: MessageCategory::WatchdogAlert,
                severity: None,
                task_id: None,
                mentions: vec![ack.agent.clone()],
                force_channel: Some(ack.channel.clone()),
            });
            self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed }
    }
}

#[cfg(test)]
mod fine_grained_tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::models::TaskDraft;
    use crate::store::chat_store::InMemoryChatStore;
    use crate::store::presence_store::InMemoryPresenceStore;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    #[tokio::test]
    async fn idle_nudge_fires_when_ready_work_exists() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        presence.update_presence("link", PresenceStatus::Idle, None, None).await;
        tasks.create_task(TaskDraft { title: "ready work".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        clock.advance_ms(5 * 60_000);
        let loop_ = IdleNudgeLoop::new(tasks, presence, chat, clock, 5);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn idle_nudge_suppressed_with_no_ready_task() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        presence.update_presence("link", PresenceStatus::Idle, None, None).await;
        clock.advance_ms(5 * 60_000);

        let loop_ = IdleNudgeLoop::new(tasks, presence, chat, clock, 5);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
        assert!(summary.suppressed.iter().any(|s| s.contains("missing-active-task")));
    }

    #[tokio::test]
    async fn cadence_nudges_quiet_doing_task() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        let task = tasks.create_task(TaskDraft { title: "in progress".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();
        tasks.update_task(&task.id, crate::models::TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();

        clock.advance_ms(50 * 60_000);
        let loop_ = CadenceLoop::new(tasks, chat, clock, 45, 5);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn cadence_suppresses_validating_tasks() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        let task = tasks.create_task(TaskDraft { title: "in review".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();
        tasks.update_task(&task.id, crate::models::TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("qa_bundle".into(), serde_json::json!({ "summary": "s", "artifact_links": ["https://x/pull/1"], "checks": ["npm build"] }));
        tasks.update_task(&task.id, crate::models::TaskPatch { status: Some(TaskStatus::Validating), metadata: Some(metadata), ..Default::default() }).await.unwrap();

        clock.advance_ms(50 * 60_000);
        let loop_ = CadenceLoop::new(tasks, chat, clock, 45, 5);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
        assert!(summary.suppressed.iter().any(|s| s.contains("validating-task-suppressed")));
    }

    #[tokio::test]
    async fn mention_rescue_resurfaces_stale_mentions() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        presence.record_mentions("msg-1", "general", "kai", &["link".to_string()], 0).await;

        clock.advance_ms((DEFAULT_MENTION_RESCUE_THRESHOLD_MIN + 5) * 60_000);
        let loop_ = MentionRescueLoop::new(presence, chat, clock);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn mention_rescue_no_op_when_nothing_stale() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));

        let loop_ = MentionRescueLoop::new(presence, chat, clock);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
        assert!(summary.suppressed.contains(&"no-stale-mentions".to_string()));
    }
}
