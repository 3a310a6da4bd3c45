//! `ready-queue-warning` and `idle-queue-escalation`: per-agent ready-work
//! floor and continuous-idle escalation (spec §4.2). Both are informational
//! — no task or presence mutation, only chat alerts.

use crate::chat::{route_message, MessageCategory, RouteRequest};
use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::constants::DEFAULT_COOLDOWN_MIN;
use crate::models::{PolicyActionKind, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{CooldownTracker, FingerprintTracker, TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ReadyQueueLoop {
    tasks: Arc<dyn TaskStore>,
    presence: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    ready_floor: usize,
    escalate_after_min: i64,
    cooldown: CooldownTracker,
    fingerprints: FingerprintTracker,
    idle_since: Mutex<HashMap<String, i64>>,
}

impl ReadyQueueLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, presence: Arc<dyn PresenceStore>, chat: Arc<dyn ChatStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, ready_floor: usize, escalate_after_min: i64) -> Self {
        Self {
            tasks,
            presence,
            chat,
            compliance,
            clock,
            ready_floor,
            escalate_after_min,
            cooldown: CooldownTracker::new(),
            fingerprints: FingerprintTracker::new(),
            idle_since: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WatchdogLoop for ReadyQueueLoop {
    fn name(&self) -> &'static str {
        "ready-queue-warning"
    }

    async fn tick(&self, force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;
        let mut suppressed = Vec::new();

        let tasks = self.tasks.list_tasks(Default::default()).await;
        let is_unblocked = |t: &crate::models::Task| {
            t.blocked_by.iter().all(|dep| tasks.iter().find(|d| &d.id == dep).map(|d| d.status == TaskStatus::Done).unwrap_or(true))
        };

        let known_agents = self.presence.list().await;
        let mut agents: std::collections::BTreeSet<String> = known_agents.iter().map(|p| p.agent.clone()).collect();
        for task in &tasks {
            if let Some(assignee) = &task.assignee {
                agents.insert(assignee.clone());
            }
        }

        for agent in agents {
            // Ghost agents: never appeared in presence.
            if !known_agents.iter().any(|p| p.agent.eq_ignore_ascii_case(&agent)) {
                continue;
            }

            let ready_count = tasks.iter().filter(|t| t.status == TaskStatus::Todo && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false) && is_unblocked(t)).count();
            let todo_count = tasks.iter().filter(|t| t.status == TaskStatus::Todo && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false)).count();
            let doing_count = tasks.iter().filter(|t| t.status == TaskStatus::Doing && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false)).count();
            let validating_count = tasks.iter().filter(|t| t.status == TaskStatus::Validating && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false)).count();
            let mut blocked_ids: Vec<&str> = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Blocked && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false))
                .map(|t| t.id.as_str())
                .collect();
            blocked_ids.sort();

            let is_idle = doing_count + validating_count + ready_count == 0;
            let mut idle_since = self.idle_since.lock().await;
            if is_idle {
                idle_since.entry(agent.clone()).or_insert(now);
            } else {
                idle_since.remove(&agent);
            }
            let continuous_idle_min = idle_since.get(&agent).map(|since| (now - since) / 60_000).unwrap_or(0);
            drop(idle_since);

            if ready_count >= self.ready_floor && !is_idle {
                continue;
            }

            let fingerprint = format!("{ready_count}|{todo_count}|{blocked_ids:?}|{doing_count}|{validating_count}");
            if !force && !self.fingerprints.changed(&agent, fingerprint).await {
                suppressed.push(format!("{agent}: state-fingerprint-unchanged"));
                continue;
            }
            if !force && !self.cooldown.ready(&agent, now, DEFAULT_COOLDOWN_MIN).await {
                suppressed.push(format!("{agent}: cooldown-active"));
                continue;
            }

            let (category, kind, message) = if is_idle && continuous_idle_min >= self.escalate_after_min {
                (
                    MessageCategory::Escalation,
                    PolicyActionKind::IdleQueueEscalation,
                    format!("@{agent} has been idle for {continuous_idle_min}min with no ready, doing, or validating work"),
                )
            } else {
                (
                    MessageCategory::WatchdogAlert,
                    PolicyActionKind::ReadyQueueWarning,
                    format!("@{agent} has only {ready_count} ready task(s), below the floor of {}", self.ready_floor),
                )
            };

            let routed = route_message(RouteRequest { from: "system".into(), content: message.clone(), category, severity: None, task_id: None, mentions: vec![agent.clone()], force_channel: None });
            self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
            self.compliance.record(kind, None, Some(agent.clone()), message, None).await;
            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::models::{PresenceStatus, TaskDraft};
    use crate::store::chat_store::InMemoryChatStore;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    #[tokio::test]
    async fn warns_when_ready_floor_unmet() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(crate::store::presence_store::InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        presence.update_presence("link", PresenceStatus::Working, None, None).await;
        tasks.create_task(TaskDraft { title: "only one".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        let loop_ = ReadyQueueLoop::new(tasks, presence, chat, compliance, clock, 3, 120);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn escalates_continuous_idle_past_threshold() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(crate::store::presence_store::InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        presence.update_presence("link", PresenceStatus::Idle, None, None).await;

        let loop_ = ReadyQueueLoop::new(tasks, presence, chat, compliance, clock.clone(), 1, 60);
        loop_.tick(false).await;
        clock.advance_ms(90 * 60_000);
        let summary = loop_.tick(true).await;

        assert_eq!(summary.actions_applied, 1);
    }
}
