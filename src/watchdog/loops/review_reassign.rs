//! `review-reassign`: hands a stalled validating task's review off to an
//! alternate, presence-active reviewer (spec §4.2, §4.4).

use crate::assignment::{reassign_reviewer, CandidateTask};
use crate::chat::{route_message, MessageCategory, RouteRequest};
use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::metadata::{get_i64, keys};
use crate::models::{PolicyActionKind, TaskPatch, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::{RoleRegistry, TaskStore};
use crate::watchdog::{normalize_maybe_seconds, TickSummary, WatchdogLoop};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ReviewReassignLoop {
    tasks: Arc<dyn TaskStore>,
    presence: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    roles: RoleRegistry,
    threshold_min: i64,
    escalation_target: String,
    max_actions: usize,
}

impl ReviewReassignLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        presence: Arc<dyn PresenceStore>,
        chat: Arc<dyn ChatStore>,
        compliance: Arc<ComplianceLog>,
        clock: Arc<dyn Clock>,
        roles: RoleRegistry,
        threshold_min: i64,
        escalation_target: String,
        max_actions: usize,
    ) -> Self {
        Self { tasks, presence, chat, compliance, clock, roles, threshold_min, escalation_target, max_actions }
    }
}

#[async_trait]
impl WatchdogLoop for ReviewReassignLoop {
    fn name(&self) -> &'static str {
        "review-reassign"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;

        let candidates: Vec<_> = self
            .tasks
            .list_tasks(Default::default())
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Validating && t.reviewer.is_some())
            .collect();

        let doing_counts = self.doing_counts().await;
        let active_agents: std::collections::HashSet<String> = {
            let mut set = std::collections::HashSet::new();
            for presence in self.presence.list().await {
                if self.presence.is_active(&presence.agent).await {
                    set.insert(presence.agent.to_lowercase());
                }
            }
            set
        };

        for task in candidates {
            if applied >= self.max_actions {
                break;
            }
            let Some(raw) = get_i64(&task.metadata, keys::REVIEW_LAST_ACTIVITY_AT) else { continue };
            let normalized = normalize_maybe_seconds(raw);
            let idle_min = (now - normalized) / 60_000;
            if idle_min < self.threshold_min {
                continue;
            }

            let Some(fresh) = self.tasks.get_task(&task.id).await else { continue };
            if fresh.status != TaskStatus::Validating {
                continue;
            }
            let current_reviewer = match &fresh.reviewer {
                Some(r) => r.clone(),
                None => continue,
            };
            let assignee = fresh.assignee.clone().unwrap_or_default();

            let candidate = CandidateTask { title: fresh.title.clone(), tags: fresh.tags.iter().cloned().collect(), cluster_key: String::new() };
            let is_active = |agent: &str| active_agents.contains(&agent.to_lowercase());

            let Some(new_reviewer) = reassign_reviewer(&candidate, &assignee, &current_reviewer, &self.escalation_target, &self.roles, &doing_counts, &is_active) else {
                let routed = route_message(RouteRequest {
                    from: "system".into(),
                    content: format!("task {} has no active alternate reviewer; escalating review-SLA breach", task.id),
                    category: MessageCategory::Escalation,
                    severity: Some("high".into()),
                    task_id: Some(task.id.clone()),
                    mentions: vec![self.escalation_target.clone()],
                    force_channel: None,
                });
                self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
                continue;
            };

            let previous_state = json!({ "reviewer": current_reviewer });
            let patch = TaskPatch { reviewer: Some(Some(new_reviewer.clone())), ..Default::default() };
            if self.tasks.update_task(&task.id, patch).await.is_err() {
                continue;
            }

            self.compliance
                .record(
                    PolicyActionKind::ReviewReassign,
                    Some(task.id.clone()),
                    Some(new_reviewer.clone()),
                    format!("reviewer reassigned from {current_reviewer} to {new_reviewer} after {idle_min}min SLA breach"),
                    Some(previous_state),
                )
                .await;

            let routed = route_message(RouteRequest {
                from: "system".into(),
                content: format!("task {} review reassigned from @{current_reviewer} to @{new_reviewer}", task.id),
                category: MessageCategory::WatchdogAlert,
                severity: Some("info".into()),
                task_id: Some(task.id.clone()),
                mentions: vec![current_reviewer, new_reviewer],
                force_channel: None,
            });
            self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;

            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed: Vec::new() }
    }
}

impl ReviewReassignLoop {
    async fn doing_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.list_tasks(Default::default()).await {
            if task.status == TaskStatus::Doing {
                if let Some(assignee) = task.assignee {
                    *counts.entry(assignee.to_lowercase()).or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::{EventBus, EventSink};
    use crate::models::{PresenceStatus, TaskDraft};
    use crate::store::chat_store::InMemoryChatStore;
    use crate::store::presence_store::InMemoryPresenceStore;
    use crate::store::task_store::{AgentRole, InMemoryTaskStore};

    fn roles() -> RoleRegistry {
        RoleRegistry::new()
            .with_agent("link", AgentRole { role: "engineering".into(), ..Default::default() })
            .with_agent("sage", AgentRole { role: "engineering".into(), ..Default::default() })
    }

    #[tokio::test]
    async fn reassigns_stalled_review_to_active_alternate() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), roles(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        let task = tasks
            .create_task(TaskDraft { title: "ship it".into(), assignee: Some("link".into()), reviewer: Some("hollow".into()), created_by: "kai".into(), ..Default::default() })
            .await
            .unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert(crate::models::metadata::keys::REVIEW_LAST_ACTIVITY_AT.into(), json!(0));
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Validating), metadata: Some(metadata), ..Default::default() }).await.unwrap();

        clock.advance_ms(65 * 60_000);
        presence.update_presence("sage", PresenceStatus::Working, None, None).await;
        clock.advance_ms(10 * 60_000);
        let loop_ = ReviewReassignLoop::new(tasks.clone(), presence, chat, compliance, clock.clone(), roles(), 60, "hollow".into(), 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.reviewer.as_deref(), Some("sage"));
    }

    #[tokio::test]
    async fn escalates_when_no_active_alternate() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), roles(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        let task = tasks
            .create_task(TaskDraft { title: "ship it".into(), assignee: Some("link".into()), reviewer: Some("hollow".into()), created_by: "kai".into(), ..Default::default() })
            .await
            .unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert(crate::models::metadata::keys::REVIEW_LAST_ACTIVITY_AT.into(), json!(0));
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Validating), metadata: Some(metadata), ..Default::default() }).await.unwrap();

        clock.advance_ms(120 * 60_000);
        let loop_ = ReviewReassignLoop::new(tasks.clone(), presence, chat, compliance, clock.clone(), roles(), 60, "hollow".into(), 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.reviewer.as_deref(), Some("hollow"));
    }
}
