//! `auto-block-stale`: blocks a `doing` task that has seen no effective
//! activity for longer than the configured threshold (spec §4.2).

use crate::chat::{route_message, MessageCategory, RouteRequest};
use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::{PolicyActionKind, TaskPatch, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{sanitize_timestamp, TickSummary, WatchdogLoop};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct AutoBlockStaleLoop {
    tasks: Arc<dyn TaskStore>,
    chat: Arc<dyn ChatStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    threshold_min: i64,
    max_actions: usize,
}

impl AutoBlockStaleLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, chat: Arc<dyn ChatStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, threshold_min: i64, max_actions: usize) -> Self {
        Self { tasks, chat, compliance, clock, threshold_min, max_actions }
    }
}

#[async_trait]
impl WatchdogLoop for AutoBlockStaleLoop {
    fn name(&self) -> &'static str {
        "auto-block-stale"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;
        let mut suppressed = Vec::new();

        let candidates: Vec<_> = self
            .tasks
            .list_tasks(Default::default())
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Doing)
            .collect();

        for task in candidates {
            if applied >= self.max_actions {
                suppressed.push(format!("{}: max-actions-per-tick reached", task.id));
                break;
            }

            let last_comment = self.tasks.last_comment_timestamp(&task.id).await;
            let last_activity = match sanitize_timestamp(now, last_comment.unwrap_or(task.updated_at).max(task.updated_at)) {
                Some(ts) => ts,
                None => continue,
            };

            let idle_min = (now - last_activity) / 60_000;
            if idle_min < self.threshold_min {
                continue;
            }

            // Race guard: re-read before mutating.
            let Some(fresh) = self.tasks.get_task(&task.id).await else { continue };
            if fresh.status != TaskStatus::Doing {
                continue;
            }

            let previous_state = json!({ "status": fresh.status.as_str() });
            let patch = TaskPatch { status: Some(TaskStatus::Blocked), ..Default::default() };
            if self.tasks.update_task(&task.id, patch).await.is_err() {
                continue;
            }

            let action = self
                .compliance
                .record(
                    PolicyActionKind::AutoBlockStale,
                    Some(task.id.clone()),
                    fresh.assignee.clone(),
                    format!("auto-blocked after {idle_min}min idle in doing"),
                    Some(previous_state),
                )
                .await;

            if let Some(assignee) = &fresh.assignee {
                let routed = route_message(RouteRequest {
                    from: "system".into(),
                    content: format!("task {} auto-blocked after {idle_min}min of inactivity (action {})", task.id, action.id),
                    category: MessageCategory::WatchdogAlert,
                    severity: Some("warning".into()),
                    task_id: Some(task.id.clone()),
                    mentions: vec![assignee.clone()],
                    force_channel: None,
                });
                self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
            }

            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::{EventBus, EventSink};
    use crate::models::TaskDraft;
    use crate::store::chat_store::InMemoryChatStore;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    fn rig(start_ms: i64) -> (Arc<FixedClock>, Arc<InMemoryTaskStore>, Arc<InMemoryChatStore>, Arc<ComplianceLog>) {
        let clock = Arc::new(FixedClock::new(start_ms));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));
        (clock, tasks, chat, compliance)
    }

    #[tokio::test]
    async fn blocks_doing_task_past_threshold() {
        let (clock, tasks, chat, compliance) = rig(0);
        let task = tasks
            .create_task(TaskDraft { title: "fix it".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() })
            .await
            .unwrap();
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();

        clock.advance_ms(61 * 60_000);
        let loop_ = AutoBlockStaleLoop::new(tasks.clone(), chat, compliance, clock.clone(), 60, 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn leaves_fresh_doing_task_alone() {
        let (clock, tasks, chat, compliance) = rig(0);
        let task = tasks
            .create_task(TaskDraft { title: "fix it".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() })
            .await
            .unwrap();
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();

        clock.advance_ms(5 * 60_000);
        let loop_ = AutoBlockStaleLoop::new(tasks.clone(), chat, compliance, clock.clone(), 60, 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Doing);
    }

    #[tokio::test]
    async fn respects_max_actions_per_tick() {
        let (clock, tasks, chat, compliance) = rig(0);
        for i in 0..3 {
            let task = tasks
                .create_task(TaskDraft { title: format!("task {i}"), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() })
                .await
                .unwrap();
            tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();
        }

        clock.advance_ms(61 * 60_000);
        let loop_ = AutoBlockStaleLoop::new(tasks.clone(), chat, compliance, clock.clone(), 60, 2);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 2);
        assert!(!summary.suppressed.is_empty());
    }
}
