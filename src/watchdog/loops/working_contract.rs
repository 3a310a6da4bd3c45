//! `auto-requeue` / `working-contract-warning`: flags, then requeues, a
//! `doing` task whose assignee has gone offline (spec §4.2: "action owned
//! by working-contract module" — this loop is the scheduling front for it).

use crate::chat::{route_message, MessageCategory, RouteRequest};
use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::{PolicyActionKind, TaskPatch, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;

pub struct WorkingContractLoop {
    tasks: Arc<dyn TaskStore>,
    presence: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    warning_after_min: i64,
    requeue_after_min: i64,
}

impl WorkingContractLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, presence: Arc<dyn PresenceStore>, chat: Arc<dyn ChatStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, warning_after_min: i64, requeue_after_min: i64) -> Self {
        Self { tasks, presence, chat, compliance, clock, warning_after_min, requeue_after_min }
    }
}

#[async_trait]
impl WatchdogLoop for WorkingContractLoop {
    fn name(&self) -> &'static str {
        "working-contract-warning"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;

        let doing: Vec<_> = self.tasks.list_tasks(Default::default()).await.into_iter().filter(|t| t.status == TaskStatus::Doing).collect();

        for task in doing {
            let Some(assignee) = &task.assignee else { continue };
            let Some(presence) = self.presence.get(assignee).await else { continue };
            if presence.status != crate::models::PresenceStatus::Offline {
                continue;
            }
            let offline_min = (now - presence.last_update) / 60_000;

            if offline_min >= self.requeue_after_min {
                let patch = TaskPatch { status: Some(TaskStatus::Todo), assignee: Some(None), ..Default::default() };
                if self.tasks.update_task(&task.id, patch).await.is_err() {
                    continue;
                }
                self.compliance
                    .record(PolicyActionKind::AutoRequeue, Some(task.id.clone()), Some(assignee.clone()), format!("{assignee} offline {offline_min}min; task requeued"), None)
                    .await;
                applied += 1;
            } else if offline_min >= self.warning_after_min {
                let routed = route_message(RouteRequest {
                    from: "system".into(),
                    content: format!("@{assignee} has been offline {offline_min}min while task {} is in doing", task.id),
                    category: MessageCategory::WatchdogAlert,
                    severity: Some("warning".into()),
                    task_id: Some(task.id.clone()),
                    mentions: vec![assignee.clone()],
                    force_channel: None,
                });
                self.chat.post("system", &routed.content, Some(&routed.channel), None, None).await;
                self.compliance
                    .record(PolicyActionKind::WorkingContractWarning, Some(task.id.clone()), Some(assignee.clone()), routed.content, None)
                    .await;
                applied += 1;
            }
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::models::{PresenceStatus, TaskDraft};
    use crate::store::chat_store::InMemoryChatStore;
    use crate::store::presence_store::InMemoryPresenceStore;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    async fn rig(start_ms: i64) -> (Arc<FixedClock>, Arc<InMemoryTaskStore>, Arc<InMemoryPresenceStore>, Arc<InMemoryChatStore>, Arc<ComplianceLog>) {
        let clock = Arc::new(FixedClock::new(start_ms));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone()));
        let chat = Arc::new(InMemoryChatStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));
        (clock, tasks, presence, chat, compliance)
    }

    #[tokio::test]
    async fn warns_on_offline_assignee_before_requeue_threshold() {
        let (clock, tasks, presence, chat, compliance) = rig(0).await;
        let task = tasks.create_task(TaskDraft { title: "x".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();
        presence.update_presence("link", PresenceStatus::Offline, None, None).await;

        clock.advance_ms(40 * 60_000);
        let loop_ = WorkingContractLoop::new(tasks.clone(), presence, chat, compliance, clock, 30, 90);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Doing);
    }

    #[tokio::test]
    async fn requeues_after_offline_past_threshold() {
        let (clock, tasks, presence, chat, compliance) = rig(0).await;
        let task = tasks.create_task(TaskDraft { title: "x".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();
        presence.update_presence("link", PresenceStatus::Offline, None, None).await;

        clock.advance_ms(100 * 60_000);
        let loop_ = WorkingContractLoop::new(tasks.clone(), presence, chat, compliance, clock, 30, 90);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Todo);
        assert!(fresh.assignee.is_none());
    }

    #[tokio::test]
    async fn leaves_online_assignee_alone() {
        let (clock, tasks, presence, chat, compliance) = rig(0).await;
        let task = tasks.create_task(TaskDraft { title: "x".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();
        tasks.update_task(&task.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();
        presence.update_presence("link", PresenceStatus::Working, None, None).await;

        clock.advance_ms(100 * 60_000);
        let loop_ = WorkingContractLoop::new(tasks.clone(), presence, chat, compliance, clock, 30, 90);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
    }
}
