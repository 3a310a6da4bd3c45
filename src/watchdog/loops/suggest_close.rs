//! `suggest-close`: nudges closing a long-idle blocked/todo task without
//! mutating its status (spec §4.2).

use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::{PolicyActionKind, TaskStatus};
use crate::store::task_store::TaskStore;
use crate::watchdog::{sanitize_timestamp, TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;

pub struct SuggestCloseLoop {
    tasks: Arc<dyn TaskStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    threshold_min: i64,
    max_actions: usize,
}

impl SuggestCloseLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, threshold_min: i64, max_actions: usize) -> Self {
        Self { tasks, compliance, clock, threshold_min, max_actions }
    }
}

#[async_trait]
impl WatchdogLoop for SuggestCloseLoop {
    fn name(&self) -> &'static str {
        "suggest-close"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut applied = 0;

        let candidates: Vec<_> = self
            .tasks
            .list_tasks(Default::default())
            .await
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Blocked | TaskStatus::Todo))
            .collect();

        for task in candidates {
            if applied >= self.max_actions {
                break;
            }
            let Some(last_activity) = sanitize_timestamp(now, task.updated_at) else { continue };
            let idle_min = (now - last_activity) / 60_000;
            if idle_min < self.threshold_min {
                continue;
            }

            let comment = format!("[board-health] this task has had no activity for {idle_min}min — consider closing or re-prioritizing.");
            if self.tasks.add_comment(&task.id, "system", &comment).await.is_err() {
                continue;
            }

            self.compliance
                .record(PolicyActionKind::SuggestClose, Some(task.id.clone()), task.assignee.clone(), comment, None)
                .await;
            applied += 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::{EventBus, EventSink};
    use crate::models::TaskDraft;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    fn rig(start_ms: i64) -> (Arc<FixedClock>, Arc<InMemoryTaskStore>, Arc<ComplianceLog>) {
        let clock = Arc::new(FixedClock::new(start_ms));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events, RoleRegistry::new(), false));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));
        (clock, tasks, compliance)
    }

    #[tokio::test]
    async fn suggests_closing_idle_todo_without_mutating_status() {
        let (clock, tasks, compliance) = rig(0);
        let task = tasks.create_task(TaskDraft { title: "stale".into(), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        clock.advance_ms(120 * 60_000);
        let loop_ = SuggestCloseLoop::new(tasks.clone(), compliance, clock.clone(), 60, 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
        let fresh = tasks.get_task(&task.id).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn ignores_fresh_tasks() {
        let (clock, tasks, compliance) = rig(0);
        tasks.create_task(TaskDraft { title: "fresh".into(), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        let loop_ = SuggestCloseLoop::new(tasks.clone(), compliance, clock.clone(), 60, 10);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
    }
}
