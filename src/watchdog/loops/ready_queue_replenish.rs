//! `ready-queue-replenish`: per-lane sweep that flags unblocked-todo counts
//! under the lane's ready floor. Informational — no placeholder tasks are
//! created (spec §4.2).

use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::constants::DEFAULT_INACTIVE_AGENT_THRESHOLD_MIN;
use crate::models::{PolicyActionKind, TaskStatus};
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReadyQueueReplenishLoop {
    tasks: Arc<dyn TaskStore>,
    presence: Arc<dyn PresenceStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    ready_floor: usize,
}

impl ReadyQueueReplenishLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, presence: Arc<dyn PresenceStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, ready_floor: usize) -> Self {
        Self { tasks, presence, compliance, clock, ready_floor }
    }
}

#[async_trait]
impl WatchdogLoop for ReadyQueueReplenishLoop {
    fn name(&self) -> &'static str {
        "ready-queue-replenish"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let tasks = self.tasks.list_tasks(Default::default()).await;
        let known_agents = self.presence.list().await;
        let mut applied = 0;

        let mut agents: std::collections::BTreeSet<String> = known_agents.iter().map(|p| p.agent.clone()).collect();
        for task in &tasks {
            if let Some(assignee) = &task.assignee {
                agents.insert(assignee.clone());
            }
        }

        for agent in agents {
            let presence = known_agents.iter().find(|p| p.agent.eq_ignore_ascii_case(&agent));
            let Some(presence) = presence else { continue };
            let inactive_min = (now - presence.last_update) / 60_000;
            if inactive_min > DEFAULT_INACTIVE_AGENT_THRESHOLD_MIN {
                continue;
            }

            let unblocked_todo = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Todo && t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false))
                .filter(|t| t.blocked_by.iter().all(|dep| tasks.iter().find(|d| &d.id == dep).map(|d| d.status == TaskStatus::Done).unwrap_or(true)))
                .count();

            if unblocked_todo < self.ready_floor {
                self.compliance
                    .record(
                        PolicyActionKind::ReadyQueueReplenish,
                        None,
                        Some(agent.clone()),
                        format!("{agent}'s unblocked-todo lane has {unblocked_todo} task(s), below floor {}", self.ready_floor),
                        None,
                    )
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
    use crate::store::presence_store::InMemoryPresenceStore;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    #[tokio::test]
    async fn flags_lane_below_ready_floor() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        presence.update_presence("link", PresenceStatus::Working, None, None).await;
        tasks.create_task(TaskDraft { title: "only one".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        let loop_ = ReadyQueueReplenishLoop::new(tasks, presence, compliance, clock, 3);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn ignores_inactive_agents() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let presence = Arc::new(InMemoryPresenceStore::new(clock.clone(), events));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        presence.update_presence("link", PresenceStatus::Working, None, None).await;
        tasks.create_task(TaskDraft { title: "only one".into(), assignee: Some("link".into()), created_by: "kai".into(), ..Default::default() }).await.unwrap();

        clock.advance_ms((crate::constants::DEFAULT_INACTIVE_AGENT_THRESHOLD_MIN + 10) * 60_000);
        let loop_ = ReadyQueueReplenishLoop::new(tasks, presence, compliance, clock, 3);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
    }
}
