//! `digest-emitted`: posts a compact board snapshot at most once per
//! `digestIntervalMs`, or immediately when forced (spec §4.2).

use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::{PolicyActionKind, TaskStatus};
use crate::store::chat_store::ChatStore;
use crate::store::task_store::TaskStore;
use crate::watchdog::{TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct DigestLoop {
    tasks: Arc<dyn TaskStore>,
    chat: Arc<dyn ChatStore>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    channel: String,
    last_emitted_ms: Mutex<Option<i64>>,
}

impl DigestLoop {
    pub fn new(tasks: Arc<dyn TaskStore>, chat: Arc<dyn ChatStore>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>, interval_ms: u64, channel: String) -> Self {
        Self { tasks, chat, compliance, clock, interval_ms, channel, last_emitted_ms: Mutex::new(None) }
    }

    fn render(counts: &[(TaskStatus, usize)]) -> String {
        let parts: Vec<String> = counts.iter().map(|(status, count)| format!("{}={}", status.as_str(), count)).collect();
        format!("[board-digest] {}", parts.join(" "))
    }
}

#[async_trait]
impl WatchdogLoop for DigestLoop {
    fn name(&self) -> &'static str {
        "digest-emitted"
    }

    async fn tick(&self, force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let mut last = self.last_emitted_ms.lock().await;
        let due = force || last.map(|t| now - t >= self.interval_ms as i64).unwrap_or(true);
        if !due {
            return TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: 0, suppressed: vec!["digest-interval-not-elapsed".to_string()] };
        }

        let tasks = self.tasks.list_tasks(Default::default()).await;
        let statuses = [TaskStatus::Todo, TaskStatus::Doing, TaskStatus::Blocked, TaskStatus::Validating, TaskStatus::Done];
        let counts: Vec<(TaskStatus, usize)> = statuses.iter().map(|s| (*s, tasks.iter().filter(|t| t.status == *s).count())).collect();

        let content = Self::render(&counts);
        self.chat.post("system", &content, Some(&self.channel), None, None).await;
        self.compliance.record(PolicyActionKind::DigestEmitted, None, None, content, None).await;
        *last = Some(now);

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: 1, suppressed: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::{EventBus, EventSink};
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
    async fn first_tick_emits_even_without_interval_elapsed() {
        let (clock, tasks, chat, compliance) = rig(0);
        let loop_ = DigestLoop::new(tasks, chat, compliance, clock, 3_600_000, "board".into());
        let summary = loop_.tick(false).await;
        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn suppresses_until_interval_elapses() {
        let (clock, tasks, chat, compliance) = rig(0);
        let loop_ = DigestLoop::new(tasks, chat, compliance, clock.clone(), 3_600_000, "board".into());
        loop_.tick(false).await;

        clock.advance_ms(60_000);
        let summary = loop_.tick(false).await;
        assert_eq!(summary.actions_applied, 0);
        assert_eq!(summary.suppressed, vec!["digest-interval-not-elapsed".to_string()]);

        clock.advance_ms(3_600_000);
        let summary = loop_.tick(false).await;
        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn force_bypasses_interval() {
        let (clock, tasks, chat, compliance) = rig(0);
        let loop_ = DigestLoop::new(tasks, chat, compliance, clock.clone(), 3_600_000, "board".into());
        loop_.tick(false).await;
        clock.advance_ms(1_000);
        let summary = loop_.tick(true).await;
        assert_eq!(summary.actions_applied, 1);
    }
}
