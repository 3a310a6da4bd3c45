//! `continuity-replenish`: surfaces promoted insights with no linked task so
//! an empty lane can be backfilled (spec §4.2). Informational only — this
//! loop records what it finds; the bridge owns actually creating tasks.

use crate::bridge::InsightBridge;
use crate::clock::Clock;
use crate::compliance::ComplianceLog;
use crate::models::PolicyActionKind;
use crate::watchdog::{TickSummary, WatchdogLoop};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ContinuityReplenishLoop {
    bridge: Arc<InsightBridge>,
    compliance: Arc<ComplianceLog>,
    clock: Arc<dyn Clock>,
}

impl ContinuityReplenishLoop {
    pub fn new(bridge: Arc<InsightBridge>, compliance: Arc<ComplianceLog>, clock: Arc<dyn Clock>) -> Self {
        Self { bridge, compliance, clock }
    }
}

#[async_trait]
impl WatchdogLoop for ContinuityReplenishLoop {
    fn name(&self) -> &'static str {
        "continuity-replenish"
    }

    async fn tick(&self, _force: bool) -> TickSummary {
        let now = self.clock.now_ms();
        let unlinked = self.bridge.unlinked_promoted().await;
        let mut applied = 0;

        for insight in &unlinked {
            self.bridge.process(&insight.id).await;
        }

        if !unlinked.is_empty() {
            self.compliance
                .record(
                    PolicyActionKind::ContinuityReplenish,
                    None,
                    None,
                    format!("re-ran bridge over {} unlinked promoted insight(s)", unlinked.len()),
                    None,
                )
                .await;
            applied = 1;
        }

        TickSummary { loop_name: self.name(), ticked_at: now, actions_applied: applied, suppressed: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::BridgeConfig;
    use crate::events::EventBus;
    use crate::models::{Insight, InsightStatus};
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};

    fn bridge_config() -> BridgeConfig {
        BridgeConfig {
            feature_families: vec![],
            auto_create_severities: vec![],
            guardrail_enabled: true,
            require_non_author_reviewer: true,
            default_reviewer: None,
            escalation_target: "hollow".into(),
        }
    }

    #[tokio::test]
    async fn reprocesses_unlinked_promoted_insights() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let bridge = Arc::new(InsightBridge::new(tasks, events, RoleRegistry::new(), bridge_config()));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        bridge
            .register(Insight {
                id: "ins-1".into(),
                title: "flaky build".into(),
                cluster_key: "ci".into(),
                failure_family: "build".into(),
                impacted_unit: "core".into(),
                severity_max: "high".into(),
                priority: crate::models::Priority::P1,
                status: InsightStatus::Promoted,
                promotion_readiness: 1.0,
                reflection_ids: vec![],
                authors: vec![],
                evidence_refs: vec![],
                task_id: None,
            })
            .await;

        let loop_ = ContinuityReplenishLoop::new(bridge, compliance, clock);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn no_op_when_nothing_unlinked() {
        let clock = Arc::new(FixedClock::new(0));
        let events: Arc<dyn crate::events::EventSink> = Arc::new(EventBus::new(clock.clone()));
        let tasks = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone(), RoleRegistry::new(), false));
        let bridge = Arc::new(InsightBridge::new(tasks, events, RoleRegistry::new(), bridge_config()));
        let compliance = Arc::new(ComplianceLog::new(clock.clone(), 0));

        let loop_ = ContinuityReplenishLoop::new(bridge, compliance, clock);
        let summary = loop_.tick(false).await;

        assert_eq!(summary.actions_applied, 0);
    }
}
