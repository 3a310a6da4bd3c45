//! Wires every store, port, and watchdog loop into one bundle handed to the
//! HTTP layer at startup (spec §9 "Services bundle"): a single composition
//! root rather than handlers each reaching for their own globals.

use crate::artifact::{GithubPrStatusProvider, PrStatusProvider, ReviewBundleBuilder};
use crate::bridge::{InsightBridge, PromotedInsightListener};
use crate::chat::{ApprovalDetector, ApprovalListener};
use crate::clock::{Clock, SystemClock};
use crate::compliance::ComplianceLog;
use crate::config::Config;
use crate::constants::{DEFAULT_COOLDOWN_MIN, DEFAULT_ESCALATE_AFTER_MIN, DEFAULT_READY_FLOOR, DEFAULT_REVIEW_SLA_THRESHOLD_MIN};
use crate::events::EventBus;
use crate::mention::MentionListener;
use crate::store::chat_store::{ChatStore, InMemoryChatStore};
use crate::store::presence_store::{InMemoryPresenceStore, PresenceStore};
use crate::store::task_store::{InMemoryTaskStore, RoleRegistry, TaskStore};
use crate::watchdog::loops::{
    AutoBlockStaleLoop, CadenceLoop, ContinuityReplenishLoop, DigestLoop, IdleNudgeLoop, MentionRescueLoop, ReadyQueueLoop, ReadyQueueReplenishLoop, ReviewReassignLoop, SuggestCloseLoop,
    WorkingContractLoop,
};
use crate::watchdog::{Scheduler, WatchdogLoop};
use std::sync::Arc;

/// Cadence/cooldown for the fine-grained loops — tighter than the
/// board-health loops they sit alongside (spec §4.2: "30-60s cadence").
const FINE_GRAINED_COOLDOWN_MIN: i64 = 5;
const CADENCE_CHECK_IN_MIN: i64 = 45;
const WORKING_CONTRACT_WARNING_AFTER_MIN: i64 = 30;
const WORKING_CONTRACT_REQUEUE_AFTER_MIN: i64 = 90;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
    pub tasks: Arc<dyn TaskStore>,
    pub chat: Arc<dyn ChatStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub roles: Arc<RoleRegistry>,
    pub bridge: Arc<InsightBridge>,
    pub compliance: Arc<ComplianceLog>,
    pub review_bundles: Arc<ReviewBundleBuilder>,
    pub scheduler: Arc<Scheduler>,
}

impl Services {
    pub async fn build(config: Config) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = Arc::new(EventBus::new(clock.clone()));
        let roles = Arc::new(default_role_registry());

        let tasks: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(clock.clone(), events.clone() as Arc<dyn crate::events::EventSink>, (*roles).clone(), config.production));
        let chat: Arc<dyn ChatStore> = Arc::new(InMemoryChatStore::new(clock.clone(), events.clone() as Arc<dyn crate::events::EventSink>));
        let presence: Arc<dyn PresenceStore> = Arc::new(InMemoryPresenceStore::new(clock.clone(), events.clone() as Arc<dyn crate::events::EventSink>));

        let bridge = Arc::new(InsightBridge::new(tasks.clone(), events.clone() as Arc<dyn crate::events::EventSink>, (*roles).clone(), config.bridge.clone()));
        events.register_listener(Arc::new(PromotedInsightListener::new(bridge.clone()))).await;

        let approval_detector = Arc::new(ApprovalDetector::new(tasks.clone()));
        events.register_listener(Arc::new(ApprovalListener::new(approval_detector))).await;
        events.register_listener(Arc::new(MentionListener::new(presence.clone()))).await;

        let compliance = Arc::new(ComplianceLog::new(clock.clone(), config.board_health.rollback_window_ms));

        let pr_status: Arc<dyn PrStatusProvider> = Arc::new(GithubPrStatusProvider::new(std::env::var("GITHUB_TOKEN").ok()));
        let strict_ci = std::env::var("REVIEW_BUNDLE_STRICT_CI").map(|v| v.to_lowercase() != "false").unwrap_or(true);
        let review_bundles = Arc::new(ReviewBundleBuilder::new(tasks.clone(), pr_status, strict_ci));

        let loops: Vec<Arc<dyn WatchdogLoop>> = vec![
            Arc::new(AutoBlockStaleLoop::new(tasks.clone(), chat.clone(), compliance.clone(), clock.clone(), config.board_health.stale_doing_min, config.board_health.max_actions)),
            Arc::new(SuggestCloseLoop::new(tasks.clone(), compliance.clone(), clock.clone(), config.board_health.suggest_close_min, config.board_health.max_actions)),
            Arc::new(DigestLoop::new(tasks.clone(), chat.clone(), compliance.clone(), clock.clone(), config.board_health.digest_interval_ms, config.board_health.digest_channel.clone())),
            Arc::new(ReviewReassignLoop::new(
                tasks.clone(),
                presence.clone(),
                chat.clone(),
                compliance.clone(),
                clock.clone(),
                (*roles).clone(),
                DEFAULT_REVIEW_SLA_THRESHOLD_MIN,
                config.bridge.escalation_target.clone(),
                config.board_health.max_actions,
            )),
            Arc::new(ReadyQueueLoop::new(tasks.clone(), presence.clone(), chat.clone(), compliance.clone(), clock.clone(), DEFAULT_READY_FLOOR, DEFAULT_ESCALATE_AFTER_MIN)),
            Arc::new(ContinuityReplenishLoop::new(bridge.clone(), compliance.clone(), clock.clone())),
            Arc::new(ReadyQueueReplenishLoop::new(tasks.clone(), presence.clone(), compliance.clone(), clock.clone(), DEFAULT_READY_FLOOR)),
            Arc::new(IdleNudgeLoop::new(tasks.clone(), presence.clone(), chat.clone(), clock.clone(), FINE_GRAINED_COOLDOWN_MIN)),
            Arc::new(CadenceLoop::new(tasks.clone(), chat.clone(), clock.clone(), CADENCE_CHECK_IN_MIN, DEFAULT_COOLDOWN_MIN)),
            Arc::new(MentionRescueLoop::new(presence.clone(), chat.clone(), clock.clone())),
            Arc::new(WorkingContractLoop::new(
                tasks.clone(),
                presence.clone(),
                chat.clone(),
                compliance.clone(),
                clock.clone(),
                WORKING_CONTRACT_WARNING_AFTER_MIN,
                WORKING_CONTRACT_REQUEUE_AFTER_MIN,
            )),
        ];
        let scheduler = Arc::new(Scheduler::new(clock.clone(), config.board_health.clone(), config.quiet_hours.clone(), loops));

        Services {
            config: Arc::new(config),
            clock,
            events,
            tasks,
            chat,
            presence,
            roles,
            bridge,
            compliance,
            review_bundles,
            scheduler,
        }
    }
}

fn default_role_registry() -> RoleRegistry {
    RoleRegistry::new()
}
