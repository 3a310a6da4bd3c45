//! Audit log of watchdog `PolicyAction` rows, with bounded-window rollback
//! (spec §4.2 "Rollback").

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::models::{PolicyAction, PolicyActionKind};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ComplianceLog {
    clock: Arc<dyn Clock>,
    rollback_window_ms: u64,
    actions: RwLock<Vec<PolicyAction>>,
}

impl ComplianceLog {
    pub fn new(clock: Arc<dyn Clock>, rollback_window_ms: u64) -> Self {
        Self { clock, rollback_window_ms, actions: RwLock::new(Vec::new()) }
    }

    pub async fn record(&self, kind: PolicyActionKind, task_id: Option<String>, agent: Option<String>, description: String, previous_state: Option<Value>) -> PolicyAction {
        let action = PolicyAction {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            task_id,
            agent,
            description,
            previous_state,
            applied_at: self.clock.now_ms(),
            rolled_back: false,
            rolled_back_at: None,
            rollback_by: None,
        };
        self.actions.write().await.push(action.clone());
        action
    }

    pub async fn get(&self, id: &str) -> Option<PolicyAction> {
        self.actions.read().await.iter().find(|a| a.id == id).cloned()
    }

    pub async fn list(&self) -> Vec<PolicyAction> {
        self.actions.read().await.clone()
    }

    pub async fn list_for_task(&self, task_id: &str) -> Vec<PolicyAction> {
        self.actions.read().await.iter().filter(|a| a.task_id.as_deref() == Some(task_id)).cloned().collect()
    }

    /// Validates the rollback window and marks the row rolled back. The
    /// caller is responsible for actually restoring `previous_state` onto
    /// the owning store — this log only owns the audit bookkeeping.
    pub async fn mark_rolled_back(&self, action_id: &str, by: &str) -> Result<PolicyAction> {
        let mut actions = self.actions.write().await;
        let action = actions
            .iter_mut()
            .find(|a| a.id == action_id)
            .ok_or_else(|| CoreError::NotFound(format!("policy action {action_id}")))?;

        if action.rolled_back {
            return Err(CoreError::Conflict("action already rolled back".into()));
        }
        if action.previous_state.is_none() {
            return Err(CoreError::Conflict("action has no previous state to restore".into()));
        }
        let now = self.clock.now_ms();
        if now.saturating_sub(action.applied_at) as u64 > self.rollback_window_ms {
            return Err(CoreError::Conflict("rollback window has expired".into()));
        }

        action.rolled_back = true;
        action.rolled_back_at = Some(now);
        action.rollback_by = Some(by.to_string());
        Ok(action.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    #[tokio::test]
    async fn rollback_fails_outside_window() {
        let clock = Arc::new(FixedClock::new(0));
        let log = ComplianceLog::new(clock.clone(), 1_000);
        let action = log.record(PolicyActionKind::AutoBlockStale, Some("task-1".into()), None, "blocked".into(), Some(json!({"status":"doing"}))).await;
        clock.advance_ms(2_000);
        let err = log.mark_rolled_back(&action.id, "kai").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn rollback_succeeds_within_window() {
        let clock = Arc::new(FixedClock::new(0));
        let log = ComplianceLog::new(clock.clone(), 10_000);
        let action = log.record(PolicyActionKind::AutoBlockStale, Some("task-1".into()), None, "blocked".into(), Some(json!({"status":"doing"}))).await;
        let rolled_back = log.mark_rolled_back(&action.id, "kai").await.unwrap();
        assert!(rolled_back.rolled_back);
    }
}
