//! Chat-driven approval detector: a `message_posted` listener that looks for
//! review sign-off language and auto-approves the matching validating task
//! (spec §4.6).

use crate::events::EventListener;
use crate::models::metadata::{keys, MetadataView, ReviewerDecision};
use crate::models::{Event, EventType, TaskPatch};
use crate::store::task_store::{TaskStore, TASK_REF_RE};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{info, warn};

static APPROVAL_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\blgtm\b",
        r"(?i)\bapproved?\b",
        r"(?i)\bship it\b",
        r"(?i)\blooks good( to me)?\b",
        r"(?i)\bgood to (go|merge)\b",
        r"(?i)\blooks (great|solid|nice)\b",
        r"(?i)\ball good\b",
        r"(?i)\bnice work\b",
        "✅",
        "👍",
    ])
    .expect("approval pattern set compiles")
});

static REJECTION_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bnot approved\b",
        r"(?i)\bneeds changes\b",
        r"(?i)\brejected\b",
        r"(?i)\bblocking\b",
        r"(?i)\bbut(?:\s+[^.]*?)?\b(fix|changes|needs)\b",
    ])
    .expect("rejection pattern set compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RejectionSignal,
    AmbiguousTasks,
    NoValidatingTasks,
    NoApprovalSignal,
    AlreadyApproved,
}

pub struct ApprovalDetector {
    tasks: Arc<dyn TaskStore>,
}

impl ApprovalDetector {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn handle_message(&self, from: &str, content: &str, timestamp: i64) -> Result<Option<String>, SkipReason> {
        if !APPROVAL_PATTERNS.is_match(content) {
            return Err(SkipReason::NoApprovalSignal);
        }
        if REJECTION_PATTERNS.is_match(content) {
            return Err(SkipReason::RejectionSignal);
        }

        let explicit_ids: Vec<String> = TASK_REF_RE.find_iter(content).map(|m| m.as_str().to_string()).collect();

        let candidates: Vec<_> = self
            .tasks
            .list_tasks(Default::default())
            .await
            .into_iter()
            .filter(|t| t.status == crate::models::TaskStatus::Validating)
            .filter(|t| t.reviewer.as_deref().map(|r| r.eq_ignore_ascii_case(from)).unwrap_or(false))
            .filter(|t| !crate::models::metadata::get_bool(&t.metadata, keys::REVIEWER_APPROVED))
            .collect();

        let (target_id, source) = if !explicit_ids.is_empty() {
            let matched: Vec<_> = candidates.iter().filter(|t| explicit_ids.contains(&t.id)).collect();
            match matched.len() {
                1 => (matched[0].id.clone(), "explicit_reference"),
                _ => return Err(SkipReason::AmbiguousTasks),
            }
        } else {
            match candidates.len() {
                1 => (candidates[0].id.clone(), "sole_validating"),
                0 => return Err(SkipReason::NoValidatingTasks),
                _ => return Err(SkipReason::AmbiguousTasks),
            }
        };

        let mut metadata = Map::new();
        metadata.insert(keys::REVIEWER_APPROVED.to_string(), json!(true));
        metadata.insert(keys::REVIEW_STATE.to_string(), json!("approved"));
        metadata.insert(keys::ACTOR.to_string(), json!(from));
        ReviewerDecision {
            decision: "approved".to_string(),
            reviewer: from.to_string(),
            comment: content.to_string(),
            decided_at: timestamp,
            source: Some("chat-approval-detector".to_string()),
            resolution: Some(source.to_string()),
        }
        .apply(&mut metadata);

        let patch = TaskPatch { metadata: Some(metadata), ..Default::default() };
        self.tasks
            .update_task(&target_id, patch)
            .await
            .map_err(|e| {
                warn!(task_id = %target_id, error = %e, "approval detector failed to apply update");
                SkipReason::NoValidatingTasks
            })?;

        let comment = format!("[review] auto-approved by @{from} (pattern: chat-approval-detector)");
        let _ = self.tasks.add_comment(&target_id, "system", &comment).await;

        info!(task_id = %target_id, reviewer = from, source, "auto-approved via chat");
        Ok(Some(target_id))
    }
}

pub struct ApprovalListener {
    detector: Arc<ApprovalDetector>,
}

impl ApprovalListener {
    pub fn new(detector: Arc<ApprovalDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl EventListener for ApprovalListener {
    fn name(&self) -> &'static str {
        "approval-detector"
    }

    async fn on_event(&self, event: &Event) {
        if event.event_type != EventType::MessagePosted {
            return;
        }
        let from = event.data.get("from").and_then(|v| v.as_str()).unwrap_or_default();
        let content = event.data.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        if from.is_empty() || content.is_empty() {
            return;
        }
        let _ = self.detector.handle_message(from, content, event.timestamp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::models::TaskDraft;
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};
    use std::sync::Arc;

    async fn setup() -> (Arc<InMemoryTaskStore>, ApprovalDetector) {
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let events = Arc::new(EventBus::new(clock.clone()));
        let store = Arc::new(InMemoryTaskStore::new(clock, events, RoleRegistry::new(), false));
        let detector = ApprovalDetector::new(store.clone());
        (store, detector)
    }

    #[tokio::test]
    async fn lgtm_approves_sole_validating_task() {
        let (store, detector) = setup().await;
        let task = store
            .create_task(TaskDraft {
                title: "x".into(),
                assignee: Some("link".into()),
                reviewer: Some("sage".into()),
                done_criteria: vec!["d".into()],
                created_by: "kai".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.update_task(&task.id, TaskPatch { status: Some(crate::models::TaskStatus::Doing), ..Default::default() }).await.unwrap();
        let mut metadata = Map::new();
        metadata.insert("qa_bundle".into(), json!({ "summary": "s", "artifact_links": ["x"], "checks": ["t"] }));
        store
            .update_task(&task.id, TaskPatch { status: Some(crate::models::TaskStatus::Validating), metadata: Some(metadata), ..Default::default() })
            .await
            .unwrap();

        let result = detector.handle_message("sage", "lgtm, ship it", 1_700_000_001_000).await.unwrap();
        assert_eq!(result, Some(task.id.clone()));
        let updated = store.get_task(&task.id).await.unwrap();
        assert_eq!(updated.metadata.get("reviewer_approved"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn rejection_signal_skips_approval() {
        let (_, detector) = setup().await;
        let err = detector.handle_message("sage", "lgtm but needs changes", 0).await.unwrap_err();
        assert_eq!(err, SkipReason::RejectionSignal);
    }
}
