//! Task store and gated state machine (spec §4.1).
//!
//! Concurrency model follows the teacher's `AgentOrchestrator`
//! (`agents/orchestrator/mod.rs`): a single `Arc<RwLock<HashMap<...>>>` per
//! collection, read locks for queries, a write lock held only across the
//! merge-validate-persist sequence of a single task so gate checks never
//! observe a partially-applied patch (spec invariant I5, §5 "no interleaved
//! partial metadata writes").

use crate::clock::Clock;
use crate::constants;
use crate::error::{CoreError, Result};
use crate::events::EventSink;
use crate::models::metadata::{self, keys, MetadataView, QaBundle};
use crate::models::{
    EventType, MatchType, ResolvedTaskId, Task, TaskComment, TaskDraft, TaskFilter, TaskPatch,
    TaskStatus,
};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One agent's entry in the role registry (spec §4.4 inputs): role label,
/// opt-in tags used for affinity scoring, a WIP cap, and the protected-domain
/// patterns that force assignment regardless of score.
#[derive(Debug, Clone, Default)]
pub struct AgentRole {
    pub role: String,
    pub tags: std::collections::BTreeSet<String>,
    pub wip_cap: Option<usize>,
    pub protected_domains: Vec<String>,
    pub never_route: bool,
}

/// Per-agent role/WIP-cap/affinity-tag registry, keyed case-insensitively.
/// Falls back to `constants::DEFAULT_WIP_CAP` for agents with no explicit
/// role entry.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    agents: HashMap<String, AgentRole>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wip_cap(mut self, agent: impl Into<String>, cap: usize) -> Self {
        let key = agent.into().to_lowercase();
        self.agents.entry(key).or_default().wip_cap = Some(cap);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>, role: AgentRole) -> Self {
        self.agents.insert(agent.into().to_lowercase(), role);
        self
    }

    pub fn wip_cap_for(&self, agent: &str) -> usize {
        self.agents
            .get(&agent.to_lowercase())
            .and_then(|r| r.wip_cap)
            .unwrap_or(constants::DEFAULT_WIP_CAP)
    }

    pub fn tags_for(&self, agent: &str) -> std::collections::BTreeSet<String> {
        self.agents.get(&agent.to_lowercase()).map(|r| r.tags.clone()).unwrap_or_default()
    }

    pub fn protected_match(&self, title: &str, cluster_key: &str) -> Option<String> {
        let haystack = format!("{title} {cluster_key}").to_lowercase();
        self.agents
            .iter()
            .find(|(_, role)| role.protected_domains.iter().any(|p| haystack.contains(&p.to_lowercase())))
            .map(|(name, _)| name.clone())
    }

    pub fn never_routes(&self, agent: &str) -> bool {
        self.agents.get(&agent.to_lowercase()).map(|r| r.never_route).unwrap_or(false)
    }

    pub fn known_agents(&self) -> impl Iterator<Item = &String> {
        self.agents.keys()
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, draft: TaskDraft) -> Result<Task>;
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task>;
    async fn resolve_task_id(&self, input: &str) -> ResolvedTaskId;
    async fn get_task(&self, id: &str) -> Option<Task>;
    async fn list_tasks(&self, filter: TaskFilter) -> Vec<Task>;
    async fn add_comment(&self, task_id: &str, author: &str, content: &str) -> Result<TaskComment>;
    async fn list_comments(&self, task_id: &str) -> Vec<TaskComment>;
    async fn delete_task(&self, id: &str) -> bool;
    async fn get_next_task(&self, agent: Option<&str>) -> Option<Task>;
    async fn last_comment_timestamp(&self, task_id: &str) -> Option<i64>;
}

pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    comments: RwLock<HashMap<String, Vec<TaskComment>>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    roles: RoleRegistry,
    production: bool,
}

fn gen_task_id(clock: &dyn Clock) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    format!("task-{}-{}", clock.now_ms(), suffix.to_lowercase())
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>, roles: RoleRegistry, production: bool) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            comments: RwLock::new(HashMap::new()),
            clock,
            events,
            roles,
            production,
        }
    }

    fn eq_ci(a: &Option<String>, b: &str) -> bool {
        a.as_deref().map(|s| s.eq_ignore_ascii_case(b)).unwrap_or(false)
    }

    fn wip_count_locked(tasks: &HashMap<String, Task>, assignee: &str) -> usize {
        tasks
            .values()
            .filter(|t| t.status == TaskStatus::Doing && Self::eq_ci(&t.assignee, assignee))
            .count()
    }

    fn short_id(id: &str) -> &str {
        id.rsplit('-').next().unwrap_or(id)
    }

    /// Applies the ordered gate checks of spec §4.1 to a merged `next` task,
    /// given the `prev` snapshot it was derived from and the write-locked
    /// task map (so WIP/branch-stacking counts never re-acquire the lock
    /// `update_task` is already holding). Mutates `next.metadata` for
    /// auto-fill side effects (branch, timestamps) but never partially —
    /// any `Err` here must leave `prev` untouched by the caller.
    fn apply_gates(&self, prev: &Task, next: &mut Task, tasks: &HashMap<String, Task>) -> Result<()> {
        // Gate 1: QA-bundle gate.
        if next.status == TaskStatus::Validating {
            match QaBundle::parse(&next.metadata) {
                Some(Ok(bundle)) if bundle.is_well_formed() => {}
                _ => {
                    return Err(CoreError::Gate {
                        gate: "qa_bundle",
                        message: "metadata.qa_bundle must include a non-empty summary, artifact_links, and checks".into(),
                        details: Some(json!({
                            "hint": {
                                "qa_bundle": {
                                    "summary": "brief summary of what was validated",
                                    "artifact_links": ["https://github.com/org/repo/pull/123"],
                                    "checks": ["npm test", "npm run build"]
                                }
                            }
                        })),
                    });
                }
            }
        }

        // Gate 2: task-close gate.
        if next.status == TaskStatus::Done && prev.status != TaskStatus::Done {
            let artifacts = metadata::get_str_list(&next.metadata, keys::ARTIFACTS);
            if artifacts.is_empty() {
                return Err(CoreError::Gate {
                    gate: "artifacts",
                    message: "metadata.artifacts must be a non-empty list before a task can close".into(),
                    details: None,
                });
            }
            if prev.reviewer.is_some() && !metadata::get_bool(&next.metadata, keys::REVIEWER_APPROVED) {
                return Err(CoreError::Gate {
                    gate: "reviewer_signoff",
                    message: "a reviewer is assigned but metadata.reviewer_approved is not true".into(),
                    details: None,
                });
            }
        }

        // Gate 3: WIP-cap gate.
        let entering_doing = next.status == TaskStatus::Doing && prev.status != TaskStatus::Doing;
        if entering_doing {
            if self.production && next.title.starts_with("TEST:") {
                return Err(CoreError::TestTaskRejected);
            }
            if let Some(assignee) = &next.assignee {
                let wip_override = metadata::get_str(&next.metadata, keys::WIP_OVERRIDE);
                if wip_override.is_none() {
                    let wip_count = Self::wip_count_locked(tasks, assignee);
                    let wip_cap = self.roles.wip_cap_for(assignee);
                    if wip_count >= wip_cap {
                        return Err(CoreError::Gate {
                            gate: "wip_cap",
                            message: format!("{assignee} already has {wip_count} task(s) in doing (cap {wip_cap})"),
                            details: Some(json!({ "wipCount": wip_count, "wipCap": wip_cap })),
                        });
                    }
                } else {
                    next.metadata.insert(keys::WIP_OVERRIDE_USED.to_string(), Value::Bool(true));
                }
            }
        }

        // Gate 4: branch auto-fill.
        if entering_doing {
            if metadata::get_str(&next.metadata, keys::BRANCH).is_none() {
                if let Some(assignee) = &next.assignee {
                    next.metadata.insert(
                        keys::BRANCH.to_string(),
                        Value::String(format!("{assignee}/task-{}", Self::short_id(&next.id))),
                    );
                    let other_doing = tasks
                        .values()
                        .filter(|t| t.id != next.id && t.status == TaskStatus::Doing && Self::eq_ci(&t.assignee, assignee))
                        .count();
                    if other_doing >= 1 {
                        next.metadata.insert(
                            keys::BRANCH_WARNING.to_string(),
                            Value::String(format!("{assignee} already has {other_doing} other task(s) in doing")),
                        );
                    }
                }
            }
        }

        // Gate 5: timestamp bookkeeping.
        let now = self.clock.now_ms();
        if next.status == TaskStatus::Validating && prev.status != TaskStatus::Validating {
            next.metadata.insert(keys::ENTERED_VALIDATING_AT.to_string(), json!(now));
        }
        if next.status == TaskStatus::Done && prev.status != TaskStatus::Done {
            next.metadata.insert(keys::COMPLETED_AT.to_string(), json!(now));
            next.metadata.insert(
                "outcome_checkpoint".to_string(),
                json!({
                    "verdict": null,
                    "status": "scheduled",
                    "dueAt": now + constants::OUTCOME_CHECKPOINT_DUE_HOURS * 3_600_000,
                }),
            );
        }

        Ok(())
    }

    fn merge(prev: &Task, patch: &TaskPatch) -> Task {
        let mut next = prev.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(assignee) = &patch.assignee {
            next.assignee = assignee.clone();
        }
        if let Some(reviewer) = &patch.reviewer {
            next.reviewer = reviewer.clone();
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(done_criteria) = &patch.done_criteria {
            next.done_criteria = done_criteria.clone();
        }
        if let Some(tags) = &patch.tags {
            next.tags = tags.clone();
        }
        if let Some(blocked_by) = &patch.blocked_by {
            next.blocked_by = blocked_by.clone();
        }
        if let Some(metadata) = &patch.metadata {
            for (k, v) in metadata {
                next.metadata.insert(k.clone(), v.clone());
            }
        }
        next
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        let mut fields = Vec::new();
        if draft.title.trim().is_empty() {
            fields.push(crate::error::FieldError { path: "title".into(), message: "required".into() });
        }
        if draft.assignee.is_none() {
            fields.push(crate::error::FieldError { path: "assignee".into(), message: "required".into() });
        }
        if draft.reviewer.is_none() {
            fields.push(crate::error::FieldError { path: "reviewer".into(), message: "required".into() });
        }
        if draft.done_criteria.is_empty() {
            fields.push(crate::error::FieldError { path: "done_criteria".into(), message: "must be non-empty".into() });
        }
        if draft.created_by.trim().is_empty() {
            fields.push(crate::error::FieldError { path: "createdBy".into(), message: "required".into() });
        }
        if !fields.is_empty() {
            return Err(CoreError::Fields(fields));
        }
        if self.production && draft.title.starts_with("TEST:") {
            return Err(CoreError::TestTaskRejected);
        }

        let now = self.clock.now_ms();
        let task = Task {
            id: gen_task_id(self.clock.as_ref()),
            title: draft.title,
            description: draft.description,
            status: TaskStatus::Todo,
            assignee: draft.assignee,
            reviewer: draft.reviewer,
            priority: draft.priority.unwrap_or(crate::models::Priority::P2),
            done_criteria: draft.done_criteria,
            tags: draft.tags,
            blocked_by: draft.blocked_by,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
            metadata: draft.metadata,
            comment_count: 0,
        };

        self.tasks.write().await.insert(task.id.clone(), task.clone());
        self.events
            .publish(EventType::TaskCreated, Some(task.created_by.clone()), Some(task.id.clone()), json!(&task))
            .await;
        info!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let prev = tasks.get(id).cloned().ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;

        let mut next = Self::merge(&prev, &patch);
        self.apply_gates(&prev, &mut next, &tasks)?;

        next.updated_at = self.clock.now_ms().max(prev.updated_at + 1);

        let assignee_changed = prev.assignee != next.assignee;
        let status_changed = prev.status != next.status;
        if status_changed || assignee_changed {
            next.metadata.insert(
                "last_transition".to_string(),
                json!({
                    "actor": next.assignee.clone().unwrap_or_else(|| "system".to_string()),
                    "type": if status_changed { "status_changed" } else { "assignee_changed" },
                    "timestamp": next.updated_at,
                }),
            );
        }

        tasks.insert(id.to_string(), next.clone());
        drop(tasks);

        let event_type = if status_changed {
            EventType::TaskStatusChanged
        } else if assignee_changed {
            EventType::TaskAssigned
        } else {
            EventType::TaskUpdated
        };
        self.events
            .publish(event_type, next.assignee.clone(), Some(next.id.clone()), json!(&next))
            .await;

        Ok(next)
    }

    async fn resolve_task_id(&self, input: &str) -> ResolvedTaskId {
        let tasks = self.tasks.read().await;
        if tasks.contains_key(input) {
            return ResolvedTaskId {
                resolved_id: Some(input.to_string()),
                match_type: MatchType::Exact,
                suggestions: vec![],
            };
        }

        if input.len() < constants::MIN_PREFIX_LEN {
            return ResolvedTaskId { resolved_id: None, match_type: MatchType::None, suggestions: vec![] };
        }

        let matches: Vec<&String> = tasks.keys().filter(|id| id.starts_with(input)).collect();
        match matches.len() {
            0 => ResolvedTaskId { resolved_id: None, match_type: MatchType::None, suggestions: vec![] },
            1 => ResolvedTaskId {
                resolved_id: Some(matches[0].clone()),
                match_type: MatchType::Prefix,
                suggestions: vec![],
            },
            _ => {
                let mut suggestions: Vec<String> = matches.into_iter().cloned().collect();
                suggestions.sort();
                suggestions.truncate(constants::MAX_PREFIX_SUGGESTIONS);
                ResolvedTaskId { resolved_id: None, match_type: MatchType::Ambiguous, suggestions }
            }
        }
    }

    async fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
            .filter(|t| filter.assignee.as_ref().map(|a| Self::eq_ci(&t.assignee, a)).unwrap_or(true))
            .filter(|t| filter.created_by.as_ref().map(|c| t.created_by.eq_ignore_ascii_case(c)).unwrap_or(true))
            .filter(|t| filter.priority.map(|p| p == t.priority).unwrap_or(true))
            .filter(|t| filter.tags.is_subset(&t.tags) || filter.tags.is_empty())
            .filter(|t| filter.updated_since.map(|s| t.updated_at >= s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    async fn add_comment(&self, task_id: &str, author: &str, content: &str) -> Result<TaskComment> {
        let tasks = self.tasks.read().await;
        if !tasks.contains_key(task_id) {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        }

        let mut invalid = Vec::new();
        for cap in TASK_REF_RE.find_iter(content) {
            let token = cap.as_str();
            if !tasks.contains_key(token) {
                invalid.push(token.to_string());
            }
        }
        drop(tasks);

        if !invalid.is_empty() {
            let reject_id = uuid::Uuid::new_v4().to_string();
            warn!(task_id, ?invalid, reject_id, "comment rejected: invalid task references");
            return Err(CoreError::InvalidTaskRefs { refs: invalid, reject_id });
        }

        let now = self.clock.now_ms();
        let comment = TaskComment {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            author: author.to_string(),
            content: content.to_string(),
            timestamp: now,
        };

        self.comments.write().await.entry(task_id.to_string()).or_default().push(comment.clone());

        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.comment_count += 1;
            task.updated_at = now.max(task.updated_at + 1);
        }
        drop(tasks);

        Ok(comment)
    }

    async fn list_comments(&self, task_id: &str) -> Vec<TaskComment> {
        self.comments.read().await.get(task_id).cloned().unwrap_or_default()
    }

    async fn delete_task(&self, id: &str) -> bool {
        let removed = self.tasks.write().await.remove(id).is_some();
        if removed {
            self.comments.write().await.remove(id);
            self.events.publish(EventType::TaskDeleted, None, Some(id.to_string()), json!({ "id": id })).await;
        }
        removed
    }

    async fn get_next_task(&self, agent: Option<&str>) -> Option<Task> {
        let tasks = self.tasks.read().await;
        let is_unblocked = |t: &&Task| {
            t.blocked_by.iter().all(|dep| tasks.get(dep).map(|d| d.status == TaskStatus::Done).unwrap_or(true))
        };

        let mut candidates: Vec<&Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Todo)
            .filter(is_unblocked)
            .collect();

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));

        if let Some(agent) = agent {
            if let Some(t) = candidates.iter().find(|t| Self::eq_ci(&t.assignee, agent)) {
                return Some((*t).clone());
            }
        }
        if let Some(t) = candidates.iter().find(|t| t.assignee.is_none()) {
            return Some((*t).clone());
        }
        candidates.first().map(|t| (*t).clone())
    }

    async fn last_comment_timestamp(&self, task_id: &str) -> Option<i64> {
        self.comments.read().await.get(task_id).and_then(|c| c.iter().map(|c| c.timestamp).max())
    }
}

/// Matches `task-<digits>-<suffix>` tokens on word boundaries so a token
/// embedded in a URL path segment like `/task-123-abc/` still matches (the
/// boundary is alnum/underscore, not `/`) while a token fused into a longer
/// identifier like `xtask-123-abcx` does not (spec §4.1: "neither inside
/// URLs nor adjacent to word chars").
pub(crate) static TASK_REF_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"\btask-\d+-[a-z0-9]+\b").unwrap());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;

    fn store() -> InMemoryTaskStore {
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new(clock.clone()));
        InMemoryTaskStore::new(clock, events, RoleRegistry::new(), false)
    }

    fn draft() -> TaskDraft {
        TaskDraft {
            title: "Ship X".into(),
            assignee: Some("link".into()),
            reviewer: Some("sage".into()),
            done_criteria: vec!["build green".into()],
            created_by: "kai".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scenario_a_qa_bundle_gate() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        let patch = TaskPatch { status: Some(TaskStatus::Validating), ..Default::default() };
        let err = store.update_task(&task.id, patch).await.unwrap_err();
        assert!(matches!(err, CoreError::Gate { gate: "qa_bundle", .. }));

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "qa_bundle".into(),
            json!({ "summary": "s", "artifact_links": ["https://x/pull/1"], "checks": ["npm build"] }),
        );
        let patch = TaskPatch { status: Some(TaskStatus::Validating), metadata: Some(metadata), ..Default::default() };
        let task = store.update_task(&task.id, patch).await.unwrap();
        assert_eq!(task.status, TaskStatus::Validating);
    }

    #[tokio::test]
    async fn done_without_reviewer_does_not_require_signoff() {
        let store = store();
        let mut d = draft();
        d.reviewer = None;
        let task = store.create_task(d).await.unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("artifacts".into(), json!(["https://x/pull/1"]));
        let patch = TaskPatch { status: Some(TaskStatus::Done), metadata: Some(metadata), ..Default::default() };
        let task = store.update_task(&task.id, patch).await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn wip_cap_blocks_without_override() {
        let store = InMemoryTaskStore::new(
            Arc::new(FixedClock::new(1_700_000_000_000)),
            Arc::new(EventBus::new(Arc::new(FixedClock::new(1_700_000_000_000)))),
            RoleRegistry::new().with_wip_cap("link", 1),
            false,
        );

        let t1 = store.create_task(draft()).await.unwrap();
        store.update_task(&t1.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap();

        let t2 = store.create_task(draft()).await.unwrap();
        let err = store.update_task(&t2.id, TaskPatch { status: Some(TaskStatus::Doing), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, CoreError::Gate { gate: "wip_cap", .. }));

        let mut metadata = serde_json::Map::new();
        metadata.insert("wip_override".into(), json!("urgent hotfix"));
        let task = store
            .update_task(&t2.id, TaskPatch { status: Some(TaskStatus::Doing), metadata: Some(metadata), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Doing);
        assert_eq!(task.metadata.get("wip_override_used"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn invalid_task_ref_in_comment_is_rejected() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();
        let err = store
            .add_comment(&task.id, "link", "see also task-9999999999999-ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTaskRefs { .. }));
        let fetched = store.get_task(&task.id).await.unwrap();
        assert_eq!(fetched.comment_count, 0);
    }

    #[tokio::test]
    async fn ambiguous_prefix_returns_bounded_suggestions() {
        let store = store();
        let clock = FixedClock::new(1_700_000_000_000);
        for i in 0..6 {
            let mut d = draft();
            d.title = format!("dup {i}");
            let _ = store.create_task(d).await.unwrap();
            clock.advance_ms(1);
        }
        let tasks = store.list_tasks(TaskFilter::default()).await;
        let shared_prefix = &tasks[0].id[..10];
        let resolved = store.resolve_task_id(shared_prefix).await;
        if resolved.match_type == MatchType::Ambiguous {
            assert!(resolved.suggestions.len() <= constants::MAX_PREFIX_SUGGESTIONS);
        }
    }
}
