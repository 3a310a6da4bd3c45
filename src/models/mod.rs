//! Core data model (spec §3). `Task.metadata` is an intentionally open
//! `serde_json::Map` — see [`metadata`] for the typed views over its
//! recognized keys (spec §3.2).

pub mod metadata;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Blocked,
    Validating,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Validating => "validating",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P3,
    P2,
    P1,
    P0,
}

/// The unit of work (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub reviewer: Option<String>,
    pub priority: Priority,
    pub done_criteria: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub comment_count: usize,
}

/// Fields a caller may supply when creating a task (spec §4.1 `createTask`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assignee: Option<String>,
    pub reviewer: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub done_criteria: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub created_by: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A patch applied through the gated update path (spec §4.1 `updateTask`).
/// Every field is optional; only present fields are merged into `next`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "deserialize_nullable_opt")]
    pub assignee: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_nullable_opt")]
    pub reviewer: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub done_criteria: Option<Vec<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub blocked_by: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Distinguishes "field omitted" from "field explicitly set to null" for
/// patch semantics (e.g. unassigning a task).
fn deserialize_nullable_opt<'de, D>(d: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(d)?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: String,
    pub task_id: String,
    pub author: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Working,
    Idle,
    Blocked,
    Reviewing,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Focus {
    pub active: bool,
    pub level: String,
    pub until_ms: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub agent: String,
    pub status: PresenceStatus,
    pub since: i64,
    pub last_update: i64,
    pub current_task: Option<String>,
    pub focus: Option<Focus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub content: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub timestamp: i64,
    pub thread_id: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_channel() -> String {
    "general".to_string()
}

/// Closed set of event types the bus will accept (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskAssigned,
    TaskStatusChanged,
    TaskDeleted,
    MessagePosted,
    PresenceUpdated,
    MemoryWritten,
    #[serde(rename = "insight:promoted")]
    InsightPromoted,
    #[serde(rename = "insight:triaged")]
    InsightTriaged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskUpdated => "task_updated",
            EventType::TaskAssigned => "task_assigned",
            EventType::TaskStatusChanged => "task_status_changed",
            EventType::TaskDeleted => "task_deleted",
            EventType::MessagePosted => "message_posted",
            EventType::PresenceUpdated => "presence_updated",
            EventType::MemoryWritten => "memory_written",
            EventType::InsightPromoted => "insight:promoted",
            EventType::InsightTriaged => "insight:triaged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: i64,
    pub agent: Option<String>,
    pub task_id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Promoted,
    PendingTriage,
    TaskCreated,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub title: String,
    pub cluster_key: String,
    pub failure_family: String,
    pub impacted_unit: String,
    pub severity_max: String,
    pub priority: Priority,
    pub status: InsightStatus,
    pub promotion_readiness: f64,
    #[serde(default)]
    pub reflection_ids: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub task_id: Option<String>,
}

/// Closed set of watchdog action kinds (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyActionKind {
    AutoBlockStale,
    SuggestClose,
    DigestEmitted,
    ReadyQueueWarning,
    IdleQueueEscalation,
    ReviewReassign,
    AutoRequeue,
    WorkingContractWarning,
    ContinuityReplenish,
    ReadyQueueReplenish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    pub id: String,
    pub kind: PolicyActionKind,
    pub task_id: Option<String>,
    pub agent: Option<String>,
    pub description: String,
    pub previous_state: Option<Value>,
    pub applied_at: i64,
    pub rolled_back: bool,
    pub rolled_back_at: Option<i64>,
    pub rollback_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionAck {
    pub agent: String,
    pub message_id: String,
    pub mentioned_by: String,
    pub channel: String,
    pub created_at: i64,
    pub acked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageDecision {
    pub id: String,
    pub insight_id: String,
    pub action: String,
    pub reviewer: String,
    pub rationale: String,
    pub outcome_task_id: Option<String>,
    pub previous_status: InsightStatus,
    pub new_status: InsightStatus,
    pub timestamp: i64,
}

/// Result of `resolveTaskId` (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Prefix,
    Ambiguous,
    None,
}

#[derive(Debug, Clone)]
pub struct ResolvedTaskId {
    pub resolved_id: Option<String>,
    pub match_type: MatchType,
    pub suggestions: Vec<String>,
}

/// Filter accepted by `listTasks` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<String>,
    pub created_by: Option<String>,
    pub priority: Option<Priority>,
    pub tags: BTreeSet<String>,
    pub updated_since: Option<i64>,
    pub limit: Option<usize>,
}
