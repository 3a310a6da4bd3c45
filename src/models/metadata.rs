//! Typed views over the recognized `Task.metadata` keys (spec §3.2, §9).
//!
//! `Task.metadata` stays a `serde_json::Map<String, Value>` at the boundary
//! so unknown keys pass through untouched; gates parse the keys they care
//! about into one of these views and write back through
//! [`MetadataView::apply`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub trait MetadataView: Sized + Serialize + for<'de> Deserialize<'de> {
    const KEY: &'static str;

    fn parse(metadata: &Map<String, Value>) -> Option<std::result::Result<Self, serde_json::Error>> {
        metadata.get(Self::KEY).map(|v| serde_json::from_value(v.clone()))
    }

    fn apply(&self, metadata: &mut Map<String, Value>) {
        metadata.insert(Self::KEY.to_string(), serde_json::to_value(self).expect("typed metadata view always serializes"));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaBundle {
    pub summary: String,
    pub artifact_links: Vec<String>,
    pub checks: Vec<String>,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
}

impl QaBundle {
    /// spec §4.1 gate 1: summary non-empty, artifact_links non-empty, checks non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.summary.trim().is_empty() && !self.artifact_links.is_empty() && !self.checks.is_empty()
    }
}

impl MetadataView for QaBundle {
    const KEY: &'static str = "qa_bundle";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerDecision {
    pub decision: String,
    pub reviewer: String,
    pub comment: String,
    pub decided_at: i64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl MetadataView for ReviewerDecision {
    const KEY: &'static str = "reviewer_decision";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeCheckpoint {
    pub verdict: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub captured_at: Option<i64>,
    #[serde(default)]
    pub captured_by: Option<String>,
    #[serde(default)]
    pub due_at: Option<i64>,
    pub status: String,
}

impl MetadataView for OutcomeCheckpoint {
    const KEY: &'static str = "outcome_checkpoint";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDecision {
    pub reason: String,
    pub guardrail_applied: bool,
    pub sole_author_fallback: bool,
    pub candidates_considered: Vec<String>,
    pub insight_authors: Vec<String>,
}

impl MetadataView for AssignmentDecision {
    const KEY: &'static str = "assignment_decision";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTransition {
    pub actor: String,
    #[serde(rename = "type")]
    pub transition_type: String,
    pub timestamp: i64,
}

impl MetadataView for LastTransition {
    const KEY: &'static str = "last_transition";
}

/// Accessors for the scalar/primitive recognized keys that don't warrant a
/// full struct (spec §3.2): `eta`, `artifact_path`, `artifacts`, `branch`,
/// `entered_validating_at`, `review_last_activity_at`, `completed_at`,
/// `wip_override`, `insight_id`, `source_insight`, `source_reflection`,
/// `source`, `cluster_key`, `failure_family`, `reviewer_approved`.
pub mod keys {
    pub const ETA: &str = "eta";
    pub const ARTIFACT_PATH: &str = "artifact_path";
    pub const ARTIFACTS: &str = "artifacts";
    pub const BRANCH: &str = "branch";
    pub const BRANCH_WARNING: &str = "branch_warning";
    pub const REVIEWER_APPROVED: &str = "reviewer_approved";
    pub const REVIEW_STATE: &str = "review_state";
    pub const ACTOR: &str = "actor";
    pub const ENTERED_VALIDATING_AT: &str = "entered_validating_at";
    pub const REVIEW_LAST_ACTIVITY_AT: &str = "review_last_activity_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const LANE_STATE: &str = "lane_state";
    pub const WIP_OVERRIDE: &str = "wip_override";
    pub const WIP_OVERRIDE_USED: &str = "wip_override_used";
    pub const INSIGHT_ID: &str = "insight_id";
    pub const SOURCE_INSIGHT: &str = "source_insight";
    pub const SOURCE_REFLECTION: &str = "source_reflection";
    pub const SOURCE: &str = "source";
    pub const SOURCE_BRIDGE: &str = "insight-task-bridge";
    pub const CLUSTER_KEY: &str = "cluster_key";
    pub const FAILURE_FAMILY: &str = "failure_family";
    pub const SEVERITY: &str = "severity";
    pub const PR_URL: &str = "pr_url";
    pub const BOARD_HEALTH_PREFIX: &str = "board_health_";
}

pub fn get_str<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

pub fn get_bool(metadata: &Map<String, Value>, key: &str) -> bool {
    metadata.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn get_str_list(metadata: &Map<String, Value>, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub fn get_i64(metadata: &Map<String, Value>, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|v| v.as_i64())
}
