//! Insight→task bridge: translates a promoted insight into at most one task,
//! honoring feature/severity gates, dedup, and the assignment guardrail
//! (spec §4.3).

use crate::assignment::{resolve_assignment, resolve_reviewer, CandidateTask};
use crate::config::BridgeConfig;
use crate::events::{EventListener, EventSink};
use crate::models::metadata::{keys, AssignmentDecision as AssignmentDecisionView, MetadataView};
use crate::models::{EventType, Insight, InsightStatus, Priority, Task, TaskDraft, TriageDecision};
use crate::store::task_store::{RoleRegistry, TaskStore};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct BridgeStats {
    pub duplicates_skipped: u64,
    pub already_addressed_linked: u64,
    pub pending_triage: u64,
    pub tasks_created: u64,
}

pub struct InsightBridge {
    insights: RwLock<HashMap<String, Insight>>,
    triage_log: RwLock<Vec<TriageDecision>>,
    stats: RwLock<BridgeStats>,
    tasks: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    roles: RoleRegistry,
    config: BridgeConfig,
}

impl InsightBridge {
    pub fn new(tasks: Arc<dyn TaskStore>, events: Arc<dyn EventSink>, roles: RoleRegistry, config: BridgeConfig) -> Self {
        Self {
            insights: RwLock::new(HashMap::new()),
            triage_log: RwLock::new(Vec::new()),
            stats: RwLock::new(BridgeStats::default()),
            tasks,
            events,
            roles,
            config,
        }
    }

    pub async fn register(&self, insight: Insight) {
        self.insights.write().await.insert(insight.id.clone(), insight);
    }

    pub async fn stats(&self) -> BridgeStats {
        self.stats.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Insight> {
        self.insights.read().await.get(id).cloned()
    }

    /// Promoted insights with no linked task yet — feeds `continuity-replenish`.
    pub async fn unlinked_promoted(&self) -> Vec<Insight> {
        self.insights.read().await.values().filter(|i| i.status == InsightStatus::Promoted && i.task_id.is_none()).cloned().collect()
    }

    /// One-shot catch-up scan at startup plus the handler invoked on every
    /// `insight:promoted` event.
    pub async fn process(&self, insight_id: &str) -> Option<Task> {
        let insight = self.insights.read().await.get(insight_id).cloned()?;

        if insight.task_id.is_some() {
            self.stats.write().await.duplicates_skipped += 1;
            return None;
        }

        if let Some(existing) = self.find_already_addressed(&insight).await {
            self.link(&insight, &existing).await;
            self.stats.write().await.already_addressed_linked += 1;
            return Some(existing);
        }

        if let Some(task_id) = self.find_by_evidence(&insight).await {
            if let Some(existing) = self.tasks.get_task(&task_id).await {
                self.link(&insight, &existing).await;
                self.stats.write().await.already_addressed_linked += 1;
                return Some(existing);
            }
        }

        if self.config.feature_families.iter().any(|f| f.eq_ignore_ascii_case(&insight.failure_family)) {
            self.set_pending_triage(&insight).await;
            return None;
        }

        if !self.config.auto_create_severities.iter().any(|s| s.eq_ignore_ascii_case(&insight.severity_max)) {
            self.set_pending_triage(&insight).await;
            return None;
        }

        let task = self.create_task(&insight).await;
        self.mark_task_created(&insight, &task).await;
        self.stats.write().await.tasks_created += 1;
        Some(task)
    }

    async fn find_already_addressed(&self, insight: &Insight) -> Option<Task> {
        let tasks = self.tasks.list_tasks(Default::default()).await;

        for task in &tasks {
            if task.metadata.get(keys::INSIGHT_ID).and_then(|v| v.as_str()) == Some(insight.id.as_str())
                || task.metadata.get(keys::SOURCE_INSIGHT).and_then(|v| v.as_str()) == Some(insight.id.as_str())
            {
                return Some(task.clone());
            }
        }

        for task in &tasks {
            if task.metadata.get(keys::SOURCE).and_then(|v| v.as_str()) == Some(keys::SOURCE_BRIDGE) {
                if task.metadata.get(keys::CLUSTER_KEY).and_then(|v| v.as_str()) == Some(insight.cluster_key.as_str()) {
                    return Some(task.clone());
                }
            }
        }

        for task in &tasks {
            if !insight.reflection_ids.is_empty()
                && task.metadata.get("source_reflection").and_then(|v| v.as_str()) == Some(insight.reflection_ids[0].as_str())
            {
                return Some(task.clone());
            }
        }

        tasks.into_iter().find(|t| t.title.eq_ignore_ascii_case(&insight.title))
    }

    async fn find_by_evidence(&self, insight: &Insight) -> Option<String> {
        let tasks = self.tasks.list_tasks(Default::default()).await;
        for evidence in &insight.evidence_refs {
            if evidence.starts_with("task-") {
                if tasks.iter().any(|t| &t.id == evidence) {
                    return Some(evidence.clone());
                }
            }
            if evidence.contains("github.com") {
                if let Some(task) = tasks.iter().find(|t| t.metadata.get(keys::PR_URL).and_then(|v| v.as_str()) == Some(evidence.as_str())) {
                    return Some(task.id.clone());
                }
            }
        }
        None
    }

    async fn link(&self, insight: &Insight, task: &Task) {
        let mut insights = self.insights.write().await;
        if let Some(row) = insights.get_mut(&insight.id) {
            row.task_id = Some(task.id.clone());
            if matches!(task.status, crate::models::TaskStatus::Done | crate::models::TaskStatus::Validating) {
                row.status = InsightStatus::TaskCreated;
            }
        }
    }

    async fn set_pending_triage(&self, insight: &Insight) {
        self.stats.write().await.pending_triage += 1;
        let mut insights = self.insights.write().await;
        if let Some(row) = insights.get_mut(&insight.id) {
            row.status = InsightStatus::PendingTriage;
        }
    }

    async fn mark_task_created(&self, insight: &Insight, task: &Task) {
        let mut insights = self.insights.write().await;
        if let Some(row) = insights.get_mut(&insight.id) {
            row.status = InsightStatus::TaskCreated;
            row.task_id = Some(task.id.clone());
        }
    }

    async fn create_task(&self, insight: &Insight) -> Task {
        let doing_counts = self.doing_counts().await;
        let candidate = CandidateTask {
            title: insight.title.clone(),
            tags: [insight.failure_family.clone()].into(),
            cluster_key: insight.cluster_key.clone(),
        };

        let decision = resolve_assignment(&candidate, &insight.authors, self.config.guardrail_enabled, &self.roles, &doing_counts);
        let reviewer = resolve_reviewer(
            &candidate,
            &decision.assignee,
            &insight.authors,
            decision.sole_author_fallback && self.config.require_non_author_reviewer,
            self.config.default_reviewer.as_deref(),
            &self.roles,
            &doing_counts,
            None,
        );

        let description = format!(
            "Auto-generated from insight {id}.\ncluster: {cluster}\nseverity: {severity}\nreflections: {reflections}\nauthors: {authors}\nevidence: {evidence}",
            id = insight.id,
            cluster = insight.cluster_key,
            severity = insight.severity_max,
            reflections = insight.reflection_ids.len(),
            authors = insight.authors.join(", "),
            evidence = insight.evidence_refs.join(", "),
        );

        let mut metadata = serde_json::Map::new();
        metadata.insert(keys::INSIGHT_ID.to_string(), json!(insight.id));
        metadata.insert(keys::SOURCE_INSIGHT.to_string(), json!(insight.id));
        if let Some(first) = insight.reflection_ids.first() {
            metadata.insert("source_reflection".to_string(), json!(first));
        }
        metadata.insert(keys::SEVERITY.to_string(), json!(insight.severity_max));
        metadata.insert(keys::SOURCE.to_string(), json!(keys::SOURCE_BRIDGE));
        metadata.insert(keys::CLUSTER_KEY.to_string(), json!(insight.cluster_key));
        metadata.insert(keys::FAILURE_FAMILY.to_string(), json!(insight.failure_family));
        AssignmentDecisionView {
            reason: decision.reason.clone(),
            guardrail_applied: decision.guardrail_applied,
            sole_author_fallback: decision.sole_author_fallback,
            candidates_considered: decision.candidates_considered.clone(),
            insight_authors: decision.insight_authors.clone(),
        }
        .apply(&mut metadata);

        let draft = TaskDraft {
            title: format!("[Insight] {}", insight.title),
            description,
            assignee: Some(decision.assignee.clone()),
            reviewer,
            priority: Some(insight.priority),
            done_criteria: vec![
                "Root cause addressed or mitigated".to_string(),
                format!("Evidence from insight {} validated", insight.id),
                "Follow-up reflection submitted confirming fix".to_string(),
            ],
            tags: Default::default(),
            blocked_by: Vec::new(),
            created_by: "insight-task-bridge".to_string(),
            metadata,
        };

        match self.tasks.create_task(draft).await {
            Ok(task) => {
                info!(insight_id = %insight.id, task_id = %task.id, assignee = %decision.assignee, "bridge created task");
                task
            }
            Err(e) => {
                warn!(insight_id = %insight.id, error = %e, "bridge failed to create task");
                Task {
                    id: String::new(),
                    title: String::new(),
                    description: String::new(),
                    status: crate::models::TaskStatus::Todo,
                    assignee: None,
                    reviewer: None,
                    priority: Priority::P2,
                    done_criteria: Vec::new(),
                    tags: Default::default(),
                    blocked_by: Vec::new(),
                    created_by: String::new(),
                    created_at: 0,
                    updated_at: 0,
                    metadata: Default::default(),
                    comment_count: 0,
                }
            }
        }
    }

    async fn doing_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.list_tasks(Default::default()).await {
            if task.status == crate::models::TaskStatus::Doing {
                if let Some(assignee) = task.assignee {
                    *counts.entry(assignee.to_lowercase()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Records a human triage decision on a pending-triage insight (spec §4.3
    /// "Triage audit"). Immutable: once written, a `TriageDecision` row is
    /// never edited.
    pub async fn record_triage(&self, insight_id: &str, action: &str, reviewer: &str, rationale: &str, outcome_task_id: Option<String>) -> Option<TriageDecision> {
        let mut insights = self.insights.write().await;
        let insight = insights.get_mut(insight_id)?;
        let previous_status = insight.status.clone();
        let new_status = match action {
            "approve" => InsightStatus::TaskCreated,
            "dismiss" => InsightStatus::Dismissed,
            _ => previous_status.clone(),
        };
        insight.status = new_status.clone();
        if let Some(task_id) = &outcome_task_id {
            insight.task_id = Some(task_id.clone());
        }
        drop(insights);

        let decision = TriageDecision {
            id: uuid::Uuid::new_v4().to_string(),
            insight_id: insight_id.to_string(),
            action: action.to_string(),
            reviewer: reviewer.to_string(),
            rationale: rationale.to_string(),
            outcome_task_id,
            previous_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.triage_log.write().await.push(decision.clone());
        Some(decision)
    }

    pub async fn triage_log(&self) -> Vec<TriageDecision> {
        self.triage_log.read().await.clone()
    }
}

/// Wires the bridge to the event bus as an inline listener so a freshly
/// promoted insight is processed the moment it lands (spec §4.5 "Inline
/// listeners ... registered by id; invoked synchronously after append").
pub struct PromotedInsightListener {
    bridge: Arc<InsightBridge>,
}

impl PromotedInsightListener {
    pub fn new(bridge: Arc<InsightBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl EventListener for PromotedInsightListener {
    fn name(&self) -> &'static str {
        "insight-bridge"
    }

    async fn on_event(&self, event: &crate::models::Event) {
        if event.event_type != EventType::InsightPromoted {
            return;
        }
        if let Some(insight_id) = event.data.get("id").and_then(|v| v.as_str()) {
            self.bridge.process(insight_id).await;
        }
    }
}
