//! Review bundle builder: resolves a task's PR, its CI status, and local
//! artifact file existence into a pass/fail verdict with an audit trail
//! (spec §4.8).

use crate::models::metadata::MetadataView;
use crate::models::Task;
use crate::store::task_store::TaskStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

static PR_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://github\.com/[\w.-]+/[\w.-]+/pull/\d+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum CiState {
    Success,
    Pending,
    Failure,
    Unknown,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReviewBundle {
    pub task_id: String,
    pub pr_url: Option<String>,
    pub ci_state: CiState,
    pub artifact_paths_checked: Vec<String>,
    pub artifact_paths_found: Vec<String>,
    pub verdict: bool,
    pub reasons: Vec<String>,
}

/// Abstracts the GitHub PR/CI lookup so the builder is testable without a
/// network call.
#[async_trait]
pub trait PrStatusProvider: Send + Sync {
    async fn ci_state(&self, pr_url: &str) -> CiState;
}

pub struct GithubPrStatusProvider {
    client: reqwest::Client,
    token: Option<String>,
}

impl GithubPrStatusProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), token }
    }
}

#[async_trait]
impl PrStatusProvider for GithubPrStatusProvider {
    async fn ci_state(&self, pr_url: &str) -> CiState {
        let Some((owner_repo, pr_number)) = parse_pr_url(pr_url) else {
            return CiState::Unknown;
        };
        let api_url = format!("https://api.github.com/repos/{owner_repo}/commits/pull/{pr_number}/head/status");

        let mut request = self.client.get(&api_url).header("User-Agent", "reflectt-core");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
                Ok(body) => match body.get("state").and_then(|v| v.as_str()) {
                    Some("success") => CiState::Success,
                    Some("pending") => CiState::Pending,
                    Some("failure") | Some("error") => CiState::Failure,
                    _ => CiState::Unknown,
                },
                Err(_) => CiState::Unknown,
            },
            _ => CiState::Unknown,
        }
    }
}

fn parse_pr_url(url: &str) -> Option<(String, String)> {
    let rest = url.split("github.com/").nth(1)?;
    let mut parts = rest.splitn(4, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    parts.next()?; // "pull"
    let number = parts.next()?;
    Some((format!("{owner}/{repo}"), number.to_string()))
}

fn resolve_pr_url(task: &Task) -> Option<String> {
    if let Some(url) = task.metadata.get(crate::models::metadata::keys::PR_URL).and_then(|v| v.as_str()) {
        if PR_URL_RE.is_match(url) {
            return Some(url.to_string());
        }
    }
    for artifact in crate::models::metadata::get_str_list(&task.metadata, crate::models::metadata::keys::ARTIFACTS) {
        if let Some(m) = PR_URL_RE.find(&artifact) {
            return Some(m.as_str().to_string());
        }
    }
    if let Some(Ok(bundle)) = crate::models::metadata::QaBundle::parse(&task.metadata) {
        for link in &bundle.artifact_links {
            if let Some(m) = PR_URL_RE.find(link) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

pub struct ReviewBundleBuilder {
    tasks: Arc<dyn TaskStore>,
    pr_status: Arc<dyn PrStatusProvider>,
    strict_ci: bool,
}

impl ReviewBundleBuilder {
    pub fn new(tasks: Arc<dyn TaskStore>, pr_status: Arc<dyn PrStatusProvider>, strict_ci: bool) -> Self {
        Self { tasks, pr_status, strict_ci }
    }

    /// Builds a bundle for `task_id` and appends an audit comment
    /// summarizing the verdict. No retries; a resolution failure yields
    /// `verdict=false` with populated `reasons`.
    pub async fn build(&self, task_id: &str) -> Option<ReviewBundle> {
        let task = self.tasks.get_task(task_id).await?;
        let mut reasons = Vec::new();

        let pr_url = resolve_pr_url(&task);
        if pr_url.is_none() {
            reasons.push("no PR URL resolved from metadata".to_string());
        }

        let ci_state = match &pr_url {
            Some(url) => self.pr_status.ci_state(url).await,
            None => CiState::Unknown,
        };
        if self.strict_ci && ci_state != CiState::Success {
            reasons.push(format!("CI state is {ci_state:?}, not success"));
        }

        let checked = crate::models::metadata::get_str_list(&task.metadata, "artifact_path_candidates");
        let checked = if checked.is_empty() { vec![task.metadata.get("artifact_path").and_then(|v| v.as_str()).unwrap_or_default().to_string()] } else { checked };
        let checked: Vec<String> = checked.into_iter().filter(|s| !s.is_empty()).collect();
        let found: Vec<String> = checked.iter().filter(|p| Path::new(p).exists()).cloned().collect();
        if !checked.is_empty() && found.is_empty() {
            reasons.push("no declared artifact path resolves on disk".to_string());
        }

        let verdict = pr_url.is_some() && (!self.strict_ci || ci_state == CiState::Success) && (checked.is_empty() || !found.is_empty());

        let bundle = ReviewBundle {
            task_id: task_id.to_string(),
            pr_url,
            ci_state,
            artifact_paths_checked: checked,
            artifact_paths_found: found,
            verdict,
            reasons,
        };

        let summary = if bundle.verdict {
            format!("[review-bundle] verdict=pass pr={}", bundle.pr_url.as_deref().unwrap_or("none"))
        } else {
            format!("[review-bundle] verdict=fail reasons={}", bundle.reasons.join("; "))
        };
        let _ = self.tasks.add_comment(task_id, "system", &summary).await;

        Some(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::models::{TaskDraft, TaskPatch};
    use crate::store::task_store::{InMemoryTaskStore, RoleRegistry};
    use serde_json::json;

    struct AlwaysSuccess;

    #[async_trait]
    impl PrStatusProvider for AlwaysSuccess {
        async fn ci_state(&self, _pr_url: &str) -> CiState {
            CiState::Success
        }
    }

    #[tokio::test]
    async fn verdict_passes_when_pr_resolved_and_ci_green() {
        let clock = Arc::new(FixedClock::new(0));
        let events = Arc::new(EventBus::new(clock.clone()));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(clock, events, RoleRegistry::new(), false));
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
        let mut metadata = serde_json::Map::new();
        metadata.insert("artifacts".into(), json!(["https://github.com/org/repo/pull/42"]));
        store.update_task(&task.id, TaskPatch { metadata: Some(metadata), ..Default::default() }).await.unwrap();

        let builder = ReviewBundleBuilder::new(store, Arc::new(AlwaysSuccess), true);
        let bundle = builder.build(&task.id).await.unwrap();
        assert!(bundle.verdict);
        assert_eq!(bundle.ci_state, CiState::Success);
    }
}
