//! Assignment scoring, protected-domain override, and the author-exclusion
//! guardrail (spec §4.4).

use crate::constants::{GUARDRAIL_DELTA_THRESHOLD, GUARDRAIL_RATIO_THRESHOLD};
use crate::store::task_store::RoleRegistry;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct CandidateTask {
    pub title: String,
    pub tags: BTreeSet<String>,
    pub cluster_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub affinity: f64,
    pub wip_penalty: f64,
    pub role_boost: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredAgent {
    pub agent: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub over_cap: bool,
}

/// Tag-overlap plus keyword-match affinity, wip-penalty, deterministic score.
/// Mirrors the scoring table in spec §4.4: output sorted descending by score,
/// ties broken by agent name ascending.
pub fn score_agents(task: &CandidateTask, roles: &RoleRegistry, doing_counts: &std::collections::HashMap<String, usize>) -> Vec<ScoredAgent> {
    let keywords: BTreeSet<String> = task
        .title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect();

    let mut scored: Vec<ScoredAgent> = roles
        .known_agents()
        .map(|agent| {
            let tags = roles.tags_for(agent);
            let overlap = tags.intersection(&task.tags).count() as f64;
            let keyword_hits = tags.iter().filter(|t| keywords.contains(t.as_str())).count() as f64;
            let affinity = overlap + keyword_hits * 0.5;

            let wip_cap = roles.wip_cap_for(agent);
            let doing = doing_counts.get(agent).copied().unwrap_or(0);
            let wip_penalty = if wip_cap == 0 { 1.0 } else { (doing as f64 / wip_cap as f64).min(1.0) };
            let over_cap = doing >= wip_cap;

            let role_boost = if roles.never_routes(agent) { -100.0 } else { 0.0 };
            let score = affinity - wip_penalty + role_boost;

            ScoredAgent {
                agent: agent.clone(),
                score,
                breakdown: ScoreBreakdown { affinity, wip_penalty, role_boost },
                over_cap,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.agent.cmp(&b.agent)));
    scored
}

#[derive(Debug, Clone)]
pub struct AssignmentDecision {
    pub assignee: String,
    pub reason: String,
    pub guardrail_applied: bool,
    pub sole_author_fallback: bool,
    pub candidates_considered: Vec<String>,
    pub insight_authors: Vec<String>,
}

/// Resolves the assignee for a newly bridged insight, honoring the
/// author-exclusion guardrail (spec §4.3/§4.4 "single-author insight with
/// guardrail enabled").
pub fn resolve_assignment(task: &CandidateTask, authors: &[String], guardrail_enabled: bool, roles: &RoleRegistry, doing_counts: &std::collections::HashMap<String, usize>) -> AssignmentDecision {
    let scored = score_agents(task, roles, doing_counts);
    let candidates_considered: Vec<String> = scored.iter().map(|s| s.agent.clone()).collect();

    if let Some(protected) = roles.protected_match(&task.title, &task.cluster_key) {
        return AssignmentDecision {
            assignee: protected,
            reason: "protected-domain pattern match".into(),
            guardrail_applied: false,
            sole_author_fallback: false,
            candidates_considered,
            insight_authors: authors.to_vec(),
        };
    }

    if authors.len() != 1 || !guardrail_enabled {
        let top = scored.first().map(|s| s.agent.clone());
        return AssignmentDecision {
            assignee: top.unwrap_or_else(|| authors.first().cloned().unwrap_or_default()),
            reason: "normal scoring".into(),
            guardrail_applied: false,
            sole_author_fallback: false,
            candidates_considered,
            insight_authors: authors.to_vec(),
        };
    }

    let author = &authors[0];
    let author_affinity = scored.iter().find(|s| &s.agent == author).map(|s| s.breakdown.affinity).unwrap_or(0.0);
    let best_non_author = scored.iter().find(|s| &s.agent != author);
    let best_non_author_affinity = best_non_author.map(|s| s.breakdown.affinity).unwrap_or(0.0);

    let hoarding = author_affinity > 0.0
        && (author_affinity > best_non_author_affinity * GUARDRAIL_RATIO_THRESHOLD || author_affinity - best_non_author_affinity >= GUARDRAIL_DELTA_THRESHOLD);

    if hoarding {
        return AssignmentDecision {
            assignee: author.clone(),
            reason: "author affinity dominates; kept as assignee under guardrail".into(),
            guardrail_applied: true,
            sole_author_fallback: true,
            candidates_considered,
            insight_authors: authors.to_vec(),
        };
    }

    let top_scorer = scored.first();
    match top_scorer {
        Some(top) if &top.agent != author => AssignmentDecision {
            assignee: top.agent.clone(),
            reason: "top-scored non-author candidate".into(),
            guardrail_applied: true,
            sole_author_fallback: false,
            candidates_considered,
            insight_authors: authors.to_vec(),
        },
        _ => match best_non_author {
            Some(candidate) => AssignmentDecision {
                assignee: candidate.agent.clone(),
                reason: "best-scored non-author candidate".into(),
                guardrail_applied: true,
                sole_author_fallback: false,
                candidates_considered,
                insight_authors: authors.to_vec(),
            },
            None => AssignmentDecision {
                assignee: author.clone(),
                reason: "no non-author candidate available".into(),
                guardrail_applied: true,
                sole_author_fallback: true,
                candidates_considered,
                insight_authors: authors.to_vec(),
            },
        },
    }
}

/// Picks a reviewer excluding the assignee (and, when `require_non_author`,
/// excluding every insight author) — spec §4.4 "Reviewer selection".
pub fn resolve_reviewer(
    task: &CandidateTask,
    assignee: &str,
    authors: &[String],
    require_non_author: bool,
    default_reviewer: Option<&str>,
    roles: &RoleRegistry,
    doing_counts: &std::collections::HashMap<String, usize>,
    active_filter: Option<&dyn Fn(&str) -> bool>,
) -> Option<String> {
    let excluded: BTreeSet<&str> = if require_non_author {
        authors.iter().map(String::as_str).chain(std::iter::once(assignee)).collect()
    } else {
        std::iter::once(assignee).collect()
    };

    let scored = score_agents(task, roles, doing_counts);
    let candidate = scored
        .iter()
        .find(|s| !excluded.contains(s.agent.as_str()) && active_filter.map(|f| f(&s.agent)).unwrap_or(true))
        .map(|s| s.agent.clone());

    candidate.or_else(|| {
        default_reviewer
            .filter(|r| !excluded.contains(*r))
            .map(str::to_string)
            .or_else(|| roles.known_agents().find(|a| !excluded.contains(a.as_str())).cloned())
    })
}

/// Reviewer-reassignment walk for the watchdog path (spec §4.4): restrict
/// candidates to presence-active agents, skip the current reviewer, the
/// assignee, and the configured escalation target, escalate on empty.
pub fn reassign_reviewer(
    task: &CandidateTask,
    assignee: &str,
    current_reviewer: &str,
    escalation_target: &str,
    roles: &RoleRegistry,
    doing_counts: &std::collections::HashMap<String, usize>,
    is_active: &dyn Fn(&str) -> bool,
) -> Option<String> {
    let excluded: BTreeSet<&str> = [assignee, current_reviewer, escalation_target].into_iter().collect();
    score_agents(task, roles, doing_counts)
        .into_iter()
        .find(|s| !excluded.contains(s.agent.as_str()) && is_active(&s.agent))
        .map(|s| s.agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::task_store::AgentRole;
    use std::collections::HashMap;

    fn roles() -> RoleRegistry {
        RoleRegistry::new()
            .with_agent("link", AgentRole { role: "engineering".into(), tags: ["runtime".into(), "crash".into()].into(), wip_cap: Some(3), ..Default::default() })
            .with_agent("kai", AgentRole { role: "lead".into(), tags: ["runtime".into()].into(), wip_cap: Some(3), ..Default::default() })
    }

    #[test]
    fn single_author_low_affinity_assigns_best_non_author() {
        let task = CandidateTask { title: "crash in worker".into(), tags: ["crash".into()].into(), cluster_key: "runtime::crash::worker".into() };
        let decision = resolve_assignment(&task, &["link".to_string()], true, &roles(), &HashMap::new());
        assert_eq!(decision.assignee, "link");
        assert!(decision.guardrail_applied);
        // link has both tags matching so affinity dominates -> sole_author_fallback true
        assert!(decision.sole_author_fallback);
    }

    #[test]
    fn multi_author_insight_uses_normal_scoring() {
        let task = CandidateTask { title: "crash".into(), tags: ["crash".into()].into(), cluster_key: "runtime::crash".into() };
        let decision = resolve_assignment(&task, &["link".to_string(), "kai".to_string()], true, &roles(), &HashMap::new());
        assert!(!decision.guardrail_applied);
    }
}
