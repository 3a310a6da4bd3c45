//! Mirrors `process/…` artifacts from an agent-scoped workspace into a
//! shared workspace root when a task enters validating/done (spec §4.8).

use crate::config::WorkspaceConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MirrorResult {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub files_copied: usize,
    pub error: Option<String>,
}

impl MirrorResult {
    fn failure(error: impl Into<String>) -> Self {
        Self { source: None, destination: None, files_copied: 0, error: Some(error.into()) }
    }
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' }).collect()
}

/// Ordered candidate workspace roots to search for `artifact_path` (spec
/// §4.8: "explicit override, then workspace-<sanitized assignee>, then
/// workspace, then any workspace-* under the state dir").
fn candidate_roots(config: &WorkspaceConfig, assignee: Option<&str>) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(root) = &config.workspace_root {
        roots.push(PathBuf::from(root));
    }
    if let Some(state_dir) = &config.state_dir {
        let base = Path::new(state_dir);
        if let Some(assignee) = assignee {
            roots.push(base.join(format!("workspace-{}", sanitize(assignee))));
        }
        roots.push(base.join("workspace"));
        if let Ok(entries) = std::fs::read_dir(base) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with("workspace-")).unwrap_or(false) {
                    roots.push(path);
                }
            }
        }
    }
    roots
}

fn copy_recursive(source: &Path, destination: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    if source.is_dir() {
        std::fs::create_dir_all(destination)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            count += copy_recursive(&entry.path(), &destination.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, destination)?;
        count += 1;
    }
    Ok(count)
}

/// Searches candidate roots for `artifact_path`, copying the first match
/// into `shared_workspace_root`. Non-fatal: every failure mode returns a
/// `MirrorResult` with `error` set rather than propagating.
pub fn mirror_artifact(config: &WorkspaceConfig, assignee: Option<&str>, artifact_path: &str) -> MirrorResult {
    if !artifact_path.starts_with("process/") {
        return MirrorResult::failure("artifact_path does not start with process/");
    }
    let Some(shared_root) = &config.shared_workspace_root else {
        return MirrorResult::failure("no shared workspace root configured");
    };

    let roots = candidate_roots(config, assignee);
    let found = roots.iter().map(|root| root.join(artifact_path)).find(|path| path.exists());

    let Some(source) = found else {
        return MirrorResult::failure(format!("artifact_path {artifact_path} not found under any candidate workspace root"));
    };

    let destination = PathBuf::from(shared_root).join(artifact_path);
    match copy_recursive(&source, &destination) {
        Ok(files_copied) => MirrorResult { source: Some(source), destination: Some(destination), files_copied, error: None },
        Err(e) => MirrorResult::failure(format!("copy failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_file_artifact_into_shared_root() {
        let workspace = tempdir().unwrap();
        let shared = tempdir().unwrap();
        let artifact_dir = workspace.path().join("process");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(artifact_dir.join("report.txt"), "ok").unwrap();

        let config = WorkspaceConfig {
            workspace_root: Some(workspace.path().to_string_lossy().to_string()),
            shared_workspace_root: Some(shared.path().to_string_lossy().to_string()),
            state_dir: None,
        };

        let result = mirror_artifact(&config, Some("link"), "process/report.txt");
        assert!(result.error.is_none(), "{:?}", result.error);
        assert_eq!(result.files_copied, 1);
        assert!(shared.path().join("process/report.txt").exists());
    }

    #[test]
    fn non_process_path_is_rejected() {
        let config = WorkspaceConfig { workspace_root: None, shared_workspace_root: None, state_dir: None };
        let result = mirror_artifact(&config, None, "docs/report.txt");
        assert!(result.error.is_some());
    }
}
