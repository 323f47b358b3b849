//! Shared identity-descriptor loading and path/command matching for the
//! prompt gate and operation gate binaries (SPEC_FULL.md §4.7). Neither
//! binary needs a tokio runtime; both are plain synchronous processes.

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

pub const IDENTITY_FILE_RELATIVE_PATH: &str = ".claude/instance-identity.json";

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityDescriptor {
    pub instance_id: String,
    #[serde(default)]
    pub branch_prefix: String,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default)]
    pub can_merge: bool,
}

/// Walk upward from `start` looking for a `.claude` directory; that
/// ancestor is the project root. Falls back to `start` itself if none is
/// found, so callers always have a root to check the identity file under.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut dir = start;
    loop {
        if dir.join(".claude").is_dir() {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return start.to_path_buf(),
        }
    }
}

pub fn load_identity_descriptor(root: &Path) -> Option<Result<IdentityDescriptor, String>> {
    let path = root.join(IDENTITY_FILE_RELATIVE_PATH);
    let raw = std::fs::read_to_string(&path).ok()?;
    Some(serde_json::from_str(&raw).map_err(|e| format!("malformed {}: {e}", path.display())))
}

fn git_program() -> String {
    std::env::var("COORD_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

/// Current branch name, or `None` for a detached HEAD (or any git failure,
/// which is treated the same as detached: permissive).
pub fn current_branch(dir: &Path) -> Option<String> {
    let output = Command::new(git_program())
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" { None } else { Some(branch) }
}

/// Normalize `candidate` to a root-relative, `/`-separated path with no
/// `.`/`..` components, for matching against `forbidden_paths` entries.
pub fn normalize_relative(root: &Path, candidate: &Path) -> String {
    let relative = candidate.strip_prefix(root).unwrap_or(candidate);
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    parts.join("/")
}

/// `forbidden_paths` entries: a trailing `/` matches the directory and
/// everything under it; otherwise `*` is a glob-style wildcard matched
/// against the whole normalized path.
pub fn matches_forbidden(normalized_path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('/') {
            normalized_path == prefix || normalized_path.starts_with(&format!("{prefix}/"))
        } else {
            glob_match(pattern, normalized_path)
        }
    })
}

/// Minimal `*`-only glob matcher (`?` and character classes are not part
/// of the `forbidden_paths` contract).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let mut dp = vec![vec![false; text.len() + 1]; pattern.len() + 1];
    dp[0][0] = true;
    for i in 1..=pattern.len() {
        if pattern[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=pattern.len() {
        for j in 1..=text.len() {
            dp[i][j] = if pattern[i - 1] == '*' {
                dp[i - 1][j] || dp[i][j - 1]
            } else {
                dp[i - 1][j - 1] && pattern[i - 1] == text[j - 1]
            };
        }
    }
    dp[pattern.len()][text.len()]
}

/// The version-control verb a shell command invokes, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsVerb {
    Commit,
    Push,
    Merge,
}

pub fn detect_vcs_verb(command: &str) -> Option<VcsVerb> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let git_pos = tokens.iter().position(|t| *t == "git")?;
    match tokens.get(git_pos + 1).copied() {
        Some("commit") => Some(VcsVerb::Commit),
        Some("push") => Some(VcsVerb::Push),
        Some("merge") => Some(VcsVerb::Merge),
        _ => None,
    }
}

fn targets_protected_branch(command: &str) -> bool {
    command.split_whitespace().any(|t| t == "main" || t == "master")
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(String),
}

/// Evaluate a file-modifying tool call against `forbidden_paths`.
pub fn evaluate_file_operation(descriptor: &IdentityDescriptor, root: &Path, target: &Path) -> Decision {
    let normalized = normalize_relative(root, target);
    if matches_forbidden(&normalized, &descriptor.forbidden_paths) {
        Decision::Block(format!("{normalized} is forbidden for instance {}", descriptor.instance_id))
    } else {
        Decision::Allow
    }
}

/// Evaluate a shell tool call: enforce `branch_prefix` on commit/push and
/// `can_merge` on pushes to `main`/`master` or merges while sitting on
/// `main`/`master` (SPEC_FULL.md §4.7 "Operation gate"). The merge check
/// only inspects the current branch, not the merge command's text — the
/// source's `tool-validator.py` never scans a merge invocation for a
/// `main`/`master` token either, only `current_branch`.
pub fn evaluate_shell_command(
    descriptor: &IdentityDescriptor,
    command: &str,
    current_branch: Option<&str>,
) -> Decision {
    let Some(verb) = detect_vcs_verb(command) else {
        return Decision::Allow;
    };

    let branch_prefix_ok = descriptor.branch_prefix.is_empty()
        || current_branch.is_none_or(|b| b.starts_with(&descriptor.branch_prefix));
    let on_protected_branch = current_branch.is_some_and(|b| b == "main" || b == "master");

    match verb {
        VcsVerb::Commit | VcsVerb::Push if !branch_prefix_ok => Decision::Block(format!(
            "current branch does not start with required prefix '{}'",
            descriptor.branch_prefix
        )),
        VcsVerb::Push if targets_protected_branch(command) && !descriptor.can_merge => {
            Decision::Block("pushing to main/master requires can_merge".to_string())
        }
        VcsVerb::Merge if on_protected_branch && !descriptor.can_merge => {
            Decision::Block("merging into main/master requires can_merge".to_string())
        }
        _ => Decision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn descriptor() -> IdentityDescriptor {
        IdentityDescriptor {
            instance_id: "backend".to_string(),
            branch_prefix: "backend/".to_string(),
            forbidden_paths: vec!["frontend/".to_string(), "*.secrets.toml".to_string()],
            can_merge: false,
        }
    }

    #[test]
    fn finds_nearest_ancestor_with_claude_dir() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join(".claude")).unwrap();
        fs::create_dir_all(td.path().join("nested/deeper")).unwrap();
        let root = find_project_root(&td.path().join("nested/deeper"));
        assert_eq!(root, td.path());
    }

    #[test]
    fn falls_back_to_start_when_no_claude_dir_found() {
        let td = tempdir().unwrap();
        let root = find_project_root(td.path());
        assert_eq!(root, td.path());
    }

    #[test]
    fn missing_identity_file_is_none() {
        let td = tempdir().unwrap();
        assert!(load_identity_descriptor(td.path()).is_none());
    }

    #[test]
    fn loads_valid_identity_file() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join(".claude")).unwrap();
        fs::write(
            td.path().join(IDENTITY_FILE_RELATIVE_PATH),
            r#"{"instance_id":"backend","branch_prefix":"backend/","forbidden_paths":["frontend/"],"can_merge":false}"#,
        )
        .unwrap();
        let descriptor = load_identity_descriptor(td.path()).unwrap().unwrap();
        assert_eq!(descriptor.instance_id, "backend");
    }

    #[test]
    fn directory_prefix_pattern_matches_nested_paths() {
        assert!(matches_forbidden("frontend/src/app.tsx", &["frontend/".to_string()]));
        assert!(matches_forbidden("frontend", &["frontend/".to_string()]));
        assert!(!matches_forbidden("frontend-docs/readme.md", &["frontend/".to_string()]));
    }

    #[test]
    fn glob_pattern_matches_wildcards() {
        assert!(matches_forbidden("prod.secrets.toml", &["*.secrets.toml".to_string()]));
        assert!(!matches_forbidden("prod.secrets.yaml", &["*.secrets.toml".to_string()]));
    }

    #[test]
    fn file_operation_outside_forbidden_paths_is_allowed() {
        let d = descriptor();
        let decision = evaluate_file_operation(&d, Path::new("/repo"), Path::new("/repo/backend/src/main.rs"));
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn file_operation_inside_forbidden_directory_is_blocked() {
        let d = descriptor();
        let decision = evaluate_file_operation(&d, Path::new("/repo"), Path::new("/repo/frontend/src/app.tsx"));
        assert!(matches!(decision, Decision::Block(_)));
    }

    #[test]
    fn commit_on_mismatched_branch_is_blocked() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "git commit -m wip", Some("frontend/whatever"));
        assert!(matches!(decision, Decision::Block(_)));
    }

    #[test]
    fn commit_on_prefixed_branch_is_allowed() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "git commit -m wip", Some("backend/feature-x"));
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn push_to_main_without_can_merge_is_blocked() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "git push origin main", Some("backend/feature-x"));
        assert!(matches!(decision, Decision::Block(_)));
    }

    #[test]
    fn push_to_feature_branch_is_allowed() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "git push origin backend/feature-x", Some("backend/feature-x"));
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn merge_into_main_without_can_merge_is_blocked() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "git merge backend/feature-x", Some("main"));
        assert!(matches!(decision, Decision::Block(_)));
    }

    #[test]
    fn non_vcs_command_is_always_allowed() {
        let d = descriptor();
        let decision = evaluate_shell_command(&d, "cargo test", Some("anything"));
        assert_eq!(decision, Decision::Allow);
    }
}
