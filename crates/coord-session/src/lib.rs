//! # coord-session
//!
//! Shared logic behind the `start-agent-session` and `teardown-agent`
//! binaries (SPEC_FULL.md §4.8). Both read and write the same identity
//! descriptor the gate hooks in [`coord_hooks`] enforce against.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use coord_hooks::IDENTITY_FILE_RELATIVE_PATH;

pub const RECOGNIZED_ROLES: &[&str] = &["backend", "frontend", "orchestrator", "devops", "pm"];

pub fn validate_role(role: &str) -> Result<()> {
    if RECOGNIZED_ROLES.contains(&role) {
        Ok(())
    } else {
        bail!(
            "invalid role '{role}': expected one of {}",
            RECOGNIZED_ROLES.join(", ")
        )
    }
}

fn git_program() -> String {
    std::env::var("COORD_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(git_program())
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Where the role's worktree lives, as a sibling of the main checkout.
pub fn worktree_path(repo_root: &Path, role: &str) -> PathBuf {
    repo_root
        .parent()
        .unwrap_or(repo_root)
        .join(format!("{}-{role}", repo_root.file_name().and_then(|n| n.to_str()).unwrap_or("repo")))
}

/// Create the worktree if absent, or confirm it's already attached on the
/// expected branch if present (SPEC_FULL.md §4.8 "creates or re-attaches").
pub fn ensure_worktree(repo_root: &Path, role: &str) -> Result<PathBuf> {
    let branch = format!("{role}/session");
    let path = worktree_path(repo_root, role);

    if path.is_dir() {
        return Ok(path);
    }

    run_git(
        repo_root,
        &["worktree", "add", "-B", &branch, path.to_str().unwrap_or_default()],
    )
    .with_context(|| format!("failed to create worktree for role '{role}'"))?;
    Ok(path)
}

pub fn configure_author(worktree: &Path, role: &str) -> Result<()> {
    run_git(worktree, &["config", "user.email", &format!("claude-{role}@asdlc.local")])?;
    Ok(())
}

/// Write `.claude/instance-identity.json`, the descriptor the gate hooks
/// consult.
pub fn write_identity_descriptor(worktree: &Path, role: &str) -> Result<()> {
    let claude_dir = worktree.join(".claude");
    std::fs::create_dir_all(&claude_dir).context("failed to create .claude directory")?;
    let descriptor = serde_json::json!({
        "instance_id": role,
        "branch_prefix": format!("{role}/"),
        "forbidden_paths": [],
        "can_merge": false,
    });
    std::fs::write(
        worktree.join(IDENTITY_FILE_RELATIVE_PATH),
        serde_json::to_string_pretty(&descriptor)?,
    )
    .context("failed to write instance-identity.json")?;
    Ok(())
}

pub fn repo_root(cwd: &Path) -> Result<PathBuf> {
    run_git(cwd, &["rev-parse", "--show-toplevel"]).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init"]).current_dir(dir).output().unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()
            .unwrap();
        std::fs::write(dir.join("README.md"), "# test\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    #[test]
    fn validate_role_accepts_recognized_roles() {
        for role in RECOGNIZED_ROLES {
            assert!(validate_role(role).is_ok());
        }
    }

    #[test]
    fn validate_role_rejects_unknown_role() {
        let err = validate_role("invalid_role_xyz").unwrap_err();
        assert!(err.to_string().contains("backend"));
    }

    #[test]
    fn write_identity_descriptor_round_trips() {
        let td = tempdir().unwrap();
        write_identity_descriptor(td.path(), "backend").unwrap();
        let descriptor = coord_hooks::load_identity_descriptor(td.path()).unwrap().unwrap();
        assert_eq!(descriptor.instance_id, "backend");
        assert_eq!(descriptor.branch_prefix, "backend/");
        assert!(!descriptor.can_merge);
    }

    #[test]
    fn ensure_worktree_creates_new_worktree_once() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        let first = ensure_worktree(td.path(), "backend").unwrap();
        assert!(first.is_dir());
        let second = ensure_worktree(td.path(), "backend").unwrap();
        assert_eq!(first, second, "re-attaching must not create a second worktree");
    }
}
