//! # coord-identity
//!
//! Resolves the caller's instance identity exactly once at process start,
//! with the strict, fail-closed precedence SPEC_FULL.md §4.5 describes:
//!
//! 1. `CLAUDE_INSTANCE_ID` env var, if set and neither empty nor `unknown`.
//! 2. Otherwise, ask git for the worktree kind. A linked worktree without
//!    the variable set fails hard.
//! 3. In the main checkout, fall back to the configured git author email,
//!    matched against the `claude-<role>@asdlc.local` pattern.
//!
//! Every failure path produces one error naming both the cause and the
//! remediation; this resolver never returns an empty string or `"unknown"`.

use std::env;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Recognized roles for the git-email fallback (§4.5 step 3).
pub const RECOGNIZED_ROLES: &[&str] = &["backend", "frontend", "orchestrator", "devops", "pm"];

/// Per-subprocess timeout for identity-resolution git calls (§4.5 "Identity
/// resolution has a per-subprocess timeout"). A hung credential-helper
/// prompt must fail resolution, not hang it.
const GIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(
        "linked worktree detected but CLAUDE_INSTANCE_ID is unset; set CLAUDE_INSTANCE_ID to this worktree's role"
    )]
    WorktreeWithoutInstanceId,

    #[error(
        "git user.email '{email}' does not match a recognized claude-<role>@asdlc.local pattern; \
         set CLAUDE_INSTANCE_ID or configure git user.email to one of: {}",
        RECOGNIZED_ROLES.join(", ")
    )]
    UnrecognizedGitEmail { email: String },

    #[error("git user.email is not configured; set CLAUDE_INSTANCE_ID or run `git config user.email claude-<role>@asdlc.local`")]
    MissingGitEmail,

    #[error("not inside a git repository and CLAUDE_INSTANCE_ID is unset")]
    NotAGitRepository,

    #[error("failed to run git: {0}")]
    GitCommandFailed(String),

    #[error("git {0} timed out after {GIT_TIMEOUT:?}")]
    GitCommandTimedOut(String),
}

/// `git rev-parse`/`git config` through a thin wrapper honoring a
/// `SHIPPER_GIT_BIN`-style override, the same pattern the teacher's own
/// git integration uses for test mocking.
fn git_program() -> String {
    env::var("COORD_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).trim().to_string()
}

/// Spawn `git <args>` and poll it with [`Command::try_wait`] instead of the
/// blocking `output()`, so a hung process (e.g. a credential-helper prompt)
/// is killed at [`GIT_TIMEOUT`] rather than hanging identity resolution
/// forever.
fn run_git(dir: &Path, args: &[&str]) -> Result<String, IdentityError> {
    let mut child = Command::new(git_program())
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| IdentityError::GitCommandFailed(e.to_string()))?;

    let deadline = Instant::now() + GIT_TIMEOUT;
    loop {
        match child.try_wait().map_err(|e| IdentityError::GitCommandFailed(e.to_string()))? {
            Some(status) => {
                let stdout = read_pipe(child.stdout.take());
                let stderr = read_pipe(child.stderr.take());
                return if status.success() {
                    Ok(stdout)
                } else {
                    Err(IdentityError::GitCommandFailed(stderr))
                };
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(IdentityError::GitCommandTimedOut(args.join(" ")));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// True if `dir`/.git is a file (linked worktree) rather than a directory
/// (main checkout).
fn is_linked_worktree(repo_root: &Path) -> bool {
    repo_root.join(".git").is_file()
}

fn repo_root(cwd: &Path) -> Result<std::path::PathBuf, IdentityError> {
    run_git(cwd, &["rev-parse", "--show-toplevel"])
        .map(std::path::PathBuf::from)
        .map_err(|_| IdentityError::NotAGitRepository)
}

fn configured_author_email(repo_root: &Path) -> Result<String, IdentityError> {
    let email = run_git(repo_root, &["config", "user.email"]).map_err(|_| IdentityError::MissingGitEmail)?;
    if email.is_empty() {
        return Err(IdentityError::MissingGitEmail);
    }
    Ok(email)
}

/// Extracts `role` from `claude-<role>@asdlc.local`, rejecting anything
/// that doesn't match one of [`RECOGNIZED_ROLES`].
fn role_from_email(email: &str) -> Option<&'static str> {
    let local = email.strip_suffix("@asdlc.local")?;
    let role = local.strip_prefix("claude-")?;
    RECOGNIZED_ROLES.iter().copied().find(|r| *r == role)
}

/// Resolve the caller's instance identity. `cwd` is the directory to run
/// git plumbing from; callers pass [`std::env::current_dir`] in production
/// and a fixture directory in tests.
pub fn resolve_instance_id(cwd: &Path) -> Result<String, IdentityError> {
    if let Ok(raw) = env::var("CLAUDE_INSTANCE_ID") {
        if !raw.is_empty() && raw != "unknown" {
            return Ok(raw);
        }
    }

    let root = repo_root(cwd)?;
    if is_linked_worktree(&root) {
        return Err(IdentityError::WorktreeWithoutInstanceId);
    }

    let email = configured_author_email(&root)?;
    match role_from_email(&email) {
        Some(role) => Ok(role.to_string()),
        None => Err(IdentityError::UnrecognizedGitEmail { email }),
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    struct EnvGuard {
        vars: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            let vars = pairs
                .iter()
                .map(|(k, v)| {
                    let prev = env::var(k).ok();
                    unsafe { env::set_var(k, v) };
                    (*k, prev)
                })
                .collect();
            EnvGuard { vars }
        }

        fn unset(keys: &[&'static str]) -> Self {
            let vars = keys
                .iter()
                .map(|k| {
                    let prev = env::var(k).ok();
                    unsafe { env::remove_var(k) };
                    (*k, prev)
                })
                .collect();
            EnvGuard { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, prev) in &self.vars {
                match prev {
                    Some(v) => unsafe { env::set_var(k, v) },
                    None => unsafe { env::remove_var(k) },
                }
            }
        }
    }

    fn init_repo(dir: &Path, email: &str) {
        Command::new("git").args(["init"]).current_dir(dir).output().expect("git init");
        Command::new("git")
            .args(["config", "user.email", email])
            .current_dir(dir)
            .output()
            .expect("git config email");
        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()
            .expect("git config name");
    }

    #[test]
    #[serial]
    fn env_var_takes_precedence_over_git() {
        let _guard = EnvGuard::set(&[("CLAUDE_INSTANCE_ID", "backend")]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "someone@example.com");
        assert_eq!(resolve_instance_id(td.path()).unwrap(), "backend");
    }

    #[test]
    #[serial]
    fn empty_env_var_falls_through_to_git() {
        let _guard = EnvGuard::set(&[("CLAUDE_INSTANCE_ID", "")]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "claude-frontend@asdlc.local");
        assert_eq!(resolve_instance_id(td.path()).unwrap(), "frontend");
    }

    #[test]
    #[serial]
    fn literal_unknown_env_var_falls_through_to_git() {
        let _guard = EnvGuard::set(&[("CLAUDE_INSTANCE_ID", "unknown")]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "claude-devops@asdlc.local");
        assert_eq!(resolve_instance_id(td.path()).unwrap(), "devops");
    }

    #[test]
    #[serial]
    fn recognized_git_email_resolves_role() {
        let _guard = EnvGuard::unset(&["CLAUDE_INSTANCE_ID"]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "claude-orchestrator@asdlc.local");
        assert_eq!(resolve_instance_id(td.path()).unwrap(), "orchestrator");
    }

    #[test]
    #[serial]
    fn unrecognized_git_email_fails_closed() {
        let _guard = EnvGuard::unset(&["CLAUDE_INSTANCE_ID"]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "someone@example.com");
        let err = resolve_instance_id(td.path()).unwrap_err();
        assert!(matches!(err, IdentityError::UnrecognizedGitEmail { .. }));
    }

    #[test]
    #[serial]
    fn linked_worktree_without_instance_id_fails_hard() {
        let _guard = EnvGuard::unset(&["CLAUDE_INSTANCE_ID"]);
        let td = tempdir().unwrap();
        init_repo(td.path(), "claude-backend@asdlc.local");
        // Simulate a linked worktree: .git is a file, not a directory.
        let git_dir = td.path().join(".git");
        fs::remove_dir_all(&git_dir).unwrap();
        fs::write(&git_dir, "gitdir: /elsewhere/.git/worktrees/x").unwrap();
        let err = resolve_instance_id(td.path());
        assert!(err.is_err());
    }

    #[test]
    #[serial]
    fn non_repository_without_instance_id_fails() {
        let _guard = EnvGuard::unset(&["CLAUDE_INSTANCE_ID"]);
        let td = tempdir().unwrap();
        let err = resolve_instance_id(td.path()).unwrap_err();
        assert!(matches!(err, IdentityError::NotAGitRepository));
    }

    #[test]
    fn role_from_email_rejects_unknown_roles() {
        assert_eq!(role_from_email("claude-backend@asdlc.local"), Some("backend"));
        assert_eq!(role_from_email("claude-intern@asdlc.local"), None);
        assert_eq!(role_from_email("backend@asdlc.local"), None);
        assert_eq!(role_from_email("claude-backend@example.com"), None);
    }
}
