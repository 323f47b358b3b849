//! `start-agent-session <role>` (SPEC_FULL.md §4.8): creates or re-attaches
//! a branch-named worktree, configures its git author, writes the
//! identity descriptor, and prints the `CLAUDE_INSTANCE_ID` export the
//! caller's shell still needs to run. It does not spawn the tool host.

use std::process::ExitCode;

use clap::Parser;
use coord_session::{RECOGNIZED_ROLES, configure_author, ensure_worktree, repo_root, validate_role, write_identity_descriptor};

/// Prepare a worktree and identity descriptor for an agent session.
#[derive(Parser, Debug)]
#[command(name = "start-agent-session", version)]
#[command(after_help = format_after_help())]
struct Cli {
    /// Session role: backend, frontend, orchestrator, devops, or pm.
    /// Determines the worktree, branch prefix, and git author used for
    /// this session's commits.
    role: String,
}

fn format_after_help() -> String {
    format!(
        "Valid roles: {}\n\n\
         After this script finishes, export CLAUDE_INSTANCE_ID=<role> in your shell\n\
         so the tool host and gate hooks resolve the same identity this worktree was\n\
         configured for.",
        RECOGNIZED_ROLES.join(", ")
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = validate_role(&cli.role) {
        eprintln!("start-agent-session: {err}");
        return ExitCode::from(2);
    }

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("start-agent-session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let root = match repo_root(&cwd) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("start-agent-session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let worktree = match ensure_worktree(&root, &cli.role) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("start-agent-session: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = configure_author(&worktree, &cli.role) {
        eprintln!("start-agent-session: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = write_identity_descriptor(&worktree, &cli.role) {
        eprintln!("start-agent-session: {err}");
        return ExitCode::FAILURE;
    }

    println!("Worktree ready at {}", worktree.display());
    println!("Next steps:");
    println!("  cd {}", worktree.display());
    println!("  export CLAUDE_INSTANCE_ID={}", cli.role);
    println!("  coord-host   # start the tool host from this worktree");
    ExitCode::SUCCESS
}
