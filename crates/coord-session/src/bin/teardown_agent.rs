//! `teardown-agent <role> [--abandon]` (SPEC_FULL.md §4.8): removes a
//! worktree, best-effort publishes `SESSION_END`, then calls
//! `deregister_presence`. Datastore unavailability downgrades every
//! coordination step to a warning; the worktree is still removed.

use std::process::{Command, ExitCode};

use clap::Parser;
use coord_broker::BrokerClient;
use coord_core::Config;
use coord_core::types::{BROADCAST_TARGET, MessageType};
use coord_session::{RECOGNIZED_ROLES, repo_root, validate_role, worktree_path};

/// Remove an agent session's worktree and deregister it from the broker.
#[derive(Parser, Debug)]
#[command(name = "teardown-agent", version)]
#[command(after_help = format!("Valid roles: {}", RECOGNIZED_ROLES.join(", ")))]
struct Cli {
    /// Session role whose worktree should be removed.
    role: String,

    /// Force removal even if the worktree has uncommitted changes.
    #[arg(long)]
    abandon: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = validate_role(&cli.role) {
        eprintln!("teardown-agent: {err}");
        return ExitCode::from(2);
    }

    best_effort_session_end(&cli.role).await;

    let cwd = std::env::current_dir().unwrap_or_default();
    let root = match repo_root(&cwd) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("teardown-agent: {err}");
            return ExitCode::FAILURE;
        }
    };
    let path = worktree_path(&root, &cli.role);

    let mut args = vec!["worktree", "remove"];
    if cli.abandon {
        args.push("--force");
    }
    let path_str = path.to_string_lossy().to_string();
    args.push(&path_str);

    let output = Command::new(std::env::var("COORD_GIT_BIN").unwrap_or_else(|_| "git".to_string()))
        .args(&args)
        .current_dir(&root)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            println!("removed worktree {}", path.display());
            ExitCode::SUCCESS
        }
        Ok(output) => {
            eprintln!(
                "teardown-agent: failed to remove worktree: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("teardown-agent: failed to run git: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Publish `SESSION_END` and deregister presence. Any datastore failure is
/// a warning, never fatal — teardown must still remove the worktree.
async fn best_effort_session_end(role: &str) {
    let config = Config::from_env();
    let store = match coord_redis::RedisStore::connect(&config.redis_url()).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("teardown-agent: coordination datastore not available, skipping SESSION_END: {err}");
            return;
        }
    };
    let broker = BrokerClient::new(std::sync::Arc::new(store), config, role);

    if let Err(err) = broker
        .publish(
            MessageType::StatusUpdate,
            "session_end",
            &format!("{role} session ending"),
            role,
            BROADCAST_TARGET,
            false,
        )
        .await
    {
        eprintln!("teardown-agent: warning: failed to publish SESSION_END: {err}");
    }

    if let Err(err) = broker.unregister(role).await {
        eprintln!("teardown-agent: warning: failed to deregister presence: {err}");
    }
}
