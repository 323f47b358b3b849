//! Prompt gate (SPEC_FULL.md §4.7): runs before a new prompt is accepted.
//! Always exits 0; the decision is carried in the JSON printed to stdout.

use std::process::ExitCode;

use coord_hooks::{current_branch, find_project_root, load_identity_descriptor};
use serde_json::json;

fn main() -> ExitCode {
    let cwd = std::env::current_dir().unwrap_or_default();
    let root = find_project_root(&cwd);

    let descriptor = match load_identity_descriptor(&root) {
        None => {
            print_decision(&json!({
                "decision": "block",
                "reason": "missing .claude/instance-identity.json; run the session launcher first",
            }));
            return ExitCode::SUCCESS;
        }
        Some(Err(err)) => {
            print_decision(&json!({"decision": "block", "reason": err}));
            return ExitCode::SUCCESS;
        }
        Some(Ok(descriptor)) => descriptor,
    };

    if !descriptor.branch_prefix.is_empty() {
        match current_branch(&root) {
            None => {}
            Some(branch) if branch.starts_with(&descriptor.branch_prefix) => {}
            Some(branch) => {
                print_decision(&json!({
                    "decision": "block",
                    "reason": format!(
                        "current branch '{branch}' does not start with required prefix '{}'",
                        descriptor.branch_prefix
                    ),
                }));
                return ExitCode::SUCCESS;
            }
        }
    }

    print_decision(&json!({"decision": "allow"}));
    ExitCode::SUCCESS
}

fn print_decision(value: &serde_json::Value) {
    println!("{value}");
}
