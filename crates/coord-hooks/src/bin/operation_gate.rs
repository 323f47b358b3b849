//! Operation gate (SPEC_FULL.md §4.7): runs before a pending file or shell
//! operation. Reads `{tool_name, tool_input}` from stdin. Exits 0 to
//! allow, 2 to block (reason on stderr).

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use coord_hooks::{current_branch, evaluate_file_operation, evaluate_shell_command, find_project_root, load_identity_descriptor, Decision};
use serde_json::Value;

fn main() -> ExitCode {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("operation-gate: failed to read stdin");
        return ExitCode::from(2);
    }
    let request: Value = match serde_json::from_str(&input) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("operation-gate: malformed request: {err}");
            return ExitCode::from(2);
        }
    };

    let cwd = std::env::current_dir().unwrap_or_default();
    let root = find_project_root(&cwd);

    let descriptor = match load_identity_descriptor(&root) {
        None => return ExitCode::SUCCESS,
        Some(Err(err)) => {
            eprintln!("operation-gate: {err}");
            return ExitCode::from(2);
        }
        Some(Ok(descriptor)) => descriptor,
    };

    let tool_input = request.get("tool_input").cloned().unwrap_or(Value::Null);

    let decision = if let Some(path) = tool_input.get("file_path").and_then(Value::as_str) {
        evaluate_file_operation(&descriptor, &root, &PathBuf::from(path))
    } else if let Some(command) = tool_input.get("command").and_then(Value::as_str) {
        let branch = current_branch(&root);
        evaluate_shell_command(&descriptor, command, branch.as_deref())
    } else {
        Decision::Allow
    };

    match decision {
        Decision::Allow => ExitCode::SUCCESS,
        Decision::Block(reason) => {
            eprintln!("{reason}");
            ExitCode::from(2)
        }
    }
}
