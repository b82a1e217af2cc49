//! Built-in Shell Work
//!
//! Runs a bash command as a step, so pipelines can be declared in YAML
//! without writing Rust.
//!
//! Arguments:
//! - `command` (required): the bash command line
//! - `cwd` (optional): working directory for the command
//!
//! The step identity is exported to the command as `STEPWISE_STEP_ID`.

use std::process::Command;

use log::{debug, error};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::workflow::work::{StepContext, Work, WorkResult};

/// Registry name of the shell work.
pub const SHELL_WORK_NAME: &str = "shell";

/// The shell work, shared by every registry built with builtins.
pub static SHELL_WORK: Lazy<Work> =
    Lazy::new(|| Work::new(SHELL_WORK_NAME, run_shell).needs_step_id());

fn run_shell(ctx: &mut StepContext<'_>) -> WorkResult {
    let command = ctx
        .arg("command")
        .and_then(Value::as_str)
        .ok_or("shell work requires a string 'command' argument")?;

    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);

    if let Some(dir) = ctx.arg("cwd").and_then(Value::as_str) {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir);
    }
    if let Some(id) = ctx.step_id() {
        cmd.env("STEPWISE_STEP_ID", id);
    }

    let output = cmd.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

    let status = if output.status.success() {
        "success"
    } else {
        error!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            command
        );
        "error"
    };

    Ok(json!({
        "status": status,
        "exit_code": output.status.code(),
        "stdout": stdout,
        "stderr": stderr,
    }))
}
