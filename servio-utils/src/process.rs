use servio_core::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// The outcome of a subprocess that is allowed to fail.
#[derive(Debug)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    /// stdout followed by stderr, the way an operator would read it.
    pub combined: String,
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}{stderr}")
    }
}

/// Runs a command to completion, never erroring: spawn failures and
/// non-zero exits both come back as `success: false`.
///
/// The child is tied to the caller via `kill_on_drop`, so cancelling the
/// surrounding future terminates it.
pub async fn run(program: &str, args: &[&str]) -> CmdOutput {
    debug!(command = %render(program, args), "running subprocess");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();
            CmdOutput {
                success: out.status.success(),
                combined: combine(&stdout, &stderr),
                stdout,
            }
        }
        Err(e) => CmdOutput {
            success: false,
            stdout: String::new(),
            combined: e.to_string(),
        },
    }
}

/// Runs a command and treats any failure as an error carrying the
/// combined stdout+stderr of the child.
pub async fn run_checked(program: &str, args: &[&str]) -> Result<String> {
    let out = run(program, args).await;
    if out.success {
        Ok(out.combined)
    } else {
        Err(Error::subprocess(render(program, args), out.combined))
    }
}
