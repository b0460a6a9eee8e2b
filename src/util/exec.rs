use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::server::error::Error;

/// Captured output of an external tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Run an external tool with a wall-clock cap.
///
/// A non-zero exit is not an error here: callers such as the port-scanner
/// driver must still see whatever partial output the tool wrote. A missing
/// binary maps to [`Error::ToolMissing`]; hitting the cap kills the child
/// and maps to [`Error::Transport`].
pub async fn run_tool(program: &str, args: &[&str], cap: Duration) -> Result<ToolOutput, Error> {
    tracing::debug!("exec: {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolMissing(program.to_string())
            } else {
                Error::Transport(format!("failed to spawn {}: {}", program, e))
            }
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let collect = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut stdout).await.ok();
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(&mut stderr).await.ok();
        }
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    match timeout(cap, collect).await {
        Ok((stdout, stderr, status)) => {
            let success = status.map(|s| s.success()).unwrap_or(false);
            Ok(ToolOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                success,
            })
        }
        Err(_) => Err(Error::Transport(format!(
            "{} exceeded {}s wall-clock cap",
            program,
            cap.as_secs()
        ))),
    }
}
