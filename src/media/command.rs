//! Thin wrapper around `tokio::process::Command` for the external media tools.

use std::{
    ffi::OsStr,
    io,
    process::{Output, Stdio},
    time::Instant,
};
use tokio::process::Command;

/// Run `program` with `args` to completion, capturing stdout and stderr.
///
/// The child is killed if the returned future is dropped, so an abandoned
/// request never leaves a probe or remux process behind.
pub async fn run_tool<I, S>(program: &str, args: I) -> io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    tracing::debug!(
        program,
        status = %output.status,
        duration_ms = start.elapsed().as_millis() as u64,
        "external tool finished"
    );

    Ok(output)
}

/// Lossy, trimmed stderr for logging.
pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
