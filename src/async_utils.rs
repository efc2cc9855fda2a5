//! Asynchronous utilities for use with Tokio.

use anyhow::anyhow;
use tokio::{fs::File, io::AsyncWrite};

use crate::prelude::*;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics
/// from the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        // Propagate any panics from the blocking task.
        .unwrap()
}

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged either way. When
/// `is_error_line` is supplied, a command that exited successfully is still
/// treated as failed if any line of its standard error matches.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    is_error_line: Option<fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
        debug!(
            command_name = command_name,
            output = %stdout,
            "Standard output from command",
        );
    }
    if !stderr.is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && let Some(line) = stderr.lines().find(|line| is_error_line(line))
        {
            return Err(anyhow!("{command_name} reported an error: {line}"));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{command_name} failed with exit code {exit_code} and error output:\n{stderr}"
        ))
    } else {
        Err(anyhow!(
            "{command_name} failed with error output:\n{stderr}"
        ))
    }
}

/// Create an [`AsyncWrite`] for the specified path, or for standard output
/// if no path is given.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Send + Sync + Unpin + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create file at path: {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}
