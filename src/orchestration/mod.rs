//! Orchestration module for container runtimes
//!
//! Provides the daemon boundary used by local images, cache volumes and
//! lifecycle phase containers:
//! - Docker CLI (default)
//! - Podman CLI (rootful or rootless)

mod cli_runtime;
pub mod container;
mod factory;
mod runtime;
#[cfg(test)]
pub mod testing;

pub use cli_runtime::{CliRuntime, RuntimeKind};
pub use container::{ContainerSpec, ImageInspect, Mount, VolumeInfo};
pub use factory::{create_runtime, default_socket};
pub use runtime::ContainerRuntime;

use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in phase error messages.
const PHASE_ERROR_TAIL_LINES: usize = 50;

/// The most recent lines of phase output, kept for error diagnostics.
///
/// Holds at most `PHASE_ERROR_TAIL_LINES` lines so error messages are
/// actionable without being overwhelming, however long the phase runs.
#[derive(Debug, Default)]
pub(crate) struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    pub(crate) fn push(&mut self, line: String) {
        if self.lines.len() == PHASE_ERROR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Lines are not retained here; callers keep whatever they need.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) {
    let (Some(stderr), Some(stdout)) = (child.stderr.take(), child.stdout.take()) else {
        return;
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => on_output(line),
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => on_output(line),
                    _ => stdout_done = true,
                }
            }
        }
    }
}
