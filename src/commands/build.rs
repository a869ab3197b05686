//! Module build step
//!
//! Runs the configured build command (by default `cargo build --release -p
//! sine-plugin`) before a reload, streaming its output into the log.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::BuildConfig;

/// Lines of compiler output kept for the failure message
const ERROR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed ({status}):\n{output}")]
    Failed { status: ExitStatus, output: String },

    #[error("build timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl From<&BuildConfig> for BuildStep {
    fn from(config: &BuildConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl BuildStep {
    /// Run the build to completion. The child is killed if the timeout
    /// expires or the future is dropped.
    pub async fn run(&self) -> Result<(), BuildError> {
        log::info!("Building module: {} {}", self.program, self.args.join(" "));
        let started = Instant::now();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| BuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let build = async move {
            let output = collect_output(stdout, stderr).await;
            let status = child.wait().await;
            (status, output)
        };

        let (status, output) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, build).await {
                Ok(result) => result,
                Err(_) => {
                    log::error!("Module build timed out after {:?}", limit);
                    return Err(BuildError::TimedOut(limit));
                }
            },
            None => build.await,
        };

        let status = status.map_err(|source| BuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if status.success() {
            log::info!("Module build finished in {:.1?}", started.elapsed());
            Ok(())
        } else {
            log::error!("Module build failed ({})", status);
            Err(BuildError::Failed { status, output })
        }
    }
}

/// Read stdout and stderr concurrently until both close. Every line goes to
/// the debug log; the last few stderr lines are returned for error reports.
async fn collect_output(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) -> String {
    let mut stdout_reader = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_reader = stderr.map(|s| BufReader::new(s).lines());
    let mut tail: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            line = next_line(&mut stdout_reader), if stdout_reader.is_some() => {
                match line {
                    Some(text) => log::debug!("[build] {}", text),
                    None => stdout_reader = None,
                }
            }
            line = next_line(&mut stderr_reader), if stderr_reader.is_some() => {
                match line {
                    Some(text) => {
                        // cargo reports progress and errors on stderr
                        log::debug!("[build] {}", text);
                        if tail.len() == ERROR_TAIL_LINES {
                            tail.remove(0);
                        }
                        tail.push(text);
                    }
                    None => stderr_reader = None,
                }
            }
            else => break,
        }
    }

    tail.join("\n")
}

async fn next_line<R>(reader: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}
