//! Worker process management

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use longday_core::worker::WorkerId;

use crate::channel::{CHANNEL_ADDR_ENV, CHANNEL_TOKEN_ENV};
use crate::error::{HostError, Result};

/// Environment variable carrying the application root
pub const APP_ROOT_ENV: &str = "LONGDAY_APP_ROOT";
/// Environment variable carrying the worker's own id
pub const WORKER_ID_ENV: &str = "LONGDAY_WORKER_ID";

/// Interpreter used to launch artifacts that aren't executables themselves
///
/// The artifact path is appended after `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl RunnerConfig {
    /// Parse a runner from a whitespace-separated command line
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }
}

/// Everything needed to launch one worker
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub worker_id: WorkerId,
    /// The materialized artifact copy to execute
    pub program: PathBuf,
    pub runner: Option<RunnerConfig>,
    pub app_root: PathBuf,
    pub channel_addr: SocketAddr,
    pub channel_token: String,
}

impl WorkerLaunch {
    fn command(&self) -> Command {
        let mut cmd = match &self.runner {
            Some(runner) => {
                let mut c = Command::new(&runner.command);
                c.args(&runner.args).arg(&self.program);
                c
            }
            None => Command::new(&self.program),
        };

        cmd.current_dir(&self.app_root)
            .env(CHANNEL_ADDR_ENV, self.channel_addr.to_string())
            .env(CHANNEL_TOKEN_ENV, &self.channel_token)
            .env(APP_ROOT_ENV, &self.app_root)
            .env(WORKER_ID_ENV, self.worker_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// A running worker process with its output loggers attached
pub struct WorkerProcess {
    worker_id: WorkerId,
    child: Child,
    pid: Option<u32>,
    stdout_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl WorkerProcess {
    /// Spawn the worker and start forwarding its output to the log
    pub fn spawn(launch: &WorkerLaunch) -> Result<Self> {
        info!(
            worker_id = %launch.worker_id,
            "Spawning worker {:?} in {:?}",
            launch.program,
            launch.app_root
        );

        let mut child = launch.command().spawn().map_err(|e| {
            HostError::spawn_failed_with_source(
                format!("Failed to spawn {}: {}", display_program(launch), e),
                e,
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::spawn_failed("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HostError::spawn_failed("Failed to capture stderr"))?;

        let worker_id = launch.worker_id;
        let stdout_handle = tokio::spawn(log_lines(worker_id, stdout, OutputStream::Stdout));
        let stderr_handle = tokio::spawn(log_lines(worker_id, stderr, OutputStream::Stderr));

        Ok(Self {
            worker_id,
            pid: child.id(),
            child,
            stdout_handle,
            stderr_handle,
        })
    }

    /// OS process id, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the OS to kill the process without waiting
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(worker_id = %self.worker_id, "Kill request failed: {}", e);
        }
    }

    /// Wait for the process to exit
    ///
    /// Returns the exit code, or -1 when the process was ended by a signal.
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Wait for both output loggers to drain
    pub async fn finish_output(self) {
        let _ = self.stdout_handle.await;
        let _ = self.stderr_handle.await;
    }
}

fn display_program(launch: &WorkerLaunch) -> String {
    match &launch.runner {
        Some(runner) => format!("{} {}", runner.command, launch.program.display()),
        None => launch.program.display().to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn log_lines<R>(worker_id: WorkerId, reader: R, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => info!(worker_id = %worker_id, "{}", line),
                OutputStream::Stderr => warn!(worker_id = %worker_id, "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(worker_id = %worker_id, "Output reader stopped: {}", e);
                break;
            }
        }
    }
}
