//! Spawns the engine binary and babysits it for the life of the app.
//!
//! `start` blocks until the engine's embedded HTTP server reports itself
//! ready on stdout. Until that marker is seen, stdout is inspected line by
//! line (while still being copied to the log sink); afterwards both pipes
//! are forwarded verbatim. `stop` delivers SIGINT and joins on all three
//! termination signals before declaring the engine stopped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::api::auth::Credential;
use crate::config::{self, CorePaths};
use crate::error::{CoredeckError, Result};

use super::join::ShutdownJoin;
use super::port::{self, CANDIDATE_PORTS};

/// Both substrings must appear on one stdout line before the engine is
/// considered up. Case-sensitive, matches the engine's own startup log.
const READY_MARKERS: (&str, &str) = ("http-server", "Running");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// What the client layer needs to reach the engine: the chosen port and a
/// credential (durable token when one was saved, otherwise the generated
/// one-time secret).
#[derive(Debug, Clone)]
pub struct HandoffPayload {
    pub api_port: u16,
    pub credential: Credential,
}

struct RunningCore {
    pid: u32,
    join: ShutdownJoin,
}

pub struct CoreSupervisor {
    paths: CorePaths,
    candidate_ports: Vec<u16>,
    state: Mutex<EngineState>,
    port: Mutex<Option<u16>>,
    admin_otp: String,
    admin_token: Mutex<Option<String>>,
    running: Mutex<Option<RunningCore>>,
}

impl CoreSupervisor {
    pub fn new(paths: CorePaths) -> Self {
        Self::with_ports(paths, CANDIDATE_PORTS.to_vec())
    }

    pub fn with_ports(paths: CorePaths, candidate_ports: Vec<u16>) -> Self {
        Self {
            paths,
            candidate_ports,
            state: Mutex::new(EngineState::NotStarted),
            port: Mutex::new(None),
            admin_otp: Uuid::new_v4().simple().to_string(),
            admin_token: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Launch the engine and wait for its readiness marker.
    ///
    /// Single shot: if the process dies before the marker appears, this
    /// fails naming the exit status and the log location, and no retry is
    /// attempted. Returns the selected API port.
    pub async fn start(&self) -> Result<u16> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::NotStarted {
                return Err(CoredeckError::InvalidState("engine already started"));
            }
            *state = EngineState::Starting;
        }

        match self.launch().await {
            Ok(port) => {
                *self.state.lock() = EngineState::Running;
                tracing::info!(port, "core engine ready");
                Ok(port)
            }
            Err(e) => {
                *self.state.lock() = EngineState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<u16> {
        let api_port = port::pick_port(&self.candidate_ports)?;
        *self.port.lock() = Some(api_port);

        if let Some(parent) = self.paths.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = self.paths.out_log.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        config::write_config(&self.paths, api_port, &self.admin_otp).await?;

        let mut out_sink = open_sink(&self.paths.out_log).await?;
        let err_sink = Arc::new(tokio::sync::Mutex::new(open_sink(&self.paths.err_log).await?));

        tracing::info!(bin = %self.paths.core_bin.display(), "spawning core engine");
        let mut child = Command::new(&self.paths.core_bin)
            .arg("-c")
            .arg(&self.paths.config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or(CoredeckError::InvalidState("engine stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(CoredeckError::InvalidState("engine stderr not captured"))?;

        let join = ShutdownJoin::new(3);

        // stderr goes straight to its sink from the first byte
        {
            let join = join.clone();
            let err_sink = Arc::clone(&err_sink);
            tokio::spawn(async move {
                let mut stderr = stderr;
                let mut buf = [0u8; 8192];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut sink = err_sink.lock().await;
                            let _ = sink.write_all(&buf[..n]).await;
                        }
                    }
                }
                let _ = err_sink.lock().await.flush().await;
                join.signal("stderr closed");
            });
        }

        // hold stdout back from plain forwarding until the marker shows up
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await? {
                Some(line) => {
                    out_sink.write_all(line.as_bytes()).await?;
                    out_sink.write_all(b"\n").await?;
                    if line.contains(READY_MARKERS.0) && line.contains(READY_MARKERS.1) {
                        break;
                    }
                }
                None => {
                    // stdout closed with no marker: the engine died on boot
                    let status = child.wait().await?;
                    let _ = out_sink.flush().await;
                    return Err(CoredeckError::CoreExited {
                        status: describe_status(&status),
                        log_path: self.paths.out_log.clone(),
                    });
                }
            }
        }

        let pid = child
            .id()
            .ok_or(CoredeckError::InvalidState("engine exited during startup"))?;

        // forward the remainder of stdout for the life of the process
        {
            let join = join.clone();
            let mut reader = lines.into_inner();
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = out_sink.write_all(&buf[..n]).await;
                        }
                    }
                }
                let _ = out_sink.flush().await;
                join.signal("stdout closed");
            });
        }

        // exit watcher: records the status whether the engine crashes or
        // leaves gracefully
        {
            let join = join.clone();
            let err_sink = Arc::clone(&err_sink);
            tokio::spawn(async move {
                let note = match child.wait().await {
                    Ok(status) => format!("Core exited with {}\n", describe_status(&status)),
                    Err(e) => format!("Core wait failed: {e}\n"),
                };
                {
                    let mut sink = err_sink.lock().await;
                    let _ = sink.write_all(note.as_bytes()).await;
                    let _ = sink.flush().await;
                }
                join.signal("process exited");
            });
        }

        *self.running.lock() = Some(RunningCore { pid, join });
        Ok(api_port)
    }

    /// Graceful shutdown: SIGINT, then wait for process exit and both pipe
    /// EOFs. No-op when the engine was never started or already stopped.
    pub async fn stop(&self) -> Result<()> {
        let running = {
            let mut state = self.state.lock();
            if *state != EngineState::Running {
                tracing::debug!(state = ?*state, "stop requested but engine is not running");
                return Ok(());
            }
            *state = EngineState::Stopping;
            self.running.lock().take()
        };

        if let Some(running) = running {
            self.interrupt(running.pid)?;
            running.join.wait().await;
        }

        *self.state.lock() = EngineState::Stopped;
        tracing::info!("core engine stopped");
        Ok(())
    }

    #[cfg(unix)]
    fn interrupt(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        tracing::debug!(pid, "sending SIGINT to core engine");
        kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| CoredeckError::Signal(e.to_string()))
    }

    #[cfg(windows)]
    fn interrupt(&self, pid: u32) -> Result<()> {
        // no native SIGINT delivery; the bundled terminator utility raises
        // the console interrupt in the engine's process group
        tracing::debug!(pid, "interrupting core engine via terminator utility");
        let status = std::process::Command::new(&self.paths.terminator_bin)
            .arg("-SIGINT")
            .arg(pid.to_string())
            .status()?;
        if !status.success() {
            return Err(CoredeckError::Signal(format!(
                "terminator exited with {status}"
            )));
        }
        Ok(())
    }

    /// Connection payload for the client layer. Prefers a saved durable
    /// token over the one-time secret.
    pub fn handoff(&self) -> HandoffPayload {
        let api_port = self.port.lock().unwrap_or(0);
        let credential = match &*self.admin_token.lock() {
            Some(token) => Credential::Durable(token.clone()),
            None => Credential::OneTime(self.admin_otp.clone()),
        };
        HandoffPayload {
            api_port,
            credential,
        }
    }

    /// Remember the durable token issued for this run so later handoffs
    /// skip the exchange.
    pub fn save_admin_token(&self, token: &str) {
        *self.admin_token.lock() = Some(token.to_string());
    }
}

async fn open_sink(path: &PathBuf) -> Result<File> {
    Ok(OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?)
}

fn describe_status(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("code {code}"),
        None => status.to_string(),
    }
}
