//! Child process running the external parser

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::config::WorkerConfig;
use crate::error::{Error, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A running worker speaking line-delimited JSON on stdin/stdout
pub(crate) struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<String>>,
}

impl WorkerProcess {
    pub(crate) fn spawn(config: &WorkerConfig) -> Result<Self> {
        let mut command = Command::new(&config.program);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        let mut child = command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::WorkerUnavailable(format!("{}: {}", config.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerUnavailable("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerUnavailable("stdout not captured".to_string()))?;

        // Reads block, so responses are forwarded over a channel that the
        // caller can wait on with a deadline
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("parser-worker-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        info!("Started parser worker `{}` (pid {})", config.program, child.id());

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: rx,
        })
    }

    /// Send one request line and wait for one response line
    pub(crate) fn request(&mut self, request: &Value, timeout: Duration) -> Result<Value> {
        let stdin = self.stdin.as_mut().ok_or(Error::WorkerClosed)?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stdin.write_all(line.as_bytes())?;
        stdin.flush()?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(Ok(line)) if line.trim().is_empty() => continue,
                Ok(Ok(line)) => return Ok(serde_json::from_str(&line)?),
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Err(Error::WorkerTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::WorkerClosed),
            }
        }
    }

    /// Close stdin, ask the worker to terminate, and kill it after `grace`
    pub(crate) fn stop(mut self, grace: Duration) {
        drop(self.stdin.take());

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Parser worker already exited with {}", status);
            return;
        }

        self.terminate();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Parser worker exited with {}", status);
                    return;
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => {
                    warn!("Failed to poll parser worker: {}", e);
                    break;
                }
            }
        }

        warn!("Parser worker did not exit within {:?}, killing it", grace);
        self.kill();
    }

    #[cfg(unix)]
    fn terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            debug!("Failed to signal parser worker: {}", e);
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Failed to kill parser worker: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}
