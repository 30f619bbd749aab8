use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{GuestBackend, LineReader};
use crate::config::QemuConfig;
use crate::error::HostError;

const BACKEND: &str = "qemu";

/// A guest running under QEMU.
///
/// The firmware console is the board's mini UART, which QEMU exposes on the
/// second serial port, so that one is wired to stdout.
pub struct EmulatedGuest {
    config: QemuConfig,
    child: Option<Child>,
    stdout: Option<LineReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl EmulatedGuest {
    pub fn new(config: QemuConfig) -> Self {
        Self {
            config,
            child: None,
            stdout: None,
            stderr_task: None,
        }
    }

    /// Arguments passed to the emulator, without the binary itself.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            self.config.machine.clone(),
            "-kernel".to_string(),
            self.config.kernel.display().to_string(),
            "-serial".to_string(),
            "null".to_string(),
            "-serial".to_string(),
            "stdio".to_string(),
            "-display".to_string(),
            "none".to_string(),
            "-monitor".to_string(),
            "none".to_string(),
            "-semihosting".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn resolve_binary(&self) -> Result<PathBuf, HostError> {
        which::which(&self.config.binary).map_err(|e| {
            HostError::start(BACKEND, format!("emulator {:?} not found: {e}", self.config.binary))
        })
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.stop_grace_ms)
    }
}

impl GuestBackend for EmulatedGuest {
    async fn start(&mut self) -> Result<(), HostError> {
        let binary = self.resolve_binary()?;
        if !self.config.kernel.exists() {
            return Err(HostError::DeviceNotFound(self.config.kernel.clone()));
        }

        let args = self.args();
        info!(
            binary = %binary.display(),
            kernel = %self.config.kernel.display(),
            machine = %self.config.machine,
            "starting emulator"
        );
        debug!(?args, "emulator arguments");

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::start(BACKEND, format!("spawning {}: {e}", binary.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::start(BACKEND, "emulator stdout not captured"))?;

        // Emulator diagnostics go to the log, not to the guest output.
        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "qemu", "{}", line);
                }
            }));
        }

        self.stdout = Some(LineReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError> {
        match self.stdout.as_mut() {
            Some(reader) => reader.next_line(timeout).await,
            None => Err(HostError::StreamClosed),
        }
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let result = terminate(&mut child, self.grace()).await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        result
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Always reaps the child.
async fn terminate(child: &mut Child, grace: Duration) -> Result<(), HostError> {
    let stop_err = |e: std::io::Error| HostError::BackendStop {
        backend: BACKEND,
        reason: e.to_string(),
    };

    if let Some(status) = child.try_wait().map_err(stop_err)? {
        info!(%status, "emulator already exited");
        return Ok(());
    }

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(stop_err)?;
            info!(%status, "emulator stopped");
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "emulator ignored SIGTERM, killing");
            child.kill().await.map_err(stop_err)?;
        }
    }
    Ok(())
}
