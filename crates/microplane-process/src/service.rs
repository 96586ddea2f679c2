//! ---
//! mp_section: "05-process-services"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Service implementation that supervises an external command."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use microplane_common::ServiceConfig;
use microplane_orchestrator::{Service, Signal};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::{output, probe};

/// A service whose body is an external process.
///
/// The process is spawned on launch, is ready once its readiness probe passes,
/// and is expected to keep running until cancelled. On cancellation it receives
/// SIGTERM and is killed if it outlives the configured stop timeout.
#[derive(Debug, Clone)]
pub struct ProcessService {
    name: String,
    config: ServiceConfig,
}

impl ProcessService {
    /// Wrap the command described by `config` as the service `name`.
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Configuration the process is launched with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn(&self) -> Result<Child, ProcessError> {
        debug!(service = %self.name, command = %self.config.command.display(), args = ?self.config.args, "spawning process");
        self.command().spawn().map_err(|source| ProcessError::Spawn {
            name: self.name.clone(),
            command: self.config.command.display().to_string(),
            source,
        })
    }

    fn wait_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Wait {
            name: self.name.clone(),
            source,
        }
    }

    #[cfg(unix)]
    fn request_stop(&self, _child: &mut Child, pid: u32) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal as UnixSignal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), UnixSignal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                name: self.name.clone(),
                source,
            }),
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&self, child: &mut Child, _pid: u32) -> Result<(), ProcessError> {
        child.start_kill().map_err(|source| self.wait_error(source))
    }

    /// Ask the process to exit and wait up to the stop timeout before killing it.
    async fn terminate(&self, child: &mut Child, pid: u32) -> Result<(), ProcessError> {
        if let Some(status) = child.try_wait().map_err(|source| self.wait_error(source))? {
            self.log_exit(pid, status);
            return Ok(());
        }

        info!(service = %self.name, pid, timeout = ?self.config.stop_timeout, "sending SIGTERM");
        self.request_stop(child, pid)?;
        match timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                self.log_exit(pid, status);
                Ok(())
            }
            Ok(Err(source)) => Err(self.wait_error(source)),
            Err(_) => {
                warn!(service = %self.name, pid, "process ignored SIGTERM, killing");
                child.kill().await.map_err(|source| self.wait_error(source))?;
                Err(ProcessError::StopTimeout {
                    name: self.name.clone(),
                    timeout: self.config.stop_timeout,
                })
            }
        }
    }

    fn log_exit(&self, pid: u32, status: ExitStatus) {
        if status.success() {
            info!(service = %self.name, pid, %status, "process exited");
        } else {
            warn!(service = %self.name, pid, %status, "process exited after stop request");
        }
    }
}

#[async_trait]
impl Service for ProcessService {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.config.depends_on.clone()
    }

    async fn run(&self, cancel: Signal, ready: Signal) -> anyhow::Result<()> {
        let mut child = self.spawn()?;
        let pid = child.id().ok_or_else(|| ProcessError::MissingPid {
            name: self.name.clone(),
        })?;
        info!(service = %self.name, pid, "process spawned");
        let forwarders = output::forward(&self.name, &mut child);

        let probe = probe::wait_until_ready(&self.name, &self.config.readiness);
        tokio::pin!(probe);
        let mut probing = true;

        let outcome = loop {
            // Cancellation wins over a simultaneous exit so a stop is never
            // reported as a crash.
            tokio::select! {
                biased;
                () = cancel.wait() => break self.terminate(&mut child, pid).await,
                status = child.wait() => {
                    break Err(match status {
                        Ok(status) => ProcessError::Exited {
                            name: self.name.clone(),
                            status,
                        },
                        Err(source) => self.wait_error(source),
                    });
                }
                () = &mut probe, if probing => {
                    probing = false;
                    info!(service = %self.name, pid, probe = ?self.config.readiness, "process is ready");
                    ready.fire();
                }
            }
        };

        output::drain(&self.name, forwarders).await;
        outcome.map_err(Into::into)
    }
}
