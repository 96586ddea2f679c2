//! ---
//! mp_section: "05-process-services"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Failures of supervised processes."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while supervising an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be started.
    #[error("failed to spawn '{name}' ({command}): {source}")]
    Spawn {
        /// Service name.
        name: String,
        /// Command that was executed.
        command: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The operating system did not report a pid for the child.
    #[error("'{name}' was spawned without a pid")]
    MissingPid {
        /// Service name.
        name: String,
    },
    /// The process exited while nobody asked it to stop.
    #[error("'{name}' exited unexpectedly ({status})")]
    Exited {
        /// Service name.
        name: String,
        /// Exit status reported by the operating system.
        status: ExitStatus,
    },
    /// Waiting on the child failed.
    #[error("failed to wait for '{name}': {source}")]
    Wait {
        /// Service name.
        name: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Delivering the termination signal failed.
    #[cfg(unix)]
    #[error("failed to signal '{name}': {source}")]
    Signal {
        /// Service name.
        name: String,
        /// Errno returned by `kill(2)`.
        #[source]
        source: nix::Error,
    },
    /// The process outlived its stop timeout and was killed.
    #[error("'{name}' did not stop within {timeout:?} and was killed")]
    StopTimeout {
        /// Service name.
        name: String,
        /// Configured stop timeout.
        timeout: Duration,
    },
}
