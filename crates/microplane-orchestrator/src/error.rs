//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Error taxonomy reported by the service manager."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;

/// A service whose `run` returned an error, or exited without a shutdown request.
#[derive(Debug)]
pub struct ServiceFailure {
    /// Name of the failing service.
    pub name: String,
    /// Error returned by the service.
    pub error: anyhow::Error,
}

impl ServiceFailure {
    pub(crate) fn new(name: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' failed: {:#}", self.name, self.error)
    }
}

/// Why the manager stopped waiting for services before all of them returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialShutdownReason {
    /// The grace period elapsed.
    GracePeriodElapsed,
    /// Another shutdown request arrived while already shutting down.
    ForcedByRequest,
}

impl fmt::Display for PartialShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialShutdownReason::GracePeriodElapsed => f.write_str("grace period elapsed"),
            PartialShutdownReason::ForcedByRequest => f.write_str("forced by repeated request"),
        }
    }
}

/// Result of waiting for launched services after cancellation.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// Every launched service returned `Ok(())`.
    Clean,
    /// Every launched service returned, some with an error.
    Failed(Vec<ServiceFailure>),
    /// The wait was cut short; `pending` is listed in shutdown order.
    Partial {
        /// Services that had not returned.
        pending: Vec<String>,
        /// What cut the wait short.
        reason: PartialShutdownReason,
    },
}

impl ShutdownOutcome {
    /// Whether every launched service returned.
    pub fn is_complete(&self) -> bool {
        !matches!(self, ShutdownOutcome::Partial { .. })
    }
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownOutcome::Clean => f.write_str("completed cleanly"),
            ShutdownOutcome::Failed(failures) => {
                write!(f, "completed with errors: {}", join_failures(failures))
            }
            ShutdownOutcome::Partial { pending, reason } => {
                write!(f, "incomplete ({}), still running: {}", reason, pending.join(", "))
            }
        }
    }
}

fn join_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`ServiceManager`](crate::ServiceManager).
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A service reported an empty name.
    #[error("service name must not be empty")]
    EmptyServiceName,
    /// A service with the same name is already registered.
    #[error("service '{name}' is already registered")]
    DuplicateServiceName {
        /// The conflicting name.
        name: String,
    },
    /// A declared dependency does not name a registered service.
    #[error("service '{service}' depends on unregistered service '{dependency}'")]
    UnknownDependency {
        /// Service declaring the dependency.
        service: String,
        /// The unresolved name.
        dependency: String,
    },
    /// The declared dependencies contain a cycle.
    #[error("dependency cycle between services: {}", .services.join(", "))]
    CyclicDependency {
        /// Services that sit on a cycle, in registration order.
        services: Vec<String>,
    },
    /// A service failed before shutdown was requested.
    #[error("service {failure}; shutdown {shutdown}")]
    ServiceStartFailure {
        /// The failure that triggered the shutdown.
        failure: ServiceFailure,
        /// How the triggered shutdown ended.
        shutdown: ShutdownOutcome,
    },
    /// Not every launched service returned before the wait was cut short.
    #[error("shutdown incomplete ({reason}); services still running: {}", .pending.join(", "))]
    PartialShutdown {
        /// Services that had not returned, in shutdown order.
        pending: Vec<String>,
        /// What cut the wait short.
        reason: PartialShutdownReason,
    },
    /// Shutdown completed but some services returned errors while stopping.
    #[error("services failed while stopping: {}", join_failures(.failures))]
    StopFailure {
        /// The failing services.
        failures: Vec<ServiceFailure>,
    },
}

impl ManagerError {
    /// Services left running when the manager returned, if any were abandoned.
    pub fn pending_services(&self) -> Option<&[String]> {
        match self {
            ManagerError::PartialShutdown { pending, .. } => Some(pending),
            ManagerError::ServiceStartFailure {
                shutdown: ShutdownOutcome::Partial { pending, .. },
                ..
            } => Some(pending),
            _ => None,
        }
    }

    /// Name of the service whose failure triggered the shutdown.
    pub fn failed_service(&self) -> Option<&str> {
        match self {
            ManagerError::ServiceStartFailure { failure, .. } => Some(&failure.name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn start_failure_message_names_service_and_outcome() {
        let err = ManagerError::ServiceStartFailure {
            failure: ServiceFailure::new("etcd", anyhow!("port in use")),
            shutdown: ShutdownOutcome::Partial {
                pending: vec!["kubelet".into()],
                reason: PartialShutdownReason::GracePeriodElapsed,
            },
        };
        assert_eq!(
            err.to_string(),
            "service 'etcd' failed: port in use; shutdown incomplete (grace period elapsed), still running: kubelet"
        );
        assert_eq!(err.failed_service(), Some("etcd"));
        assert_eq!(err.pending_services(), Some(&["kubelet".to_owned()][..]));
    }

    #[test]
    fn cycle_message_lists_members() {
        let err = ManagerError::CyclicDependency {
            services: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between services: a, b");
        assert!(err.pending_services().is_none());
    }

    #[test]
    fn stop_failure_joins_causes() {
        let err = ManagerError::StopFailure {
            failures: vec![
                ServiceFailure::new("a", anyhow!("boom")),
                ServiceFailure::new("b", anyhow!("bang")),
            ],
        };
        assert_eq!(
            err.to_string(),
            "services failed while stopping: 'a' failed: boom; 'b' failed: bang"
        );
    }
}
