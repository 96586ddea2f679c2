//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Per-service and system-wide lifecycle states."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::fmt;

/// Lifecycle state of a single registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Registered, not launched yet.
    Pending,
    /// Launched, readiness not signaled yet.
    Starting,
    /// Signaled readiness.
    Ready,
    /// Cancellation observed, waiting for `run` to return.
    Stopping,
    /// `run` returned cleanly after cancellation.
    Stopped,
    /// `run` returned an error or exited without being asked to.
    Failed,
}

impl ServiceState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }

    /// Whether a launched execution unit may still be running in this state.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Ready | ServiceState::Stopping
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        match (self, next) {
            (Pending, Starting) | (Starting, Ready) => true,
            (Starting, Stopping) | (Ready, Stopping) => true,
            (Stopping, Stopped) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Stable lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Pending => "pending",
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of the whole orchestrated group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemState {
    /// Services are being launched; not all have signaled readiness.
    #[default]
    Bootstrapping,
    /// Every registered service signaled readiness.
    AllReady,
    /// Cancellation was triggered and the manager waits for services to return.
    ShuttingDown,
    /// Every launched service returned cleanly.
    Stopped,
    /// The wait was cut short by the grace deadline or a repeated request.
    PartialShutdown,
    /// A service failed, or returned an error while stopping.
    Failed,
}

impl SystemState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SystemState::Stopped | SystemState::PartialShutdown | SystemState::Failed
        )
    }

    /// Stable lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SystemState::Bootstrapping => "bootstrapping",
            SystemState::AllReady => "all-ready",
            SystemState::ShuttingDown => "shutting-down",
            SystemState::Stopped => "stopped",
            SystemState::PartialShutdown => "partial-shutdown",
            SystemState::Failed => "failed",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceState::*;
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [Pending, Starting, Ready, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn failed_reachable_from_every_non_terminal_state() {
        for state in [Pending, Starting, Ready, Stopping] {
            assert!(state.can_transition_to(Failed), "{state} -> failed");
        }
        assert!(!Stopped.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!Pending.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Ready.can_transition_to(Starting));
    }

    #[test]
    fn system_terminal_states() {
        assert!(!SystemState::Bootstrapping.is_terminal());
        assert!(!SystemState::AllReady.is_terminal());
        assert!(!SystemState::ShuttingDown.is_terminal());
        assert!(SystemState::Stopped.is_terminal());
        assert!(SystemState::PartialShutdown.is_terminal());
        assert!(SystemState::Failed.is_terminal());
        assert_eq!(SystemState::default(), SystemState::Bootstrapping);
    }
}
