//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Lifecycle orchestration of interdependent long-running services."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
//! Brings a fixed set of interdependent services up as one unit.
//!
//! Services implement [`Service`] and are registered on a [`ServiceManager`].
//! [`ServiceManager::run`] validates the declared dependencies, launches every
//! service once its dependencies signaled readiness, fires a group-wide ready
//! [`Signal`], and on a [`ShutdownSignal`] request (or the first service
//! failure) cancels everything and waits, bounded by a grace period, for the
//! launched services to return.
#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod manager;
pub mod scheduler;
pub mod service;
pub mod signal;
pub mod state;

pub use error::{ManagerError, PartialShutdownReason, ServiceFailure, ShutdownOutcome};
pub use graph::DependencyGraph;
pub use manager::{ServiceManager, DEFAULT_GRACE_PERIOD};
pub use scheduler::StartupOrder;
pub use service::Service;
pub use signal::{ShutdownSignal, Signal};
pub use state::{ServiceState, SystemState};
