//! ---
//! mp_section: "01-core-functionality"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Shared primitives and utilities for the daemon."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
//! Shared primitives for the microplane workspace: configuration loading and
//! tracing setup consumed by the daemon and the service crates.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, ReadinessProbe, ServiceConfig, ShutdownConfig,
    KNOWN_ROLES, ROLE_CONTROLPLANE, ROLE_NODE,
};
pub use logging::{init_tracing, log_system_event, LogContext, LogFormat, SystemEventOutcome};
