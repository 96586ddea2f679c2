//! ---
//! mp_section: "05-process-services"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Services backed by supervised external processes."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
//! [`Service`](microplane_orchestrator::Service) implementation for components
//! that ship as standalone executables.
//!
//! A [`ProcessService`] spawns its command when the manager launches it, reports
//! readiness according to the configured [`ReadinessProbe`](microplane_common::ReadinessProbe),
//! and on cancellation asks the process to terminate before killing it.
#![warn(missing_docs)]

pub mod error;
mod output;
mod probe;
pub mod service;

pub use error::ProcessError;
pub use service::ProcessService;
