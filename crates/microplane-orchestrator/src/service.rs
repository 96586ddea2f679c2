//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Contract implemented by every orchestrated service."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::signal::Signal;

/// A long-running component managed by the [`ServiceManager`](crate::ServiceManager).
#[async_trait]
pub trait Service
where
    Self: Send + Sync + 'static,
{
    /// Unique, non-empty name. Must not change for the lifetime of the service.
    fn name(&self) -> &str;

    /// Names of the services that must be ready before this one starts.
    ///
    /// The names only need to be registered by the time the manager runs.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run until `cancel` fires or an unrecoverable error occurs.
    ///
    /// Implementations fire `ready` once they reach steady serving state and keep
    /// running afterwards. Returning `Ok(())` is only valid after `cancel` fired;
    /// any error, before or after readiness, is fatal to the whole group.
    async fn run(&self, cancel: Signal, ready: Signal) -> anyhow::Result<()>;
}
