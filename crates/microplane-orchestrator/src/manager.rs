//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Service registry, dependency-gated startup, and bounded shutdown."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use microplane_common::logging::{log_system_event, LogContext, SystemEventOutcome};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ManagerError, PartialShutdownReason, ServiceFailure, ShutdownOutcome};
use crate::graph::DependencyGraph;
use crate::scheduler::StartupOrder;
use crate::service::Service;
use crate::signal::{ShutdownSignal, Signal};
use crate::state::{ServiceState, SystemState};

/// Grace period applied when none is configured.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Owns a group of services and drives their lifecycle as one unit.
///
/// Services are registered with [`add_service`](Self::add_service) and the whole
/// group is brought up by [`run`](Self::run), which consumes the manager so the
/// registry cannot change once orchestration has begun.
pub struct ServiceManager {
    name: String,
    services: Vec<Arc<dyn Service>>,
    names: HashSet<String>,
    grace_period: Duration,
    state: watch::Sender<SystemState>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("name", &self.name)
            .field("services", &self.service_names())
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl ServiceManager {
    /// Create an empty manager for the group called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SystemState::Bootstrapping);
        Self {
            name: name.into(),
            services: Vec::new(),
            names: HashSet::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            state,
        }
    }

    /// Override the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Name of the orchestrated group, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured shutdown grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registered service names in registration order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|service| service.name()).collect()
    }

    /// Observe the aggregate system state while [`run`](Self::run) executes.
    pub fn subscribe_state(&self) -> watch::Receiver<SystemState> {
        self.state.subscribe()
    }

    /// Register a service.
    ///
    /// Rejects empty and duplicate names; on rejection the registry is unchanged.
    pub fn add_service<S: Service>(&mut self, service: S) -> Result<(), ManagerError> {
        self.add_shared(Arc::new(service))
    }

    /// Register a service that is already behind an `Arc`.
    pub fn add_shared(&mut self, service: Arc<dyn Service>) -> Result<(), ManagerError> {
        let name = service.name();
        if name.is_empty() {
            return Err(ManagerError::EmptyServiceName);
        }
        if self.names.contains(name) {
            return Err(ManagerError::DuplicateServiceName {
                name: name.to_owned(),
            });
        }
        debug!(group = %self.name, service = %name, "service registered");
        self.names.insert(name.to_owned());
        self.services.push(service);
        Ok(())
    }

    /// Validate the dependency graph and return the startup order without
    /// launching anything.
    pub fn startup_order(&self) -> Result<StartupOrder, ManagerError> {
        self.plan().map(|(_, order)| order)
    }

    fn plan(&self) -> Result<(DependencyGraph, StartupOrder), ManagerError> {
        let graph = DependencyGraph::build(
            self.services
                .iter()
                .map(|service| (service.name(), service.dependencies())),
        )?;
        let order = StartupOrder::compute(&graph)?;
        Ok((graph, order))
    }

    /// Bring the group up, keep it running until `shutdown` is requested or a
    /// service fails, then stop everything that was launched.
    ///
    /// `ready` fires once every service has signaled readiness. `stopped` fires
    /// once every launched service has returned; it never fires when the wait
    /// is cut short by the grace period or a repeated shutdown request, in which
    /// case the services still running are detached and named in the error.
    pub async fn run(
        self,
        shutdown: ShutdownSignal,
        ready: Signal,
        stopped: Signal,
    ) -> Result<(), ManagerError> {
        let (graph, order) = match self.plan() {
            Ok(plan) => plan,
            Err(err) => {
                error!(group = %self.name, error = %err, "service graph rejected; nothing started");
                self.state.send_replace(SystemState::Failed);
                return Err(err);
            }
        };
        info!(
            group = %self.name,
            order = ?order.startup(),
            grace_period_ms = self.grace_period.as_millis() as u64,
            "starting services"
        );

        let mut run = Orchestration::new(&self, &graph, &order);
        let (trigger, seen) = run.supervise(&shutdown, &ready).await;
        let outcome = run.drain(&shutdown, seen, self.grace_period).await;

        let ctx = LogContext::new().with_group(&self.name);
        let final_state = match (&trigger, &outcome) {
            (_, ShutdownOutcome::Partial { .. }) => SystemState::PartialShutdown,
            (Trigger::Failure(_), _) | (_, ShutdownOutcome::Failed(_)) => SystemState::Failed,
            (Trigger::Requested, ShutdownOutcome::Clean) => SystemState::Stopped,
        };
        if outcome.is_complete() {
            stopped.fire();
            log_system_event(
                Some(&ctx),
                "system.stopped",
                &format!("all launched services returned ({})", final_state),
                SystemEventOutcome::Success,
            );
        } else {
            log_system_event(
                Some(&ctx),
                "system.partial_shutdown",
                &outcome.to_string(),
                SystemEventOutcome::Fault,
            );
        }
        self.state.send_replace(final_state);

        match (trigger, outcome) {
            (Trigger::Failure(failure), shutdown) => {
                Err(ManagerError::ServiceStartFailure { failure, shutdown })
            }
            (Trigger::Requested, ShutdownOutcome::Clean) => Ok(()),
            (Trigger::Requested, ShutdownOutcome::Failed(failures)) => {
                Err(ManagerError::StopFailure { failures })
            }
            (Trigger::Requested, ShutdownOutcome::Partial { pending, reason }) => {
                Err(ManagerError::PartialShutdown { pending, reason })
            }
        }
    }
}

/// What ended the supervision phase.
enum Trigger {
    Requested,
    Failure(ServiceFailure),
}

type TaskOutput = (usize, anyhow::Result<()>);

/// Loop state of a single [`ServiceManager::run`] call.
struct Orchestration<'a> {
    group: &'a str,
    services: &'a [Arc<dyn Service>],
    graph: &'a DependencyGraph,
    order: &'a StartupOrder,
    state: &'a watch::Sender<SystemState>,
    states: Vec<ServiceState>,
    signaled_ready: Vec<bool>,
    ready_count: usize,
    cancel: Signal,
    tasks: JoinSet<TaskOutput>,
    readiness: FuturesUnordered<BoxFuture<'static, usize>>,
}

impl<'a> Orchestration<'a> {
    fn new(
        manager: &'a ServiceManager,
        graph: &'a DependencyGraph,
        order: &'a StartupOrder,
    ) -> Self {
        let count = manager.services.len();
        Self {
            group: &manager.name,
            services: &manager.services,
            graph,
            order,
            state: &manager.state,
            states: vec![ServiceState::Pending; count],
            signaled_ready: vec![false; count],
            ready_count: 0,
            cancel: Signal::new(),
            tasks: JoinSet::new(),
            readiness: FuturesUnordered::new(),
        }
    }

    /// Launch services as their dependencies become ready and wait for either
    /// a shutdown request or a fatal failure.
    ///
    /// Also returns the request count the drain treats as already handled:
    /// after a requested shutdown only the first request is, so a second one
    /// forces the drain even if both arrived before this loop observed them.
    async fn supervise(&mut self, shutdown: &ShutdownSignal, ready: &Signal) -> (Trigger, u32) {
        if shutdown.requests() > 0 {
            info!(group = %self.group, "shutdown requested before startup; launching nothing");
            return (Trigger::Requested, 1);
        }
        self.launch_eligible();
        self.check_all_ready(ready);

        loop {
            tokio::select! {
                Some(index) = self.readiness.next(), if !self.readiness.is_empty() => {
                    self.mark_ready(index);
                    self.launch_eligible();
                    self.check_all_ready(ready);
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Some(failure) = self.record_unsolicited_exit(joined) {
                        return (Trigger::Failure(failure), shutdown.requests());
                    }
                }
                count = shutdown.requested_after(0) => {
                    info!(group = %self.group, requests = count, "shutdown requested");
                    return (Trigger::Requested, 1);
                }
            }
        }
    }

    fn launch_eligible(&mut self) {
        let order = self.order;
        for &index in order.indices() {
            if self.states[index] != ServiceState::Pending {
                continue;
            }
            let graph = self.graph;
            if graph.dependencies(index).all(|dep| self.signaled_ready[dep]) {
                self.launch(index);
            }
        }
    }

    fn launch(&mut self, index: usize) {
        let service = Arc::clone(&self.services[index]);
        let cancel = self.cancel.clone();
        let ready = Signal::new();

        let observed = ready.clone();
        self.readiness.push(
            async move {
                observed.wait().await;
                index
            }
            .boxed(),
        );

        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(service.run(cancel, ready))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow!("service panicked: {}", panic_message(&*panic))));
            (index, result)
        });
        self.set_state(index, ServiceState::Starting);
        info!(group = %self.group, service = %self.graph.name(index), "service launched");
    }

    fn mark_ready(&mut self, index: usize) {
        if self.states[index] != ServiceState::Starting {
            debug!(
                group = %self.group,
                service = %self.graph.name(index),
                state = %self.states[index],
                "ignoring readiness outside of startup"
            );
            return;
        }
        self.signaled_ready[index] = true;
        self.ready_count += 1;
        self.set_state(index, ServiceState::Ready);
        info!(
            group = %self.group,
            service = %self.graph.name(index),
            ready = self.ready_count,
            total = self.services.len(),
            "service ready"
        );
    }

    fn check_all_ready(&mut self, ready: &Signal) {
        if self.ready_count != self.services.len() || ready.is_fired() {
            return;
        }
        // Publish the state first so observers woken by `ready` already see it.
        self.state.send_replace(SystemState::AllReady);
        if ready.fire() {
            log_system_event(
                Some(&LogContext::new().with_group(self.group)),
                "system.ready",
                &format!("all {} services ready", self.services.len()),
                SystemEventOutcome::Success,
            );
        }
    }

    /// Record a service returning before shutdown began. Any such return is fatal.
    fn record_unsolicited_exit(
        &mut self,
        joined: Result<TaskOutput, JoinError>,
    ) -> Option<ServiceFailure> {
        let (index, result) = match joined {
            Ok(output) => output,
            Err(err) => {
                error!(group = %self.group, error = %err, "service task could not be joined");
                return None;
            }
        };
        let name = self.graph.name(index).to_owned();
        let error = result
            .err()
            .unwrap_or_else(|| anyhow!("exited without a shutdown request"));
        self.set_state(index, ServiceState::Failed);
        log_system_event(
            Some(&LogContext::new().with_group(self.group).with_service(&name)),
            "service.failed",
            &format!("{:#}", error),
            SystemEventOutcome::Fault,
        );
        Some(ServiceFailure::new(name, error))
    }

    /// Cancel every service and wait for the launched ones to return, bounded
    /// by `grace_period` and by any request beyond `seen`.
    async fn drain(
        &mut self,
        shutdown: &ShutdownSignal,
        seen: u32,
        grace_period: Duration,
    ) -> ShutdownOutcome {
        self.cancel.fire();
        self.state.send_replace(SystemState::ShuttingDown);
        self.readiness.clear();
        for index in 0..self.states.len() {
            if matches!(
                self.states[index],
                ServiceState::Starting | ServiceState::Ready
            ) {
                self.set_state(index, ServiceState::Stopping);
            }
        }
        info!(
            group = %self.group,
            outstanding = ?self.outstanding(),
            "cancellation triggered; waiting for services to stop"
        );

        let deadline = sleep_until(Instant::now() + grace_period);
        tokio::pin!(deadline);
        let mut failures = Vec::new();

        while !self.tasks.is_empty() {
            tokio::select! {
                Some(joined) = self.tasks.join_next() => {
                    if let Some(failure) = self.record_stop(joined) {
                        failures.push(failure);
                    }
                }
                _ = &mut deadline => {
                    return self.abandon(PartialShutdownReason::GracePeriodElapsed);
                }
                count = shutdown.requested_after(seen) => {
                    warn!(group = %self.group, requests = count, "repeated shutdown request; not waiting any longer");
                    return self.abandon(PartialShutdownReason::ForcedByRequest);
                }
            }
        }

        if failures.is_empty() {
            ShutdownOutcome::Clean
        } else {
            ShutdownOutcome::Failed(failures)
        }
    }

    fn record_stop(&mut self, joined: Result<TaskOutput, JoinError>) -> Option<ServiceFailure> {
        let (index, result) = match joined {
            Ok(output) => output,
            Err(err) => {
                error!(group = %self.group, error = %err, "service task could not be joined");
                return None;
            }
        };
        let name = self.graph.name(index).to_owned();
        match result {
            Ok(()) => {
                self.set_state(index, ServiceState::Stopped);
                info!(group = %self.group, service = %name, "service stopped");
                None
            }
            Err(error) => {
                self.set_state(index, ServiceState::Failed);
                warn!(group = %self.group, service = %name, error = %format!("{:#}", error), "service failed while stopping");
                Some(ServiceFailure::new(name, error))
            }
        }
    }

    fn abandon(&mut self, reason: PartialShutdownReason) -> ShutdownOutcome {
        let pending = self.outstanding();
        warn!(group = %self.group, %reason, pending = ?pending, "abandoning services that did not stop");
        self.tasks.detach_all();
        ShutdownOutcome::Partial { pending, reason }
    }

    /// Launched services that have not returned, in shutdown order.
    fn outstanding(&self) -> Vec<String> {
        self.order
            .shutdown_indices()
            .filter(|&index| self.states[index].is_running())
            .map(|index| self.graph.name(index).to_owned())
            .collect()
    }

    fn set_state(&mut self, index: usize, next: ServiceState) {
        let current = self.states[index];
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current} -> {next}"
        );
        debug!(
            group = %self.group,
            service = %self.graph.name(index),
            from = %current,
            to = %next,
            "service state changed"
        );
        self.states[index] = next;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
