//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Deterministic startup and shutdown ordering."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::ManagerError;
use crate::graph::DependencyGraph;

/// Startup order derived from a [`DependencyGraph`].
///
/// Every dependency precedes its dependents; among services that are free to
/// go at the same step, the one registered first wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOrder {
    indices: Vec<usize>,
    names: Vec<String>,
}

impl StartupOrder {
    /// Compute the order with Kahn's algorithm.
    ///
    /// Fails with [`ManagerError::CyclicDependency`] when some services can
    /// never become free; the error names the services on the cycles.
    pub fn compute(graph: &DependencyGraph) -> Result<Self, ManagerError> {
        let mut remaining: Vec<usize> = (0..graph.len())
            .map(|index| graph.dependency_count(index))
            .collect();
        let mut free: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut indices = Vec::with_capacity(graph.len());
        while let Some(Reverse(index)) = free.pop() {
            indices.push(index);
            for dependent in graph.dependents(index) {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    free.push(Reverse(dependent));
                }
            }
        }

        if indices.len() < graph.len() {
            let services = graph
                .cycles()
                .into_iter()
                .map(|index| graph.name(index).to_owned())
                .collect();
            return Err(ManagerError::CyclicDependency { services });
        }

        let names = indices
            .iter()
            .map(|&index| graph.name(index).to_owned())
            .collect();
        Ok(Self { indices, names })
    }

    /// Registration indices in startup order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Service names in startup order.
    pub fn startup(&self) -> &[String] {
        &self.names
    }

    /// Service names in shutdown order, the exact reverse of startup.
    pub fn shutdown(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().rev().map(String::as_str)
    }

    /// Registration indices in shutdown order.
    pub fn shutdown_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().rev().copied()
    }
}
