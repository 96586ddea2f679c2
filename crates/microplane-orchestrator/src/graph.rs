//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Dependency graph construction and validation."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::ManagerError;

/// Directed "must be ready before" graph over registered services.
///
/// Nodes are identified by registration index; an edge `a -> b` means `b`
/// depends on `a`. The graph is immutable once built.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    graph: DiGraph<usize, ()>,
}

impl DependencyGraph {
    /// Build the graph from `(name, dependencies)` pairs in registration order.
    ///
    /// Fails with [`ManagerError::UnknownDependency`] on the first dependency
    /// that does not name a declared service. Repeated dependency names are
    /// collapsed into a single edge. Cycles are not rejected here; see
    /// [`DependencyGraph::cycles`].
    pub fn build<I, S>(declarations: I) -> Result<Self, ManagerError>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let declarations: Vec<(String, Vec<String>)> = declarations
            .into_iter()
            .map(|(name, deps)| (name.into(), deps))
            .collect();

        let mut graph = DiGraph::with_capacity(declarations.len(), 0);
        let mut index = HashMap::with_capacity(declarations.len());
        for (position, (name, _)) in declarations.iter().enumerate() {
            let node = graph.add_node(position);
            debug_assert_eq!(node.index(), position);
            index.insert(name.as_str(), position);
        }

        for (position, (name, deps)) in declarations.iter().enumerate() {
            for dep in deps {
                let Some(&dep_position) = index.get(dep.as_str()) else {
                    return Err(ManagerError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(NodeIndex::new(dep_position), NodeIndex::new(position), ());
            }
        }

        let names = declarations.into_iter().map(|(name, _)| name).collect();
        Ok(Self { names, graph })
    }

    /// Number of services in the graph.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no services.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the service at registration index `index`.
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Registration index of the service called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Registration indices of the services `index` depends on.
    pub fn dependencies(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .map(|node| self.graph[node])
    }

    /// Registration indices of the services that depend on `index`.
    pub fn dependents(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(|node| self.graph[node])
    }

    /// Number of distinct dependencies of `index`.
    pub fn dependency_count(&self, index: usize) -> usize {
        self.dependencies(index).count()
    }

    /// Registration indices of every service that sits on a dependency cycle,
    /// sorted by registration order. Empty for an acyclic graph.
    pub fn cycles(&self) -> Vec<usize> {
        let mut members: Vec<usize> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .contains_edge(component[0], component[0])
            })
            .flatten()
            .map(|node| self.graph[node])
            .collect();
        members.sort_unstable();
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, deps: &[&str]) -> (String, Vec<String>) {
        (
            name.to_owned(),
            deps.iter().map(|dep| (*dep).to_owned()).collect(),
        )
    }

    #[test]
    fn resolves_dependencies_by_registration_index() {
        let graph = DependencyGraph::build(vec![
            decl("etcd", &[]),
            decl("apiserver", &["etcd"]),
            decl("scheduler", &["apiserver", "etcd"]),
        ])
        .expect("graph builds");

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.index_of("scheduler"), Some(2));
        let mut deps: Vec<usize> = graph.dependencies(2).collect();
        deps.sort_unstable();
        assert_eq!(deps, [0, 1]);
        let mut dependents: Vec<usize> = graph.dependents(0).collect();
        dependents.sort_unstable();
        assert_eq!(dependents, [1, 2]);
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = DependencyGraph::build(vec![decl("apiserver", &["etcd"])])
            .expect_err("etcd is not registered");
        match err {
            ManagerError::UnknownDependency {
                service,
                dependency,
            } => {
                assert_eq!(service, "apiserver");
                assert_eq!(dependency, "etcd");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn repeated_dependencies_collapse() {
        let graph = DependencyGraph::build(vec![decl("a", &[]), decl("b", &["a", "a"])])
            .expect("graph builds");
        assert_eq!(graph.dependency_count(1), 1);
    }

    #[test]
    fn cycles_report_only_members() {
        let graph = DependencyGraph::build(vec![
            decl("root", &[]),
            decl("a", &["b", "root"]),
            decl("b", &["a"]),
            decl("downstream", &["a"]),
            decl("selfish", &["selfish"]),
        ])
        .expect("graph builds");
        assert_eq!(graph.cycles(), [1, 2, 4]);
    }
}
