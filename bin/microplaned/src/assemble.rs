//! ---
//! mp_section: "06-daemon"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Turns the loaded configuration into a service manager."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use microplane_common::AppConfig;
use microplane_orchestrator::ServiceManager;
use microplane_process::ProcessService;
use tracing::{debug, warn};

/// Register a [`ProcessService`] for every service enabled by the active roles.
///
/// Dependencies on services whose role is inactive are dropped: those services
/// run elsewhere and cannot gate startup here. Dependencies on names that are
/// not configured at all are kept so the manager rejects them.
pub fn build_manager(config: &AppConfig) -> Result<ServiceManager> {
    let mut manager =
        ServiceManager::new(config.name.clone()).with_grace_period(config.shutdown.grace_period);

    for (name, service) in config.active_services() {
        let mut service = service.clone();
        service.depends_on.retain(|dependency| match config.services.get(dependency) {
            Some(target) if !config.has_role(&target.role) => {
                warn!(
                    service = %name,
                    dependency = %dependency,
                    role = %target.role,
                    "dropping dependency on a service of an inactive role"
                );
                false
            }
            _ => true,
        });
        debug!(service = %name, role = %service.role, depends_on = ?service.depends_on, "registering service");
        manager
            .add_service(ProcessService::new(name.clone(), service))
            .with_context(|| format!("unable to register service '{}'", name))?;
    }

    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use microplane_orchestrator::ManagerError;

    const CONFIG: &str = r#"
        name = "edge"

        [services.etcd]
        command = "/usr/bin/etcd"

        [services.kube-apiserver]
        command = "/usr/bin/kube-apiserver"
        depends_on = ["etcd"]

        [services.kubelet]
        role = "node"
        command = "/usr/bin/kubelet"
        depends_on = ["kube-apiserver"]
    "#;

    fn config(roles: &[&str]) -> AppConfig {
        let mut config: AppConfig = CONFIG.parse().expect("config parses");
        config.roles = roles.iter().map(|role| (*role).to_owned()).collect();
        config
    }

    #[test]
    fn all_roles_register_every_service() {
        let manager = build_manager(&config(&["controlplane", "node"])).expect("manager");
        assert_eq!(manager.name(), "edge");
        assert_eq!(
            manager.startup_order().expect("acyclic").startup(),
            ["etcd", "kube-apiserver", "kubelet"]
        );
    }

    #[test]
    fn node_role_drops_controlplane_dependencies() {
        let manager = build_manager(&config(&["node"])).expect("manager");
        assert_eq!(manager.service_names(), ["kubelet"]);
        assert_eq!(
            manager.startup_order().expect("dependency dropped").startup(),
            ["kubelet"]
        );
    }

    #[test]
    fn unconfigured_dependencies_reach_the_manager() {
        let mut config = config(&["controlplane"]);
        config.services[0].depends_on.push("vault".to_owned());
        let manager = build_manager(&config).expect("manager");
        assert!(matches!(
            manager.startup_order(),
            Err(ManagerError::UnknownDependency { service, dependency })
                if service == "etcd" && dependency == "vault"
        ));
    }
}
