//! ---
//! mp_section: "01-core-functionality"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Configuration model and loading for the daemon."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Role that enables the control-plane services.
pub const ROLE_CONTROLPLANE: &str = "controlplane";
/// Role that enables the node agent services.
pub const ROLE_NODE: &str = "node";
/// All roles understood by the daemon.
pub const KNOWN_ROLES: [&str; 2] = [ROLE_CONTROLPLANE, ROLE_NODE];

fn default_name() -> String {
    "microplane".to_owned()
}

fn default_roles() -> Vec<String> {
    KNOWN_ROLES.iter().map(|role| (*role).to_owned()).collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/microplane")
}

fn default_audit_log_dir() -> PathBuf {
    PathBuf::from("/var/log/microplane/audit")
}

fn default_grace_period() -> Duration {
    Duration::from_secs(60)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_service_role() -> String {
    ROLE_CONTROLPLANE.to_owned()
}

fn default_probe_interval_ms() -> u64 {
    100
}

/// Primary configuration object for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_audit_log_dir")]
    pub audit_log_dir: PathBuf,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "MICROPLANE_CONFIG";

    /// Load configuration from disk, respecting the `MICROPLANE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Whether the supplied role is enabled for this instance.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the active roles need the daemon to run as root.
    pub fn requires_privileges(&self) -> bool {
        self.has_role(ROLE_NODE)
    }

    /// Services enabled by the active roles, in declaration order.
    pub fn active_services(&self) -> impl Iterator<Item = (&String, &ServiceConfig)> {
        self.services
            .iter()
            .filter(|(_, service)| self.has_role(&service.role))
    }

    /// Validate structural invariants.
    ///
    /// Dependency names are only checked for shape here; resolving them
    /// against the registered set is the orchestrator's job.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("configuration name must not be empty"));
        }
        for role in &self.roles {
            validate_role(role)?;
        }
        if self.services.is_empty() {
            return Err(anyhow!("configuration must declare at least one service"));
        }
        if self.shutdown.grace_period.is_zero() {
            return Err(anyhow!("shutdown grace_period must be greater than zero"));
        }
        for (name, service) in &self.services {
            service.validate(name)?;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            roles: default_roles(),
            data_dir: default_data_dir(),
            audit_log_dir: default_audit_log_dir(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
            services: IndexMap::new(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_role(role: &str) -> Result<()> {
    if KNOWN_ROLES.contains(&role) {
        Ok(())
    } else {
        Err(anyhow!(
            "unknown role '{}'; expected one of: {}",
            role,
            KNOWN_ROLES.join(", ")
        ))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// A single orchestrated component backed by an external command.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_role")]
    pub role: String,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub readiness: ReadinessProbe,
    #[serde(default = "default_stop_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stop_timeout: Duration,
}

impl ServiceConfig {
    /// Convenience constructor used by tests and programmatic setups.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            role: default_service_role(),
            command: command.into(),
            args: Vec::new(),
            env: IndexMap::new(),
            depends_on: Vec::new(),
            readiness: ReadinessProbe::default(),
            stop_timeout: default_stop_timeout(),
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("service names must not be empty"));
        }
        validate_role(&self.role).with_context(|| format!("service '{}'", name))?;
        if self.command.as_os_str().is_empty() {
            return Err(anyhow!("service '{}' must declare a command", name));
        }
        if let Some(dep) = self.depends_on.iter().find(|dep| dep.trim().is_empty()) {
            return Err(anyhow!(
                "service '{}' declares an empty dependency name ({:?})",
                name,
                dep
            ));
        }
        if let ReadinessProbe::Tcp { interval_ms, .. } = &self.readiness {
            if *interval_ms == 0 {
                return Err(anyhow!(
                    "service '{}' readiness interval_ms must be greater than zero",
                    name
                ));
            }
        }
        Ok(())
    }
}

/// How a process-backed service decides it has reached steady state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReadinessProbe {
    /// Ready as soon as the process is spawned.
    #[default]
    Immediate,
    /// Ready after the process survived a fixed delay.
    Delay { seconds: u64 },
    /// Ready once a TCP connection to `address` succeeds.
    Tcp {
        address: SocketAddr,
        #[serde(default = "default_probe_interval_ms")]
        interval_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        name = "edge"
        roles = ["controlplane"]
        data_dir = "/tmp/edge"

        [shutdown]
        grace_period = 5

        [services.etcd]
        command = "/usr/bin/etcd"
        readiness = { kind = "tcp", address = "127.0.0.1:2379" }

        [services.kube-apiserver]
        command = "/usr/bin/kube-apiserver"
        args = ["--etcd-servers=http://127.0.0.1:2379"]
        depends_on = ["etcd"]

        [services.kubelet]
        role = "node"
        command = "/usr/bin/kubelet"
        depends_on = ["kube-apiserver"]
        readiness = { kind = "delay", seconds = 2 }
    "#;

    #[test]
    fn parses_sample_and_preserves_declaration_order() {
        let config: AppConfig = SAMPLE.parse().expect("sample parses");
        assert_eq!(config.name, "edge");
        assert_eq!(config.shutdown.grace_period, Duration::from_secs(5));
        let names: Vec<&str> = config.services.keys().map(String::as_str).collect();
        assert_eq!(names, ["etcd", "kube-apiserver", "kubelet"]);
        assert_eq!(
            config.services["etcd"].readiness,
            ReadinessProbe::Tcp {
                address: "127.0.0.1:2379".parse().unwrap(),
                interval_ms: 100,
            }
        );
        assert_eq!(config.services["kube-apiserver"].stop_timeout, Duration::from_secs(10));
    }

    #[test]
    fn active_services_follow_roles() {
        let config: AppConfig = SAMPLE.parse().expect("sample parses");
        let active: Vec<&str> = config
            .active_services()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(active, ["etcd", "kube-apiserver"]);
    }

    #[test]
    fn defaults_enable_every_role() {
        let config = AppConfig::default();
        assert!(config.has_role(ROLE_CONTROLPLANE));
        assert!(config.has_role(ROLE_NODE));
        assert_eq!(config.shutdown.grace_period, Duration::from_secs(60));
        assert_eq!(config.audit_log_dir, PathBuf::from("/var/log/microplane/audit"));
        assert!(config.requires_privileges());
    }

    #[test]
    fn audit_log_dir_is_configurable() {
        let config: AppConfig = r#"
            roles = ["controlplane"]
            audit_log_dir = "/srv/edge/audit"

            [services.etcd]
            command = "/usr/bin/etcd"
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.audit_log_dir, PathBuf::from("/srv/edge/audit"));
        assert!(!config.requires_privileges());
    }

    #[test]
    fn rejects_unknown_roles() {
        let err = "roles = [\"worker\"]\n[services.a]\ncommand = \"/bin/true\"\n"
            .parse::<AppConfig>()
            .expect_err("unknown role must fail");
        assert!(format!("{:#}", err).contains("unknown role 'worker'"));
    }

    #[test]
    fn rejects_empty_service_set() {
        let err = "name = \"x\"\n"
            .parse::<AppConfig>()
            .expect_err("no services must fail");
        assert!(format!("{:#}", err).contains("at least one service"));
    }

    #[test]
    fn rejects_empty_dependency_names() {
        let err = "[services.a]\ncommand = \"/bin/true\"\ndepends_on = [\"\"]\n"
            .parse::<AppConfig>()
            .expect_err("empty dependency must fail");
        assert!(format!("{:#}", err).contains("empty dependency name"));
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("microplane.toml");
        fs::write(&path, SAMPLE).expect("write config");
        let missing = dir.path().join("missing.toml");

        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).expect("loads");
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.services.len(), 3);
    }
}
