//! ---
//! mp_section: "06-daemon"
//! mp_subsection: "binary"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Binary entrypoint for the microplane daemon."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
mod assemble;
mod notify;
mod version;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use microplane_common::{init_tracing, AppConfig, ROLE_NODE};
use microplane_orchestrator::{ServiceManager, ShutdownSignal, Signal, SystemState};
use tracing::{error, info, warn};

use crate::assemble::build_manager;
use crate::version::VersionInfo;

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] =
    ["/etc/microplane/config.toml", "configs/microplane.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "microplane service orchestrator daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR", help = "Override the data directory")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR", help = "Override the audit log directory")]
    audit_log_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "ROLES",
        value_delimiter = ',',
        help = "Comma separated roles to activate (controlplane, node)"
    )]
    roles: Option<Vec<String>>,

    #[arg(long, global = true, help = "Print the startup order and exit")]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the configured services")]
    Run,
    #[command(about = "Print extended version information")]
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if matches!(cli.command, Some(Commands::Version)) {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.extend(DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from));
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(roles) = cli.roles {
        config.roles = roles;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(audit_log_dir) = cli.audit_log_dir {
        config.audit_log_dir = audit_log_dir;
    }
    config
        .validate()
        .context("invalid configuration after command line overrides")?;

    if cli.dry_run {
        let order = build_manager(&config)?.startup_order()?;
        for (position, name) in order.startup().iter().enumerate() {
            println!("{}. {}", position + 1, name);
        }
        return Ok(());
    }

    ensure_privileges(&config, effective_uid())?;
    init_tracing("microplaned", &config.name, &config.logging)?;
    info!(
        version = %version.banner(),
        config = %loaded.source.display(),
        roles = ?config.roles,
        "configuration loaded"
    );
    prepare_private_dir("data", &config.data_dir)?;
    prepare_private_dir("audit log", &config.audit_log_dir)?;
    let manager = build_manager(&config)?;
    run_daemon(manager).await
}

/// Refuse to start node services without root.
fn ensure_privileges(config: &AppConfig, euid: u32) -> Result<()> {
    if config.requires_privileges() && euid != 0 {
        bail!(
            "role '{}' requires running as root (effective uid {})",
            ROLE_NODE,
            euid
        );
    }
    Ok(())
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    nix::unistd::geteuid().as_raw()
}

#[cfg(not(unix))]
fn effective_uid() -> u32 {
    0
}

/// Create `path` and its parents, readable only by the daemon user.
fn prepare_private_dir(kind: &str, path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .with_context(|| format!("unable to create {} directory {}", kind, path.display()))?;
    info!(directory = %path.display(), kind, "directory ready");
    Ok(())
}

async fn run_daemon(manager: ServiceManager) -> Result<()> {
    let group = manager.name().to_owned();
    let shutdown = ShutdownSignal::new();
    let ready = Signal::new();
    let stopped = Signal::new();
    let mut state = manager.subscribe_state();
    let mut terminations = Terminations::install()?;

    let mut task = tokio::spawn(manager.run(shutdown.clone(), ready.clone(), stopped.clone()));
    let mut announced_ready = false;
    let mut watching_state = true;

    let result = loop {
        tokio::select! {
            joined = &mut task => break joined.context("service manager task failed")?,
            () = ready.wait(), if !announced_ready => {
                announced_ready = true;
                info!(group = %group, "all services ready");
                send_notification(notify::READY);
            }
            changed = state.changed(), if watching_state => match changed {
                Ok(()) => {
                    let current = *state.borrow_and_update();
                    if current == SystemState::ShuttingDown {
                        send_notification(notify::STOPPING);
                    }
                }
                Err(_) => watching_state = false,
            },
            signal = terminations.next() => {
                let requests = shutdown.request();
                if requests == 1 {
                    info!(group = %group, signal, "termination requested; stopping services");
                } else {
                    warn!(group = %group, signal, requests, "termination repeated; forcing shutdown");
                }
            }
        }
    };

    match result {
        Ok(()) => {
            info!(group = %group, stopped = stopped.is_fired(), "daemon exiting");
            Ok(())
        }
        Err(err) => {
            error!(group = %group, error = %err, "service manager reported an error");
            Err(err.into())
        }
    }
}

fn send_notification(state: &str) {
    if let Err(err) = notify::notify(state) {
        warn!(state, error = %format!("{:#}", err), "supervisor notification failed");
    }
}

/// Process termination signals mapped to shutdown requests.
struct Terminations {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Terminations {
    #[cfg(unix)]
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("install SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("install SIGTERM handler")?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Resolves with the signal name each time one arrives.
    #[cfg(unix)]
    async fn next(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> &'static str {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "CTRL_C"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "microplaned",
            "run",
            "--config",
            "/tmp/microplane.toml",
            "--roles",
            "controlplane,node",
            "--dry-run",
        ])
        .expect("arguments parse");
        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/microplane.toml")));
        assert_eq!(
            cli.roles,
            Some(vec!["controlplane".to_owned(), "node".to_owned()])
        );
        assert!(cli.dry_run);
    }

    #[test]
    fn subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["microplaned", "--data-dir", "/srv/microplane"])
            .expect("arguments parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.data_dir, Some(PathBuf::from("/srv/microplane")));
    }

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path).expect("metadata").permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[test]
    fn data_dir_is_private() {
        let root = tempfile::tempdir().expect("tempdir");
        let data_dir = root.path().join("nested").join("data");
        prepare_private_dir("data", &data_dir).expect("created");
        assert_eq!(mode_of(&data_dir), 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn audit_log_dir_flag_overrides_and_is_private() {
        let root = tempfile::tempdir().expect("tempdir");
        let audit = root.path().join("audit");
        let cli = Cli::try_parse_from([
            "microplaned",
            "run",
            "--audit-log-dir",
            audit.to_str().expect("utf-8 tempdir"),
        ])
        .expect("arguments parse");
        assert_eq!(cli.audit_log_dir.as_deref(), Some(audit.as_path()));

        prepare_private_dir("audit log", &audit).expect("created");
        assert_eq!(mode_of(&audit), 0o700);
    }

    fn config_with_roles(roles: &[&str]) -> AppConfig {
        AppConfig {
            roles: roles.iter().map(|role| (*role).to_owned()).collect(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn node_role_requires_root() {
        let node = config_with_roles(&["controlplane", "node"]);
        let err = ensure_privileges(&node, 1000).expect_err("unprivileged node refused");
        assert!(err.to_string().contains("'node' requires running as root"));
        ensure_privileges(&node, 0).expect("root may run node services");
    }

    #[test]
    fn controlplane_only_runs_unprivileged() {
        let controlplane = config_with_roles(&["controlplane"]);
        ensure_privileges(&controlplane, 1000).expect("no privileges needed");
    }
}
