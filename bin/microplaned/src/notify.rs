//! ---
//! mp_section: "06-daemon"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Readiness notifications to the service supervisor."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::ffi::OsStr;

use anyhow::{Context, Result};
use tracing::debug;

const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Startup finished; every service reported ready.
pub const READY: &str = "READY=1";
/// Shutdown has begun.
pub const STOPPING: &str = "STOPPING=1";

/// Send `state` to the socket named by `NOTIFY_SOCKET`.
///
/// Returns `Ok(false)` when the daemon is not running under a notifying
/// supervisor.
pub fn notify(state: &str) -> Result<bool> {
    match std::env::var_os(NOTIFY_SOCKET) {
        Some(socket) if !socket.is_empty() => {
            send(&socket, state)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(unix)]
fn send(socket: &OsStr, state: &str) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::net::UnixDatagram;

    let datagram = UnixDatagram::unbound().context("unable to create notify socket")?;
    let bytes = socket.as_bytes();
    if let Some(name) = bytes.strip_prefix(b"@") {
        send_abstract(&datagram, name, state)?;
    } else {
        datagram
            .send_to(state.as_bytes(), socket)
            .with_context(|| format!("unable to notify {}", socket.to_string_lossy()))?;
    }
    debug!(socket = %socket.to_string_lossy(), state, "supervisor notified");
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(datagram: &std::os::unix::net::UnixDatagram, name: &[u8], state: &str) -> Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let address = SocketAddr::from_abstract_name(name).context("invalid abstract notify socket")?;
    datagram
        .send_to_addr(state.as_bytes(), &address)
        .context("unable to notify abstract socket")?;
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn send_abstract(_datagram: &std::os::unix::net::UnixDatagram, _name: &[u8], _state: &str) -> Result<()> {
    anyhow::bail!("abstract notify sockets are only supported on linux")
}

#[cfg(not(unix))]
fn send(_socket: &OsStr, _state: &str) -> Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn sends_state_to_path_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notify.sock");
        let listener = UnixDatagram::bind(&path).expect("bind notify socket");

        send(path.as_os_str(), READY).expect("notify");

        let mut buffer = [0u8; 64];
        let received = listener.recv(&mut buffer).expect("datagram received");
        assert_eq!(&buffer[..received], READY.as_bytes());
    }

    #[test]
    fn missing_socket_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.sock");
        assert!(send(path.as_os_str(), STOPPING).is_err());
    }
}
