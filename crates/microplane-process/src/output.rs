//! ---
//! mp_section: "05-process-services"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Forwarding of child output into tracing."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long forwarders may keep reading after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Take the child's piped stdout and stderr and forward them line by line.
pub(crate) fn forward(service: &str, child: &mut Child) -> Vec<JoinHandle<()>> {
    let mut forwarders = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(spawn_forwarder(service.to_owned(), stdout, Stream::Stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(spawn_forwarder(service.to_owned(), stderr, Stream::Stderr));
    }
    forwarders
}

fn spawn_forwarder<R>(service: String, reader: R, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match stream {
                Stream::Stdout => info!(service = %service, "{}", line),
                Stream::Stderr => warn!(service = %service, "{}", line),
            }
        }
    })
}

/// Wait briefly for the forwarders to reach end of stream.
///
/// Grandchildren can inherit the pipes and keep them open; forwarders still
/// running after [`DRAIN_TIMEOUT`] are aborted.
pub(crate) async fn drain(service: &str, forwarders: Vec<JoinHandle<()>>) {
    for mut forwarder in forwarders {
        if timeout(DRAIN_TIMEOUT, &mut forwarder).await.is_err() {
            debug!(service = %service, "output still open after exit, detaching reader");
            forwarder.abort();
        }
    }
}
