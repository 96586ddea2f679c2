//! ---
//! mp_section: "05-process-services"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Readiness probes for process-backed services."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::time::Duration;

use microplane_common::ReadinessProbe;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::debug;

/// Log every this many failed connection attempts.
const TCP_LOG_EVERY: u64 = 50;

/// Resolves once `probe` considers the service ready.
///
/// Never fails: a probe that cannot succeed simply keeps waiting, and the caller
/// races it against process exit and cancellation.
pub(crate) async fn wait_until_ready(service: &str, probe: &ReadinessProbe) {
    match probe {
        ReadinessProbe::Immediate => {}
        ReadinessProbe::Delay { seconds } => sleep(Duration::from_secs(*seconds)).await,
        ReadinessProbe::Tcp {
            address,
            interval_ms,
        } => {
            let interval = Duration::from_millis((*interval_ms).max(1));
            let mut attempts: u64 = 0;
            loop {
                match TcpStream::connect(address).await {
                    Ok(_) => {
                        debug!(service = %service, %address, attempts, "tcp readiness probe succeeded");
                        return;
                    }
                    Err(err) => {
                        attempts += 1;
                        if attempts % TCP_LOG_EVERY == 0 {
                            debug!(service = %service, %address, attempts, error = %err, "still waiting for tcp readiness");
                        }
                    }
                }
                sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn immediate_probe_resolves_at_once() {
        timeout(
            Duration::from_millis(50),
            wait_until_ready("svc", &ReadinessProbe::Immediate),
        )
        .await
        .expect("immediate probe resolves");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tcp_probe_waits_for_listener() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = reserved.local_addr().expect("local addr");
        drop(reserved);

        let probe = ReadinessProbe::Tcp {
            address,
            interval_ms: 10,
        };
        let waiting = tokio::spawn(async move { wait_until_ready("svc", &probe).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished(), "nothing listens yet");

        let _listener = TcpListener::bind(address).await.expect("rebind");
        timeout(Duration::from_secs(2), waiting)
            .await
            .expect("probe resolves once listening")
            .expect("probe task joins");
    }
}
