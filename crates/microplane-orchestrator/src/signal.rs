//! ---
//! mp_section: "04-orchestration"
//! mp_subsection: "module"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "One-shot lifecycle signals and the shutdown request counter."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::sync::watch;

/// Single-fire, multi-observer notification.
///
/// Clones share the same underlying gate. Once fired the signal stays fired, so
/// observers that attach late still see it.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown input of the manager.
///
/// Every [`request`](ShutdownSignal::request) bumps a counter. The first request
/// starts a graceful shutdown; a request arriving while a shutdown is already
/// in progress forces it to stop waiting.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<u32>>,
}

impl ShutdownSignal {
    /// Create a shutdown input with no pending requests.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Record a shutdown request and return the total number received so far.
    pub fn request(&self) -> u32 {
        let mut total = 0;
        self.tx.send_modify(|count| {
            *count = count.saturating_add(1);
            total = *count;
        });
        total
    }

    /// Number of requests received so far.
    pub fn requests(&self) -> u32 {
        *self.tx.borrow()
    }

    /// Resolve with the request count once it exceeds `seen`.
    pub async fn requested_after(&self, seen: u32) -> u32 {
        let mut rx = self.tx.subscribe();
        let observed = rx.wait_for(|count| *count > seen).await.map(|count| *count);
        match observed {
            Ok(count) => count,
            Err(_) => std::future::pending().await,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn fire_reports_first_call_only() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn late_observers_see_fired_signal() {
        let signal = Signal::new();
        let clone = signal.clone();
        signal.fire();
        timeout(Duration::from_millis(100), clone.wait())
            .await
            .expect("fired signal resolves immediately");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiters_wake_when_fired() {
        let signal = Signal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.fire();
        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter wakes")
                .expect("waiter task joins");
        }
    }

    #[tokio::test]
    async fn shutdown_requests_accumulate() {
        let shutdown = ShutdownSignal::new();
        assert_eq!(shutdown.requests(), 0);
        assert_eq!(shutdown.request(), 1);
        assert_eq!(shutdown.clone().request(), 2);
        assert_eq!(shutdown.requests(), 2);
        let seen = timeout(Duration::from_millis(100), shutdown.requested_after(1))
            .await
            .expect("count already past 1");
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn requested_after_waits_for_new_request() {
        let shutdown = ShutdownSignal::new();
        shutdown.request();
        assert!(
            timeout(Duration::from_millis(30), shutdown.requested_after(1))
                .await
                .is_err(),
            "no second request yet"
        );
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.requested_after(1).await })
        };
        shutdown.request();
        let count = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second request observed")
            .expect("task joins");
        assert_eq!(count, 2);
    }
}
