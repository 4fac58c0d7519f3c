/// Signal handling for graceful shutdown.
///
/// SIGHUP, SIGINT, and SIGTERM all translate into the same idempotent stop
/// request. Re-delivery after the flag is already set is a logged no-op; the
/// listeners never touch the session and never block — teardown belongs to
/// the lifecycle, after the worker join.
use crate::stop::StopSignal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct SignalCoordinator {
    listener: JoinHandle<()>,
}

impl SignalCoordinator {
    /// Register listeners for hang-up, interrupt, and terminate.
    ///
    /// Registration failure is fatal to startup: a persistent run without
    /// cancellation would strand the process on kill requests that bypass
    /// graceful teardown.
    pub fn install(stop: StopSignal) -> std::io::Result<Self> {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let listener = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = hangup.recv() => "SIGHUP",
                    _ = interrupt.recv() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                };
                if stop.set() {
                    info!(signal = name, "termination requested, stopping session");
                } else {
                    debug!(signal = name, "stop already requested, ignoring");
                }
            }
        });

        Ok(Self { listener })
    }

    /// Tear the listener down once shutdown is underway. Further deliveries
    /// fall back to the default disposition, which is acceptable: the stop
    /// flag is already set by then.
    pub fn remove(self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    // One test covers delivery and re-delivery: raising SIGHUP in a second
    // test could race with this one's listener teardown.
    #[tokio::test]
    async fn test_hangup_sets_stop_flag_and_redelivery_is_harmless() {
        let stop = StopSignal::new();
        let coordinator = SignalCoordinator::install(stop.clone()).unwrap();

        raise(Signal::SIGHUP).unwrap();
        tokio::time::timeout(Duration::from_secs(2), stop.wait())
            .await
            .expect("SIGHUP should set the stop flag");
        assert!(stop.is_set());

        // Second delivery after the flag is set must be a no-op.
        raise(Signal::SIGHUP).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stop.is_set());

        coordinator.remove();
    }

    #[tokio::test]
    async fn test_install_succeeds_on_fresh_runtime() {
        let coordinator = SignalCoordinator::install(StopSignal::new()).unwrap();
        coordinator.remove();
    }
}
