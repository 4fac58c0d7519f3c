/// Persistent mode driver: host the session's indefinite receive/apply loop
/// on one background task so the main context stays free for signal handling.
use crate::session::{DirectorySession, SessionError};
use crate::stop::StopSignal;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// Handle to the single background worker task.
///
/// The session travels into the task at `start` and back out through `join`,
/// so teardown always happens on the main context after the run path has
/// fully returned.
pub struct WorkerHandle<S> {
    task: JoinHandle<(S, Result<(), SessionError>)>,
}

/// Spawn the worker task for a persistent session.
///
/// If the stop flag is already set the run body is never entered: the worker
/// notes the stop request on the session and exits promptly. Otherwise the
/// session's own loop runs until it observes the flag (graceful, `Ok`) or
/// ends abnormally. Cancellation stays cooperative; nothing here kills the
/// task.
pub fn start<S>(session: S, stop: StopSignal) -> WorkerHandle<S>
where
    S: DirectorySession + 'static,
{
    let task = tokio::spawn(async move {
        let mut session = session;
        if stop.is_set() {
            info!("stop already requested, skipping persistent loop");
            session.request_stop();
            return (session, Ok(()));
        }
        debug!("persistent worker entering receive loop");
        let outcome = session.run_until_stopped(&stop).await;
        debug!(ok = outcome.is_ok(), "persistent worker exiting");
        (session, outcome)
    });
    WorkerHandle { task }
}

impl<S> WorkerHandle<S> {
    /// Block the caller until the worker has returned.
    ///
    /// Yields the session together with the run outcome. `Err` means the
    /// worker panicked or was aborted — the session is gone and no teardown
    /// is possible.
    pub async fn join(self) -> Result<(S, Result<(), SessionError>), JoinError> {
        self.task.await
    }

    /// Handle for aborting the worker once the shutdown grace period has
    /// lapsed. Aborting gives up on the session entirely.
    pub fn abort_handle(&self) -> tokio::task::AbortHandle {
        self.task.abort_handle()
    }
}
