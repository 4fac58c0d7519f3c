/// The ordered startup/shutdown contract around both run modes:
/// configure, run (poll loop or worker + signals), drain, close.
use crate::config::{RunMode, SyncConfig};
use crate::dump;
use crate::feed::FeedSession;
use crate::poll;
use crate::session::{DirectorySession, SessionError};
use crate::signals::SignalCoordinator;
use crate::stop::StopSignal;
use crate::worker;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal failure of one run. The Running-phase error always wins over
/// later teardown errors; the caller sees at most one of these.
#[derive(Debug)]
pub enum RunError {
    /// Session construction failed; nothing to tear down.
    Configure(SessionError),
    /// Could not register termination handlers (persistent mode startup).
    Signals { source: std::io::Error },
    /// The run path failed.
    Session(SessionError),
    /// The worker task panicked; the session is gone.
    WorkerPanic { source: tokio::task::JoinError },
    /// The worker did not honor the stop request within the grace period.
    ShutdownTimeout { grace: Duration },
    /// The shutdown reconnect handshake failed.
    Reconnect(SessionError),
    /// Releasing session resources failed.
    Unbind(SessionError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Configure(e) => write!(f, "session setup failed: {}", e),
            RunError::Signals { source } => {
                write!(f, "could not install signal handlers: {}", source)
            }
            RunError::Session(e) => write!(f, "session failed: {}", e),
            RunError::WorkerPanic { source } => write!(f, "session worker panicked: {}", source),
            RunError::ShutdownTimeout { grace } => write!(
                f,
                "worker ignored stop request for {}s, aborted",
                grace.as_secs()
            ),
            RunError::Reconnect(e) => write!(f, "shutdown reconnect failed: {}", e),
            RunError::Unbind(e) => write!(f, "unbind failed: {}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Configure(e)
            | RunError::Session(e)
            | RunError::Reconnect(e)
            | RunError::Unbind(e) => Some(e),
            RunError::Signals { source } => Some(source),
            RunError::WorkerPanic { source } => Some(source),
            RunError::ShutdownTimeout { .. } => None,
        }
    }
}

/// Run one complete session: configure the feed engine, install signal
/// handling for persistent mode, drive to completion, tear down.
pub async fn run(config: &SyncConfig) -> Result<(), RunError> {
    debug!(state = "unconfigured", "lifecycle starting");
    let listener = dump::for_config(config.suppress_dump);
    let session = FeedSession::configure(config, listener)
        .await
        .map_err(RunError::Configure)?;
    debug!(state = "configured", "session established");

    let stop = StopSignal::new();
    // Handlers go in before the worker starts so no termination request can
    // slip through the gap. One-shot mode runs to natural completion and
    // installs none.
    let coordinator = match config.mode {
        RunMode::Persistent => Some(
            SignalCoordinator::install(stop.clone())
                .map_err(|source| RunError::Signals { source })?,
        ),
        RunMode::OneShot => None,
    };

    let result = drive(session, config, stop).await;

    if let Some(coordinator) = coordinator {
        coordinator.remove();
    }
    result
}

/// Drive an already-configured session through Running, Draining, and Closed.
///
/// Teardown is unconditional: whatever the run path returned, the drain steps
/// still execute, exactly once, in order, on the calling context.
pub async fn drive<S>(session: S, config: &SyncConfig, stop: StopSignal) -> Result<(), RunError>
where
    S: DirectorySession + 'static,
{
    debug!(state = "running", mode = ?config.mode, "entering run path");
    let (mut session, run_outcome) = match config.mode {
        RunMode::OneShot => {
            let mut session = session;
            let outcome = poll::run(&mut session).await.map_err(RunError::Session);
            (session, outcome)
        }
        RunMode::Persistent => {
            let handle = worker::start(session, stop.clone());
            let abort = handle.abort_handle();
            let grace_lapsed = async {
                stop.wait().await;
                match config.shutdown_grace {
                    Some(grace) => tokio::time::sleep(grace).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                joined = handle.join() => match joined {
                    Ok((session, outcome)) => (session, outcome.map_err(RunError::Session)),
                    // Panic in the worker: the session is lost, teardown is
                    // impossible. Surface the panic as the terminal failure.
                    Err(source) => return Err(RunError::WorkerPanic { source }),
                },
                _ = grace_lapsed => {
                    let grace = config.shutdown_grace.unwrap_or_default();
                    warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out");
                    abort.abort();
                    return Err(RunError::ShutdownTimeout { grace });
                }
            }
        }
    };

    debug!(state = "draining", ok = run_outcome.is_ok(), "run path returned");
    let mut teardown_err: Option<RunError> = None;

    if config.mode == RunMode::Persistent {
        session.request_stop();
        // The original channel may be mid-shutdown or severed; the clean
        // shutdown handshake gets a fresh one.
        if let Err(e) = session.reconnect_for_shutdown().await {
            warn!(error = %e, "shutdown reconnect failed");
            teardown_err = Some(RunError::Reconnect(e));
        }
    }

    if let Err(e) = session.unbind().await {
        warn!(error = %e, "unbind failed");
        teardown_err.get_or_insert(RunError::Unbind(e));
    }
    debug!(state = "closed", "lifecycle complete");

    match (run_outcome, teardown_err) {
        (Err(run), _) => Err(run),
        (Ok(()), Some(teardown)) => Err(teardown),
        (Ok(()), None) => {
            info!("session completed gracefully");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LoopResult;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    /// Session that records every contract call in order.
    struct TracedSession {
        log: CallLog,
        units: Vec<Result<LoopResult, SessionError>>,
        run_fails: bool,
        ignore_stop: bool,
        reconnect_fails: bool,
        unbind_fails: bool,
    }

    impl TracedSession {
        fn new(log: CallLog) -> Self {
            Self {
                log,
                units: Vec::new(),
                run_fails: false,
                ignore_stop: false,
                reconnect_fails: false,
                unbind_fails: false,
            }
        }
    }

    #[async_trait]
    impl DirectorySession for TracedSession {
        async fn run_unit(&mut self) -> Result<LoopResult, SessionError> {
            self.log.lock().unwrap().push("run_unit");
            self.units.remove(0)
        }

        async fn run_until_stopped(&mut self, stop: &StopSignal) -> Result<(), SessionError> {
            self.log.lock().unwrap().push("run_until_stopped");
            if self.run_fails {
                return Err(SessionError::RemoteClosed);
            }
            if self.ignore_stop {
                std::future::pending::<()>().await;
            }
            stop.wait().await;
            Ok(())
        }

        fn request_stop(&self) {
            self.log.lock().unwrap().push("request_stop");
        }

        async fn reconnect_for_shutdown(&mut self) -> Result<(), SessionError> {
            self.log.lock().unwrap().push("reconnect");
            if self.reconnect_fails {
                return Err(SessionError::Protocol {
                    message: "reconnect refused".to_string(),
                });
            }
            Ok(())
        }

        async fn unbind(&mut self) -> Result<(), SessionError> {
            self.log.lock().unwrap().push("unbind");
            if self.unbind_fails {
                return Err(SessionError::Protocol {
                    message: "unbind refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config(mode: RunMode) -> SyncConfig {
        SyncConfig {
            host: "localhost".to_string(),
            port: 7389,
            prefix: PathBuf::from("unused"),
            mode,
            suppress_dump: true,
            upgrade: false,
            shutdown_grace: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn test_one_shot_runs_units_then_unbinds_without_reconnect() {
        let log: CallLog = Default::default();
        let mut session = TracedSession::new(log.clone());
        session.units = vec![
            Ok(LoopResult::Pending),
            Ok(LoopResult::Pending),
            Ok(LoopResult::Pending),
            Ok(LoopResult::Done),
        ];
        drive(session, &config(RunMode::OneShot), StopSignal::new())
            .await
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["run_unit", "run_unit", "run_unit", "run_unit", "unbind"]
        );
    }

    #[tokio::test]
    async fn test_one_shot_failure_still_unbinds_and_wins_over_teardown() {
        let log: CallLog = Default::default();
        let mut session = TracedSession::new(log.clone());
        session.units = vec![Err(SessionError::RemoteClosed)];
        session.unbind_fails = true;
        let err = drive(session, &config(RunMode::OneShot), StopSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Session(SessionError::RemoteClosed)
        ));
        assert_eq!(*log.lock().unwrap(), vec!["run_unit", "unbind"]);
    }

    #[tokio::test]
    async fn test_persistent_signaled_stop_drains_in_order() {
        let log: CallLog = Default::default();
        let session = TracedSession::new(log.clone());
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // Double set: the second delivery must be a harmless no-op.
            trigger.set();
            trigger.set();
        });
        drive(session, &config(RunMode::Persistent), stop)
            .await
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["run_until_stopped", "request_stop", "reconnect", "unbind"]
        );
    }

    #[tokio::test]
    async fn test_persistent_failure_still_drains_and_original_error_wins() {
        let log: CallLog = Default::default();
        let mut session = TracedSession::new(log.clone());
        session.run_fails = true;
        session.reconnect_fails = true;
        let err = drive(session, &config(RunMode::Persistent), StopSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Session(SessionError::RemoteClosed)
        ));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["run_until_stopped", "request_stop", "reconnect", "unbind"]
        );
    }

    #[tokio::test]
    async fn test_teardown_error_surfaces_when_run_succeeded() {
        let log: CallLog = Default::default();
        let mut session = TracedSession::new(log.clone());
        session.reconnect_fails = true;
        let stop = StopSignal::new();
        stop.set();
        let err = drive(session, &config(RunMode::Persistent), stop)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Reconnect(_)));
        // Unbind is still attempted after the failed reconnect.
        assert!(log.lock().unwrap().contains(&"unbind"));
    }

    #[tokio::test]
    async fn test_grace_period_lapse_aborts_worker() {
        let log: CallLog = Default::default();
        let mut session = TracedSession::new(log.clone());
        session.ignore_stop = true;
        let mut cfg = config(RunMode::Persistent);
        cfg.shutdown_grace = Some(Duration::from_millis(50));
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.set();
        });
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            drive(session, &cfg, stop),
        )
        .await
        .expect("grace lapse must bound the join")
        .unwrap_err();
        assert!(matches!(err, RunError::ShutdownTimeout { .. }));
    }
}
