/// One-shot mode driver: repeat bounded units of work on the calling task
/// until the session reports the initial catch-up is done.
use crate::session::{DirectorySession, LoopResult, SessionError};
use tracing::debug;

/// Drive `session` to completion of its initial catch-up.
///
/// Calls `run_unit` until it yields `Done`. A failure halts the loop
/// immediately and propagates — there is no retry or backoff here; the
/// session's own progress cursor makes a fresh program run resumable.
///
/// Deliberately not interruptible by the stop flag: one-shot mode runs to
/// natural completion.
pub async fn run<S: DirectorySession>(session: &mut S) -> Result<(), SessionError> {
    let mut units: u64 = 0;
    loop {
        match session.run_unit().await? {
            LoopResult::Pending => {
                units += 1;
            }
            LoopResult::Done => {
                debug!(units = units + 1, "catch-up complete");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::StopSignal;
    use async_trait::async_trait;

    /// Session scripted with a fixed sequence of `run_unit` outcomes.
    struct ScriptedSession {
        script: Vec<Result<LoopResult, SessionError>>,
        calls: usize,
    }

    impl ScriptedSession {
        fn new(script: Vec<Result<LoopResult, SessionError>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    #[async_trait]
    impl DirectorySession for ScriptedSession {
        async fn run_unit(&mut self) -> Result<LoopResult, SessionError> {
            let step = self.script.remove(0);
            self.calls += 1;
            step
        }

        async fn run_until_stopped(&mut self, _stop: &StopSignal) -> Result<(), SessionError> {
            unreachable!("one-shot tests never enter the persistent loop")
        }

        fn request_stop(&self) {}

        async fn reconnect_for_shutdown(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn unbind(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loops_until_done_with_exact_call_count() {
        // Three pending units then done: four calls total.
        let mut session = ScriptedSession::new(vec![
            Ok(LoopResult::Pending),
            Ok(LoopResult::Pending),
            Ok(LoopResult::Pending),
            Ok(LoopResult::Done),
        ]);
        run(&mut session).await.unwrap();
        assert_eq!(session.calls, 4);
    }

    #[tokio::test]
    async fn test_immediate_done_makes_one_call() {
        let mut session = ScriptedSession::new(vec![Ok(LoopResult::Done)]);
        run(&mut session).await.unwrap();
        assert_eq!(session.calls, 1);
    }

    #[tokio::test]
    async fn test_failure_halts_immediately_without_retry() {
        let mut session = ScriptedSession::new(vec![
            Ok(LoopResult::Pending),
            Err(SessionError::RemoteClosed),
            // Never reached; a retry would consume this and pass.
            Ok(LoopResult::Done),
        ]);
        let err = run(&mut session).await.unwrap_err();
        assert!(matches!(err, SessionError::RemoteClosed));
        assert_eq!(session.calls, 2);
    }
}
