/// The contract surface the runner core consumes from a synchronization
/// session. The concrete engine (`feed::FeedSession`) performs the actual
/// exchange with the directory service; the core never looks past this trait.
use crate::stop::StopSignal;
use async_trait::async_trait;
use std::path::PathBuf;

/// Outcome of one bounded unit of one-shot work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopResult {
    /// More work pending — call `run_unit` again.
    Pending,
    /// Initial catch-up is complete.
    Done,
}

/// Errors raised by a session while running or tearing down.
#[derive(Debug)]
pub enum SessionError {
    /// Transport-level failure on the feed connection.
    Io { source: std::io::Error },
    /// The remote closed the connection while work was still expected.
    RemoteClosed,
    /// The remote sent a frame we could not parse or did not expect.
    Protocol { message: String },
    /// Failed to read or write the local data file.
    DataFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io { source } => write!(f, "feed connection error: {}", source),
            SessionError::RemoteClosed => {
                write!(f, "directory service closed the connection")
            }
            SessionError::Protocol { message } => write!(f, "protocol error: {}", message),
            SessionError::DataFile { path, source } => {
                write!(f, "data file error at {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io { source } => Some(source),
            SessionError::DataFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One synchronization session against the directory service.
///
/// Exactly one session exists per program run and it is only ever operated by
/// one execution context at a time: the poll loop (one-shot) or the persistent
/// worker (persistent), then the lifecycle's teardown after the run path has
/// fully returned.
#[async_trait]
pub trait DirectorySession: Send {
    /// Perform one bounded unit of catch-up work. May block on network I/O.
    ///
    /// Each invocation is idempotent-resumable: the session tracks its own
    /// progress cursor, so there is no retry logic above this call.
    async fn run_unit(&mut self) -> Result<LoopResult, SessionError>;

    /// Run the indefinite receive/apply loop until `stop` is set (graceful,
    /// returns `Ok`) or the session ends abnormally (error or remote close).
    ///
    /// Cancellation is cooperative: the session observes `stop` at its own
    /// checkpoints and is never forcibly interrupted.
    async fn run_until_stopped(&mut self, stop: &StopSignal) -> Result<(), SessionError>;

    /// Ask the session to stop at its next safe checkpoint. Thread-safe and
    /// idempotent; callable from any context.
    fn request_stop(&self);

    /// Re-establish a control channel expressly for the clean shutdown
    /// handshake. Persistent mode only; the original channel may already be
    /// mid-shutdown or severed.
    async fn reconnect_for_shutdown(&mut self) -> Result<(), SessionError>;

    /// Release all session resources. Final step on every exit path.
    async fn unbind(&mut self) -> Result<(), SessionError>;
}
