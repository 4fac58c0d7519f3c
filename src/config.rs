use std::path::PathBuf;
use std::time::Duration;

/// How long the session should remain active. Chosen once at startup,
/// immutable for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Finish after the initial catch-up completes.
    OneShot,
    /// Stay connected indefinitely, receiving live updates.
    Persistent,
}

/// Resolved, immutable configuration for one run.
///
/// Everything mode-related travels in this one value; nothing is read from
/// globals after startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory service endpoint, `host:port`.
    pub host: String,
    pub port: u16,
    /// Local data-file path prefix; state persists at `<prefix>.json`.
    pub prefix: PathBuf,
    pub mode: RunMode,
    /// Suppress the end-of-refresh directory dump.
    pub suppress_dump: bool,
    /// Request a connection upgrade during the hello handshake, before
    /// authenticating.
    pub upgrade: bool,
    /// Grace period between the stop flag being set and the worker being
    /// aborted. `None` means wait indefinitely.
    pub shutdown_grace: Option<Duration>,
}

/// Fatal pre-run configuration failure.
#[derive(Debug)]
pub enum ConfigError {
    /// The connection URL could not be parsed into host and port.
    BadUrl { url: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::BadUrl { url, reason } => {
                write!(f, "invalid connection URL {:?}: {}", url, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const DEFAULT_PORT: u16 = 7389;

/// Parse the positional connection URL into host and port.
///
/// Accepts `host`, `host:port`, or `syncfeed://host[:port]`. The port
/// defaults to 7389 when absent.
pub fn parse_endpoint(url: &str) -> Result<(String, u16), ConfigError> {
    let trimmed = url.strip_prefix("syncfeed://").unwrap_or(url);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::BadUrl {
            url: url.to_string(),
            reason: "empty host".to_string(),
        });
    }
    match trimmed.rsplit_once(':') {
        None => Ok((trimmed.to_string(), DEFAULT_PORT)),
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ConfigError::BadUrl {
                    url: url.to_string(),
                    reason: "empty host".to_string(),
                });
            }
            let port: u16 = port.parse().map_err(|_| ConfigError::BadUrl {
                url: url.to_string(),
                reason: format!("bad port {:?}", port),
            })?;
            Ok((host.to_string(), port))
        }
    }
}

impl SyncConfig {
    /// Path of the persisted state file (`<prefix>.json`).
    pub fn data_file(&self) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }
}
