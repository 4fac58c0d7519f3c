/// Concrete synchronization session: newline-delimited JSON frames over TCP
/// against the directory service, with a persisted sync cookie so any run can
/// resume where the previous one left off.
use crate::config::SyncConfig;
use crate::dump::RefreshListener;
use crate::session::{DirectorySession, LoopResult, SessionError};
use crate::stop::StopSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// One frame of the feed exchange, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client opener: resume cursor plus the negotiated options.
    Hello {
        cookie: Option<String>,
        persist: bool,
        upgrade: bool,
    },
    /// Server acknowledgement of `hello` and `bye`.
    Ack,
    /// Add or replace one directory entry.
    Entry { dn: String, attrs: Value },
    /// Remove one directory entry.
    Delete { dn: String },
    /// Updated resume cursor, sent at the server's discretion.
    Cookie { value: String },
    /// The initial catch-up is complete. Live updates follow in persist mode.
    RefreshDone { cookie: Option<String> },
    /// Clean shutdown handshake, carrying the final cursor.
    Bye { cookie: Option<String> },
}

/// State persisted at `<prefix>.json` between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FeedState {
    cookie: Option<String>,
    entries: BTreeMap<String, Value>,
}

struct FeedConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FeedConn {
    async fn open(host: &str, port: u16) -> Result<Self, SessionError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| SessionError::Io { source })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(frame).map_err(|e| SessionError::Protocol {
            message: format!("could not encode frame: {e}"),
        })?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|source| SessionError::Io { source })
    }

    /// Read the next frame; `None` on a clean EOF.
    async fn recv(&mut self) -> Result<Option<Frame>, SessionError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|source| SessionError::Io { source })?;
        if n == 0 {
            return Ok(None);
        }
        let frame = serde_json::from_str(line.trim_end()).map_err(|e| SessionError::Protocol {
            message: format!("bad frame {:?}: {e}", line.trim_end()),
        })?;
        Ok(Some(frame))
    }

    async fn expect_ack(&mut self) -> Result<(), SessionError> {
        match self.recv().await? {
            Some(Frame::Ack) => Ok(()),
            Some(other) => Err(SessionError::Protocol {
                message: format!("expected ack, got {:?}", other),
            }),
            None => Err(SessionError::RemoteClosed),
        }
    }
}

/// The session engine. Owned by the lifecycle; operated by exactly one
/// execution context at a time.
pub struct FeedSession {
    host: String,
    port: u16,
    data_file: PathBuf,
    conn: Option<FeedConn>,
    state: FeedState,
    listener: Box<dyn RefreshListener>,
    // Internal stop request, merged with the external flag at checkpoints.
    local_stop: StopSignal,
}

impl FeedSession {
    /// Connect, perform the hello handshake, and load any persisted cursor.
    ///
    /// Failure leaves nothing behind: no partial session is retained.
    pub async fn configure(
        config: &SyncConfig,
        listener: Box<dyn RefreshListener>,
    ) -> Result<Self, SessionError> {
        let data_file = config.data_file();
        let state = load_state(&data_file)?;
        match &state.cookie {
            Some(cookie) => debug!(cookie = %cookie, "resuming from persisted cursor"),
            None => debug!("no persisted cursor, full refresh"),
        }

        let mut conn = FeedConn::open(&config.host, config.port).await?;
        conn.send(&Frame::Hello {
            cookie: state.cookie.clone(),
            persist: config.mode == crate::config::RunMode::Persistent,
            upgrade: config.upgrade,
        })
        .await?;
        conn.expect_ack().await?;
        info!(host = %config.host, port = config.port, "session established");

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            data_file,
            conn: Some(conn),
            state,
            listener,
            local_stop: StopSignal::new(),
        })
    }

    fn conn_mut(&mut self) -> Result<&mut FeedConn, SessionError> {
        self.conn.as_mut().ok_or(SessionError::Protocol {
            message: "session is not connected".to_string(),
        })
    }

    fn persist_state(&self) -> Result<(), SessionError> {
        let body = serde_json::to_vec_pretty(&self.state).map_err(|e| SessionError::Protocol {
            message: format!("could not encode state: {e}"),
        })?;
        std::fs::write(&self.data_file, body).map_err(|source| SessionError::DataFile {
            path: self.data_file.clone(),
            source,
        })
    }

    /// Apply one server frame to the entry map. Returns `Done` only for
    /// `refresh_done`, which also persists state and fires the listener.
    fn apply(&mut self, frame: Frame) -> Result<LoopResult, SessionError> {
        match frame {
            Frame::Entry { dn, attrs } => {
                debug!(%dn, "entry");
                self.state.entries.insert(dn, attrs);
                Ok(LoopResult::Pending)
            }
            Frame::Delete { dn } => {
                debug!(%dn, "delete");
                self.state.entries.remove(&dn);
                Ok(LoopResult::Pending)
            }
            Frame::Cookie { value } => {
                self.state.cookie = Some(value);
                Ok(LoopResult::Pending)
            }
            Frame::RefreshDone { cookie } => {
                if cookie.is_some() {
                    self.state.cookie = cookie;
                }
                self.persist_state()?;
                self.listener.refresh_done(&self.state.entries);
                Ok(LoopResult::Done)
            }
            other => Err(SessionError::Protocol {
                message: format!("unexpected frame {:?}", other),
            }),
        }
    }
}

fn load_state(path: &Path) -> Result<FeedState, SessionError> {
    match std::fs::read(path) {
        Ok(body) => serde_json::from_slice(&body).map_err(|e| SessionError::DataFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FeedState::default()),
        Err(source) => Err(SessionError::DataFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl DirectorySession for FeedSession {
    async fn run_unit(&mut self) -> Result<LoopResult, SessionError> {
        let frame = self.conn_mut()?.recv().await?;
        match frame {
            Some(frame) => self.apply(frame),
            // EOF before refresh_done means the catch-up never finished.
            None => Err(SessionError::RemoteClosed),
        }
    }

    async fn run_until_stopped(&mut self, stop: &StopSignal) -> Result<(), SessionError> {
        let local_stop = self.local_stop.clone();
        loop {
            if stop.is_set() || local_stop.is_set() {
                self.persist_state()?;
                return Ok(());
            }
            let frame = {
                let conn = self.conn_mut()?;
                tokio::select! {
                    _ = stop.wait() => None,
                    _ = local_stop.wait() => None,
                    frame = conn.recv() => match frame? {
                        Some(frame) => Some(frame),
                        None => return Err(SessionError::RemoteClosed),
                    },
                }
            };
            match frame {
                // A stop branch fired; the loop head persists and returns.
                None => continue,
                Some(frame) => {
                    // In persist mode refresh_done is a milestone, not the
                    // end: live updates keep arriving on the same channel.
                    self.apply(frame)?;
                }
            }
        }
    }

    fn request_stop(&self) {
        if self.local_stop.set() {
            debug!("session stop requested");
        }
    }

    async fn reconnect_for_shutdown(&mut self) -> Result<(), SessionError> {
        debug!(host = %self.host, port = self.port, "reconnecting for shutdown handshake");
        let mut conn = FeedConn::open(&self.host, self.port).await?;
        conn.send(&Frame::Bye {
            cookie: self.state.cookie.clone(),
        })
        .await?;
        conn.expect_ack().await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn unbind(&mut self) -> Result<(), SessionError> {
        self.persist_state()?;
        if self.conn.take().is_some() {
            debug!("session unbound");
        } else {
            warn!("unbind with no live connection");
        }
        Ok(())
    }
}
