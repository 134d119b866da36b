//! Connection session
//!
//! A session owns one open reader port. Its task runs a select loop over
//! outbound commands and inbound bytes, frames the byte stream into lines
//! with [`LineCodec`] and forwards every complete line, in byte order, as a
//! [`SessionEvent`].
//!
//! The port is closed when the task ends, whatever ends it: a close
//! request, EOF, an I/O error, or the [`Session`] being dropped.

use std::time::Duration;

use cart_detect::{DetectError, Transport};
use cart_protocol::{FrameCodec, LineCodec};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;

/// Identifies a session; ids are never reused by a supervisor
pub type SessionId = u64;

/// Read buffer size for the session task
const READ_BUFFER_SIZE: usize = 1024;

/// Commands buffered for the session task
const COMMAND_QUEUE: usize = 16;

/// How long `close()` waits for the task before aborting it
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Time allowed for flushing the port on close
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Session state: `Connected -> Disconnected`
///
/// A session only exists once its port is open. `Disconnected` is terminal;
/// a new connection is a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the session was dropped
    Requested,
    /// The reader closed the stream
    Eof,
    /// Read or write failed
    Error(String),
}

/// Events emitted by a session task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A complete, trimmed, non-empty line
    Line { id: SessionId, line: String },
    /// The session ended and its port is closed
    Closed { id: SessionId, reason: CloseReason },
}

impl SessionEvent {
    /// Session that emitted this event
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Line { id, .. } | Self::Closed { id, .. } => *id,
        }
    }
}

/// Commands sent to a session task
#[derive(Debug)]
enum SessionCommand {
    /// Write one framed command
    Write {
        data: Vec<u8>,
        response: oneshot::Sender<Result<(), LinkError>>,
    },
    /// Stop the task and close the port
    Close,
}

/// Cloneable sending half of a session
///
/// Lets a caller write to the session without holding the [`Session`].
#[derive(Debug, Clone)]
pub struct SessionWriter {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionWriter {
    /// Write `command` followed by a newline
    ///
    /// Returns [`LinkError::NotConnected`] once the session has left
    /// `Connected`.
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        if *self.state_rx.borrow() != SessionState::Connected {
            return Err(LinkError::NotConnected);
        }

        let mut data = Vec::with_capacity(command.len() + 1);
        data.extend_from_slice(command.as_bytes());
        data.push(b'\n');

        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Write { data, response })
            .await
            .map_err(|_| LinkError::NotConnected)?;
        rx.await.map_err(|_| LinkError::NotConnected)?
    }
}

/// An open reader session
pub struct Session {
    id: SessionId,
    path: String,
    writer: SessionWriter,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Open `path` on a transport, bounded by `connect_timeout`
    pub async fn connect<T: Transport>(
        transport: &T,
        path: &str,
        connect_timeout: Duration,
    ) -> Result<T::Stream, LinkError> {
        debug!("Connecting to {}", path);
        match tokio::time::timeout(connect_timeout, transport.open(path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(DetectError::PortBusy(port))) => Err(LinkError::PortBusy(port)),
            Ok(Err(e)) => Err(LinkError::ConnectionFailed {
                port: path.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LinkError::ConnectionTimeout {
                port: path.to_string(),
                timeout_ms: connect_timeout.as_millis() as u64,
            }),
        }
    }

    /// Open `path` and start a session over it
    pub async fn open<T: Transport>(
        id: SessionId,
        transport: &T,
        path: &str,
        connect_timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, LinkError> {
        let stream = Self::connect(transport, path, connect_timeout).await?;
        Ok(Self::attach(id, path, stream, events))
    }

    /// Start a session over an already open stream
    pub fn attach<S>(
        id: SessionId,
        path: impl Into<String>,
        stream: S,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let path = path.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::Connected);

        info!("Session {} connected on {}", id, path);
        let task = tokio::spawn(run_session(
            id,
            path.clone(),
            stream,
            cmd_rx,
            events,
            state_tx,
        ));

        Self {
            id,
            path,
            writer: SessionWriter { cmd_tx, state_rx },
            task: Some(task),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Port path of this session
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.writer.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// A cloneable writer for this session
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Write `command` followed by a newline
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        self.writer.send(command).await
    }

    /// Close the session and wait for the port to be released
    ///
    /// Idempotent. Pending reads are cancelled and the stream is shut down
    /// and dropped before this returns.
    pub async fn close(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        let _ = self.writer.cmd_tx.try_send(SessionCommand::Close);
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Session {} task failed: {}", self.id, e),
            Err(_) => {
                warn!("Session {} did not stop in time, aborting", self.id);
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Session task: runs until closed, EOF, or an I/O error
async fn run_session<S>(
    id: SessionId,
    path: String,
    mut io: S,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut codec = LineCodec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Write { data, response }) => {
                        trace!("Session {} writing {} bytes", id, data.len());
                        match write_frame(&mut io, &data).await {
                            Ok(()) => {
                                let _ = response.send(Ok(()));
                            }
                            Err(e) => {
                                warn!("Write error on {}: {}", path, e);
                                let reason = CloseReason::Error(e.to_string());
                                let _ = response.send(Err(LinkError::Io(e)));
                                break reason;
                            }
                        }
                    }
                    Some(SessionCommand::Close) | None => break CloseReason::Requested,
                }
            }

            result = io.read(&mut buf) => {
                match result {
                    Ok(0) => break CloseReason::Eof,
                    Ok(n) => {
                        trace!("Read {} bytes from {}", n, path);
                        codec.push_bytes(&buf[..n]);
                        if !forward_lines(id, &mut codec, &events).await {
                            break CloseReason::Requested;
                        }
                    }
                    Err(e) => {
                        warn!("Read error on {}: {}", path, e);
                        break CloseReason::Error(e.to_string());
                    }
                }
            }
        }
    };

    state_tx.send_replace(SessionState::Disconnected);
    if codec.pending() > 0 {
        debug!("Discarding {} unterminated bytes from {}", codec.pending(), path);
    }
    codec.clear();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, io.shutdown()).await;
    drop(io);

    info!("Session {} on {} closed ({:?})", id, path, reason);
    let _ = events.send(SessionEvent::Closed { id, reason }).await;
}

async fn write_frame<S>(io: &mut S, data: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    io.write_all(data).await?;
    io.flush().await
}

/// Forward complete lines; returns false once nobody is listening
async fn forward_lines(
    id: SessionId,
    codec: &mut LineCodec,
    events: &mpsc::Sender<SessionEvent>,
) -> bool {
    while let Some(line) = codec.next_frame() {
        if events.send(SessionEvent::Line { id, line }).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use cart_detect::PortDescriptor;
    use tokio::io::DuplexStream;

    use super::*;

    /// Transport whose `open` never completes
    struct HangingTransport;

    impl Transport for HangingTransport {
        type Stream = DuplexStream;

        fn list_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
            Ok(vec![PortDescriptor::bare("/dev/ttyUSB0")])
        }

        fn open(
            &self,
            _path: &str,
        ) -> impl Future<Output = Result<DuplexStream, DetectError>> + Send {
            std::future::pending()
        }
    }

    fn session() -> (Session, DuplexStream, mpsc::Receiver<SessionEvent>) {
        let (host, device) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::channel(32);
        (Session::attach(7, "/dev/ttyUSB0", host, tx), device, rx)
    }

    fn line(text: &str) -> SessionEvent {
        SessionEvent::Line {
            id: 7,
            line: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_lines_are_framed_in_order() {
        let (_session, mut device, mut rx) = session();

        device.write_all(b"boot\r\n{\"name\":\"Ze").await.unwrap();
        device.write_all(b"lda\"}\n\n  TAG_REMOVED \n").await.unwrap();

        assert_eq!(rx.recv().await, Some(line("boot")));
        assert_eq!(rx.recv().await, Some(line("{\"name\":\"Zelda\"}")));
        assert_eq!(rx.recv().await, Some(line("TAG_REMOVED")));
    }

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (session, mut device, _rx) = session();

        session.send("PING").await.unwrap();

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PING\n");
    }

    #[tokio::test]
    async fn test_eof_closes_session() {
        let (session, device, mut rx) = session();
        drop(device);

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Closed {
                id: 7,
                reason: CloseReason::Eof
            })
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.send("PING").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_port() {
        let (mut session, mut device, mut rx) = session();

        session.close().await;
        session.close().await;

        assert!(!session.is_connected());
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Closed {
                id: 7,
                reason: CloseReason::Requested
            })
        );

        // The device side sees EOF once the host stream is gone
        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            session.send("PING").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_drop_releases_port() {
        let (session, mut device, _rx) = session();
        drop(session);

        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        let (tx, _rx) = mpsc::channel(8);
        let result = Session::open(
            1,
            &HangingTransport,
            "/dev/ttyUSB0",
            Duration::from_millis(5000),
            tx,
        )
        .await;

        assert!(matches!(
            result,
            Err(LinkError::ConnectionTimeout { timeout_ms: 5000, .. })
        ));
    }
}
