//! Virtual cartridge reader
//!
//! One reader task runs per open connection. It answers the identification
//! command like the real firmware, records every line the host writes, and
//! pushes records, removal lines or raw bytes when told to.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cart_detect::PortDescriptor;
use cart_protocol::{CartridgeRecord, FrameCodec, LineCodec, DEFAULT_REMOVAL_TOKEN};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

/// Identity line printed by current reader firmware
pub const DEFAULT_IDENTITY: &str = "RETRO-LAUNCHER-NFC-DEVICE";

/// Configuration for a virtual reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualReaderConfig {
    /// Port the reader appears on
    pub port: PortDescriptor,
    /// Reply to the identification command (`None` never answers)
    pub identity: Option<String>,
    /// Command the reader answers to
    pub identify_command: String,
    /// Delay before the identity reply, in milliseconds
    pub reply_delay_ms: u64,
    /// Delay before an open completes, in milliseconds
    pub open_delay_ms: u64,
    /// Refuse every open
    pub fail_open: bool,
    /// Line printed as soon as a connection opens
    pub banner: Option<String>,
}

impl Default for VirtualReaderConfig {
    fn default() -> Self {
        Self::cp2102("/dev/ttyUSB0")
    }
}

impl VirtualReaderConfig {
    /// A reader behind a CP2102 bridge, the usual ESP32 dev board
    pub fn cp2102(path: impl Into<String>) -> Self {
        Self::on_port(PortDescriptor::usb(path, 0x10C4, 0xEA60).with_manufacturer("Silicon Labs"))
    }

    /// A reader behind a CH340 bridge
    pub fn ch340(path: impl Into<String>) -> Self {
        Self::on_port(
            PortDescriptor::usb(path, 0x1A86, 0x7523).with_manufacturer("QinHeng Electronics"),
        )
    }

    /// A reader on an arbitrary port
    pub fn on_port(port: PortDescriptor) -> Self {
        Self {
            port,
            identity: Some(DEFAULT_IDENTITY.to_string()),
            identify_command: "IDENTIFY".to_string(),
            reply_delay_ms: 0,
            open_delay_ms: 0,
            fail_open: false,
            banner: None,
        }
    }

    /// Answer the identification command with `identity`
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Never answer the identification command
    pub fn silent(mut self) -> Self {
        self.identity = None;
        self
    }

    pub fn with_reply_delay(mut self, ms: u64) -> Self {
        self.reply_delay_ms = ms;
        self
    }

    pub fn with_open_delay(mut self, ms: u64) -> Self {
        self.open_delay_ms = ms;
        self
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.port.path
    }
}

/// Commands for a live reader connection
#[derive(Debug, Clone)]
pub enum ReaderCommand {
    /// Put a cartridge on the antenna
    Present(CartridgeRecord),
    /// Take the cartridge away
    Remove,
    /// Print a line (diagnostics, malformed records)
    Line(String),
    /// Write raw bytes, no newline added
    Raw(Vec<u8>),
    /// Drop the connection
    Disconnect,
}

/// Lines written by the host, shared across connections to one port
pub(crate) type ReceivedLog = Arc<Mutex<Vec<String>>>;

/// Counts a connection as live until dropped
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub(crate) fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run one reader connection until either side closes it
pub(crate) async fn run_reader(
    mut io: DuplexStream,
    config: Arc<VirtualReaderConfig>,
    mut ctl_rx: mpsc::Receiver<ReaderCommand>,
    received: ReceivedLog,
    _live: LiveGuard,
) {
    let path = config.path().to_string();
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 256];
    let mut reply_at: Option<Instant> = None;
    let mut ctl_open = true;

    debug!("Virtual reader {} connection opened", path);
    if let Some(banner) = &config.banner {
        if write_line(&mut io, banner).await.is_err() {
            return;
        }
    }

    loop {
        let wake_at = reply_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            result = io.read(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(line) = codec.next_frame() {
                            trace!("Virtual reader {} received {:?}", path, line);
                            if line == config.identify_command && config.identity.is_some() {
                                let delay = Duration::from_millis(config.reply_delay_ms);
                                reply_at = Some(Instant::now() + delay);
                            }
                            received
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(line);
                        }
                    }
                }
            }

            _ = sleep_until(wake_at), if reply_at.is_some() => {
                reply_at = None;
                if let Some(identity) = &config.identity {
                    if write_line(&mut io, identity).await.is_err() {
                        break;
                    }
                }
            }

            cmd = ctl_rx.recv(), if ctl_open => {
                let written = match cmd {
                    Some(ReaderCommand::Present(record)) => {
                        info!("Virtual reader {} presenting {}", path, record.name);
                        match serde_json::to_string(&record) {
                            Ok(json) => write_line(&mut io, &json).await,
                            Err(_) => Ok(()),
                        }
                    }
                    Some(ReaderCommand::Remove) => {
                        info!("Virtual reader {} cartridge removed", path);
                        write_line(&mut io, DEFAULT_REMOVAL_TOKEN).await
                    }
                    Some(ReaderCommand::Line(text)) => write_line(&mut io, &text).await,
                    Some(ReaderCommand::Raw(bytes)) => write_raw(&mut io, &bytes).await,
                    Some(ReaderCommand::Disconnect) => break,
                    None => {
                        ctl_open = false;
                        Ok(())
                    }
                };
                if written.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Virtual reader {} connection closed", path);
}

async fn write_line(io: &mut DuplexStream, text: &str) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(text.len() + 1);
    data.extend_from_slice(text.as_bytes());
    data.push(b'\n');
    write_raw(io, &data).await
}

async fn write_raw(io: &mut DuplexStream, data: &[u8]) -> std::io::Result<()> {
    io.write_all(data).await?;
    io.flush().await
}
