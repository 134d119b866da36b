//! Simulated transport
//!
//! [`SimTransport`] implements [`Transport`] over in-memory duplex streams.
//! Ports are "plugged" with a [`VirtualReaderConfig`]; each open spawns a
//! reader task on the far end of a fresh duplex pair.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cart_detect::{Capability, DetectError, PortDescriptor, Transport};
use cart_protocol::CartridgeRecord;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::reader::{run_reader, LiveGuard, ReaderCommand, ReceivedLog, VirtualReaderConfig};

/// Buffer size of each simulated connection
const DUPLEX_BUFFER: usize = 1024;

struct SimPort {
    config: Arc<VirtualReaderConfig>,
    plugged: bool,
    opens: usize,
    live: Arc<AtomicUsize>,
    received: ReceivedLog,
    /// Control channel of the most recent connection
    control: Option<mpsc::Sender<ReaderCommand>>,
}

#[derive(Default)]
struct SimState {
    ports: Vec<SimPort>,
    enumeration_error: Option<String>,
}

impl SimState {
    fn port_mut(&mut self, path: &str) -> Option<&mut SimPort> {
        self.ports.iter_mut().find(|p| p.config.path() == path)
    }

    fn port(&self, path: &str) -> Option<&SimPort> {
        self.ports.iter().find(|p| p.config.path() == path)
    }
}

/// In-memory transport with virtual readers
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<SimState>>,
    capability: Capability,
}

impl SimTransport {
    /// Create a transport with nothing plugged in
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState::default())),
            capability: Capability::Available,
        }
    }

    /// Create a transport whose port API is unavailable
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            capability: Capability::Unavailable(reason.into()),
            ..Self::new()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a reader, replacing any port with the same path
    pub fn plug(&self, config: VirtualReaderConfig) -> ReaderHandle {
        let path = config.path().to_string();
        let mut state = self.state();
        match state.port_mut(&path) {
            Some(port) => {
                port.config = Arc::new(config);
                port.plugged = true;
            }
            None => state.ports.push(SimPort {
                config: Arc::new(config),
                plugged: true,
                opens: 0,
                live: Arc::new(AtomicUsize::new(0)),
                received: ReceivedLog::default(),
                control: None,
            }),
        }
        debug!("Plugged simulated port {}", path);

        ReaderHandle {
            transport: self.clone(),
            path,
        }
    }

    /// Plug in a port that is not a reader (it never answers the handshake)
    pub fn plug_other(&self, port: PortDescriptor) -> ReaderHandle {
        self.plug(VirtualReaderConfig::on_port(port).silent())
    }

    /// Unplug a port, dropping its live connection
    pub fn unplug(&self, path: &str) {
        let control = {
            let mut state = self.state();
            let Some(port) = state.port_mut(path) else {
                return;
            };
            port.plugged = false;
            port.control.take()
        };
        debug!("Unplugged simulated port {}", path);
        if let Some(control) = control {
            let _ = control.try_send(ReaderCommand::Disconnect);
        }
    }

    /// Make enumeration fail until cleared with `None`
    pub fn set_enumeration_error(&self, error: Option<String>) {
        self.state().enumeration_error = error;
    }

    /// Handle to an already plugged port
    pub fn reader(&self, path: &str) -> Option<ReaderHandle> {
        self.state().port(path).map(|_| ReaderHandle {
            transport: self.clone(),
            path: path.to_string(),
        })
    }

    /// Number of opens attempted on a path
    pub fn open_count(&self, path: &str) -> usize {
        self.state().port(path).map_or(0, |p| p.opens)
    }

    /// Number of currently open connections on a path
    pub fn active_connections(&self, path: &str) -> usize {
        self.state()
            .port(path)
            .map_or(0, |p| p.live.load(Ordering::SeqCst))
    }

    /// Total open connections across all ports
    pub fn total_active_connections(&self) -> usize {
        self.state()
            .ports
            .iter()
            .map(|p| p.live.load(Ordering::SeqCst))
            .sum()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    type Stream = DuplexStream;

    fn capability(&self) -> Capability {
        self.capability.clone()
    }

    fn list_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        if let Capability::Unavailable(reason) = &self.capability {
            return Err(DetectError::TransportUnavailable(reason.clone()));
        }

        let state = self.state();
        if let Some(error) = &state.enumeration_error {
            return Err(DetectError::EnumerationFailed(error.clone()));
        }

        Ok(state
            .ports
            .iter()
            .filter(|p| p.plugged)
            .map(|p| p.config.port.clone())
            .collect())
    }

    fn open(&self, path: &str) -> impl Future<Output = Result<DuplexStream, DetectError>> + Send {
        let transport = self.clone();
        let path = path.to_string();

        async move {
            let config = {
                let mut state = transport.state();
                let port = match state.port_mut(&path) {
                    Some(port) if port.plugged => port,
                    _ => return Err(open_failed(&path, "no such device")),
                };
                port.opens += 1;
                if port.config.fail_open {
                    return Err(open_failed(&path, "access denied"));
                }
                Arc::clone(&port.config)
            };

            if config.open_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.open_delay_ms)).await;
            }

            let (host, device) = tokio::io::duplex(DUPLEX_BUFFER);
            let (ctl_tx, ctl_rx) = mpsc::channel(32);
            let (received, live) = {
                let mut state = transport.state();
                let port = match state.port_mut(&path) {
                    Some(port) if port.plugged => port,
                    _ => return Err(open_failed(&path, "device went away")),
                };
                port.control = Some(ctl_tx);
                (Arc::clone(&port.received), LiveGuard::new(&port.live))
            };

            tokio::spawn(run_reader(device, config, ctl_rx, received, live));
            Ok(host)
        }
    }
}

fn open_failed(path: &str, reason: &str) -> DetectError {
    DetectError::OpenFailed {
        port: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Handle for driving one simulated port
#[derive(Clone)]
pub struct ReaderHandle {
    transport: SimTransport,
    path: String,
}

impl ReaderHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send a command to the most recent connection
    ///
    /// Returns false when no connection is open.
    pub async fn command(&self, cmd: ReaderCommand) -> bool {
        let control = self
            .transport
            .state()
            .port(&self.path)
            .and_then(|p| p.control.clone());
        match control {
            Some(control) => control.send(cmd).await.is_ok(),
            None => false,
        }
    }

    /// Put a cartridge on the antenna
    pub async fn present(&self, record: CartridgeRecord) -> bool {
        self.command(ReaderCommand::Present(record)).await
    }

    /// Take the cartridge away
    pub async fn remove(&self) -> bool {
        self.command(ReaderCommand::Remove).await
    }

    /// Print a line
    pub async fn send_line(&self, text: impl Into<String>) -> bool {
        self.command(ReaderCommand::Line(text.into())).await
    }

    /// Write raw bytes
    pub async fn send_raw(&self, data: impl Into<Vec<u8>>) -> bool {
        self.command(ReaderCommand::Raw(data.into())).await
    }

    /// Drop the current connection; the port stays plugged
    pub async fn disconnect(&self) -> bool {
        self.command(ReaderCommand::Disconnect).await
    }

    /// Unplug this port
    pub fn unplug(&self) {
        self.transport.unplug(&self.path);
    }

    /// Every line the host has written to this port
    pub fn received(&self) -> Vec<String> {
        self.transport
            .state()
            .port(&self.path)
            .map(|p| p.received.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self) -> usize {
        self.transport.open_count(&self.path)
    }

    pub fn active_connections(&self) -> usize {
        self.transport.active_connections(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn read_line(io: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while io.read(&mut byte).await.unwrap() == 1 {
            if byte[0] == b'\n' {
                break;
            }
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_list_only_plugged_ports() {
        let sim = SimTransport::new();
        sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0"));
        sim.plug(VirtualReaderConfig::ch340("/dev/ttyUSB1"));
        sim.unplug("/dev/ttyUSB0");

        let paths: Vec<_> = sim.list_ports().unwrap().into_iter().map(|p| p.path).collect();
        assert_eq!(paths, vec!["/dev/ttyUSB1"]);
    }

    #[test]
    fn test_enumeration_error() {
        let sim = SimTransport::new();
        sim.set_enumeration_error(Some("udev gone".into()));
        assert!(matches!(
            sim.list_ports(),
            Err(DetectError::EnumerationFailed(_))
        ));

        let sim = SimTransport::unavailable("no port API");
        assert!(!sim.capability().is_available());
        assert!(matches!(
            sim.list_ports(),
            Err(DetectError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_answers_identify() {
        let sim = SimTransport::new();
        let reader = sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0"));

        let mut io = sim.open("/dev/ttyUSB0").await.unwrap();
        io.write_all(b"IDENTIFY\n").await.unwrap();
        assert_eq!(read_line(&mut io).await, "RETRO-LAUNCHER-NFC-DEVICE");

        assert_eq!(reader.open_count(), 1);
        assert_eq!(reader.active_connections(), 1);
        assert_eq!(reader.received(), vec!["IDENTIFY"]);
    }

    #[tokio::test]
    async fn test_present_writes_json_line() {
        let sim = SimTransport::new();
        let reader = sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0"));
        let mut io = sim.open("/dev/ttyUSB0").await.unwrap();

        assert!(reader.present(CartridgeRecord::new("Zelda", None, "C:/g.exe")).await);
        assert_eq!(
            read_line(&mut io).await,
            r#"{"name":"Zelda","icon":null,"pathName":"C:/g.exe"}"#
        );

        assert!(reader.remove().await);
        assert_eq!(read_line(&mut io).await, "TAG_REMOVED");
    }

    #[tokio::test]
    async fn test_failing_and_unknown_ports() {
        let sim = SimTransport::new();
        let reader = sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0").failing_open());

        assert!(sim.open("/dev/ttyUSB0").await.is_err());
        assert!(sim.open("/dev/ttyUSB9").await.is_err());
        assert_eq!(reader.open_count(), 1);
        assert_eq!(sim.open_count("/dev/ttyUSB9"), 0);
    }

    #[tokio::test]
    async fn test_closing_host_side_releases_connection() {
        let sim = SimTransport::new();
        let reader = sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0"));

        let io = sim.open("/dev/ttyUSB0").await.unwrap();
        assert_eq!(reader.active_connections(), 1);
        drop(io);

        for _ in 0..100 {
            if reader.active_connections() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(reader.active_connections(), 0);
    }
}
