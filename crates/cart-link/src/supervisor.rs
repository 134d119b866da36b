//! Reconnection Supervisor
//!
//! This module provides the actor that owns the managed reader slot. All
//! state transitions happen in this actor: it runs periodic scans, promotes
//! a validated reader to a [`Session`], decodes the session's lines, hands
//! launchable records to the [`Dispatcher`] and applies the retry policy
//! when the session goes away.
//!
//! # Architecture
//!
//! The actor receives [`SupervisorCommand`]s through a channel and emits
//! [`LinkEvent`]s through another. Scans run as spawned tasks tagged with a
//! generation number and report back through an internal channel, so the
//! actor stays responsive while ports are being probed and a cancelled scan
//! can never promote a session.
//!
//! Retry policy: after a disconnect the supervisor retries every
//! `reconnect_interval_ms`. Each failed retry counts; once
//! `max_reconnect_attempts` is reached it reports
//! [`LinkEvent::PersistentFailure`] once and falls back to scanning every
//! `scan_interval_ms`. A successful connection or a manual
//! [`LinkHandle::reconnect`] resets the count.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cart_detect::SerialTransport;
//! use cart_link::{LinkConfig, LinkEvent, LinkHandle, ProcessLauncher};
//!
//! # async fn run() {
//! let (link, mut events, _task) = LinkHandle::spawn(
//!     Arc::new(SerialTransport::new()),
//!     Arc::new(ProcessLauncher::new()),
//!     LinkConfig::default(),
//! );
//!
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::RecordDetected(record) = event {
//!         println!("Cartridge: {}", record.name);
//!     }
//! }
//! # let _ = link.shutdown().await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use cart_detect::{
    usb_ids, Capability, DetectError, DeviceClassifier, HandshakeValidator, PortClaim,
    PortDescriptor, Transport,
};
use cart_protocol::{CartridgeRecord, Decoded, Decoder};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::dispatch::Dispatcher;
use crate::error::LinkError;
use crate::events::LinkEvent;
use crate::session::{Session, SessionEvent, SessionId};
use crate::state::ConnectionState;

/// Capacity of the command channel
const COMMAND_QUEUE: usize = 64;

/// Capacity of the event channel
const EVENT_QUEUE: usize = 256;

/// Capacity of the session event channel
const SESSION_EVENT_QUEUE: usize = 64;

/// Capacity of the scan report channel
const SCAN_REPORT_QUEUE: usize = 8;

/// Commands sent to the supervisor actor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Write a raw command line to the connected reader
    SendRaw {
        /// Command text (a newline is appended)
        command: String,
        /// Channel to send back the write result
        response: oneshot::Sender<Result<(), LinkError>>,
    },

    /// Drop the current session and scan again immediately
    Reconnect,

    /// Enable automatic discovery
    StartScanning,

    /// Disable automatic discovery; an open session is kept
    StopScanning,

    /// Query the last decoded record
    CurrentRecord {
        /// Channel to send back the record
        response: oneshot::Sender<Option<CartridgeRecord>>,
    },

    /// Query the candidate ports seen by the last scan
    VisibleCandidates {
        /// Channel to send back the candidates
        response: oneshot::Sender<Vec<PortDescriptor>>,
    },

    /// Run the handshake against one port without promoting it
    TestPort {
        /// Port path
        path: String,
        /// Channel to send back whether the port answered
        response: oneshot::Sender<Result<bool, LinkError>>,
    },

    /// Shutdown the actor
    Shutdown,
}

/// Message from a scan task
enum ScanReport<S> {
    /// Ports were enumerated and classified
    Classified {
        generation: u64,
        candidates: Vec<PortDescriptor>,
    },
    /// The scan is over
    Finished {
        generation: u64,
        outcome: ScanOutcome<S>,
    },
}

enum ScanOutcome<S> {
    EnumerationFailed(String),
    NoDevice,
    ConnectFailed { path: String, error: LinkError },
    /// The claim keeps manual tests off the port until the session owns it
    Connected {
        port: PortDescriptor,
        stream: S,
        claim: PortClaim,
    },
}

/// A scan task in flight
struct ActiveScan {
    generation: u64,
    task: JoinHandle<()>,
}

/// Internal state for the supervisor actor
struct Supervisor<T: Transport, D> {
    transport: Arc<T>,
    dispatcher: Arc<D>,
    classifier: DeviceClassifier,
    validator: HandshakeValidator<T>,
    decoder: Decoder,
    config: LinkConfig,
    event_tx: mpsc::Sender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    scan_tx: mpsc::Sender<ScanReport<T::Stream>>,
    session_tx: mpsc::Sender<SessionEvent>,
    /// The managed slot
    session: Option<Session>,
    /// Last decoded record, cleared on removal or disconnect
    record: Option<CartridgeRecord>,
    /// Candidate ports seen by the last scan
    candidates: Vec<PortDescriptor>,
    scan: Option<ActiveScan>,
    /// Scan generation; also used as the id of the session a scan promotes
    generation: u64,
    /// Automatic discovery enabled
    auto_scan: bool,
    /// Retrying after a disconnect
    retry_mode: bool,
    /// Consecutive failed attempts
    failures: u32,
    /// `PersistentFailure` already emitted for the current failure streak
    failure_reported: bool,
    /// When the next scheduled scan starts
    next_scan: Option<Instant>,
}

impl<T: Transport, D: Dispatcher> Supervisor<T, D> {
    fn new(
        transport: Arc<T>,
        dispatcher: Arc<D>,
        config: LinkConfig,
        event_tx: mpsc::Sender<LinkEvent>,
        state_tx: watch::Sender<ConnectionState>,
        scan_tx: mpsc::Sender<ScanReport<T::Stream>>,
        session_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            classifier: DeviceClassifier::with_config(config.classifier.clone()),
            validator: HandshakeValidator::new(Arc::clone(&transport), config.handshake.clone()),
            decoder: Decoder::with_removal_token(config.removal_token.clone()),
            transport,
            dispatcher,
            config,
            event_tx,
            state_tx,
            scan_tx,
            session_tx,
            session: None,
            record: None,
            candidates: Vec::new(),
            scan: None,
            generation: 0,
            auto_scan: true,
            retry_mode: false,
            failures: 0,
            failure_reported: false,
            next_scan: None,
        }
    }

    async fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn set_state(&mut self, state: ConnectionState) {
        let old = *self.state_tx.borrow();
        if old == state {
            return;
        }
        debug!("Connection state {} -> {}", old, state);
        self.state_tx.send_replace(state);
        self.emit(LinkEvent::StateChanged { state }).await;
    }

    // -------------------------------------------------------------------------
    // Scanning
    // -------------------------------------------------------------------------

    /// Start a scan unless one is running or a session is open
    async fn start_scan(&mut self) {
        if self.session.is_some() || self.scan.is_some() {
            return;
        }
        self.next_scan = None;

        if let Capability::Unavailable(reason) = self.transport.capability() {
            warn!("Not scanning, transport unavailable: {}", reason);
            self.emit(LinkEvent::ScanError {
                message: format!("serial transport unavailable: {}", reason),
            })
            .await;
            self.scan_failed(false).await;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Scanning).await;
        debug!("Starting scan {}", generation);

        let task = tokio::spawn(run_scan(
            generation,
            Arc::clone(&self.transport),
            self.classifier.clone(),
            self.validator.clone(),
            self.config.connect_timeout(),
            self.scan_tx.clone(),
        ));
        self.scan = Some(ActiveScan { generation, task });
    }

    fn cancel_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!("Cancelling scan {}", scan.generation);
            scan.task.abort();
        }
    }

    fn is_current_scan(&self, generation: u64) -> bool {
        self.scan
            .as_ref()
            .is_some_and(|scan| scan.generation == generation)
    }

    async fn handle_scan_report(&mut self, report: ScanReport<T::Stream>) {
        match report {
            ScanReport::Classified {
                generation,
                candidates,
            } => {
                if !self.is_current_scan(generation) {
                    return;
                }
                let validating = !candidates.is_empty();
                self.update_candidates(candidates).await;
                if validating {
                    self.set_state(ConnectionState::Validating).await;
                }
            }

            ScanReport::Finished {
                generation,
                outcome,
            } => {
                if !self.is_current_scan(generation) {
                    debug!("Ignoring result of superseded scan {}", generation);
                    return;
                }
                self.scan = None;

                match outcome {
                    ScanOutcome::Connected {
                        port,
                        stream,
                        claim,
                    } => {
                        self.promote(generation, port, stream).await;
                        drop(claim);
                    }
                    ScanOutcome::NoDevice => {
                        debug!("Scan {} found no reader", generation);
                        self.scan_failed(false).await;
                    }
                    ScanOutcome::EnumerationFailed(message) => {
                        warn!("Port enumeration failed: {}", message);
                        self.emit(LinkEvent::ScanError { message }).await;
                        self.scan_failed(false).await;
                    }
                    ScanOutcome::ConnectFailed { path, error } => {
                        warn!("Failed to connect to validated reader {}: {}", path, error);
                        self.emit(LinkEvent::ScanError {
                            message: error.to_string(),
                        })
                        .await;
                        self.scan_failed(true).await;
                    }
                }
            }
        }
    }

    async fn update_candidates(&mut self, candidates: Vec<PortDescriptor>) {
        if candidates == self.candidates {
            return;
        }
        self.candidates = candidates;
        self.emit(LinkEvent::CandidatesUpdated(self.candidates.clone()))
            .await;
    }

    /// Record a failed attempt and schedule the next one
    async fn scan_failed(&mut self, connect_failure: bool) {
        let counts = self.retry_mode || connect_failure;
        if counts {
            self.failures += 1;
            debug!(
                "Attempt failed ({}/{})",
                self.failures, self.config.max_reconnect_attempts
            );
        }

        if counts && self.failures >= self.config.max_reconnect_attempts {
            if !self.failure_reported {
                warn!(
                    "Reader unreachable after {} attempts, continuing periodic scan",
                    self.failures
                );
                self.failure_reported = true;
                self.emit(LinkEvent::PersistentFailure {
                    attempts: self.failures,
                })
                .await;
            }
            self.retry_mode = false;
        }

        self.schedule_next().await;
    }

    async fn schedule_next(&mut self) {
        if !self.auto_scan {
            self.next_scan = None;
            self.set_state(ConnectionState::Idle).await;
            return;
        }

        let (delay, state) = if self.retry_mode {
            (self.config.reconnect_interval(), ConnectionState::Reconnecting)
        } else {
            (self.config.scan_interval(), ConnectionState::Scanning)
        };
        self.next_scan = Some(Instant::now() + delay);
        self.set_state(state).await;
    }

    // -------------------------------------------------------------------------
    // Session lifecycle
    // -------------------------------------------------------------------------

    async fn promote(&mut self, id: SessionId, port: PortDescriptor, stream: T::Stream) {
        let path = port.path.clone();
        info!("Reader found on {}", port.label());

        self.session = Some(Session::attach(
            id,
            path.clone(),
            stream,
            self.session_tx.clone(),
        ));
        self.retry_mode = false;
        self.failures = 0;
        self.failure_reported = false;
        self.next_scan = None;

        self.set_state(ConnectionState::Connected).await;
        self.emit(LinkEvent::Connected { path }).await;
    }

    /// Close the current session, if any
    ///
    /// With `retry` set the supervisor enters retry mode afterwards.
    async fn close_session(&mut self, retry: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.close().await;
        self.on_disconnected(session.path().to_string(), retry).await;
    }

    async fn on_disconnected(&mut self, path: String, retry: bool) {
        if self.record.take().is_some() {
            self.emit(LinkEvent::RecordRemoved).await;
        }
        self.set_state(ConnectionState::Disconnected).await;
        self.emit(LinkEvent::Disconnected { path }).await;

        if retry && self.auto_scan {
            info!("Retrying in {}ms", self.config.reconnect_interval_ms);
            self.retry_mode = true;
            self.next_scan = Some(Instant::now() + self.config.reconnect_interval());
            self.set_state(ConnectionState::Reconnecting).await;
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(Session::id);
        if current != Some(event.session_id()) {
            trace!("Ignoring event from superseded session {}", event.session_id());
            return;
        }

        match event {
            SessionEvent::Line { line, .. } => self.handle_line(&line).await,
            SessionEvent::Closed { reason, .. } => {
                if let Some(session) = self.session.as_ref() {
                    info!("Session on {} ended: {:?}", session.path(), reason);
                }
                self.close_session(true).await;
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        match self.decoder.decode(line) {
            Some(Decoded::Record(record)) => {
                self.record = Some(record.clone());
                let launch = (self.config.auto_launch && record.is_launchable())
                    .then(|| record.path_name.clone());
                self.emit(LinkEvent::RecordDetected(record)).await;
                if let Some(path) = launch {
                    self.dispatch(path);
                }
            }
            Some(Decoded::Removed) => {
                self.record = None;
                self.emit(LinkEvent::RecordRemoved).await;
                if self.config.removal_closes_session {
                    self.close_session(true).await;
                }
            }
            None => {}
        }
    }

    fn dispatch(&self, path: String) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = dispatcher.launch(&path).await;
            let event = match result {
                Ok(()) => LinkEvent::DispatchSucceeded { path },
                Err(error) => {
                    warn!("Launch of {} failed: {}", path, error);
                    LinkEvent::DispatchFailed { path, error }
                }
            };
            let _ = event_tx.send(event).await;
        });
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Handle one command; returns false when the actor should stop
    async fn handle_command(&mut self, cmd: SupervisorCommand) -> bool {
        match cmd {
            SupervisorCommand::SendRaw { command, response } => match &self.session {
                Some(session) => {
                    // The write waits on the session task; keep the actor free
                    let writer = session.writer();
                    tokio::spawn(async move {
                        let _ = response.send(writer.send(&command).await);
                    });
                }
                None => {
                    let _ = response.send(Err(LinkError::NotConnected));
                }
            },

            SupervisorCommand::Reconnect => {
                info!("Manual reconnect requested");
                self.cancel_scan();
                self.close_session(false).await;
                self.retry_mode = false;
                self.failures = 0;
                self.failure_reported = false;
                self.start_scan().await;
            }

            SupervisorCommand::StartScanning => {
                info!("Automatic discovery enabled");
                self.auto_scan = true;
                self.start_scan().await;
            }

            SupervisorCommand::StopScanning => {
                info!("Automatic discovery disabled");
                self.auto_scan = false;
                self.retry_mode = false;
                self.next_scan = None;
                self.cancel_scan();
                if self.session.is_none() {
                    self.set_state(ConnectionState::Idle).await;
                }
            }

            SupervisorCommand::CurrentRecord { response } => {
                let _ = response.send(self.record.clone());
            }

            SupervisorCommand::VisibleCandidates { response } => {
                let _ = response.send(self.candidates.clone());
            }

            SupervisorCommand::TestPort { path, response } => {
                let in_session = self
                    .session
                    .as_ref()
                    .is_some_and(|session| session.path() == path);
                if in_session {
                    let _ = response.send(Err(LinkError::PortBusy(path)));
                } else {
                    let validator = self.validator.clone();
                    tokio::spawn(async move {
                        let result = validator.try_validate(&path).await.map_err(|e| match e {
                            DetectError::PortBusy(path) => LinkError::PortBusy(path),
                            other => LinkError::ConnectionFailed {
                                port: path.clone(),
                                reason: other.to_string(),
                            },
                        });
                        let _ = response.send(result);
                    });
                }
            }

            SupervisorCommand::Shutdown => return false,
        }
        true
    }

    async fn shutdown(&mut self) {
        self.cancel_scan();
        self.next_scan = None;
        self.retry_mode = false;
        self.close_session(false).await;
        self.set_state(ConnectionState::Idle).await;
    }
}

/// Scan task: enumerate, classify, validate, connect
async fn run_scan<T: Transport>(
    generation: u64,
    transport: Arc<T>,
    classifier: DeviceClassifier,
    validator: HandshakeValidator<T>,
    connect_timeout: Duration,
    report_tx: mpsc::Sender<ScanReport<T::Stream>>,
) {
    let outcome = scan(
        generation,
        &transport,
        &classifier,
        &validator,
        connect_timeout,
        &report_tx,
    )
    .await;
    let _ = report_tx
        .send(ScanReport::Finished {
            generation,
            outcome,
        })
        .await;
}

async fn scan<T: Transport>(
    generation: u64,
    transport: &Arc<T>,
    classifier: &DeviceClassifier,
    validator: &HandshakeValidator<T>,
    connect_timeout: Duration,
    report_tx: &mpsc::Sender<ScanReport<T::Stream>>,
) -> ScanOutcome<T::Stream> {
    let lister = Arc::clone(transport);
    let ports = match tokio::task::spawn_blocking(move || lister.list_ports()).await {
        Ok(Ok(ports)) => ports,
        Ok(Err(e)) => return ScanOutcome::EnumerationFailed(e.to_string()),
        Err(e) => {
            return ScanOutcome::EnumerationFailed(format!("enumeration task failed: {}", e))
        }
    };

    let candidates: Vec<PortDescriptor> = ports
        .into_iter()
        .filter(|port| {
            let class = classifier.classify(port);
            trace!(
                "{}: {:?} ({})",
                port.label(),
                class,
                port.vid
                    .and_then(usb_ids::adapter_name)
                    .unwrap_or("unknown adapter")
            );
            class.is_candidate()
        })
        .collect();

    let _ = report_tx
        .send(ScanReport::Classified {
            generation,
            candidates: candidates.clone(),
        })
        .await;

    if candidates.is_empty() {
        return ScanOutcome::NoDevice;
    }

    let Some(found) = validator
        .validate_all(candidates)
        .await
        .into_iter()
        .find(|result| result.valid)
    else {
        return ScanOutcome::NoDevice;
    };

    let Some(claim) = validator.claim(&found.port.path) else {
        return ScanOutcome::ConnectFailed {
            error: LinkError::PortBusy(found.port.path.clone()),
            path: found.port.path,
        };
    };

    match Session::connect(transport.as_ref(), &found.port.path, connect_timeout).await {
        Ok(stream) => ScanOutcome::Connected {
            port: found.port,
            stream,
            claim,
        },
        Err(error) => ScanOutcome::ConnectFailed {
            path: found.port.path,
            error,
        },
    }
}

/// Run the supervisor actor
///
/// Processes commands until [`SupervisorCommand::Shutdown`] arrives or every
/// command sender is dropped. The current session is closed on the way out.
///
/// # Arguments
///
/// * `transport` - Source of reader connections
/// * `dispatcher` - Receives the path of every launchable record
/// * `config` - Link configuration
/// * `cmd_rx` - Receiver for commands sent to the actor
/// * `event_tx` - Sender for events emitted by the actor
/// * `state_tx` - Connection state; the actor is its only writer
pub async fn run_supervisor<T: Transport, D: Dispatcher>(
    transport: Arc<T>,
    dispatcher: Arc<D>,
    config: LinkConfig,
    mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
    event_tx: mpsc::Sender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let (scan_tx, mut scan_rx) = mpsc::channel(SCAN_REPORT_QUEUE);
    let (session_tx, mut session_rx) = mpsc::channel(SESSION_EVENT_QUEUE);
    let mut sup = Supervisor::new(
        transport, dispatcher, config, event_tx, state_tx, scan_tx, session_tx,
    );
    info!("Supervisor started");

    sup.start_scan().await;

    loop {
        let deadline = sup.next_scan;
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                if !sup.handle_command(cmd).await {
                    break;
                }
            }

            Some(report) = scan_rx.recv() => {
                sup.handle_scan_report(report).await;
            }

            Some(event) = session_rx.recv() => {
                sup.handle_session_event(event).await;
            }

            _ = sleep_until(wake_at), if deadline.is_some() => {
                sup.start_scan().await;
            }
        }
    }

    sup.shutdown().await;
    info!("Supervisor stopped");
}

/// Client handle for a running supervisor
#[derive(Debug, Clone)]
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl LinkHandle {
    /// Wrap the channels of a supervisor started with [`run_supervisor`]
    pub fn new(
        cmd_tx: mpsc::Sender<SupervisorCommand>,
        state_rx: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { cmd_tx, state_rx }
    }

    /// Spawn a supervisor and return its handle, event stream and task
    pub fn spawn<T: Transport, D: Dispatcher>(
        transport: Arc<T>,
        dispatcher: Arc<D>,
        config: LinkConfig,
    ) -> (Self, mpsc::Receiver<LinkEvent>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let task = tokio::spawn(run_supervisor(
            transport, dispatcher, config, cmd_rx, event_tx, state_tx,
        ));

        (Self::new(cmd_tx, state_rx), event_rx, task)
    }

    async fn command(&self, cmd: SupervisorCommand) -> Result<(), LinkError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| LinkError::ActorStopped)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> SupervisorCommand,
    ) -> Result<R, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx)).await?;
        rx.await.map_err(|_| LinkError::ActorStopped)
    }

    /// Write a raw command line to the connected reader
    pub async fn send_raw_command(&self, command: impl Into<String>) -> Result<(), LinkError> {
        let command = command.into();
        self.request(|response| SupervisorCommand::SendRaw { command, response })
            .await?
    }

    /// Drop the current session and scan again immediately
    pub async fn reconnect(&self) -> Result<(), LinkError> {
        self.command(SupervisorCommand::Reconnect).await
    }

    pub async fn start_scanning(&self) -> Result<(), LinkError> {
        self.command(SupervisorCommand::StartScanning).await
    }

    pub async fn stop_scanning(&self) -> Result<(), LinkError> {
        self.command(SupervisorCommand::StopScanning).await
    }

    /// Last decoded record, if the cartridge is still present
    pub async fn current_record(&self) -> Result<Option<CartridgeRecord>, LinkError> {
        self.request(|response| SupervisorCommand::CurrentRecord { response })
            .await
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch the connection state
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Candidate ports seen by the last scan
    pub async fn visible_candidates(&self) -> Result<Vec<PortDescriptor>, LinkError> {
        self.request(|response| SupervisorCommand::VisibleCandidates { response })
            .await
    }

    /// Run the identification handshake against one port
    ///
    /// The port is never promoted to a session. Testing the port of the
    /// open session, or one a scan is validating or connecting to, fails
    /// with [`LinkError::PortBusy`].
    pub async fn test_port(&self, path: impl Into<String>) -> Result<bool, LinkError> {
        let path = path.into();
        self.request(|response| SupervisorCommand::TestPort { path, response })
            .await?
    }

    /// Stop the supervisor, closing any open session
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.command(SupervisorCommand::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::io::DuplexStream;

    use super::*;
    use crate::error::DispatchError;

    /// Transport with nothing plugged in
    struct EmptyTransport;

    impl Transport for EmptyTransport {
        type Stream = DuplexStream;

        fn list_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
            Ok(Vec::new())
        }

        fn open(
            &self,
            path: &str,
        ) -> impl Future<Output = Result<DuplexStream, DetectError>> + Send {
            let path = path.to_string();
            async move {
                Err(DetectError::OpenFailed {
                    port: path,
                    reason: "no such device".into(),
                })
            }
        }
    }

    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn launch(&self, _path: &str) -> impl Future<Output = Result<(), DispatchError>> + Send {
            async { Ok(()) }
        }
    }

    fn spawn() -> (LinkHandle, mpsc::Receiver<LinkEvent>, JoinHandle<()>) {
        LinkHandle::spawn(
            Arc::new(EmptyTransport),
            Arc::new(NullDispatcher),
            LinkConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_session_is_not_connected() {
        let (link, _events, _task) = spawn();
        assert!(matches!(
            link.send_raw_command("PING").await,
            Err(LinkError::NotConnected)
        ));
        assert_eq!(link.current_record().await.unwrap(), None);
        assert!(link.visible_candidates().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_scanning_goes_idle() {
        let (link, _events, _task) = spawn();
        let mut state = link.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Scanning)
            .await
            .unwrap();

        link.stop_scanning().await.unwrap();
        state.wait_for(|s| *s == ConnectionState::Idle).await.unwrap();

        // No scheduled scan wakes it up again
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(link.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_does_not_count_as_failure() {
        let (_link, mut events, _task) = spawn();

        tokio::time::sleep(Duration::from_secs(30)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!event.is_error(), "unexpected {:?}", event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_actor() {
        let (link, _events, task) = spawn();
        link.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(link.reconnect().await, Err(LinkError::ActorStopped)));
        assert!(matches!(
            link.test_port("/dev/ttyUSB0").await,
            Err(LinkError::ActorStopped)
        ));
    }
}
