//! Connection lifecycle: a pure session state machine plus the transport
//! driver thread that executes its decisions.
//!
//! The machine owns the [`ConnectionPhase`], the reconnect bookkeeping, and
//! the outbound queue; it maps one [`SessionEvent`] to a list of [`Action`]s
//! and never touches a socket, so every reconnect and queue-draining rule is
//! testable without a live transport. The driver owns the `TcpStream`, the
//! reader thread, and the backoff deadline, and feeds transport outcomes
//! back into the machine as further events.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{at, never, select, unbounded, Receiver, Sender};
use grid_schema::{
    decode_server_event, encode_client_envelope, read_frame, write_frame, ClientEnvelope, Command,
    ServerEvent, WorldSnapshot,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::queue::OutboundQueue;
use crate::view::DerivedView;

/// Lifecycle stage of the transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Closing => "closing",
        };
        write!(f, "{}", label)
    }
}

/// Observable connection state. A session that exhausted its retry budget
/// reads as `Disconnected` with `reconnect_pending == false` and `attempts`
/// at the configured maximum; consumers re-arm it with an explicit connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub attempts: u32,
    pub reconnect_pending: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            attempts: 0,
            reconnect_pending: false,
        }
    }
}

/// One input to the session machine.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The consumer asked for a connection.
    ConnectRequested,
    /// The transport finished its handshake.
    TransportOpened,
    /// One framed payload arrived from the server.
    FrameReceived(Vec<u8>),
    /// The transport went away; `deliberate` marks a locally requested close.
    TransportClosed { deliberate: bool },
    /// A scheduled reconnect delay elapsed.
    ReconnectDue,
    /// The consumer issued a command.
    CommandIssued(Command),
    /// The consumer asked for a teardown.
    DisconnectRequested,
}

/// One decision the driver must carry out.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    OpenTransport,
    Transmit(ClientEnvelope),
    FlushQueue,
    ScheduleReconnect(Duration),
    CancelReconnect,
    CloseTransport,
    ReplaceSnapshot(WorldSnapshot),
    RaiseError(String),
}

/// Pure state machine for one session.
///
/// Exclusive owner of the outbound queue; the driver reaches the queue only
/// through [`drain_queue`](Self::drain_queue) and
/// [`requeue_front`](Self::requeue_front).
pub(crate) struct SessionMachine {
    config: SessionConfig,
    phase: ConnectionPhase,
    attempts: u32,
    reconnect_pending: bool,
    queue: OutboundQueue,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
            phase: ConnectionPhase::Disconnected,
            attempts: 0,
            reconnect_pending: false,
            queue: OutboundQueue::new(),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase,
            attempts: self.attempts,
            reconnect_pending: self.reconnect_pending,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drain the outbound queue head-first through `send`.
    pub fn drain_queue(&mut self, send: impl FnMut(&ClientEnvelope) -> bool) -> usize {
        self.queue.drain(send)
    }

    /// Put a failed live transmit back at the queue head so the next flush
    /// retries it first.
    pub fn requeue_front(&mut self, envelope: ClientEnvelope) {
        self.queue.requeue_front(envelope);
    }

    /// Advance the machine by one event and return the driver's work list.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::ConnectRequested => self.on_connect_requested(),
            SessionEvent::TransportOpened => self.on_transport_opened(),
            SessionEvent::FrameReceived(bytes) => self.on_frame(&bytes),
            SessionEvent::TransportClosed { deliberate } => self.on_closed(deliberate),
            SessionEvent::ReconnectDue => self.on_reconnect_due(),
            SessionEvent::CommandIssued(command) => self.on_command(command),
            SessionEvent::DisconnectRequested => self.on_disconnect_requested(),
        }
    }

    fn on_connect_requested(&mut self) -> Vec<Action> {
        match self.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {
                debug!(phase = %self.phase, "connect ignored; session already active");
                Vec::new()
            }
            ConnectionPhase::Disconnected | ConnectionPhase::Closing => {
                let mut actions = Vec::new();
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    actions.push(Action::CancelReconnect);
                }
                self.phase = ConnectionPhase::Connecting;
                actions.push(Action::OpenTransport);
                actions
            }
        }
    }

    fn on_transport_opened(&mut self) -> Vec<Action> {
        self.phase = ConnectionPhase::Connected;
        self.attempts = 0;
        self.reconnect_pending = false;
        info!(game = %self.config.game, viewer = %self.config.viewer, "session connected");
        vec![
            Action::Transmit(self.envelope(Command::RequestState)),
            Action::FlushQueue,
        ]
    }

    fn on_frame(&mut self, bytes: &[u8]) -> Vec<Action> {
        match decode_server_event(bytes) {
            Ok(ServerEvent::StateReplace(snapshot)) => vec![Action::ReplaceSnapshot(snapshot)],
            Ok(ServerEvent::Error(message)) => {
                debug!(message = %message, "server reported an error");
                vec![Action::RaiseError(message)]
            }
            Ok(ServerEvent::Ignored(kind)) => {
                debug!(kind = %kind, "ignoring envelope of unhandled kind");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "dropping unparseable frame");
                Vec::new()
            }
        }
    }

    fn on_closed(&mut self, deliberate: bool) -> Vec<Action> {
        let was = self.phase;
        if was == ConnectionPhase::Disconnected {
            debug!("close event while already disconnected");
            return Vec::new();
        }
        self.phase = ConnectionPhase::Disconnected;
        if deliberate || was == ConnectionPhase::Closing {
            self.reconnect_pending = false;
            info!("session closed");
            return Vec::new();
        }
        if self.attempts < self.config.max_reconnect_attempts {
            let delay = self.backoff_delay();
            self.attempts += 1;
            self.reconnect_pending = true;
            warn!(
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                "connection lost; reconnect scheduled"
            );
            vec![Action::ScheduleReconnect(delay)]
        } else {
            self.reconnect_pending = false;
            warn!(
                attempts = self.attempts,
                "connection lost; retry budget exhausted"
            );
            Vec::new()
        }
    }

    fn on_reconnect_due(&mut self) -> Vec<Action> {
        if !self.reconnect_pending || self.phase != ConnectionPhase::Disconnected {
            // A cancel or an explicit connect got there first.
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.phase = ConnectionPhase::Connecting;
        info!(attempt = self.attempts, "reconnecting");
        vec![Action::OpenTransport]
    }

    fn on_command(&mut self, command: Command) -> Vec<Action> {
        let envelope = self.envelope(command);
        match self.phase {
            ConnectionPhase::Connected => vec![Action::Transmit(envelope)],
            ConnectionPhase::Connecting | ConnectionPhase::Closing => {
                debug!(kind = envelope.command.kind(), "command queued");
                self.queue.enqueue(envelope);
                Vec::new()
            }
            ConnectionPhase::Disconnected => {
                debug!(
                    kind = envelope.command.kind(),
                    "command queued while disconnected"
                );
                self.queue.enqueue(envelope);
                if self.reconnect_pending {
                    // The scheduled reconnect will flush the queue.
                    Vec::new()
                } else {
                    self.phase = ConnectionPhase::Connecting;
                    vec![Action::OpenTransport]
                }
            }
        }
    }

    fn on_disconnect_requested(&mut self) -> Vec<Action> {
        match self.phase {
            ConnectionPhase::Connected | ConnectionPhase::Connecting => {
                self.phase = ConnectionPhase::Closing;
                vec![Action::CloseTransport]
            }
            ConnectionPhase::Disconnected => {
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    info!("pending reconnect cancelled");
                    vec![Action::CancelReconnect]
                } else {
                    Vec::new()
                }
            }
            ConnectionPhase::Closing => Vec::new(),
        }
    }

    /// Delay before the next reconnect: `floor * 2^attempts`, capped at the
    /// configured ceiling.
    fn backoff_delay(&self) -> Duration {
        let doubling = 2u32.saturating_pow(self.attempts.min(30));
        self.config
            .reconnect_floor
            .saturating_mul(doubling)
            .min(self.config.reconnect_ceiling)
    }

    fn envelope(&self, command: Command) -> ClientEnvelope {
        ClientEnvelope::new(command, self.config.game, self.config.viewer)
    }
}

/// Consumer requests routed to the driver thread.
#[derive(Debug)]
pub(crate) enum ControlMsg {
    Connect,
    Disconnect,
    Command(Command),
    Shutdown,
}

/// Outcomes reported by a reader thread, tagged with the connection epoch
/// so a dead connection cannot speak for its successor.
#[derive(Debug)]
enum TransportEvent {
    Frame { epoch: u64, bytes: Vec<u8> },
    Closed { epoch: u64 },
}

/// Latest snapshot with its derived view, replaced together.
#[derive(Clone)]
pub(crate) struct PublishedWorld {
    pub snapshot: Arc<WorldSnapshot>,
    pub derived: Arc<DerivedView>,
}

/// State the driver publishes for the facade to read.
pub(crate) struct SessionShared {
    pub status: RwLock<ConnectionStatus>,
    pub world: RwLock<Option<PublishedWorld>>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ConnectionStatus::default()),
            world: RwLock::new(None),
        }
    }
}

/// Body of the session driver thread. Returns when a `Shutdown` arrives or
/// the control channel closes.
pub(crate) fn run_driver(
    config: SessionConfig,
    shared: Arc<SessionShared>,
    control_rx: Receiver<ControlMsg>,
    diagnostics_tx: Sender<String>,
) {
    let (event_tx, event_rx) = unbounded();
    let driver = Driver {
        machine: SessionMachine::new(&config),
        config,
        shared,
        diagnostics: diagnostics_tx,
        event_tx,
        transport: None,
        epoch: 0,
        reconnect_at: None,
    };
    driver.run(control_rx, event_rx);
}

struct Driver {
    config: SessionConfig,
    machine: SessionMachine,
    shared: Arc<SessionShared>,
    diagnostics: Sender<String>,
    event_tx: Sender<TransportEvent>,
    transport: Option<TcpStream>,
    epoch: u64,
    reconnect_at: Option<Instant>,
}

impl Driver {
    fn run(mut self, control_rx: Receiver<ControlMsg>, event_rx: Receiver<TransportEvent>) {
        loop {
            // The backoff wait doubles as the idle park: with no reconnect
            // pending the timer never fires and the loop blocks on traffic.
            let timer = match self.reconnect_at {
                Some(deadline) => at(deadline),
                None => never(),
            };
            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(ControlMsg::Connect) => self.dispatch(SessionEvent::ConnectRequested),
                    Ok(ControlMsg::Disconnect) => self.dispatch(SessionEvent::DisconnectRequested),
                    Ok(ControlMsg::Command(command)) => {
                        self.dispatch(SessionEvent::CommandIssued(command));
                    }
                    Ok(ControlMsg::Shutdown) | Err(_) => break,
                },
                recv(event_rx) -> event => match event {
                    Ok(event) => self.handle_transport_event(event),
                    // Unreachable while the driver holds its own sender clone.
                    Err(_) => {}
                },
                recv(timer) -> _ => {
                    self.reconnect_at = None;
                    self.dispatch(SessionEvent::ReconnectDue);
                }
            }
        }
        self.close_transport();
        debug!("session driver stopped");
    }

    /// Feed one event through the machine, performing each resulting action.
    /// Actions that change the transport report back as further events (a
    /// dial outcome, a completed close) until the work list is empty.
    fn dispatch(&mut self, event: SessionEvent) {
        let mut events = VecDeque::new();
        events.push_back(event);
        while let Some(event) = events.pop_front() {
            for action in self.machine.handle(event) {
                if let Some(follow_up) = self.perform(action) {
                    events.push_back(follow_up);
                }
            }
        }
        *self.shared.status.write() = self.machine.status();
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame { epoch, bytes } if epoch == self.epoch => {
                self.dispatch(SessionEvent::FrameReceived(bytes));
            }
            TransportEvent::Closed { epoch } if epoch == self.epoch => {
                // The reader is gone; drop the dead socket before the machine
                // schedules recovery.
                self.close_transport();
                self.dispatch(SessionEvent::TransportClosed { deliberate: false });
            }
            // Stale epoch: a torn-down connection's reader winding down.
            event => trace!(?event, "dropping stale transport event"),
        }
    }

    fn perform(&mut self, action: Action) -> Option<SessionEvent> {
        match action {
            Action::OpenTransport => Some(self.open_transport()),
            Action::Transmit(envelope) => self.transmit(envelope),
            Action::FlushQueue => self.flush_queue(),
            Action::ScheduleReconnect(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::CloseTransport => {
                self.close_transport();
                Some(SessionEvent::TransportClosed { deliberate: true })
            }
            Action::ReplaceSnapshot(snapshot) => {
                self.publish_world(snapshot);
                None
            }
            Action::RaiseError(message) => {
                let _ = self.diagnostics.send(message);
                None
            }
        }
    }

    fn open_transport(&mut self) -> SessionEvent {
        match self.dial() {
            Ok(stream) => {
                self.epoch += 1;
                if let Err(err) = self.spawn_reader(&stream) {
                    warn!(error = %err, "reader thread failed to start");
                    let _ = stream.shutdown(Shutdown::Both);
                    return SessionEvent::TransportClosed { deliberate: false };
                }
                self.transport = Some(stream);
                SessionEvent::TransportOpened
            }
            Err(err) => {
                warn!(endpoint = %self.config.endpoint, error = %err, "connect failed");
                SessionEvent::TransportClosed { deliberate: false }
            }
        }
    }

    fn dial(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.config.endpoint.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(error = %err, "failed to set TCP_NODELAY");
                    }
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "endpoint resolved to no addresses",
            )
        }))
    }

    fn spawn_reader(&self, stream: &TcpStream) -> io::Result<()> {
        let reader = stream.try_clone()?;
        let epoch = self.epoch;
        let events = self.event_tx.clone();
        thread::Builder::new()
            .name(format!("session-reader-{}", epoch))
            .spawn(move || run_reader(reader, epoch, events))?;
        Ok(())
    }

    /// Send one envelope on the live transport. A refused write tears the
    /// session down on the spot: the write side of a half-open socket fails
    /// without the reader ever reporting a close, and later commands must
    /// queue behind the requeued one rather than race another live send.
    fn transmit(&mut self, envelope: ClientEnvelope) -> Option<SessionEvent> {
        let sent = match self.transport.as_mut() {
            Some(stream) => send_envelope(stream, &envelope),
            None => false,
        };
        if sent {
            return None;
        }
        warn!(kind = envelope.command.kind(), "live transmit failed");
        // A state request is regenerated on every open; everything else
        // goes back to the queue head for the next connection.
        if !matches!(envelope.command, Command::RequestState) {
            self.machine.requeue_front(envelope);
        }
        self.close_transport();
        Some(SessionEvent::TransportClosed { deliberate: false })
    }

    fn flush_queue(&mut self) -> Option<SessionEvent> {
        let Self {
            machine, transport, ..
        } = self;
        let Some(stream) = transport.as_mut() else {
            return None;
        };
        let mut refused = false;
        let sent = machine.drain_queue(|envelope| {
            let delivered = send_envelope(stream, envelope);
            refused |= !delivered;
            delivered
        });
        if sent > 0 {
            debug!(sent, remaining = machine.queued(), "queued commands flushed");
        }
        if refused {
            self.close_transport();
            return Some(SessionEvent::TransportClosed { deliberate: false });
        }
        None
    }

    fn close_transport(&mut self) {
        if let Some(stream) = self.transport.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // Anything the old reader still reports is stale from here on.
        self.epoch += 1;
    }

    fn publish_world(&mut self, snapshot: WorldSnapshot) {
        info!(
            round = snapshot.round,
            phase = %snapshot.phase,
            "snapshot replaced"
        );
        let snapshot = Arc::new(snapshot);
        let derived = Arc::new(DerivedView::derive(
            &snapshot,
            self.config.viewer,
            &self.config.viewport,
        ));
        *self.shared.world.write() = Some(PublishedWorld { snapshot, derived });
    }
}

fn run_reader(mut stream: TcpStream, epoch: u64, events: Sender<TransportEvent>) {
    loop {
        match read_frame(&mut stream) {
            Ok(bytes) => {
                trace!(epoch, len = bytes.len(), "frame received");
                if events.send(TransportEvent::Frame { epoch, bytes }).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(epoch, error = %err, "reader stopped");
                let _ = events.send(TransportEvent::Closed { epoch });
                return;
            }
        }
    }
}

/// Write one envelope as a frame. Returns false only when the transport
/// refused the write; an envelope that cannot encode is dropped with an
/// error log rather than wedging the queue behind it.
fn send_envelope(stream: &mut TcpStream, envelope: &ClientEnvelope) -> bool {
    let bytes = match encode_client_envelope(envelope) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(kind = envelope.command.kind(), error = %err, "envelope failed to encode");
            return true;
        }
    };
    match write_frame(stream, &bytes) {
        Ok(()) => {
            trace!(kind = envelope.command.kind(), "envelope sent");
            true
        }
        Err(err) => {
            warn!(error = %err, "frame write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use grid_schema::{
        encode_error, encode_state_replace, GameId, LinkDirective, LinkId, PartyId, Phase,
        ResourceId, TradeRef,
    };

    fn test_config() -> SessionConfig {
        SessionConfig::new("127.0.0.1:0", GameId(7), PartyId(2))
    }

    fn machine() -> SessionMachine {
        SessionMachine::new(&test_config())
    }

    /// Drive a fresh machine to the connected state, discarding the open
    /// actions already covered by dedicated tests.
    fn connected_machine() -> SessionMachine {
        let mut m = machine();
        m.handle(SessionEvent::ConnectRequested);
        m.handle(SessionEvent::TransportOpened);
        assert_eq!(m.phase(), ConnectionPhase::Connected);
        m
    }

    fn empty_snapshot() -> WorldSnapshot {
        WorldSnapshot {
            game: GameId(7),
            round: 1,
            phase: Phase::Construction,
            parties: Vec::new(),
            nodes: Vec::new(),
            links: Vec::new(),
            resources: Vec::new(),
        }
    }

    fn drained(machine: &mut SessionMachine) -> Vec<ClientEnvelope> {
        let mut sent = Vec::new();
        machine.drain_queue(|envelope| {
            sent.push(envelope.clone());
            true
        });
        sent
    }

    #[test]
    fn connect_opens_transport_once() {
        let mut m = machine();
        assert_eq!(
            m.handle(SessionEvent::ConnectRequested),
            vec![Action::OpenTransport]
        );
        assert_eq!(m.phase(), ConnectionPhase::Connecting);

        // Repeated requests while connecting or connected are no-ops.
        assert!(m.handle(SessionEvent::ConnectRequested).is_empty());
        m.handle(SessionEvent::TransportOpened);
        assert!(m.handle(SessionEvent::ConnectRequested).is_empty());
    }

    #[test]
    fn open_requests_state_then_flushes() {
        let mut m = machine();
        m.handle(SessionEvent::ConnectRequested);
        let actions = m.handle(SessionEvent::TransportOpened);
        assert_eq!(
            actions,
            vec![
                Action::Transmit(ClientEnvelope::new(
                    Command::RequestState,
                    GameId(7),
                    PartyId(2)
                )),
                Action::FlushQueue,
            ]
        );
        let status = m.status();
        assert_eq!(status.phase, ConnectionPhase::Connected);
        assert_eq!(status.attempts, 0);
        assert!(!status.reconnect_pending);
    }

    #[test]
    fn commands_issued_offline_flush_in_order() {
        let mut m = machine();

        // The first command opportunistically connects; the rest arrive
        // while the dial is still in flight.
        let first = m.handle(SessionEvent::CommandIssued(Command::AcquireRequest {
            entity: TradeRef::Resource(ResourceId(1)),
        }));
        assert_eq!(first, vec![Action::OpenTransport]);
        assert!(m
            .handle(SessionEvent::CommandIssued(Command::UpdateOfferRequest {
                resource: ResourceId(2),
                price: 55.0,
            }))
            .is_empty());
        assert!(m
            .handle(SessionEvent::CommandIssued(Command::EndTurn))
            .is_empty());
        assert_eq!(m.queued(), 3);

        m.handle(SessionEvent::TransportOpened);
        let sent = drained(&mut m);
        let kinds: Vec<_> = sent.iter().map(|e| e.command.kind()).collect();
        assert_eq!(
            kinds,
            vec!["acquire_request", "update_offer_request", "end_turn"]
        );
    }

    #[test]
    fn connected_commands_transmit_without_queueing() {
        let mut m = connected_machine();
        let actions = m.handle(SessionEvent::CommandIssued(Command::SetLinkStateRequest {
            link: LinkId(4),
            state: LinkDirective::Closed,
        }));
        assert_eq!(
            actions,
            vec![Action::Transmit(ClientEnvelope::new(
                Command::SetLinkStateRequest {
                    link: LinkId(4),
                    state: LinkDirective::Closed,
                },
                GameId(7),
                PartyId(2),
            ))]
        );
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn command_with_reconnect_pending_waits_for_the_timer() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert!(m.status().reconnect_pending);

        // No second connection attempt; the scheduled one will flush.
        let actions = m.handle(SessionEvent::CommandIssued(Command::EndTurn));
        assert!(actions.is_empty());
        assert_eq!(m.queued(), 1);
    }

    #[test]
    fn backoff_schedule_doubles_to_the_ceiling_then_gives_up() {
        let mut m = machine();
        let mut delays = Vec::new();
        for _ in 0..5 {
            m.handle(SessionEvent::ConnectRequested);
            let actions = m.handle(SessionEvent::TransportClosed { deliberate: false });
            match actions.as_slice() {
                [Action::ScheduleReconnect(delay)] => delays.push(*delay),
                other => panic!("expected a scheduled reconnect, got {:?}", other),
            }
            // Swallow the timer without opening so attempts keep counting.
            m.handle(SessionEvent::ReconnectDue);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );

        // Sixth failure exhausts the budget: terminal disconnected state.
        let actions = m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert!(actions.is_empty());
        let status = m.status();
        assert_eq!(status.phase, ConnectionPhase::Disconnected);
        assert_eq!(status.attempts, 5);
        assert!(!status.reconnect_pending);
    }

    #[test]
    fn backoff_delay_is_capped() {
        let mut config = test_config();
        config.reconnect_ceiling = Duration::from_secs(4);
        let mut m = SessionMachine::new(&config);
        let mut delays = Vec::new();
        for _ in 0..5 {
            m.handle(SessionEvent::ConnectRequested);
            if let [Action::ScheduleReconnect(delay)] = m
                .handle(SessionEvent::TransportClosed { deliberate: false })
                .as_slice()
            {
                delays.push(*delay);
            }
            m.handle(SessionEvent::ReconnectDue);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn successful_open_resets_the_retry_budget() {
        let mut m = machine();
        for _ in 0..3 {
            m.handle(SessionEvent::ConnectRequested);
            m.handle(SessionEvent::TransportClosed { deliberate: false });
            m.handle(SessionEvent::ReconnectDue);
        }
        assert_eq!(m.status().attempts, 3);

        m.handle(SessionEvent::TransportOpened);
        assert_eq!(m.status().attempts, 0);

        // The next failure schedules from the floor again.
        let actions = m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert_eq!(
            actions,
            vec![Action::ScheduleReconnect(Duration::from_secs(1))]
        );
    }

    #[test]
    fn deliberate_close_does_not_reconnect() {
        let mut m = connected_machine();
        let actions = m.handle(SessionEvent::DisconnectRequested);
        assert_eq!(actions, vec![Action::CloseTransport]);
        assert_eq!(m.phase(), ConnectionPhase::Closing);

        let actions = m.handle(SessionEvent::TransportClosed { deliberate: true });
        assert!(actions.is_empty());
        let status = m.status();
        assert_eq!(status.phase, ConnectionPhase::Disconnected);
        assert!(!status.reconnect_pending);
    }

    #[test]
    fn disconnect_cancels_a_pending_reconnect() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert!(m.status().reconnect_pending);

        let actions = m.handle(SessionEvent::DisconnectRequested);
        assert_eq!(actions, vec![Action::CancelReconnect]);
        assert!(!m.status().reconnect_pending);

        // A timer that fires anyway must not open a transport.
        assert!(m.handle(SessionEvent::ReconnectDue).is_empty());
        assert_eq!(m.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn reconnect_due_opens_the_transport() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        let actions = m.handle(SessionEvent::ReconnectDue);
        assert_eq!(actions, vec![Action::OpenTransport]);
        assert_eq!(m.phase(), ConnectionPhase::Connecting);
    }

    #[test]
    fn explicit_connect_cancels_the_timer_first() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        let actions = m.handle(SessionEvent::ConnectRequested);
        assert_eq!(
            actions,
            vec![Action::CancelReconnect, Action::OpenTransport]
        );
    }

    #[test]
    fn state_replace_frame_replaces_the_snapshot() {
        let mut m = connected_machine();
        let snapshot = empty_snapshot();
        let bytes = encode_state_replace(&snapshot, PartyId(2)).expect("snapshot encodes");
        let actions = m.handle(SessionEvent::FrameReceived(bytes));
        assert_eq!(actions, vec![Action::ReplaceSnapshot(snapshot)]);
    }

    #[test]
    fn error_frame_raises_without_touching_state() {
        let mut m = connected_machine();
        let bytes =
            encode_error("offer below minimum", GameId(7), PartyId(2)).expect("error encodes");
        let actions = m.handle(SessionEvent::FrameReceived(bytes));
        assert_eq!(
            actions,
            vec![Action::RaiseError("offer below minimum".to_string())]
        );
        assert_eq!(m.phase(), ConnectionPhase::Connected);
    }

    #[test]
    fn junk_and_unknown_frames_are_dropped() {
        let mut m = connected_machine();
        assert!(m
            .handle(SessionEvent::FrameReceived(b"not json".to_vec()))
            .is_empty());

        let unknown = serde_json::to_vec(&serde_json::json!({
            "kind": "lobby_chat",
            "payload": {},
            "gameId": 7,
            "viewerId": 2,
        }))
        .expect("encodes");
        assert!(m.handle(SessionEvent::FrameReceived(unknown)).is_empty());
        assert_eq!(m.phase(), ConnectionPhase::Connected);
    }

    #[test]
    fn requeued_transmit_leads_the_next_flush() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        m.handle(SessionEvent::CommandIssued(Command::EndTurn));

        // A failed live transmit goes back ahead of the queued command.
        m.requeue_front(ClientEnvelope::new(
            Command::AcquireRequest {
                entity: TradeRef::Link(LinkId(9)),
            },
            GameId(7),
            PartyId(2),
        ));
        let sent = drained(&mut m);
        let kinds: Vec<_> = sent.iter().map(|e| e.command.kind()).collect();
        assert_eq!(kinds, vec!["acquire_request", "end_turn"]);
    }

    #[test]
    fn duplicate_close_reports_are_ignored() {
        let mut m = connected_machine();
        m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert_eq!(m.status().attempts, 1);

        // A second report of the same failure must not burn another attempt.
        let actions = m.handle(SessionEvent::TransportClosed { deliberate: false });
        assert!(actions.is_empty());
        let status = m.status();
        assert_eq!(status.attempts, 1);
        assert!(status.reconnect_pending);
    }

    /// Local TCP pair; the returned server half keeps the peer alive.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener binds");
        let addr = listener.local_addr().expect("listener addr");
        let client = TcpStream::connect(addr).expect("client connects");
        let (server, _) = listener.accept().expect("accept");
        (client, server)
    }

    /// Driver with an injected transport and no reader thread, for exercising
    /// the transmit and teardown paths synchronously.
    fn test_driver(transport: Option<TcpStream>) -> Driver {
        let config = test_config();
        let (event_tx, _event_rx) = unbounded();
        let (diagnostics, _diagnostics_rx) = unbounded();
        Driver {
            machine: SessionMachine::new(&config),
            config,
            shared: Arc::new(SessionShared::new()),
            diagnostics,
            event_tx,
            transport,
            epoch: 1,
            reconnect_at: None,
        }
    }

    #[test]
    fn refused_transmit_tears_down_and_keeps_issue_order() {
        let (client, _server) = socket_pair();
        client.shutdown(Shutdown::Write).expect("write half closes");
        let mut driver = test_driver(Some(client));
        driver.machine = connected_machine();

        // The write side is dead but the reader never reports it. The first
        // refused transmit must take the session down by itself.
        driver.dispatch(SessionEvent::CommandIssued(Command::EndTurn));
        assert!(driver.transport.is_none());
        assert!(driver.reconnect_at.is_some());
        let status = *driver.shared.status.read();
        assert_eq!(status.phase, ConnectionPhase::Disconnected);
        assert!(status.reconnect_pending);
        assert_eq!(driver.machine.queued(), 1);

        // A command issued after the failure queues behind the requeued one.
        driver.dispatch(SessionEvent::CommandIssued(Command::UpdateOfferRequest {
            resource: ResourceId(2),
            price: 60.0,
        }));
        let sent = drained(&mut driver.machine);
        let kinds: Vec<_> = sent.iter().map(|e| e.command.kind()).collect();
        assert_eq!(kinds, vec!["end_turn", "update_offer_request"]);
    }

    #[test]
    fn refused_state_request_on_open_schedules_recovery() {
        let (client, _server) = socket_pair();
        client.shutdown(Shutdown::Write).expect("write half closes");
        let mut driver = test_driver(Some(client));
        driver.machine.handle(SessionEvent::ConnectRequested);

        driver.dispatch(SessionEvent::TransportOpened);

        assert!(driver.transport.is_none());
        assert!(driver.reconnect_at.is_some());
        let status = *driver.shared.status.read();
        assert_eq!(status.phase, ConnectionPhase::Disconnected);
        assert!(status.reconnect_pending);
        // The state request is regenerated on every open, never replayed.
        assert_eq!(driver.machine.queued(), 0);
    }

    #[test]
    fn refused_flush_keeps_the_queue_and_reports_closure() {
        let (client, _server) = socket_pair();
        client.shutdown(Shutdown::Write).expect("write half closes");
        let mut driver = test_driver(Some(client));
        driver
            .machine
            .handle(SessionEvent::CommandIssued(Command::AcquireRequest {
                entity: TradeRef::Resource(ResourceId(3)),
            }));
        driver
            .machine
            .handle(SessionEvent::CommandIssued(Command::EndTurn));
        driver.machine.handle(SessionEvent::TransportOpened);
        assert_eq!(driver.machine.queued(), 2);

        let follow_up = driver.flush_queue();
        assert!(matches!(
            follow_up,
            Some(SessionEvent::TransportClosed { deliberate: false })
        ));
        assert!(driver.transport.is_none());

        // Nothing left the queue and the order survived.
        let sent = drained(&mut driver.machine);
        let kinds: Vec<_> = sent.iter().map(|e| e.command.kind()).collect();
        assert_eq!(kinds, vec!["acquire_request", "end_turn"]);
    }

    #[test]
    fn reader_closure_releases_the_socket_and_schedules_recovery() {
        let (client, _server) = socket_pair();
        let mut driver = test_driver(Some(client));
        driver.machine = connected_machine();

        driver.handle_transport_event(TransportEvent::Closed { epoch: 1 });

        assert!(driver.transport.is_none());
        assert!(driver.reconnect_at.is_some());
        let status = *driver.shared.status.read();
        assert_eq!(status.phase, ConnectionPhase::Disconnected);
        assert!(status.reconnect_pending);
    }

    #[test]
    fn stale_reader_events_do_not_disturb_the_session() {
        let (client, _server) = socket_pair();
        let mut driver = test_driver(Some(client));
        driver.machine = connected_machine();

        driver.handle_transport_event(TransportEvent::Closed { epoch: 0 });
        driver.handle_transport_event(TransportEvent::Frame {
            epoch: 0,
            bytes: b"ignored".to_vec(),
        });

        assert!(driver.transport.is_some());
        assert_eq!(driver.machine.phase(), ConnectionPhase::Connected);
    }
}
