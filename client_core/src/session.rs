//! Consumer-facing session facade.
//!
//! [`SessionController::start`] spawns the driver thread and hands back a
//! handle whose methods never block on the network: commands and lifecycle
//! requests go over a control channel, state comes back through shared
//! read-locked cells. Dropping the controller shuts the driver down and
//! joins it.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use grid_schema::{Command, LinkDirective, LinkId, ResourceId, TradeRef, WorldSnapshot};
use thiserror::Error;

use crate::config::SessionConfig;
use crate::connection::{run_driver, ConnectionPhase, ConnectionStatus, ControlMsg, SessionShared};
use crate::view::DerivedView;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session driver thread could not be started: {0}")]
    Spawn(#[from] io::Error),
    /// The driver thread exited; the controller can only be dropped.
    #[error("session driver is no longer running")]
    DriverGone,
}

/// Handle to a running session driver.
///
/// Command methods enqueue or transmit depending on the live connection
/// state and return as soon as the request is handed to the driver; delivery
/// outcomes surface through [`status`](Self::status) and
/// [`next_diagnostic`](Self::next_diagnostic).
pub struct SessionController {
    control: Sender<ControlMsg>,
    diagnostics: Receiver<String>,
    shared: Arc<SessionShared>,
    driver: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Spawn the driver thread for `config`. The session starts disconnected;
    /// call [`connect`](Self::connect) or issue a command to bring it up.
    pub fn start(config: SessionConfig) -> Result<Self, SessionError> {
        let shared = Arc::new(SessionShared::new());
        let (control_tx, control_rx) = unbounded();
        let (diagnostics_tx, diagnostics_rx) = unbounded();
        let driver_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("session-driver".into())
            .spawn(move || run_driver(config, driver_shared, control_rx, diagnostics_tx))?;
        Ok(Self {
            control: control_tx,
            diagnostics: diagnostics_rx,
            shared,
            driver: Some(handle),
        })
    }

    /// Open the transport. A no-op if a connection attempt is already live;
    /// cancels any scheduled reconnect in favour of connecting now.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.send(ControlMsg::Connect)
    }

    /// Tear the transport down without scheduling a reconnect.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(ControlMsg::Disconnect)
    }

    /// Request acquisition of a link or resource at its listed price.
    pub fn acquire(&self, entity: TradeRef) -> Result<(), SessionError> {
        self.command(Command::AcquireRequest { entity })
    }

    /// Update the asking price on a resource the viewer holds.
    pub fn update_offer(&self, resource: ResourceId, price: f64) -> Result<(), SessionError> {
        self.command(Command::UpdateOfferRequest { resource, price })
    }

    /// Request a link be opened or closed.
    pub fn set_link_state(&self, link: LinkId, state: LinkDirective) -> Result<(), SessionError> {
        self.command(Command::SetLinkStateRequest { link, state })
    }

    /// Mark the viewer done with the current turn.
    pub fn end_turn(&self) -> Result<(), SessionError> {
        self.command(Command::EndTurn)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status().phase == ConnectionPhase::Connected
    }

    /// Latest snapshot, if any arrived since the session started.
    pub fn snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.shared
            .world
            .read()
            .as_ref()
            .map(|world| Arc::clone(&world.snapshot))
    }

    /// Derived view paired with the latest snapshot.
    pub fn derived(&self) -> Option<Arc<DerivedView>> {
        self.shared
            .world
            .read()
            .as_ref()
            .map(|world| Arc::clone(&world.derived))
    }

    /// Next server-reported diagnostic, oldest first, without blocking.
    pub fn next_diagnostic(&self) -> Option<String> {
        self.diagnostics.try_recv().ok()
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.send(ControlMsg::Command(command))
    }

    fn send(&self, msg: ControlMsg) -> Result<(), SessionError> {
        self.control.send(msg).map_err(|_| SessionError::DriverGone)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let _ = self.control.send(ControlMsg::Shutdown);
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
    }
}
