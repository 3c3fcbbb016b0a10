//! Synchronization client for gridtable sessions.
//!
//! The crate keeps a local replica of one game session: it owns the TCP
//! transport and its reconnect policy, queues commands issued while offline,
//! replaces the world snapshot wholesale as state frames arrive, and derives
//! the per-viewer presentation state (display placement, interaction
//! eligibility) that front ends read. All protocol handling runs on a
//! dedicated driver thread behind the [`SessionController`] facade.

mod config;
mod connection;
mod directory;
mod queue;
mod session;
mod transform;
mod view;

pub use config::SessionConfig;
pub use connection::{ConnectionPhase, ConnectionStatus};
pub use directory::{DirectoryError, MemoryDirectory, SessionDirectory};
pub use session::{SessionController, SessionError};
pub use transform::{DisplayPoint, SimBounds, SimPoint, Viewport};
pub use view::{
    affordable_balance, is_link_acquirable, is_resource_acquirable, is_resource_biddable,
    DerivedView, EntityRef, EntityView, RESOURCE_RING_RADIUS,
};
