use std::time::Duration;

use grid_schema::{GameId, PartyId};

use crate::transform::Viewport;

/// Connection, identity, and derivation parameters for one session.
///
/// The reconnect knobs default to the protocol values (1 s floor doubling to
/// a 30 s ceiling, five attempts); tests shrink them to keep wall-clock time
/// down.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// host:port of the game server.
    pub endpoint: String,
    pub game: GameId,
    pub viewer: PartyId,
    /// Viewport the derived view projects entity positions into.
    pub viewport: Viewport,
    pub connect_timeout: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    pub max_reconnect_attempts: u32,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>, game: GameId, viewer: PartyId) -> Self {
        Self {
            endpoint: endpoint.into(),
            game,
            viewer,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:41500".to_string(),
            game: GameId(0),
            viewer: PartyId(1),
            viewport: Viewport::default(),
            connect_timeout: Duration::from_secs(5),
            reconnect_floor: Duration::from_secs(1),
            reconnect_ceiling: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}
