//! Out-of-band session resource layer.
//!
//! Creating, listing, and deleting game sessions happens outside the sync
//! protocol; the sync client only ever consumes a [`GameId`] produced here.
//! [`MemoryDirectory`] backs tests and the demo path with seeded worlds.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use grid_schema::{
    GameId, LinkId, LinkState, NodeId, NodeState, PartyId, PartyState, Phase, ResourceId,
    ResourceKind, ResourceState, WorldSnapshot,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

/// Starting balance handed to every non-house party.
const SEED_BALANCE: f64 = 1000.0;
/// Nodes in a seeded world, placed on a ring of this radius.
const SEED_NODES: usize = 5;
const SEED_RING_RADIUS: f64 = 10.0;

const PARTY_PALETTE: [&str; 6] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#46949a",
];

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unknown session {0}")]
    NotFound(GameId),
    #[error("session request rejected: {0}")]
    Rejected(String),
}

/// Session lifecycle operations the client depends on.
pub trait SessionDirectory {
    /// Create a session for the named parties and return its id.
    fn create_session(&self, party_names: &[String]) -> Result<GameId, DirectoryError>;
    /// Ids of every live session.
    fn list_sessions(&self) -> Result<Vec<GameId>, DirectoryError>;
    /// Current authoritative state of one session.
    fn session_state(&self, game: GameId) -> Result<WorldSnapshot, DirectoryError>;
    /// Remove a session; its id is never reused.
    fn delete_session(&self, game: GameId) -> Result<(), DirectoryError>;
}

#[derive(Default)]
struct DirectoryInner {
    issued: u64,
    sessions: BTreeMap<GameId, WorldSnapshot>,
}

/// In-process [`SessionDirectory`] holding each session's seed snapshot.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: Mutex<DirectoryInner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionDirectory for MemoryDirectory {
    fn create_session(&self, party_names: &[String]) -> Result<GameId, DirectoryError> {
        if party_names.is_empty() {
            return Err(DirectoryError::Rejected(
                "at least one party is required".into(),
            ));
        }
        if party_names.iter().any(|name| name.trim().is_empty()) {
            return Err(DirectoryError::Rejected(
                "party names must not be blank".into(),
            ));
        }
        let mut inner = self.inner.lock();
        inner.issued += 1;
        let game = GameId(inner.issued);
        let snapshot = seed_world(game, party_names);
        info!(game = %game, parties = party_names.len(), "session created");
        inner.sessions.insert(game, snapshot);
        Ok(game)
    }

    fn list_sessions(&self) -> Result<Vec<GameId>, DirectoryError> {
        Ok(self.inner.lock().sessions.keys().copied().collect())
    }

    fn session_state(&self, game: GameId) -> Result<WorldSnapshot, DirectoryError> {
        self.inner
            .lock()
            .sessions
            .get(&game)
            .cloned()
            .ok_or(DirectoryError::NotFound(game))
    }

    fn delete_session(&self, game: GameId) -> Result<(), DirectoryError> {
        match self.inner.lock().sessions.remove(&game) {
            Some(_) => {
                info!(game = %game, "session deleted");
                Ok(())
            }
            None => Err(DirectoryError::NotFound(game)),
        }
    }
}

/// Build the round-one world a fresh session starts from: house plus the
/// named parties, a ring of house-owned nodes joined by house-owned links,
/// and one tradable resource per node alternating generator and load.
fn seed_world(game: GameId, party_names: &[String]) -> WorldSnapshot {
    let mut parties = vec![PartyState {
        id: PartyId::HOUSE,
        name: "house".into(),
        color: "#888888".into(),
        balance: 0.0,
        turn_active: false,
        alive: true,
    }];
    for (index, name) in party_names.iter().enumerate() {
        parties.push(PartyState {
            id: PartyId(index as i64 + 1),
            name: name.clone(),
            color: PARTY_PALETTE[index % PARTY_PALETTE.len()].into(),
            balance: SEED_BALANCE,
            turn_active: index == 0,
            alive: true,
        });
    }

    let nodes: Vec<NodeState> = (0..SEED_NODES)
        .map(|index| {
            let angle = index as f64 * TAU / SEED_NODES as f64;
            NodeState {
                id: NodeId(index as u64 + 1),
                owner: PartyId::HOUSE,
                x: SEED_RING_RADIUS * angle.cos(),
                y: SEED_RING_RADIUS * angle.sin(),
                capacity: 4,
                health: 100,
            }
        })
        .collect();

    // Ring topology: each node links to its successor.
    let links: Vec<LinkState> = (0..SEED_NODES)
        .map(|index| LinkState {
            id: LinkId(index as u64 + 1),
            owner: PartyId::HOUSE,
            node_a: nodes[index].id,
            node_b: nodes[(index + 1) % SEED_NODES].id,
            capacity: 50.0,
            health: 100,
            open: true,
            min_price: 30.0,
            for_sale: None,
        })
        .collect();

    let resources: Vec<ResourceState> = (0..SEED_NODES)
        .map(|index| {
            let generator = index % 2 == 0;
            ResourceState {
                id: ResourceId(index as u64 + 1),
                owner: PartyId::HOUSE,
                node: nodes[index].id,
                kind: if generator {
                    ResourceKind::Generator
                } else {
                    ResourceKind::Load
                },
                output: if generator { 40.0 } else { -25.0 },
                health: 100,
                active: true,
                min_price: 50.0,
                offer_price: 0.0,
                for_sale: None,
            }
        })
        .collect();

    WorldSnapshot {
        game,
        round: 1,
        phase: Phase::Construction,
        parties,
        nodes,
        links,
        resources,
    }
}
