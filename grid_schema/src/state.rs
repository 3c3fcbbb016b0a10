use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one game session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameId(pub u64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a participating party. The house (neutral bank) is `-1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId(pub i64);

impl PartyId {
    /// The non-player party that owns everything not yet acquired.
    pub const HOUSE: PartyId = PartyId(-1);

    pub fn is_house(self) -> bool {
        self == Self::HOUSE
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Game stage gating which commands the server will accept.
///
/// The cycle is fixed: construction (acquisitions), maneuvers (link
/// operation), auction (offers on owned resources), then back around with
/// the round counter advancing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Construction,
    Maneuvers,
    Auction,
}

impl Phase {
    pub fn next(self) -> Phase {
        match self {
            Phase::Construction => Phase::Maneuvers,
            Phase::Maneuvers => Phase::Auction,
            Phase::Auction => Phase::Construction,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Construction => "construction",
            Phase::Maneuvers => "maneuvers",
            Phase::Auction => "auction",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartyState {
    pub id: PartyId,
    pub name: String,
    pub color: String,
    pub balance: f64,
    pub turn_active: bool,
    pub alive: bool,
}

/// A site in the simulation. Node positions double as the playable area:
/// the coordinate transform derives its bounds from them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeState {
    pub id: NodeId,
    pub owner: PartyId,
    pub x: f64,
    pub y: f64,
    pub capacity: u32,
    pub health: u32,
}

/// A connection between two nodes. `open` reflects the operable state the
/// maneuvers phase toggles; `for_sale` is tri-state (absent means tradable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkState {
    pub id: LinkId,
    pub owner: PartyId,
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub capacity: f64,
    pub health: u32,
    pub open: bool,
    pub min_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_sale: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Generator,
    Load,
}

/// A tradable item attached to one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    pub id: ResourceId,
    pub owner: PartyId,
    pub node: NodeId,
    pub kind: ResourceKind,
    pub output: f64,
    pub health: u32,
    pub active: bool,
    pub min_price: f64,
    pub offer_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_sale: Option<bool>,
}

/// Entity ids owned by one party, in snapshot iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Holdings {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
    pub resources: Vec<ResourceId>,
}

/// The complete authoritative state at one point in time.
///
/// Snapshots are replaced wholesale when a state-replace envelope arrives;
/// nothing merges field-by-field into an older snapshot. Collections keep
/// the server's iteration order, which downstream placement relies on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub game: GameId,
    pub round: u32,
    pub phase: Phase,
    pub parties: Vec<PartyState>,
    pub nodes: Vec<NodeState>,
    pub links: Vec<LinkState>,
    pub resources: Vec<ResourceState>,
}

impl WorldSnapshot {
    pub fn party(&self, id: PartyId) -> Option<&PartyState> {
        self.parties.iter().find(|party| party.id == id)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeState> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn link(&self, id: LinkId) -> Option<&LinkState> {
        self.links.iter().find(|link| link.id == id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceState> {
        self.resources.iter().find(|resource| resource.id == id)
    }

    /// Resources attached to `node`, in snapshot order.
    pub fn resources_at(&self, node: NodeId) -> impl Iterator<Item = &ResourceState> + '_ {
        self.resources
            .iter()
            .filter(move |resource| resource.node == node)
    }

    /// Everything `party` owns, in snapshot order.
    pub fn holdings_of(&self, party: PartyId) -> Holdings {
        Holdings {
            nodes: self
                .nodes
                .iter()
                .filter(|node| node.owner == party)
                .map(|node| node.id)
                .collect(),
            links: self
                .links
                .iter()
                .filter(|link| link.owner == party)
                .map(|link| link.id)
                .collect(),
            resources: self
                .resources
                .iter()
                .filter(|resource| resource.owner == party)
                .map(|resource| resource.id)
                .collect(),
        }
    }
}
