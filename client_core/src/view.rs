//! Pure derivations over the latest snapshot: interaction eligibility,
//! affordability, and display placement. Everything here is recomputed from
//! scratch on each snapshot replacement; nothing updates incrementally.

use std::collections::HashMap;
use std::f64::consts::TAU;

use grid_schema::{
    LinkId, LinkState, NodeId, PartyId, Phase, ResourceId, ResourceState, WorldSnapshot,
};
use tracing::debug;

use crate::transform::{DisplayPoint, SimBounds, SimPoint, Viewport};

/// Distance from a node's display point to the ring its resources sit on.
pub const RESOURCE_RING_RADIUS: f64 = 24.0;

/// Key into the derived entity map. The three entity kinds occupy separate
/// id spaces, so the kind rides along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Node(NodeId),
    Link(LinkId),
    Resource(ResourceId),
}

/// Per-entity values a view layer reads directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityView {
    pub display: DisplayPoint,
    pub acquirable: bool,
    pub biddable: bool,
    pub owned_by_viewer: bool,
}

/// Snapshot-derived state for one viewer: placement plus eligibility for
/// every renderable entity, and the viewer's spendable balance.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedView {
    pub viewer: PartyId,
    pub balance: f64,
    pub entities: HashMap<EntityRef, EntityView>,
}

impl DerivedView {
    pub fn entity(&self, entity: EntityRef) -> Option<&EntityView> {
        self.entities.get(&entity)
    }

    /// Derive everything from one snapshot. Orphaned references (a link
    /// endpoint, a resource's node, or a link/resource owner missing from
    /// the snapshot) drop that entity from the map rather than failing.
    pub fn derive(snapshot: &WorldSnapshot, viewer: PartyId, viewport: &Viewport) -> DerivedView {
        let anchor_points: Vec<SimPoint> = snapshot
            .nodes
            .iter()
            .map(|node| SimPoint::new(node.x, node.y))
            .collect();
        let bounds = SimBounds::from_points(&anchor_points);

        let mut entities = HashMap::new();

        for node in &snapshot.nodes {
            let display = viewport.to_display(SimPoint::new(node.x, node.y), &bounds);
            entities.insert(
                EntityRef::Node(node.id),
                EntityView {
                    display,
                    acquirable: false,
                    biddable: false,
                    owned_by_viewer: node.owner == viewer,
                },
            );
        }

        for link in &snapshot.links {
            let (Some(a), Some(b)) = (snapshot.node(link.node_a), snapshot.node(link.node_b))
            else {
                debug!(link = %link.id, "skipping link with missing endpoint");
                continue;
            };
            if snapshot.party(link.owner).is_none() {
                debug!(link = %link.id, owner = %link.owner, "skipping link with unknown owner");
                continue;
            }
            let da = viewport.to_display(SimPoint::new(a.x, a.y), &bounds);
            let db = viewport.to_display(SimPoint::new(b.x, b.y), &bounds);
            entities.insert(
                EntityRef::Link(link.id),
                EntityView {
                    display: DisplayPoint::new((da.x + db.x) / 2.0, (da.y + db.y) / 2.0),
                    acquirable: is_link_acquirable(link, snapshot),
                    biddable: false,
                    owned_by_viewer: link.owner == viewer,
                },
            );
        }

        // Resources share a ring around their node; the spacing divisor is
        // floored at four so a lone resource does not sit on a degenerate
        // circle division.
        let mut ring_count: HashMap<NodeId, usize> = HashMap::new();
        for resource in &snapshot.resources {
            if resource_renders(resource, snapshot) {
                *ring_count.entry(resource.node).or_insert(0) += 1;
            }
        }
        let mut ring_index: HashMap<NodeId, usize> = HashMap::new();
        for resource in &snapshot.resources {
            if !resource_renders(resource, snapshot) {
                debug!(resource = %resource.id, "skipping orphaned resource");
                continue;
            }
            let Some(node) = snapshot.node(resource.node) else {
                continue;
            };
            let center = viewport.to_display(SimPoint::new(node.x, node.y), &bounds);
            let count = ring_count.get(&resource.node).copied().unwrap_or(1);
            let index = ring_index.entry(resource.node).or_insert(0);
            let step = TAU / count.max(4) as f64;
            let angle = *index as f64 * step;
            *index += 1;
            entities.insert(
                EntityRef::Resource(resource.id),
                EntityView {
                    display: DisplayPoint::new(
                        center.x + RESOURCE_RING_RADIUS * angle.cos(),
                        center.y + RESOURCE_RING_RADIUS * angle.sin(),
                    ),
                    acquirable: is_resource_acquirable(resource, snapshot),
                    biddable: is_resource_biddable(resource, snapshot, viewer),
                    owned_by_viewer: resource.owner == viewer,
                },
            );
        }

        DerivedView {
            viewer,
            balance: affordable_balance(snapshot, viewer),
            entities,
        }
    }
}

fn resource_renders(resource: &ResourceState, snapshot: &WorldSnapshot) -> bool {
    snapshot.node(resource.node).is_some() && snapshot.party(resource.owner).is_some()
}

/// Acquisition gate shared by links and resources: construction phase,
/// house-owned, priced, and not explicitly withheld from sale (an unset
/// flag counts as tradable).
fn acquisition_open(phase: Phase, owner: PartyId, min_price: f64, for_sale: Option<bool>) -> bool {
    phase == Phase::Construction && owner.is_house() && min_price > 0.0 && for_sale != Some(false)
}

pub fn is_link_acquirable(link: &LinkState, snapshot: &WorldSnapshot) -> bool {
    acquisition_open(snapshot.phase, link.owner, link.min_price, link.for_sale)
}

pub fn is_resource_acquirable(resource: &ResourceState, snapshot: &WorldSnapshot) -> bool {
    acquisition_open(
        snapshot.phase,
        resource.owner,
        resource.min_price,
        resource.for_sale,
    )
}

/// Offers can only be raised on the viewer's own resources, and only while
/// the auction phase is running.
pub fn is_resource_biddable(
    resource: &ResourceState,
    snapshot: &WorldSnapshot,
    viewer: PartyId,
) -> bool {
    snapshot.phase == Phase::Auction && resource.owner == viewer
}

/// The viewer's balance, or zero when the viewer is not in the snapshot.
pub fn affordable_balance(snapshot: &WorldSnapshot, viewer: PartyId) -> f64 {
    snapshot
        .party(viewer)
        .map(|party| party.balance)
        .unwrap_or(0.0)
}
