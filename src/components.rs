//! Shared Component Records
//!
//! Small plain-value components attached to entities: collision filtering,
//! entity-graph handles, island residency, network ownership, and the
//! presentation discontinuity record. Bigger records with their own systems
//! (shapes, materials, manifolds, constraints, islands) live in their
//! respective modules.

use crate::math::{Quaternion, Scalar, Vector3};
use crate::registry::Entity;
use serde::{Deserialize, Serialize};

/// Collision filter using group/mask bitmasks.
///
/// Two bodies may collide iff
/// `(a.group & b.mask) != 0 && (b.group & a.mask) != 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    /// Which group(s) this body belongs to.
    pub group: u64,
    /// Which groups this body collides with.
    pub mask: u64,
}

impl CollisionFilter {
    /// Default filter: first group, collides with everything.
    pub const DEFAULT: Self = Self {
        group: 1,
        mask: u64::MAX,
    };

    /// Create a filter from group and mask bits.
    #[inline]
    pub const fn new(group: u64, mask: u64) -> Self {
        Self { group, mask }
    }

    /// Check whether two filters allow collision.
    #[inline]
    pub fn can_collide(a: &Self, b: &Self) -> bool {
        (a.group & b.mask) != 0 && (b.group & a.mask) != 0
    }
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Handle of this entity's node in the entity graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node index in the graph.
    pub node_index: u32,
}

/// Handle of this entity's edge in the entity graph. Manifolds and
/// constraints that connect two bodies carry one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Edge index in the graph.
    pub edge_index: u32,
}

/// Which island a procedural entity currently belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IslandResident {
    /// Island entity.
    pub island: Entity,
}

/// Pose delta accumulated when authoritative state snaps a body to a new
/// transform. Presentation blends this away over a short window instead of
/// letting the visual pop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Discontinuity {
    /// Offset from the new position back to the pre-snap position.
    pub position_offset: Vector3,
    /// Rotation from the new orientation back to the pre-snap orientation.
    pub orientation_offset: Quaternion,
}

impl Default for Discontinuity {
    fn default() -> Self {
        Self {
            position_offset: Vector3::ZERO,
            orientation_offset: Quaternion::IDENTITY,
        }
    }
}

impl Discontinuity {
    /// Accumulate a snap from `old` to `new` pose.
    pub fn accumulate(
        &mut self,
        old_pos: Vector3,
        old_orn: Quaternion,
        new_pos: Vector3,
        new_orn: Quaternion,
    ) {
        self.position_offset += old_pos - new_pos;
        self.orientation_offset = old_orn.mul(new_orn.conjugate()).mul(self.orientation_offset);
    }

    /// Decay the offsets by `rate` in `[0, 1]` per call (1 clears fully).
    pub fn decay(&mut self, rate: Scalar) {
        self.position_offset = self.position_offset * (1.0 - rate);
        self.orientation_offset = self
            .orientation_offset
            .nlerp(Quaternion::IDENTITY, rate.clamp(0.0, 1.0));
    }
}

/// Owning client of a networked entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOwner {
    /// Client entity that has authority over this entity.
    pub client_entity: Entity,
}

/// One recorded action with its insertion time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    /// Time the action was recorded.
    pub timestamp: Scalar,
    /// Action kind index, app-defined.
    pub action_index: u16,
    /// Opaque serialized action payload.
    pub data: Vec<u8>,
}

/// Timestamped log of user actions, exported with every client snapshot and
/// replayed during extrapolation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionHistory {
    /// Entries ordered by timestamp.
    pub entries: Vec<ActionEntry>,
}

impl ActionHistory {
    /// Append an action at `timestamp`.
    pub fn push(&mut self, timestamp: Scalar, action_index: u16, data: Vec<u8>) {
        self.entries.push(ActionEntry {
            timestamp,
            action_index,
            data,
        });
    }

    /// Drop entries older than `t_min`.
    pub fn erase_until(&mut self, t_min: Scalar) {
        self.entries.retain(|e| e.timestamp >= t_min);
    }

    /// Whether the history holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Opaque per-entity input payload replicated from the owning client and
/// applied during simulation and extrapolation. The engine treats the
/// contents as app-defined bytes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInput(pub Vec<u8>);
