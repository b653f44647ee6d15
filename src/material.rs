//! Surface Materials and Pair Mixing
//!
//! Friction and restitution resolution for contact points. Lookup order:
//!
//! 1. The pair `(id_a, id_b)` in the [`MaterialMixTable`], explicit
//!    overrides configured by the application.
//! 2. Per-feature values when one side is a triangle mesh with per-vertex
//!    materials (handled by the manifold cache, which knows the feature).
//! 3. The default mix of the two scalar materials: geometric mean for
//!    friction, max for restitution, series combination for
//!    stiffness/damping.
//!
//! The mix table is read-only during simulation; configuration-time writers
//! take the exclusive side of the `RwLock` the context wraps it in.

use crate::math::{Scalar, SCALAR_MAX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Material identifier for pair-table lookup.
pub type MaterialId = u32;

/// Surface material of a rigid body.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Identifier used by the pair mix table.
    pub id: MaterialId,
    /// Coefficient of restitution.
    pub restitution: Scalar,
    /// Friction coefficient.
    pub friction: Scalar,
    /// Rolling friction coefficient.
    pub roll_friction: Scalar,
    /// Spinning friction coefficient.
    pub spin_friction: Scalar,
    /// Contact stiffness; `SCALAR_MAX` means rigid.
    pub stiffness: Scalar,
    /// Contact damping; `SCALAR_MAX` means rigid.
    pub damping: Scalar,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            id: 0,
            restitution: 0.0,
            friction: 0.5,
            roll_friction: 0.0,
            spin_friction: 0.0,
            stiffness: SCALAR_MAX,
            damping: SCALAR_MAX,
        }
    }
}

/// Resolved contact surface properties for a body pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixedMaterial {
    /// Combined friction.
    pub friction: Scalar,
    /// Combined restitution.
    pub restitution: Scalar,
    /// Combined rolling friction.
    pub roll_friction: Scalar,
    /// Combined spinning friction.
    pub spin_friction: Scalar,
    /// Combined stiffness.
    pub stiffness: Scalar,
    /// Combined damping.
    pub damping: Scalar,
}

/// Geometric-mean friction mix.
#[inline]
pub fn material_mix_friction(a: Scalar, b: Scalar) -> Scalar {
    (a * b).sqrt()
}

/// Restitution mix: the bouncier side wins.
#[inline]
pub fn material_mix_restitution(a: Scalar, b: Scalar) -> Scalar {
    a.max(b)
}

/// Rolling friction mix.
#[inline]
pub fn material_mix_roll_friction(a: Scalar, b: Scalar) -> Scalar {
    (a * b).sqrt()
}

/// Spinning friction mix.
#[inline]
pub fn material_mix_spin_friction(a: Scalar, b: Scalar) -> Scalar {
    (a * b).sqrt()
}

/// Stiffness mix: springs in series.
#[inline]
pub fn material_mix_stiffness(a: Scalar, b: Scalar) -> Scalar {
    if a >= SCALAR_MAX || b >= SCALAR_MAX {
        a.min(b)
    } else if a + b > 0.0 {
        a * b / (a + b)
    } else {
        0.0
    }
}

/// Damping mix: dampers in series.
#[inline]
pub fn material_mix_damping(a: Scalar, b: Scalar) -> Scalar {
    material_mix_stiffness(a, b)
}

/// Default mix of two scalar materials.
pub fn mix_materials(a: &Material, b: &Material) -> MixedMaterial {
    MixedMaterial {
        friction: material_mix_friction(a.friction, b.friction),
        restitution: material_mix_restitution(a.restitution, b.restitution),
        roll_friction: material_mix_roll_friction(a.roll_friction, b.roll_friction),
        spin_friction: material_mix_spin_friction(a.spin_friction, b.spin_friction),
        stiffness: material_mix_stiffness(a.stiffness, b.stiffness),
        damping: material_mix_damping(a.damping, b.damping),
    }
}

/// Pair-keyed overrides of contact surface properties.
///
/// Keys are canonical (smaller id first), so insertion order of the pair
/// does not matter.
#[derive(Clone, Debug, Default)]
pub struct MaterialMixTable {
    entries: HashMap<(MaterialId, MaterialId), MixedMaterial>,
}

impl MaterialMixTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: MaterialId, b: MaterialId) -> (MaterialId, MaterialId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Set the mixed material for a pair of material ids.
    pub fn insert(&mut self, a: MaterialId, b: MaterialId, mixed: MixedMaterial) {
        self.entries.insert(Self::key(a, b), mixed);
    }

    /// Look up the override for a pair, if configured.
    pub fn try_get(&self, a: MaterialId, b: MaterialId) -> Option<&MixedMaterial> {
        self.entries.get(&Self::key(a, b))
    }

    /// Whether a pair is configured.
    pub fn contains(&self, a: MaterialId, b: MaterialId) -> bool {
        self.entries.contains_key(&Self::key(a, b))
    }

    /// Number of configured pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
