//! Constraint Rows
//!
//! The solver's atomic unit: one scalar constraint equation with a
//! four-block Jacobian, impulse limits, a persistent impulse accumulator
//! for warm starting, and an effective mass computed against the bodies'
//! inverse mass and world-space inverse inertia.
//!
//! Rows reference bodies by index into a [`SolverBodies`] scratch table
//! that is loaded from the registry before solving and stored back after,
//! keeping the Gauss-Seidel inner loop free of registry lookups.

use crate::math::{rotate_inertia_inv, Matrix3, Quaternion, Scalar, Vector3};
use crate::registry::{Entity, Registry};
use std::collections::HashMap;

/// Effective-mass denominators below this are treated as degenerate and
/// the row is made inert, so no step can diverge on bad geometry.
const MIN_EFFECTIVE_MASS_DENOM: Scalar = 1e-12;

/// Per-row bias options set during preparation.
#[derive(Clone, Copy, Debug)]
pub struct RowOptions {
    /// Positional error expressed as a velocity (error over dt). The
    /// solver drives the constraint-space velocity toward `-erp * error`.
    pub error: Scalar,
    /// Restitution applied against the approach velocity at preparation.
    pub restitution: Scalar,
    /// Error reduction parameter.
    pub erp: Scalar,
}

impl Default for RowOptions {
    fn default() -> Self {
        Self {
            error: 0.0,
            restitution: 0.0,
            erp: 0.2,
        }
    }
}

/// Where a row's accumulated impulse persists between steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowSource {
    /// Row `row_index` of a constraint entity's impulse array.
    Constraint {
        /// The constraint entity.
        entity: Entity,
        /// Index into the constraint's impulse array.
        row_index: usize,
    },
    /// Normal row of a contact point.
    ContactNormal {
        /// The contact point entity.
        point: Entity,
    },
    /// One of the two tangential friction rows of a contact point.
    ContactFriction {
        /// The contact point entity.
        point: Entity,
        /// Tangent axis, 0 or 1.
        axis: usize,
    },
    /// Rolling friction row of a contact point.
    ContactRoll {
        /// The contact point entity.
        point: Entity,
        /// Tangent axis, 0 or 1.
        axis: usize,
    },
    /// Spinning friction row of a contact point.
    ContactSpin {
        /// The contact point entity.
        point: Entity,
    },
}

/// One scalar constraint row.
#[derive(Clone, Copy, Debug)]
pub struct ConstraintRow {
    /// Jacobian blocks: linear A, angular A, linear B, angular B.
    pub j: [Vector3; 4],
    /// Lower impulse limit.
    pub lower_limit: Scalar,
    /// Upper impulse limit.
    pub upper_limit: Scalar,
    /// Accumulated impulse; warm-started from the previous step.
    pub impulse: Scalar,
    /// Effective mass of the row (already inverted).
    pub eff_mass: Scalar,
    /// Target constraint-space velocity.
    pub rhs: Scalar,
    /// Constraint-space velocity at preparation time.
    pub relvel: Scalar,
    /// Restitution carried for the restitution pass.
    pub restitution: Scalar,
    /// Body slots in the solver body table.
    pub body: [usize; 2],
    /// Where the impulse persists.
    pub source: RowSource,
    /// For friction-like rows: the row index whose impulse scales the
    /// limits, and the scale factor.
    pub limit_coupling: Option<(usize, Scalar)>,
}

/// Scratch table of body state the rows index into.
#[derive(Clone, Debug, Default)]
pub struct SolverBodies {
    /// Body entities in table order.
    pub entities: Vec<Entity>,
    index: HashMap<Entity, usize>,
    /// Linear velocities.
    pub linvel: Vec<Vector3>,
    /// Angular velocities.
    pub angvel: Vec<Vector3>,
    /// Inverse masses; zero for static/kinematic bodies.
    pub inv_mass: Vec<Scalar>,
    /// World-space inverse inertia tensors.
    pub inv_inertia: Vec<Matrix3>,
    /// Positions (written by the position solver).
    pub position: Vec<Vector3>,
    /// Orientations (written by the position solver).
    pub orientation: Vec<Quaternion>,
    /// Body-frame inverse inertia, used to refresh the world tensor after
    /// the position solver rotates a body.
    pub inv_inertia_body: Vec<Matrix3>,
}

impl SolverBodies {
    /// Load body state for `entities` from the registry. Duplicates are
    /// collapsed; entities without a position are skipped.
    pub fn load(registry: &Registry, entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut bodies = Self::default();
        for entity in entities {
            bodies.add(registry, entity);
        }
        bodies
    }

    /// Add one body to the table, returning its slot.
    pub fn add(&mut self, registry: &Registry, entity: Entity) -> Option<usize> {
        if let Some(&slot) = self.index.get(&entity) {
            return Some(slot);
        }
        let &position = registry.position.get(entity)?;
        let orientation = registry
            .orientation
            .get(entity)
            .copied()
            .unwrap_or(Quaternion::IDENTITY);

        let slot = self.entities.len();
        self.entities.push(entity);
        self.index.insert(entity, slot);
        self.position.push(position);
        self.orientation.push(orientation);
        self.linvel
            .push(registry.linvel.get(entity).copied().unwrap_or(Vector3::ZERO));
        self.angvel
            .push(registry.angvel.get(entity).copied().unwrap_or(Vector3::ZERO));
        self.inv_mass
            .push(registry.mass_inv.get(entity).copied().unwrap_or(0.0));
        self.inv_inertia.push(
            registry
                .inertia_world_inv
                .get(entity)
                .copied()
                .unwrap_or(Matrix3::ZERO),
        );
        self.inv_inertia_body.push(
            registry
                .inertia_inv
                .get(entity)
                .copied()
                .unwrap_or(Matrix3::ZERO),
        );
        Some(slot)
    }

    /// Slot of an already-loaded body.
    pub fn slot(&self, entity: Entity) -> Option<usize> {
        self.index.get(&entity).copied()
    }

    /// Number of loaded bodies.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no bodies are loaded.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Refresh a body's world inverse inertia from its orientation.
    pub fn refresh_inertia(&mut self, slot: usize) {
        self.inv_inertia[slot] =
            rotate_inertia_inv(&self.inv_inertia_body[slot], self.orientation[slot]);
    }

    /// Write velocities and transforms back to the registry. Bodies with
    /// zero inverse mass keep their registry state untouched.
    pub fn store(&self, registry: &mut Registry) {
        for (slot, &entity) in self.entities.iter().enumerate() {
            if self.inv_mass[slot] == 0.0 {
                continue;
            }
            registry.linvel.insert_silent(entity, self.linvel[slot]);
            registry.angvel.insert_silent(entity, self.angvel[slot]);
            registry.position.insert_silent(entity, self.position[slot]);
            registry
                .orientation
                .insert_silent(entity, self.orientation[slot]);
            registry
                .inertia_world_inv
                .insert_silent(entity, self.inv_inertia[slot]);
        }
    }
}

/// Finish preparing a row: effective mass, preparation-time velocity and
/// the bias target.
pub fn prepare_row(row: &mut ConstraintRow, options: &RowOptions, bodies: &SolverBodies) {
    let [a, b] = row.body;
    let denom = bodies.inv_mass[a] * row.j[0].length_sqr()
        + row.j[1].dot(bodies.inv_inertia[a].mul_vec(row.j[1]))
        + bodies.inv_mass[b] * row.j[2].length_sqr()
        + row.j[3].dot(bodies.inv_inertia[b].mul_vec(row.j[3]));

    row.eff_mass = if denom > MIN_EFFECTIVE_MASS_DENOM {
        1.0 / denom
    } else {
        0.0
    };

    row.relvel = constraint_velocity(row, bodies);
    row.restitution = options.restitution;
    row.rhs = -options.error * options.erp;
    if options.restitution > 0.0 {
        // Bake a bounce target against the approach velocity, on whichever
        // side of the limits this row can actually push.
        let bounce = -options.restitution * row.relvel;
        if row.relvel < 0.0 && row.upper_limit > 0.0 {
            row.rhs = row.rhs.max(bounce);
        } else if row.relvel > 0.0 && row.lower_limit < 0.0 {
            row.rhs = row.rhs.min(bounce);
        }
    }
}

/// Constraint-space velocity `J * v` for a row.
#[inline]
pub fn constraint_velocity(row: &ConstraintRow, bodies: &SolverBodies) -> Scalar {
    let [a, b] = row.body;
    row.j[0].dot(bodies.linvel[a])
        + row.j[1].dot(bodies.angvel[a])
        + row.j[2].dot(bodies.linvel[b])
        + row.j[3].dot(bodies.angvel[b])
}

/// Apply an impulse along a row's Jacobian.
#[inline]
pub fn apply_row_impulse(impulse: Scalar, row: &ConstraintRow, bodies: &mut SolverBodies) {
    let [a, b] = row.body;
    if bodies.inv_mass[a] > 0.0 {
        bodies.linvel[a] += row.j[0] * (bodies.inv_mass[a] * impulse);
        let dw = bodies.inv_inertia[a].mul_vec(row.j[1] * impulse);
        bodies.angvel[a] += dw;
    }
    if bodies.inv_mass[b] > 0.0 {
        bodies.linvel[b] += row.j[2] * (bodies.inv_mass[b] * impulse);
        let dw = bodies.inv_inertia[b].mul_vec(row.j[3] * impulse);
        bodies.angvel[b] += dw;
    }
}

/// Warm-start a row by applying its carried impulse.
pub fn warm_start_row(row: &ConstraintRow, bodies: &mut SolverBodies) {
    if row.impulse != 0.0 {
        apply_row_impulse(row.impulse, row, bodies);
    }
}

/// One projected Gauss-Seidel update of a row: drive `J * v` toward `rhs`,
/// clamp the accumulated impulse into the row's limits, apply the delta.
pub fn solve_row(row: &mut ConstraintRow, bodies: &mut SolverBodies) {
    let relvel = constraint_velocity(row, bodies);
    let delta = row.eff_mass * (row.rhs - relvel);
    let clamped = (row.impulse + delta).clamp(row.lower_limit, row.upper_limit);
    let applied = clamped - row.impulse;
    row.impulse = clamped;
    apply_row_impulse(applied, row, bodies);
}
