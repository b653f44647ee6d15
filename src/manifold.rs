//! Contact Manifold Cache
//!
//! Persistent contact state between pairs of bodies. Each interacting pair
//! owns one manifold entity (a graph edge); each of its contact points is
//! its own entity holding a [`ContactPoint`] record with pivots, normal
//! attachment, resolved surface material and warm-start impulses.
//!
//! Narrowphase produces candidate points every step; [`merge_collision_result`]
//! matches them against the cached points within
//! `contact_caching_threshold`, preserving accumulated impulses so the
//! solver warm-starts and friction builds up consistently across frames.
//! After the solve, [`retire_contact_points`] drops points that drifted
//! apart along the normal or tangentially.

use crate::collide::{
    CollisionFeature, CollisionPoint, CollisionResult, ContactNormalAttachment, TriangleFeature,
};
use crate::material::{
    material_mix_friction, material_mix_restitution, mix_materials, Material, MaterialMixTable,
    MixedMaterial,
};
use crate::math::{to_world_space, Scalar, Vector3};
use crate::registry::{Entity, Registry};
use crate::shapes::{Shape, TriMesh};
use serde::{Deserialize, Serialize};

/// Maximum live contact points per manifold.
pub const MAX_CONTACTS: usize = 4;

/// Separation beyond which a cached contact point is retired.
pub const CONTACT_BREAKING_THRESHOLD: Scalar = 0.02;

/// Pivot distance within which a candidate matches a cached point.
pub const CONTACT_CACHING_THRESHOLD: Scalar = 0.04;

/// Persistent contact manifold between two bodies. One entity per
/// interacting pair; doubles as a graph edge.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ContactManifold {
    /// The pair of bodies.
    pub body: [Entity; 2],
    /// Contact point entities, compact from index 0; null past `num_points`.
    pub point: [Entity; MAX_CONTACTS],
    /// AABB separation the broadphase tolerates before destroying this
    /// manifold.
    pub separation_threshold: Scalar,
}

impl ContactManifold {
    /// Create an empty manifold for a body pair.
    pub fn new(body_a: Entity, body_b: Entity) -> Self {
        Self {
            body: [body_a, body_b],
            point: [Entity::null(); MAX_CONTACTS],
            separation_threshold: CONTACT_BREAKING_THRESHOLD * 1.3,
        }
    }

    /// Number of live contact points.
    pub fn num_points(&self) -> usize {
        self.point.iter().take_while(|p| !p.is_null()).count()
    }

    /// Live contact point entities.
    pub fn points(&self) -> impl Iterator<Item = Entity> + '_ {
        self.point.iter().copied().take_while(|p| !p.is_null())
    }
}

/// One persistent contact point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ContactPoint {
    /// The pair of bodies, same order as the owning manifold.
    pub body: [Entity; 2],
    /// Pivot on body A, object space.
    pub pivot_a: Vector3,
    /// Pivot on body B, object space.
    pub pivot_b: Vector3,
    /// Contact normal, world space, pointing from B to A.
    pub normal: Vector3,
    /// Normal in the anchor body's frame, when attached.
    pub local_normal: Vector3,
    /// Which body the normal is attached to.
    pub normal_attachment: ContactNormalAttachment,
    /// Resolved friction coefficient.
    pub friction: Scalar,
    /// Resolved restitution coefficient.
    pub restitution: Scalar,
    /// Resolved rolling friction coefficient.
    pub roll_friction: Scalar,
    /// Resolved spinning friction coefficient.
    pub spin_friction: Scalar,
    /// Resolved contact stiffness.
    pub stiffness: Scalar,
    /// Resolved contact damping.
    pub damping: Scalar,
    /// Steps this point has survived.
    pub lifetime: u32,
    /// Signed separation along the normal; negative while penetrating.
    pub distance: Scalar,
    /// Mesh feature on body A, if any.
    pub feature_a: Option<CollisionFeature>,
    /// Mesh feature on body B, if any.
    pub feature_b: Option<CollisionFeature>,
    /// Warm-start accumulator for the normal row.
    pub normal_impulse: Scalar,
    /// Warm-start accumulators for the two friction rows.
    pub friction_impulse: [Scalar; 2],
    /// Warm-start accumulators for rolling friction rows.
    pub roll_impulse: [Scalar; 2],
    /// Warm-start accumulator for the spinning friction row.
    pub spin_impulse: Scalar,
}

impl ContactPoint {
    fn from_candidate(body: [Entity; 2], rp: &CollisionPoint) -> Self {
        Self {
            body,
            pivot_a: rp.pivot_a,
            pivot_b: rp.pivot_b,
            normal: rp.normal,
            local_normal: Vector3::ZERO,
            normal_attachment: rp.normal_attachment,
            friction: 0.0,
            restitution: 0.0,
            roll_friction: 0.0,
            spin_friction: 0.0,
            stiffness: crate::math::SCALAR_MAX,
            damping: crate::math::SCALAR_MAX,
            lifetime: 0,
            distance: rp.distance,
            feature_a: rp.feature_a,
            feature_b: rp.feature_b,
            normal_impulse: 0.0,
            friction_impulse: [0.0; 2],
            roll_impulse: [0.0; 2],
            spin_impulse: 0.0,
        }
    }
}

/// Index of the candidate nearest to a cached point, within the caching
/// threshold on either pivot. Candidates already claimed are skipped.
pub fn find_nearest_contact(
    cp: &ContactPoint,
    result: &CollisionResult,
    claimed: &[bool],
) -> Option<usize> {
    let mut shortest = CONTACT_CACHING_THRESHOLD * CONTACT_CACHING_THRESHOLD;
    let mut nearest = None;

    for (i, rp) in result.points().iter().enumerate() {
        if claimed[i] {
            continue;
        }
        let da = rp.pivot_a.distance_sqr(cp.pivot_a);
        let db = rp.pivot_b.distance_sqr(cp.pivot_b);
        if da < shortest {
            shortest = da;
            nearest = Some(i);
        }
        if db < shortest {
            shortest = db;
            nearest = Some(i);
        }
    }
    nearest
}

fn local_normal_for(registry: &Registry, body: [Entity; 2], rp_normal: Vector3, attachment: ContactNormalAttachment) -> Vector3 {
    let anchor = match attachment {
        ContactNormalAttachment::None => return Vector3::ZERO,
        ContactNormalAttachment::NormalOnA => body[0],
        ContactNormalAttachment::NormalOnB => body[1],
    };
    match registry.orientation.get(anchor) {
        Some(orn) => orn.conjugate().rotate(rp_normal),
        None => Vector3::ZERO,
    }
}

/// Merge narrowphase candidates into a manifold.
///
/// Cached points matched by a candidate are refreshed in place, keeping
/// their accumulated impulses and lifetime. Unmatched candidates are
/// inserted as fresh points; when the manifold is full, a candidate
/// replaces the cached point whose removal best preserves penetration
/// depth and pivot spread.
pub fn merge_collision_result(
    registry: &mut Registry,
    mix_table: &MaterialMixTable,
    manifold_entity: Entity,
    result: &CollisionResult,
) {
    let Some(mut manifold) = registry.manifold.get(manifold_entity).copied() else {
        return;
    };
    let mut claimed = vec![false; result.num_points()];

    // Refresh cached points from their nearest candidate.
    for point_entity in manifold.points() {
        let Some(mut cp) = registry.contact_point.get(point_entity).copied() else {
            continue;
        };
        if let Some(idx) = find_nearest_contact(&cp, result, &claimed) {
            claimed[idx] = true;
            let rp = &result.points()[idx];
            cp.pivot_a = rp.pivot_a;
            cp.pivot_b = rp.pivot_b;
            cp.normal = rp.normal;
            cp.distance = rp.distance;
            cp.normal_attachment = rp.normal_attachment;
            cp.feature_a = rp.feature_a;
            cp.feature_b = rp.feature_b;
            cp.local_normal = local_normal_for(registry, cp.body, rp.normal, rp.normal_attachment);
            resolve_contact_material(registry, mix_table, &mut cp);
            registry.contact_point.insert_silent(point_entity, cp);
        }
    }

    // Insert candidates that matched nothing.
    for (idx, rp) in result.points().iter().enumerate() {
        if claimed[idx] {
            continue;
        }
        let num_points = manifold.num_points();
        if num_points < MAX_CONTACTS {
            let point_entity = create_contact_point(registry, mix_table, &mut manifold, rp);
            manifold.point[num_points] = point_entity;
        } else {
            replace_lowest_utility_point(registry, mix_table, &mut manifold, rp);
        }
    }

    registry.manifold.insert_silent(manifold_entity, manifold);
}

/// Create a contact point entity and fill in its record. Does not link it
/// into the manifold's slots; the caller owns slot placement.
fn create_contact_point(
    registry: &mut Registry,
    mix_table: &MaterialMixTable,
    manifold: &mut ContactManifold,
    rp: &CollisionPoint,
) -> Entity {
    debug_assert!(rp.normal.length_sqr() > crate::math::EPSILON);

    let point_entity = registry.create();
    let mut cp = ContactPoint::from_candidate(manifold.body, rp);
    cp.local_normal = local_normal_for(registry, cp.body, rp.normal, rp.normal_attachment);
    resolve_contact_material(registry, mix_table, &mut cp);
    registry.contact_point.insert_silent(point_entity, cp);
    point_entity
}

/// Replace the cached point with the lowest utility by the candidate.
///
/// The deepest point is always preserved; among the rest, the slot whose
/// replacement maximizes the spread (summed pairwise pivot distance) of the
/// resulting point set is chosen.
fn replace_lowest_utility_point(
    registry: &mut Registry,
    mix_table: &MaterialMixTable,
    manifold: &mut ContactManifold,
    rp: &CollisionPoint,
) {
    let mut pivots = [Vector3::ZERO; MAX_CONTACTS];
    let mut deepest = 0usize;
    let mut deepest_distance = Scalar::MAX;

    for (i, point_entity) in manifold.points().enumerate() {
        if let Some(cp) = registry.contact_point.get(point_entity) {
            pivots[i] = cp.pivot_a;
            if cp.distance < deepest_distance {
                deepest_distance = cp.distance;
                deepest = i;
            }
        }
    }

    let spread = |set: &[Vector3]| -> Scalar {
        let mut total = 0.0;
        for i in 0..set.len() {
            for j in (i + 1)..set.len() {
                total += set[i].distance_sqr(set[j]);
            }
        }
        total
    };

    let mut best_slot = None;
    let mut best_spread = -1.0;
    for slot in 0..MAX_CONTACTS {
        if slot == deepest && rp.distance > deepest_distance {
            continue;
        }
        let mut candidate_set = pivots;
        candidate_set[slot] = rp.pivot_a;
        let s = spread(&candidate_set);
        if s > best_spread {
            best_spread = s;
            best_slot = Some(slot);
        }
    }

    if let Some(slot) = best_slot {
        let old_entity = manifold.point[slot];
        registry.contact_point.remove(old_entity);
        registry.destroy(old_entity);
        let point_entity = create_contact_point(registry, mix_table, manifold, rp);
        manifold.point[slot] = point_entity;
    }
}

/// Resolve friction/restitution and contact spring parameters for a point.
///
/// Pair-table overrides win; otherwise per-feature mesh materials apply on
/// the side that has them; otherwise the two scalar materials are mixed.
pub fn resolve_contact_material(
    registry: &Registry,
    mix_table: &MaterialMixTable,
    cp: &mut ContactPoint,
) {
    let default_material = Material::default();
    let mat_a = registry
        .material
        .get(cp.body[0])
        .copied()
        .unwrap_or(default_material);
    let mat_b = registry
        .material
        .get(cp.body[1])
        .copied()
        .unwrap_or(default_material);

    if let Some(mixed) = mix_table.try_get(mat_a.id, mat_b.id) {
        apply_mixed(cp, mixed);
        return;
    }

    let mut mixed = mix_materials(&mat_a, &mat_b);

    // Per-feature mesh material lookup on whichever side is a mesh.
    if let Some((mesh, feature)) = mesh_feature(registry, cp.body[0], cp.feature_a) {
        if mesh.has_per_vertex_friction() {
            mixed.friction =
                material_mix_friction(feature_friction(mesh, &feature, mat_a.friction), mat_b.friction);
        }
        if mesh.has_per_vertex_restitution() {
            mixed.restitution = material_mix_restitution(
                feature_restitution(mesh, &feature, mat_a.restitution),
                mat_b.restitution,
            );
        }
    } else if let Some((mesh, feature)) = mesh_feature(registry, cp.body[1], cp.feature_b) {
        if mesh.has_per_vertex_friction() {
            mixed.friction =
                material_mix_friction(mat_a.friction, feature_friction(mesh, &feature, mat_b.friction));
        }
        if mesh.has_per_vertex_restitution() {
            mixed.restitution = material_mix_restitution(
                mat_a.restitution,
                feature_restitution(mesh, &feature, mat_b.restitution),
            );
        }
    }

    apply_mixed(cp, &mixed);
}

fn apply_mixed(cp: &mut ContactPoint, mixed: &MixedMaterial) {
    cp.friction = mixed.friction;
    cp.restitution = mixed.restitution;
    cp.roll_friction = mixed.roll_friction;
    cp.spin_friction = mixed.spin_friction;
    cp.stiffness = mixed.stiffness;
    cp.damping = mixed.damping;
}

fn mesh_feature<'a>(
    registry: &'a Registry,
    body: Entity,
    feature: Option<CollisionFeature>,
) -> Option<(&'a TriMesh, CollisionFeature)> {
    let feature = feature?;
    match registry.shape.get(body) {
        Some(Shape::Mesh { mesh }) => Some((mesh, feature)),
        _ => None,
    }
}

fn feature_friction(mesh: &TriMesh, feature: &CollisionFeature, fallback: Scalar) -> Scalar {
    let Some(table) = mesh.per_vertex_friction.as_deref() else {
        return fallback;
    };
    feature_value(mesh, feature, table, fallback)
}

fn feature_restitution(mesh: &TriMesh, feature: &CollisionFeature, fallback: Scalar) -> Scalar {
    let Some(table) = mesh.per_vertex_restitution.as_deref() else {
        return fallback;
    };
    feature_value(mesh, feature, table, fallback)
}

fn feature_value(
    mesh: &TriMesh,
    feature: &CollisionFeature,
    table: &[Scalar],
    fallback: Scalar,
) -> Scalar {
    match feature.feature {
        TriangleFeature::Vertex => table
            .get(feature.index as usize)
            .copied()
            .unwrap_or(fallback),
        TriangleFeature::Edge | TriangleFeature::Face => mesh
            .triangles
            .get(feature.index as usize)
            .map(|tri| TriMesh::face_value(table, tri))
            .unwrap_or(fallback),
    }
}

/// Refresh world normals of attached points and recompute distances from
/// the current body transforms.
pub fn update_contact_distances(registry: &mut Registry) {
    let entities: Vec<Entity> = registry.contact_point.entities().to_vec();
    for point_entity in entities {
        let Some(mut cp) = registry.contact_point.get(point_entity).copied() else {
            continue;
        };
        let (Some(&orn_a), Some(&orn_b)) = (
            registry.orientation.get(cp.body[0]),
            registry.orientation.get(cp.body[1]),
        ) else {
            continue;
        };
        let origin_a = registry.body_origin(cp.body[0]);
        let origin_b = registry.body_origin(cp.body[1]);

        // Attached normals ride their anchor body's rotation.
        match cp.normal_attachment {
            ContactNormalAttachment::NormalOnA => cp.normal = orn_a.rotate(cp.local_normal),
            ContactNormalAttachment::NormalOnB => cp.normal = orn_b.rotate(cp.local_normal),
            ContactNormalAttachment::None => {}
        }

        let pivot_a_world = to_world_space(cp.pivot_a, origin_a, orn_a);
        let pivot_b_world = to_world_space(cp.pivot_b, origin_b, orn_b);
        cp.distance = cp.normal.dot(pivot_a_world - pivot_b_world);
        registry.contact_point.insert_silent(point_entity, cp);
    }
}

/// Retire contact points that separated past the breaking threshold, either
/// along the normal or tangentially. Surviving points age by one step.
///
/// Returns the entities of retired points.
pub fn retire_contact_points(registry: &mut Registry, manifold_entity: Entity) -> Vec<Entity> {
    let Some(mut manifold) = registry.manifold.get(manifold_entity).copied() else {
        return Vec::new();
    };
    let mut retired = Vec::new();
    let threshold_sqr = CONTACT_BREAKING_THRESHOLD * CONTACT_BREAKING_THRESHOLD;

    let mut idx = 0;
    while idx < manifold.num_points() {
        let point_entity = manifold.point[idx];
        let Some(mut cp) = registry.contact_point.get(point_entity).copied() else {
            remove_manifold_slot(&mut manifold, idx);
            continue;
        };
        let (Some(&orn_a), Some(&orn_b)) = (
            registry.orientation.get(cp.body[0]),
            registry.orientation.get(cp.body[1]),
        ) else {
            remove_manifold_slot(&mut manifold, idx);
            registry.contact_point.remove(point_entity);
            registry.destroy(point_entity);
            retired.push(point_entity);
            continue;
        };
        let origin_a = registry.body_origin(cp.body[0]);
        let origin_b = registry.body_origin(cp.body[1]);

        let pa = to_world_space(cp.pivot_a, origin_a, orn_a);
        let pb = to_world_space(cp.pivot_b, origin_b, orn_b);
        let d = pa - pb;
        let normal_dist = d.dot(cp.normal);
        let tangential = d - cp.normal * normal_dist;

        if normal_dist > CONTACT_BREAKING_THRESHOLD || tangential.length_sqr() > threshold_sqr {
            remove_manifold_slot(&mut manifold, idx);
            registry.contact_point.remove(point_entity);
            registry.destroy(point_entity);
            retired.push(point_entity);
        } else {
            cp.lifetime += 1;
            registry.contact_point.insert_silent(point_entity, cp);
            idx += 1;
        }
    }

    registry.manifold.insert_silent(manifold_entity, manifold);
    retired
}

/// Swap-with-last removal of a manifold point slot.
fn remove_manifold_slot(manifold: &mut ContactManifold, idx: usize) {
    let last = manifold.num_points() - 1;
    manifold.point[idx] = manifold.point[last];
    manifold.point[last] = Entity::null();
}

/// Destroy a manifold entity together with all of its contact points.
pub fn destroy_manifold(registry: &mut Registry, manifold_entity: Entity) {
    if let Some(manifold) = registry.manifold.get(manifold_entity).copied() {
        for point_entity in manifold.points() {
            registry.contact_point.remove(point_entity);
            registry.destroy(point_entity);
        }
    }
    registry.destroy(manifold_entity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::{CollisionPoint, CollisionResult};
    use crate::math::Quaternion;
    use approx::assert_relative_eq;

    fn candidate(pivot: Vector3, distance: Scalar) -> CollisionPoint {
        CollisionPoint {
            pivot_a: pivot,
            pivot_b: pivot,
            normal: Vector3::UNIT_Y,
            distance,
            normal_attachment: ContactNormalAttachment::None,
            feature_a: None,
            feature_b: None,
        }
    }

    fn setup_pair(registry: &mut Registry) -> (Entity, Entity, Entity) {
        let a = registry.create();
        let b = registry.create();
        for &e in &[a, b] {
            registry.position.insert(e, Vector3::ZERO);
            registry.orientation.insert(e, Quaternion::IDENTITY);
            registry.material.insert(e, Material::default());
        }
        let m = registry.create();
        registry.manifold.insert(m, ContactManifold::new(a, b));
        (a, b, m)
    }

    #[test]
    fn test_merge_creates_points() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::ZERO, -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        let manifold = registry.manifold.get(m).unwrap();
        assert_eq!(manifold.num_points(), 1);
    }

    #[test]
    fn test_merge_preserves_warm_start_impulse() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::ZERO, -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        let point_entity = registry.manifold.get(m).unwrap().point[0];
        registry
            .contact_point
            .get_mut(point_entity)
            .unwrap()
            .normal_impulse = 12.5;

        // A nearby candidate must refresh the same point, keeping lambda.
        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::new(0.005, 0.0, 0.0), -0.02));
        merge_collision_result(&mut registry, &table, m, &result);

        let manifold = registry.manifold.get(m).unwrap();
        assert_eq!(manifold.num_points(), 1);
        let cp = registry.contact_point.get(manifold.point[0]).unwrap();
        assert_relative_eq!(cp.normal_impulse, 12.5);
        assert_relative_eq!(cp.distance, -0.02);
    }

    #[test]
    fn test_merge_caps_at_max_contacts() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        for i in 0..6 {
            result.add_point(candidate(Vector3::new(i as Scalar, 0.0, 0.0), -0.01));
        }
        merge_collision_result(&mut registry, &table, m, &result);
        assert_eq!(registry.manifold.get(m).unwrap().num_points(), MAX_CONTACTS);
    }

    #[test]
    fn test_full_manifold_keeps_deepest_point() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::new(0.0, 0.0, 0.0), -0.5));
        result.add_point(candidate(Vector3::new(1.0, 0.0, 0.0), -0.01));
        result.add_point(candidate(Vector3::new(0.0, 0.0, 1.0), -0.01));
        result.add_point(candidate(Vector3::new(1.0, 0.0, 1.0), -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        // A shallow far-away candidate displaces someone, but never the
        // deepest point.
        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::new(2.0, 0.0, 2.0), -0.02));
        merge_collision_result(&mut registry, &table, m, &result);

        let manifold = *registry.manifold.get(m).unwrap();
        assert_eq!(manifold.num_points(), MAX_CONTACTS);
        let deepest_kept = manifold.points().any(|p| {
            registry
                .contact_point
                .get(p)
                .is_some_and(|cp| (cp.distance + 0.5).abs() < 1e-9)
        });
        assert!(deepest_kept);
    }

    #[test]
    fn test_retire_separated_point() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (a, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::ZERO, -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        // Move body A up beyond the breaking threshold.
        registry
            .position
            .insert(a, Vector3::new(0.0, CONTACT_BREAKING_THRESHOLD * 4.0, 0.0));
        update_contact_distances(&mut registry);
        let retired = retire_contact_points(&mut registry, m);
        assert_eq!(retired.len(), 1);
        assert_eq!(registry.manifold.get(m).unwrap().num_points(), 0);
    }

    #[test]
    fn test_lifetime_increments_for_survivors() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, _, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::ZERO, -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        retire_contact_points(&mut registry, m);
        retire_contact_points(&mut registry, m);

        let point_entity = registry.manifold.get(m).unwrap().point[0];
        assert_eq!(registry.contact_point.get(point_entity).unwrap().lifetime, 2);
    }

    #[test]
    fn test_pair_table_override_wins() {
        let mut registry = Registry::new();
        let (a, b, m) = setup_pair(&mut registry);

        registry.material.get_mut(a).unwrap().id = 1;
        registry.material.get_mut(b).unwrap().id = 2;
        let mut table = MaterialMixTable::new();
        table.insert(
            1,
            2,
            MixedMaterial {
                friction: 0.123,
                restitution: 0.9,
                roll_friction: 0.0,
                spin_friction: 0.0,
                stiffness: crate::math::SCALAR_MAX,
                damping: crate::math::SCALAR_MAX,
            },
        );

        let mut result = CollisionResult::empty();
        result.add_point(candidate(Vector3::ZERO, -0.01));
        merge_collision_result(&mut registry, &table, m, &result);

        let cp = registry
            .contact_point
            .get(registry.manifold.get(m).unwrap().point[0])
            .unwrap();
        assert_relative_eq!(cp.friction, 0.123);
        assert_relative_eq!(cp.restitution, 0.9);
    }

    #[test]
    fn test_normal_attachment_tracks_anchor_rotation() {
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();
        let (_, b, m) = setup_pair(&mut registry);

        let mut result = CollisionResult::empty();
        let mut rp = candidate(Vector3::ZERO, -0.01);
        rp.normal_attachment = ContactNormalAttachment::NormalOnB;
        result.add_point(rp);
        merge_collision_result(&mut registry, &table, m, &result);

        // Rotate the anchor body; the world normal must follow.
        let turn = Quaternion::from_axis_angle(Vector3::UNIT_X, core::f64::consts::FRAC_PI_2);
        registry.orientation.insert(b, turn);
        update_contact_distances(&mut registry);

        let cp = registry
            .contact_point
            .get(registry.manifold.get(m).unwrap().point[0])
            .unwrap();
        assert_relative_eq!(cp.normal.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(cp.normal.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_per_vertex_mesh_friction() {
        use crate::shapes::Triangle;
        let mut registry = Registry::new();
        let table = MaterialMixTable::new();

        let a = registry.create();
        let b = registry.create();
        for &e in &[a, b] {
            registry.position.insert(e, Vector3::ZERO);
            registry.orientation.insert(e, Quaternion::IDENTITY);
            registry.material.insert(e, Material::default());
        }
        registry.shape.insert(
            b,
            Shape::Mesh {
                mesh: TriMesh {
                    vertices: vec![Vector3::ZERO, Vector3::UNIT_X, Vector3::UNIT_Z],
                    triangles: vec![Triangle { indices: [0, 1, 2] }],
                    per_vertex_friction: Some(vec![0.9, 0.9, 0.9]),
                    per_vertex_restitution: None,
                },
            },
        );
        let m = registry.create();
        registry.manifold.insert(m, ContactManifold::new(a, b));

        let mut result = CollisionResult::empty();
        let mut rp = candidate(Vector3::ZERO, -0.01);
        rp.feature_b = Some(CollisionFeature {
            feature: TriangleFeature::Vertex,
            index: 0,
        });
        result.add_point(rp);
        merge_collision_result(&mut registry, &table, m, &result);

        let cp = registry
            .contact_point
            .get(registry.manifold.get(m).unwrap().point[0])
            .unwrap();
        // sqrt(0.5 * 0.9)
        assert_relative_eq!(cp.friction, (0.5f64 * 0.9).sqrt(), epsilon = 1e-12);
    }
}
