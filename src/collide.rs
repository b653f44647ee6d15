//! Pairwise Narrowphase Dispatch
//!
//! Closed double-dispatch table over the shape variants. Every supported
//! pair has a `collide_*` function producing up to a handful of candidate
//! contact points; unsupported pairs return the empty result. The
//! capsule–polyhedron pair is intentionally unsupported and documents the
//! fallback path.
//!
//! Conventions: the world normal points from body B toward body A, and
//! `distance` is the signed separation along the normal (negative while
//! penetrating). Pivots are in each body's object space.

use crate::math::{to_object_space, to_world_space, Quaternion, Scalar, Vector3, EPSILON};
use crate::shapes::{Aabb, Shape, TriMesh};
use serde::{Deserialize, Serialize};

/// Maximum candidate points a single narrowphase call may produce.
pub const MAX_RESULT_POINTS: usize = 16;

/// Which body the contact normal is attached to.
///
/// When attached, the normal is stored in that body's frame at creation and
/// re-derived from its current orientation on reuse, so curved-vs-flat
/// contacts track rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactNormalAttachment {
    /// Normal is free.
    #[default]
    None,
    /// Normal rides body A's orientation.
    NormalOnA,
    /// Normal rides body B's orientation.
    NormalOnB,
}

impl ContactNormalAttachment {
    /// Attachment as seen with bodies swapped.
    pub fn swapped(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::NormalOnA => Self::NormalOnB,
            Self::NormalOnB => Self::NormalOnA,
        }
    }
}

/// Mesh feature kind a contact touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriangleFeature {
    /// A mesh vertex.
    Vertex,
    /// A mesh edge.
    Edge,
    /// A triangle face.
    Face,
}

/// Mesh feature attribution for per-feature material lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFeature {
    /// Feature kind.
    pub feature: TriangleFeature,
    /// Feature index: vertex index for vertices, triangle index otherwise.
    pub index: u32,
}

/// One candidate contact point from narrowphase.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionPoint {
    /// Pivot on body A, object space.
    pub pivot_a: Vector3,
    /// Pivot on body B, object space.
    pub pivot_b: Vector3,
    /// Contact normal, world space, pointing from B to A.
    pub normal: Vector3,
    /// Signed separation along the normal; negative while penetrating.
    pub distance: Scalar,
    /// Which body the normal is attached to.
    pub normal_attachment: ContactNormalAttachment,
    /// Feature on body A, for mesh contacts.
    pub feature_a: Option<CollisionFeature>,
    /// Feature on body B, for mesh contacts.
    pub feature_b: Option<CollisionFeature>,
}

/// Result of one pairwise collision test.
#[derive(Clone, Debug, Default)]
pub struct CollisionResult {
    points: Vec<CollisionPoint>,
}

impl CollisionResult {
    /// Empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Candidate points.
    pub fn points(&self) -> &[CollisionPoint] {
        &self.points
    }

    /// Number of candidate points.
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Append a point, dropping the shallowest when at capacity.
    pub fn add_point(&mut self, point: CollisionPoint) {
        if self.points.len() < MAX_RESULT_POINTS {
            self.points.push(point);
            return;
        }
        if let Some((idx, shallowest)) = self
            .points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
        {
            if point.distance < shallowest.distance {
                self.points[idx] = point;
            }
        }
    }

    /// Result as seen with bodies A and B exchanged.
    pub fn swapped(mut self) -> Self {
        for p in &mut self.points {
            core::mem::swap(&mut p.pivot_a, &mut p.pivot_b);
            core::mem::swap(&mut p.feature_a, &mut p.feature_b);
            p.normal = -p.normal;
            p.normal_attachment = p.normal_attachment.swapped();
        }
        self
    }
}

/// Transform context for one pairwise test.
#[derive(Clone, Copy, Debug)]
pub struct CollisionContext {
    /// Shape origin of body A, world space.
    pub origin_a: Vector3,
    /// Orientation of body A.
    pub orn_a: Quaternion,
    /// AABB of body A.
    pub aabb_a: Aabb,
    /// Shape origin of body B, world space.
    pub origin_b: Vector3,
    /// Orientation of body B.
    pub orn_b: Quaternion,
    /// AABB of body B.
    pub aabb_b: Aabb,
    /// Separation threshold: points farther than this are not reported.
    pub threshold: Scalar,
}

impl CollisionContext {
    fn swapped(&self) -> Self {
        Self {
            origin_a: self.origin_b,
            orn_a: self.orn_b,
            aabb_a: self.aabb_b,
            origin_b: self.origin_a,
            orn_b: self.orn_a,
            aabb_b: self.aabb_a,
            threshold: self.threshold,
        }
    }
}

/// Closest-point collision between two shapes.
///
/// Dispatches on the pair of shape variants. Unsupported pairs produce the
/// empty result.
pub fn collide(shape_a: &Shape, shape_b: &Shape, ctx: &CollisionContext) -> CollisionResult {
    use Shape::*;
    match (shape_a, shape_b) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => collide_sphere_sphere(*ra, *rb, ctx),
        (Sphere { radius }, Plane { normal, constant }) => {
            collide_sphere_plane(*radius, *normal, *constant, ctx)
        }
        (Plane { .. }, Sphere { .. }) => collide(shape_b, shape_a, &ctx.swapped()).swapped(),
        (Box { half_extents }, Plane { normal, constant }) => {
            collide_box_plane(*half_extents, *normal, *constant, ctx)
        }
        (Plane { .. }, Box { .. }) => collide(shape_b, shape_a, &ctx.swapped()).swapped(),
        (Sphere { radius }, Box { half_extents }) => {
            collide_sphere_box(*radius, *half_extents, ctx)
        }
        (Box { .. }, Sphere { .. }) => collide(shape_b, shape_a, &ctx.swapped()).swapped(),
        (Box { half_extents: ha }, Box { half_extents: hb }) => collide_box_box(*ha, *hb, ctx),
        (
            Capsule {
                radius,
                half_length,
            },
            Plane { normal, constant },
        ) => collide_capsule_plane(*radius, *half_length, *normal, *constant, ctx),
        (Plane { .. }, Capsule { .. }) => collide(shape_b, shape_a, &ctx.swapped()).swapped(),
        (Sphere { radius }, Mesh { mesh }) => collide_sphere_mesh(*radius, mesh, ctx),
        (Mesh { .. }, Sphere { .. }) => collide(shape_b, shape_a, &ctx.swapped()).swapped(),
        // Unsupported pair kept as the documented empty fallback.
        (Capsule { .. }, Polyhedron { .. }) | (Polyhedron { .. }, Capsule { .. }) => {
            CollisionResult::empty()
        }
        _ => CollisionResult::empty(),
    }
}

fn collide_sphere_sphere(ra: Scalar, rb: Scalar, ctx: &CollisionContext) -> CollisionResult {
    let mut result = CollisionResult::empty();
    let d = ctx.origin_a - ctx.origin_b;
    let len = d.length();

    if len > ra + rb + ctx.threshold {
        return result;
    }
    let normal = if len > EPSILON { d / len } else { Vector3::UNIT_Y };

    let pivot_a_world = ctx.origin_a - normal * ra;
    let pivot_b_world = ctx.origin_b + normal * rb;
    result.add_point(CollisionPoint {
        pivot_a: to_object_space(pivot_a_world, ctx.origin_a, ctx.orn_a),
        pivot_b: to_object_space(pivot_b_world, ctx.origin_b, ctx.orn_b),
        normal,
        distance: len - ra - rb,
        normal_attachment: ContactNormalAttachment::None,
        feature_a: None,
        feature_b: None,
    });
    result
}

fn collide_sphere_plane(
    radius: Scalar,
    normal: Vector3,
    constant: Scalar,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::empty();
    let center_dist = normal.dot(ctx.origin_a) - constant;
    let distance = center_dist - radius;

    if distance > ctx.threshold {
        return result;
    }
    let pivot_a_world = ctx.origin_a - normal * radius;
    let pivot_b_world = ctx.origin_a - normal * center_dist;
    result.add_point(CollisionPoint {
        pivot_a: to_object_space(pivot_a_world, ctx.origin_a, ctx.orn_a),
        pivot_b: to_object_space(pivot_b_world, ctx.origin_b, ctx.orn_b),
        normal,
        distance,
        normal_attachment: ContactNormalAttachment::NormalOnB,
        feature_a: None,
        feature_b: None,
    });
    result
}

fn collide_box_plane(
    half_extents: Vector3,
    normal: Vector3,
    constant: Scalar,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::empty();

    for corner in box_corners(half_extents) {
        let world = to_world_space(corner, ctx.origin_a, ctx.orn_a);
        let distance = normal.dot(world) - constant;
        if distance > ctx.threshold {
            continue;
        }
        let on_plane = world - normal * distance;
        result.add_point(CollisionPoint {
            pivot_a: corner,
            pivot_b: to_object_space(on_plane, ctx.origin_b, ctx.orn_b),
            normal,
            distance,
            normal_attachment: ContactNormalAttachment::NormalOnB,
            feature_a: None,
            feature_b: None,
        });
    }
    result
}

fn collide_sphere_box(
    radius: Scalar,
    half_extents: Vector3,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::empty();

    // Sphere center in box space.
    let center = to_object_space(ctx.origin_a, ctx.origin_b, ctx.orn_b);
    let clamped = center.max(-half_extents).min(half_extents);
    let delta = center - clamped;
    let dist_sqr = delta.length_sqr();

    let (normal_local, closest_local, distance) = if dist_sqr > EPSILON {
        // Center outside the box.
        let dist = dist_sqr.sqrt();
        (delta / dist, clamped, dist - radius)
    } else {
        // Center inside: push out along the face of least penetration.
        let face_dist = half_extents - center.abs();
        let (axis, sign, depth) = if face_dist.x <= face_dist.y && face_dist.x <= face_dist.z {
            (Vector3::UNIT_X, center.x.signum(), face_dist.x)
        } else if face_dist.y <= face_dist.z {
            (Vector3::UNIT_Y, center.y.signum(), face_dist.y)
        } else {
            (Vector3::UNIT_Z, center.z.signum(), face_dist.z)
        };
        let n = axis * sign;
        let closest = center + n * depth;
        (n, closest, -(depth + radius))
    };

    if distance > ctx.threshold {
        return result;
    }
    let normal = ctx.orn_b.rotate(normal_local);
    let pivot_a_world = ctx.origin_a - normal * radius;
    result.add_point(CollisionPoint {
        pivot_a: to_object_space(pivot_a_world, ctx.origin_a, ctx.orn_a),
        pivot_b: closest_local,
        normal,
        distance,
        normal_attachment: ContactNormalAttachment::NormalOnB,
        feature_a: None,
        feature_b: None,
    });
    result
}

fn collide_capsule_plane(
    radius: Scalar,
    half_length: Scalar,
    normal: Vector3,
    constant: Scalar,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::empty();
    let axis = ctx.orn_a.rotate(Vector3::UNIT_X);

    for side in [-1.0, 1.0] {
        let cap_center = ctx.origin_a + axis * (half_length * side);
        let center_dist = normal.dot(cap_center) - constant;
        let distance = center_dist - radius;
        if distance > ctx.threshold {
            continue;
        }
        let pivot_a_world = cap_center - normal * radius;
        let pivot_b_world = cap_center - normal * center_dist;
        result.add_point(CollisionPoint {
            pivot_a: to_object_space(pivot_a_world, ctx.origin_a, ctx.orn_a),
            pivot_b: to_object_space(pivot_b_world, ctx.origin_b, ctx.orn_b),
            normal,
            distance,
            normal_attachment: ContactNormalAttachment::NormalOnB,
            feature_a: None,
            feature_b: None,
        });
    }
    result
}

// ============================================================================
// Box-box SAT
// ============================================================================

fn box_corners(half: Vector3) -> [Vector3; 8] {
    [
        Vector3::new(-half.x, -half.y, -half.z),
        Vector3::new(half.x, -half.y, -half.z),
        Vector3::new(-half.x, half.y, -half.z),
        Vector3::new(half.x, half.y, -half.z),
        Vector3::new(-half.x, -half.y, half.z),
        Vector3::new(half.x, -half.y, half.z),
        Vector3::new(-half.x, half.y, half.z),
        Vector3::new(half.x, half.y, half.z),
    ]
}

/// Project a box onto an axis: returns half the projected extent.
fn project_box(half: Vector3, axes: &[Vector3; 3], dir: Vector3) -> Scalar {
    half.x * axes[0].dot(dir).abs() + half.y * axes[1].dot(dir).abs() + half.z * axes[2].dot(dir).abs()
}

fn collide_box_box(ha: Vector3, hb: Vector3, ctx: &CollisionContext) -> CollisionResult {
    let axes_a = [
        ctx.orn_a.rotate(Vector3::UNIT_X),
        ctx.orn_a.rotate(Vector3::UNIT_Y),
        ctx.orn_a.rotate(Vector3::UNIT_Z),
    ];
    let axes_b = [
        ctx.orn_b.rotate(Vector3::UNIT_X),
        ctx.orn_b.rotate(Vector3::UNIT_Y),
        ctx.orn_b.rotate(Vector3::UNIT_Z),
    ];
    let center_delta = ctx.origin_a - ctx.origin_b;

    // Separating axis test over face normals and edge cross products,
    // keeping the axis of least penetration.
    let mut best_sep = -Scalar::MAX;
    let mut best_axis = Vector3::UNIT_Y;
    let mut best_is_edge = false;

    let test_axis = |axis: Vector3,
                     is_edge: bool,
                     sep_out: &mut Scalar,
                     axis_out: &mut Vector3,
                     edge_out: &mut bool|
     -> bool {
        let len_sqr = axis.length_sqr();
        if len_sqr < 1e-9 {
            return true; // Degenerate cross product, skip.
        }
        let axis = axis / len_sqr.sqrt();
        // Orient the axis from B toward A.
        let axis = if center_delta.dot(axis) < 0.0 { -axis } else { axis };
        let ra = project_box(ha, &axes_a, axis);
        let rb = project_box(hb, &axes_b, axis);
        let sep = center_delta.dot(axis) - ra - rb;
        if sep > 0.0 {
            return false; // Separating axis found.
        }
        // Edge axes get a small bias so face contacts are preferred.
        let biased = if is_edge { sep - 1e-4 } else { sep };
        if biased > *sep_out {
            *sep_out = biased;
            *axis_out = axis;
            *edge_out = is_edge;
        }
        true
    };

    for axis in axes_a.iter().chain(axes_b.iter()) {
        if !test_axis(*axis, false, &mut best_sep, &mut best_axis, &mut best_is_edge) {
            return CollisionResult::empty();
        }
    }
    for ea in &axes_a {
        for eb in &axes_b {
            if !test_axis(ea.cross(*eb), true, &mut best_sep, &mut best_axis, &mut best_is_edge) {
                return CollisionResult::empty();
            }
        }
    }

    let normal = best_axis; // B -> A.
    let mut result = CollisionResult::empty();

    if best_is_edge {
        // Edge-edge: closest points between the two supporting edges.
        let edge_a = support_edge(ha, &axes_a, ctx.origin_a, -normal);
        let edge_b = support_edge(hb, &axes_b, ctx.origin_b, normal);
        let (pa, pb) = closest_points_segments(edge_a, edge_b);
        result.add_point(CollisionPoint {
            pivot_a: to_object_space(pa, ctx.origin_a, ctx.orn_a),
            pivot_b: to_object_space(pb, ctx.origin_b, ctx.orn_b),
            normal,
            distance: normal.dot(pa - pb),
            normal_attachment: ContactNormalAttachment::None,
            feature_a: None,
            feature_b: None,
        });
        return result;
    }

    // Face contact: clip the incident face of the other box against the
    // side planes of the reference face.
    let a_is_reference = axes_a
        .iter()
        .map(|a| a.dot(normal).abs())
        .fold(0.0, Scalar::max)
        >= axes_b
            .iter()
            .map(|b| b.dot(normal).abs())
            .fold(0.0, Scalar::max);

    let (ref_half, ref_axes, ref_origin, ref_normal, inc_half, inc_axes, inc_origin) =
        if a_is_reference {
            (ha, &axes_a, ctx.origin_a, -normal, hb, &axes_b, ctx.origin_b)
        } else {
            (hb, &axes_b, ctx.origin_b, normal, ha, &axes_a, ctx.origin_a)
        };

    let ref_face = face_toward(ref_half, ref_axes, ref_origin, ref_normal);
    let inc_face = face_toward(inc_half, inc_axes, inc_origin, -ref_normal);

    // Clip incident face against the four side planes of the reference face.
    // Side-plane normals are oriented away from the face center so the
    // kept half space is the inside, independent of winding.
    let ref_center = (ref_face[0] + ref_face[1] + ref_face[2] + ref_face[3]) * 0.25;
    let mut polygon: Vec<Vector3> = inc_face.to_vec();
    for i in 0..4 {
        let edge_start = ref_face[i];
        let edge_end = ref_face[(i + 1) % 4];
        let edge_dir = edge_end - edge_start;
        let mut plane_normal = ref_normal.cross(edge_dir).normalize();
        if plane_normal.dot(ref_center - edge_start) > 0.0 {
            plane_normal = -plane_normal;
        }
        polygon = clip_polygon(&polygon, edge_start, plane_normal);
        if polygon.is_empty() {
            break;
        }
    }

    let ref_plane_point = ref_face[0];
    for p in polygon {
        let depth = ref_normal.dot(p - ref_plane_point);
        if depth > ctx.threshold {
            continue;
        }
        // Contact distance measured B -> A along the shared normal.
        let on_ref = p - ref_normal * depth;
        let (pa_world, pb_world) = if a_is_reference {
            (on_ref, p)
        } else {
            (p, on_ref)
        };
        result.add_point(CollisionPoint {
            pivot_a: to_object_space(pa_world, ctx.origin_a, ctx.orn_a),
            pivot_b: to_object_space(pb_world, ctx.origin_b, ctx.orn_b),
            normal,
            distance: normal.dot(pa_world - pb_world),
            normal_attachment: if a_is_reference {
                ContactNormalAttachment::NormalOnA
            } else {
                ContactNormalAttachment::NormalOnB
            },
            feature_a: None,
            feature_b: None,
        });
    }
    result
}

/// Supporting edge of a box in direction `dir`: the edge whose midpoint is
/// farthest along `dir`.
fn support_edge(
    half: Vector3,
    axes: &[Vector3; 3],
    origin: Vector3,
    dir: Vector3,
) -> (Vector3, Vector3) {
    // Pick the axis most orthogonal to dir as the edge direction; the other
    // two coordinates take their supporting sign.
    let dots = [axes[0].dot(dir), axes[1].dot(dir), axes[2].dot(dir)];
    let edge_axis = (0..3)
        .min_by(|&i, &j| dots[i].abs().total_cmp(&dots[j].abs()))
        .unwrap();

    let mut mid = origin;
    for i in 0..3 {
        if i != edge_axis {
            mid += axes[i] * (half.get(i) * dots[i].signum());
        }
    }
    let offset = axes[edge_axis] * half.get(edge_axis);
    (mid - offset, mid + offset)
}

/// Face of a box whose outward normal is most aligned with `dir`,
/// as four world-space corners in winding order.
fn face_toward(half: Vector3, axes: &[Vector3; 3], origin: Vector3, dir: Vector3) -> [Vector3; 4] {
    let dots = [axes[0].dot(dir), axes[1].dot(dir), axes[2].dot(dir)];
    let face_axis = (0..3)
        .max_by(|&i, &j| dots[i].abs().total_cmp(&dots[j].abs()))
        .unwrap();
    let sign = dots[face_axis].signum();

    let u = (face_axis + 1) % 3;
    let v = (face_axis + 2) % 3;
    let center = origin + axes[face_axis] * (half.get(face_axis) * sign);
    let du = axes[u] * half.get(u);
    let dv = axes[v] * half.get(v);
    [
        center - du - dv,
        center + du - dv,
        center + du + dv,
        center - du + dv,
    ]
}

/// Sutherland-Hodgman clip of a polygon against the half space
/// `dot(n, p - plane_point) <= 0`.
fn clip_polygon(polygon: &[Vector3], plane_point: Vector3, n: Vector3) -> Vec<Vector3> {
    let mut out = Vec::with_capacity(polygon.len() + 2);
    for i in 0..polygon.len() {
        let current = polygon[i];
        let next = polygon[(i + 1) % polygon.len()];
        let d0 = n.dot(current - plane_point);
        let d1 = n.dot(next - plane_point);

        if d0 <= 0.0 {
            out.push(current);
        }
        if (d0 < 0.0) != (d1 < 0.0) && (d1 - d0).abs() > EPSILON {
            let t = d0 / (d0 - d1);
            out.push(current + (next - current) * t);
        }
    }
    out
}

/// Closest points between two segments.
fn closest_points_segments(a: (Vector3, Vector3), b: (Vector3, Vector3)) -> (Vector3, Vector3) {
    let d1 = a.1 - a.0;
    let d2 = b.1 - b.0;
    let r = a.0 - b.0;
    let aa = d1.length_sqr();
    let ee = d2.length_sqr();
    let f = d2.dot(r);

    let (s, t);
    if aa <= EPSILON && ee <= EPSILON {
        return (a.0, b.0);
    }
    if aa <= EPSILON {
        s = 0.0;
        t = (f / ee).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if ee <= EPSILON {
            t = 0.0;
            s = (-c / aa).clamp(0.0, 1.0);
        } else {
            let bb = d1.dot(d2);
            let denom = aa * ee - bb * bb;
            let s_unclamped = if denom.abs() > EPSILON {
                (bb * f - c * ee) / denom
            } else {
                0.0
            };
            s = s_unclamped.clamp(0.0, 1.0);
            t = ((bb * s + f) / ee).clamp(0.0, 1.0);
        }
    }
    (a.0 + d1 * s, b.0 + d2 * t)
}

// ============================================================================
// Sphere vs triangle mesh
// ============================================================================

fn collide_sphere_mesh(radius: Scalar, mesh: &TriMesh, ctx: &CollisionContext) -> CollisionResult {
    let mut result = CollisionResult::empty();
    let center_local = to_object_space(ctx.origin_a, ctx.origin_b, ctx.orn_b);

    for (tri_index, tri) in mesh.triangles.iter().enumerate() {
        let v0 = mesh.vertices[tri.indices[0] as usize];
        let v1 = mesh.vertices[tri.indices[1] as usize];
        let v2 = mesh.vertices[tri.indices[2] as usize];

        let (closest, feature) = closest_point_on_triangle(center_local, v0, v1, v2, tri, tri_index as u32);
        let delta = center_local - closest;
        let dist = delta.length();
        let distance = dist - radius;
        if distance > ctx.threshold {
            continue;
        }

        let normal_local = if dist > EPSILON {
            delta / dist
        } else {
            (v1 - v0).cross(v2 - v0).normalize()
        };
        let normal = ctx.orn_b.rotate(normal_local);
        let pivot_a_world = ctx.origin_a - normal * radius;
        result.add_point(CollisionPoint {
            pivot_a: to_object_space(pivot_a_world, ctx.origin_a, ctx.orn_a),
            pivot_b: closest,
            normal,
            distance,
            normal_attachment: ContactNormalAttachment::NormalOnB,
            feature_a: None,
            feature_b: Some(feature),
        });
    }
    result
}

/// Closest point on a triangle with feature classification (vertex regions
/// report the vertex index, edge/face regions the triangle index).
fn closest_point_on_triangle(
    p: Vector3,
    a: Vector3,
    b: Vector3,
    c: Vector3,
    tri: &crate::shapes::Triangle,
    tri_index: u32,
) -> (Vector3, CollisionFeature) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, vertex_feature(tri, 0));
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, vertex_feature(tri, 1));
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, edge_feature(tri_index));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, vertex_feature(tri, 2));
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, edge_feature(tri_index));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, edge_feature(tri_index));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (
        a + ab * v + ac * w,
        CollisionFeature {
            feature: TriangleFeature::Face,
            index: tri_index,
        },
    )
}

fn vertex_feature(tri: &crate::shapes::Triangle, corner: usize) -> CollisionFeature {
    CollisionFeature {
        feature: TriangleFeature::Vertex,
        index: tri.indices[corner],
    }
}

fn edge_feature(tri_index: u32) -> CollisionFeature {
    CollisionFeature {
        feature: TriangleFeature::Edge,
        index: tri_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{shape_aabb, Triangle};
    use approx::assert_relative_eq;

    fn ctx_for(shape_a: &Shape, pos_a: Vector3, shape_b: &Shape, pos_b: Vector3) -> CollisionContext {
        CollisionContext {
            origin_a: pos_a,
            orn_a: Quaternion::IDENTITY,
            aabb_a: shape_aabb(shape_a, pos_a, Quaternion::IDENTITY),
            origin_b: pos_b,
            orn_b: Quaternion::IDENTITY,
            aabb_b: shape_aabb(shape_b, pos_b, Quaternion::IDENTITY),
            threshold: 0.02,
        }
    }

    #[test]
    fn test_sphere_sphere_penetration() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Sphere { radius: 0.5 };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.9, 0.0), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 1);
        let p = result.points()[0];
        assert_relative_eq!(p.distance, -0.1, epsilon = 1e-9);
        assert_relative_eq!(p.normal.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sphere_sphere_separated() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Sphere { radius: 0.5 };
        let ctx = ctx_for(&a, Vector3::new(0.0, 3.0, 0.0), &b, Vector3::ZERO);
        assert_eq!(collide(&a, &b, &ctx).num_points(), 0);
    }

    #[test]
    fn test_sphere_plane_contact() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Plane {
            normal: Vector3::UNIT_Y,
            constant: 0.0,
        };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.45, 0.0), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 1);
        let p = result.points()[0];
        assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
        assert_eq!(p.normal_attachment, ContactNormalAttachment::NormalOnB);
    }

    #[test]
    fn test_plane_sphere_swapped_normal() {
        let plane = Shape::Plane {
            normal: Vector3::UNIT_Y,
            constant: 0.0,
        };
        let sphere = Shape::Sphere { radius: 0.5 };
        let ctx = ctx_for(&plane, Vector3::ZERO, &sphere, Vector3::new(0.0, 0.4, 0.0));
        let result = collide(&plane, &sphere, &ctx);
        assert_eq!(result.num_points(), 1);
        // Normal must point from B (sphere) to A (plane): downward.
        assert_relative_eq!(result.points()[0].normal.y, -1.0, epsilon = 1e-9);
        assert_eq!(
            result.points()[0].normal_attachment,
            ContactNormalAttachment::NormalOnA
        );
    }

    #[test]
    fn test_box_plane_four_corners() {
        let a = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let b = Shape::Plane {
            normal: Vector3::UNIT_Y,
            constant: 0.0,
        };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.45, 0.0), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 4);
        for p in result.points() {
            assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sphere_box_face_contact() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.95, 0.0), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 1);
        let p = result.points()[0];
        assert_relative_eq!(p.normal.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_box_box_stacked_face_contact() {
        let a = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let b = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.98, 0.0), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert!(result.num_points() >= 4, "stacked boxes should produce a full face patch");
        for p in result.points() {
            assert_relative_eq!(p.normal.y, 1.0, epsilon = 1e-6);
            assert!(p.distance < 0.0);
        }
    }

    #[test]
    fn test_box_box_separated() {
        let a = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let b = Shape::Box {
            half_extents: Vector3::splat(0.5),
        };
        let ctx = ctx_for(&a, Vector3::new(3.0, 0.0, 0.0), &b, Vector3::ZERO);
        assert_eq!(collide(&a, &b, &ctx).num_points(), 0);
    }

    #[test]
    fn test_capsule_polyhedron_unsupported() {
        let a = Shape::Capsule {
            radius: 0.5,
            half_length: 1.0,
        };
        let b = Shape::Polyhedron {
            vertices: vec![Vector3::ZERO, Vector3::UNIT_X, Vector3::UNIT_Y, Vector3::UNIT_Z],
        };
        let ctx = ctx_for(&a, Vector3::ZERO, &b, Vector3::ZERO);
        assert_eq!(collide(&a, &b, &ctx).num_points(), 0);
        assert_eq!(collide(&b, &a, &ctx).num_points(), 0);
    }

    #[test]
    fn test_sphere_mesh_face_feature() {
        let mesh = TriMesh {
            vertices: vec![
                Vector3::new(-1.0, 0.0, -1.0),
                Vector3::new(1.0, 0.0, -1.0),
                Vector3::new(0.0, 0.0, 1.0),
            ],
            triangles: vec![Triangle { indices: [0, 1, 2] }],
            per_vertex_friction: None,
            per_vertex_restitution: None,
        };
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Mesh { mesh };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.45, -0.2), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 1);
        let feature = result.points()[0].feature_b.unwrap();
        assert_eq!(feature.feature, TriangleFeature::Face);
        assert_eq!(feature.index, 0);
    }

    #[test]
    fn test_sphere_mesh_vertex_feature() {
        let mesh = TriMesh {
            vertices: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
            ],
            triangles: vec![Triangle { indices: [0, 1, 2] }],
            per_vertex_friction: None,
            per_vertex_restitution: None,
        };
        let a = Shape::Sphere { radius: 0.3 };
        let b = Shape::Mesh { mesh };
        // Closest to vertex 1 from beyond the corner.
        let ctx = ctx_for(&a, Vector3::new(1.4, 0.1, -0.2), &b, Vector3::ZERO);
        let result = collide(&a, &b, &ctx);
        assert_eq!(result.num_points(), 1);
        let feature = result.points()[0].feature_b.unwrap();
        assert_eq!(feature.feature, TriangleFeature::Vertex);
        assert_eq!(feature.index, 1);
    }

    #[test]
    fn test_result_swap_roundtrip() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Sphere { radius: 0.5 };
        let ctx = ctx_for(&a, Vector3::new(0.0, 0.9, 0.0), &b, Vector3::ZERO);
        let forward = collide(&a, &b, &ctx);
        let reverse = collide(&b, &a, &ctx.swapped());
        let p = forward.points()[0];
        let q = reverse.points()[0];
        assert_relative_eq!(p.normal.y, -q.normal.y, epsilon = 1e-9);
        assert_relative_eq!(p.distance, q.distance, epsilon = 1e-9);
    }
}
