//! Collision Shapes
//!
//! Closed set of collision geometry variants plus world-space AABB and
//! moment-of-inertia computation. Narrowphase dispatch over pairs of these
//! variants lives in [`crate::collide`].
//!
//! The capsule axis is the local X axis. The plane shape is meant for
//! static bodies; its normal and constant are given in world space.

use crate::math::{Matrix3, Quaternion, Scalar, Vector3, SCALAR_MAX};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vector3,
    /// Maximum corner.
    pub max: Vector3,
}

impl Aabb {
    /// Create an AABB from corners.
    pub const fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    /// Whether two AABBs overlap.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow (positive) or shrink (negative) every face by `amount`.
    #[inline]
    pub fn inset(&self, amount: Vector3) -> Self {
        Self {
            min: self.min + amount,
            max: self.max - amount,
        }
    }

    /// Smallest AABB containing both.
    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether `other` lies fully inside `self`.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> Vector3 {
        (self.min + self.max) * 0.5
    }
}

/// One triangle of a mesh shape, as vertex indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    /// Vertex indices.
    pub indices: [u32; 3],
}

/// Triangle mesh with optional per-vertex surface materials.
///
/// Used for static world geometry. Contact points against a mesh report the
/// feature (vertex/edge/face) they touched so material lookup can honor
/// per-vertex values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriMesh {
    /// Mesh vertices, object space.
    pub vertices: Vec<Vector3>,
    /// Triangles as vertex index triplets.
    pub triangles: Vec<Triangle>,
    /// Optional per-vertex friction override.
    pub per_vertex_friction: Option<Vec<Scalar>>,
    /// Optional per-vertex restitution override.
    pub per_vertex_restitution: Option<Vec<Scalar>>,
}

impl TriMesh {
    /// Whether the mesh carries per-vertex friction.
    pub fn has_per_vertex_friction(&self) -> bool {
        self.per_vertex_friction.is_some()
    }

    /// Whether the mesh carries per-vertex restitution.
    pub fn has_per_vertex_restitution(&self) -> bool {
        self.per_vertex_restitution.is_some()
    }

    /// Friction at a vertex, falling back to `fallback` when absent.
    pub fn vertex_friction(&self, vertex: u32, fallback: Scalar) -> Scalar {
        self.per_vertex_friction
            .as_ref()
            .and_then(|f| f.get(vertex as usize))
            .copied()
            .unwrap_or(fallback)
    }

    /// Restitution at a vertex, falling back to `fallback` when absent.
    pub fn vertex_restitution(&self, vertex: u32, fallback: Scalar) -> Scalar {
        self.per_vertex_restitution
            .as_ref()
            .and_then(|r| r.get(vertex as usize))
            .copied()
            .unwrap_or(fallback)
    }

    /// Average of a per-vertex table over a triangle's corners.
    pub fn face_value(table: &[Scalar], tri: &Triangle) -> Scalar {
        let sum: Scalar = tri
            .indices
            .iter()
            .map(|&i| table.get(i as usize).copied().unwrap_or(0.0))
            .sum();
        sum / 3.0
    }
}

/// Collision geometry, a closed tagged variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Solid sphere of the given radius.
    Sphere {
        /// Sphere radius.
        radius: Scalar,
    },
    /// Box with half extents along each local axis.
    Box {
        /// Half extents.
        half_extents: Vector3,
    },
    /// Capsule along the local X axis.
    Capsule {
        /// Cap radius.
        radius: Scalar,
        /// Half distance between cap centers.
        half_length: Scalar,
    },
    /// Solid cylinder along the local X axis.
    Cylinder {
        /// Cylinder radius.
        radius: Scalar,
        /// Half height.
        half_length: Scalar,
    },
    /// Infinite plane `dot(normal, p) = constant`, for static bodies.
    Plane {
        /// Plane normal, world space.
        normal: Vector3,
        /// Signed distance of the plane from the world origin.
        constant: Scalar,
    },
    /// Convex polyhedron given by its vertex cloud, object space.
    Polyhedron {
        /// Convex hull vertices.
        vertices: Vec<Vector3>,
    },
    /// Triangle mesh, for static world geometry.
    Mesh {
        /// The mesh data.
        mesh: TriMesh,
    },
}

impl Shape {
    /// Stable index of the shape variant, used for pool encoding and the
    /// pairwise collision dispatch table.
    pub fn shape_index(&self) -> u8 {
        match self {
            Shape::Sphere { .. } => 0,
            Shape::Box { .. } => 1,
            Shape::Capsule { .. } => 2,
            Shape::Cylinder { .. } => 3,
            Shape::Plane { .. } => 4,
            Shape::Polyhedron { .. } => 5,
            Shape::Mesh { .. } => 6,
        }
    }
}

/// World-space AABB of a shape at the given transform.
pub fn shape_aabb(shape: &Shape, pos: Vector3, orn: Quaternion) -> Aabb {
    match shape {
        Shape::Sphere { radius } => Aabb {
            min: pos - Vector3::splat(*radius),
            max: pos + Vector3::splat(*radius),
        },
        Shape::Box { half_extents } => {
            // Rotated box extent: sum of |R| columns scaled by half extents.
            let basis = orn.to_matrix();
            let ex = basis.column(0).abs() * half_extents.x;
            let ey = basis.column(1).abs() * half_extents.y;
            let ez = basis.column(2).abs() * half_extents.z;
            let ext = ex + ey + ez;
            Aabb {
                min: pos - ext,
                max: pos + ext,
            }
        }
        Shape::Capsule {
            radius,
            half_length,
        }
        | Shape::Cylinder {
            radius,
            half_length,
        } => {
            let axis = orn.rotate(Vector3::UNIT_X) * *half_length;
            let r = Vector3::splat(*radius);
            let p0 = pos - axis;
            let p1 = pos + axis;
            Aabb {
                min: p0.min(p1) - r,
                max: p0.max(p1) + r,
            }
        }
        Shape::Plane { .. } => {
            // Planes are unbounded; broadphase treats them as everything.
            Aabb {
                min: Vector3::splat(-SCALAR_MAX),
                max: Vector3::splat(SCALAR_MAX),
            }
        }
        Shape::Polyhedron { vertices } => points_aabb(vertices, pos, orn),
        Shape::Mesh { mesh } => points_aabb(&mesh.vertices, pos, orn),
    }
}

fn points_aabb(points: &[Vector3], pos: Vector3, orn: Quaternion) -> Aabb {
    let mut min = Vector3::splat(SCALAR_MAX);
    let mut max = Vector3::splat(-SCALAR_MAX);
    for &p in points {
        let w = pos + orn.rotate(p);
        min = min.min(w);
        max = max.max(w);
    }
    if points.is_empty() {
        min = pos;
        max = pos;
    }
    Aabb { min, max }
}

/// Body-frame moment of inertia tensor of a shape with the given mass.
pub fn moment_of_inertia(shape: &Shape, mass: Scalar) -> Matrix3 {
    match shape {
        Shape::Sphere { radius } => {
            let i = 0.4 * mass * radius * radius;
            Matrix3::diagonal(Vector3::splat(i))
        }
        Shape::Box { half_extents } => {
            let w = half_extents.x * 2.0;
            let h = half_extents.y * 2.0;
            let d = half_extents.z * 2.0;
            let k = mass / 12.0;
            Matrix3::diagonal(Vector3::new(
                k * (h * h + d * d),
                k * (w * w + d * d),
                k * (w * w + h * h),
            ))
        }
        Shape::Capsule {
            radius,
            half_length,
        } => {
            // Cylinder plus two hemispheres, composed about the capsule axis.
            let r = *radius;
            let hl = *half_length;
            let cyl_mass = mass * (2.0 * hl) / (2.0 * hl + 4.0 / 3.0 * r);
            let cap_mass = mass - cyl_mass;
            let axial = 0.5 * cyl_mass * r * r + 0.4 * cap_mass * r * r;
            let lateral = cyl_mass * (0.25 * r * r + (1.0 / 3.0) * hl * hl)
                + cap_mass * (0.4 * r * r + hl * hl);
            Matrix3::diagonal(Vector3::new(axial, lateral, lateral))
        }
        Shape::Cylinder {
            radius,
            half_length,
        } => {
            let r2 = radius * radius;
            let l2 = half_length * half_length * 4.0;
            let axial = 0.5 * mass * r2;
            let lateral = mass / 12.0 * (3.0 * r2 + l2);
            Matrix3::diagonal(Vector3::new(axial, lateral, lateral))
        }
        Shape::Plane { .. } | Shape::Mesh { .. } => Matrix3::ZERO,
        Shape::Polyhedron { vertices } => {
            // Box approximation over the vertex extents.
            let aabb = points_aabb(vertices, Vector3::ZERO, Quaternion::IDENTITY);
            let half = (aabb.max - aabb.min) * 0.5;
            moment_of_inertia(
                &Shape::Box {
                    half_extents: half.max(Vector3::splat(1e-3)),
                },
                mass,
            )
        }
    }
}
