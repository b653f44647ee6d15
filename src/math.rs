//! Math Primitives for Rigid-Body Simulation
//!
//! Vectors, quaternions and 3x3 matrices over `f64`, plus the handful of
//! physics-specific helpers the solver leans on: `plane_space` for building
//! tangent frames, `skew` matrices for Jacobian assembly, and quaternion
//! integration for the angular step.
//!
//! # Types
//!
//! - [`Scalar`]: `f64` alias used throughout the engine
//! - [`Vector3`]: 3D vector
//! - [`Quaternion`]: rotation (x, y, z, w)
//! - [`Matrix3`]: row-major 3x3 matrix, used for inertia tensors

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use serde::{Deserialize, Serialize};

/// Scalar type used across the engine.
pub type Scalar = f64;

/// Largest representable scalar, used as "infinite" mass and limits.
pub const SCALAR_MAX: Scalar = f64::MAX;

/// Generic epsilon for degenerate-geometry guards.
pub const EPSILON: Scalar = 1e-12;

/// Two pi.
pub const PI2: Scalar = core::f64::consts::PI * 2.0;

/// Standard earth gravity acceleration vector.
pub const GRAVITY_EARTH: Vector3 = Vector3 {
    x: 0.0,
    y: -9.81,
    z: 0.0,
};

/// Wrap an angle into the `[-pi, pi]` range.
pub fn normalize_angle(angle: Scalar) -> Scalar {
    let mut a = angle % PI2;
    if a > core::f64::consts::PI {
        a -= PI2;
    } else if a < -core::f64::consts::PI {
        a += PI2;
    }
    a
}

/// Signed unit for a boolean condition: `true` maps to 1, `false` to -1.
#[inline]
pub fn to_sign(positive: bool) -> Scalar {
    if positive {
        1.0
    } else {
        -1.0
    }
}

// ============================================================================
// Vector3
// ============================================================================

/// 3D vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: Scalar,
    /// Y component
    pub y: Scalar,
    /// Z component
    pub z: Scalar,
}

impl Vector3 {
    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// Unit X axis
    pub const UNIT_X: Self = Self::new(1.0, 0.0, 0.0);
    /// Unit Y axis
    pub const UNIT_Y: Self = Self::new(0.0, 1.0, 0.0);
    /// Unit Z axis
    pub const UNIT_Z: Self = Self::new(0.0, 0.0, 1.0);
    /// All components one
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Create a vector from components.
    #[inline]
    pub const fn new(x: Scalar, y: Scalar, z: Scalar) -> Self {
        Self { x, y, z }
    }

    /// Create a vector with all components set to `v`.
    #[inline]
    pub const fn splat(v: Scalar) -> Self {
        Self::new(v, v, v)
    }

    /// Dot product.
    #[inline]
    pub fn dot(self, rhs: Self) -> Scalar {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Cross product.
    #[inline]
    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// Squared length.
    #[inline]
    pub fn length_sqr(self) -> Scalar {
        self.dot(self)
    }

    /// Length.
    #[inline]
    pub fn length(self) -> Scalar {
        self.length_sqr().sqrt()
    }

    /// Unit vector in the same direction. Returns `UNIT_X` for near-zero input.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > EPSILON {
            self / len
        } else {
            Self::UNIT_X
        }
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    /// Component-wise absolute value.
    #[inline]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Component-wise multiplication.
    #[inline]
    pub fn mul_elem(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, rhs: Self) -> Scalar {
        (self - rhs).length()
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_sqr(self, rhs: Self) -> Scalar {
        (self - rhs).length_sqr()
    }

    /// Linear interpolation, `t` in `[0, 1]`.
    #[inline]
    pub fn lerp(self, rhs: Self, t: Scalar) -> Self {
        self * (1.0 - t) + rhs * t
    }

    /// True if every component is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component by index, `0..3`.
    #[inline]
    pub fn get(self, i: usize) -> Scalar {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl Add for Vector3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector3 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vector3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vector3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<Scalar> for Vector3 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Scalar) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<Scalar> for Vector3 {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Scalar) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vector3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Build two unit vectors `p`, `q` orthogonal to `n` and to each other.
///
/// Picks the axis least aligned with `n` as the starting direction so the
/// result stays well conditioned for any input.
pub fn plane_space(n: Vector3) -> (Vector3, Vector3) {
    if n.z.abs() > core::f64::consts::FRAC_1_SQRT_2 {
        // Choose p in the y-z plane.
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vector3::new(0.0, -n.z * k, n.y * k);
        let q = Vector3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        // Choose p in the x-y plane.
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vector3::new(-n.y * k, n.x * k, 0.0);
        let q = Vector3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}

// ============================================================================
// Quaternion
// ============================================================================

/// Rotation quaternion, `(x, y, z)` imaginary and `w` real.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X (imaginary) component
    pub x: Scalar,
    /// Y (imaginary) component
    pub y: Scalar,
    /// Z (imaginary) component
    pub z: Scalar,
    /// W (real) component
    pub w: Scalar,
}

impl Quaternion {
    /// Identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Create a quaternion from components.
    #[inline]
    pub const fn new(x: Scalar, y: Scalar, z: Scalar, w: Scalar) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians around the unit `axis`.
    pub fn from_axis_angle(axis: Vector3, angle: Scalar) -> Self {
        let half = angle * 0.5;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Quaternion product `self * rhs` (apply `rhs` first).
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Conjugate (inverse for unit quaternions).
    #[inline]
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Squared norm.
    #[inline]
    pub fn length_sqr(self) -> Scalar {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Norm.
    #[inline]
    pub fn length(self) -> Scalar {
        self.length_sqr().sqrt()
    }

    /// Unit quaternion. Falls back to identity for a near-zero norm.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > EPSILON {
            Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
        } else {
            Self::IDENTITY
        }
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate(self, v: Vector3) -> Vector3 {
        let u = Vector3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Dot product with another quaternion.
    #[inline]
    pub fn dot(self, rhs: Self) -> Scalar {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    /// Rotation axis. Returns `UNIT_X` for the identity rotation.
    pub fn axis(self) -> Vector3 {
        let s = (1.0 - self.w * self.w).sqrt();
        if s > EPSILON {
            Vector3::new(self.x / s, self.y / s, self.z / s)
        } else {
            Vector3::UNIT_X
        }
    }

    /// Rotation angle in `[0, 2pi]`.
    pub fn angle(self) -> Scalar {
        2.0 * self.w.clamp(-1.0, 1.0).acos()
    }

    /// Normalized linear interpolation along the shortest arc.
    pub fn nlerp(self, rhs: Self, t: Scalar) -> Self {
        let rhs = if self.dot(rhs) < 0.0 {
            Self::new(-rhs.x, -rhs.y, -rhs.z, -rhs.w)
        } else {
            rhs
        };
        let one_minus_t = 1.0 - t;
        Self::new(
            self.x * one_minus_t + rhs.x * t,
            self.y * one_minus_t + rhs.y * t,
            self.z * one_minus_t + rhs.z * t,
            self.w * one_minus_t + rhs.w * t,
        )
        .normalize()
    }

    /// Orientation basis as a rotation matrix.
    pub fn to_matrix(self) -> Matrix3 {
        let (x, y, z, w) = (self.x, self.y, self.z, self.w);
        Matrix3 {
            row: [
                Vector3::new(
                    1.0 - 2.0 * (y * y + z * z),
                    2.0 * (x * y - z * w),
                    2.0 * (x * z + y * w),
                ),
                Vector3::new(
                    2.0 * (x * y + z * w),
                    1.0 - 2.0 * (x * x + z * z),
                    2.0 * (y * z - x * w),
                ),
                Vector3::new(
                    2.0 * (x * z - y * w),
                    2.0 * (y * z + x * w),
                    1.0 - 2.0 * (x * x + y * y),
                ),
            ],
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Integrate an orientation by an angular velocity over `dt`.
///
/// `q' = normalize(q + 0.5 * dt * w_quat * q)`.
pub fn integrate(orn: Quaternion, angvel: Vector3, dt: Scalar) -> Quaternion {
    let w = Quaternion::new(angvel.x, angvel.y, angvel.z, 0.0);
    let dq = w.mul(orn);
    let half_dt = dt * 0.5;
    Quaternion::new(
        orn.x + dq.x * half_dt,
        orn.y + dq.y * half_dt,
        orn.z + dq.z * half_dt,
        orn.w + dq.w * half_dt,
    )
    .normalize()
}

// ============================================================================
// Matrix3
// ============================================================================

/// Row-major 3x3 matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix3 {
    /// Matrix rows
    pub row: [Vector3; 3],
}

impl Matrix3 {
    /// Zero matrix.
    pub const ZERO: Self = Self {
        row: [Vector3::ZERO, Vector3::ZERO, Vector3::ZERO],
    };

    /// Identity matrix.
    pub const IDENTITY: Self = Self {
        row: [Vector3::UNIT_X, Vector3::UNIT_Y, Vector3::UNIT_Z],
    };

    /// Matrix with the given diagonal, zeros elsewhere.
    pub const fn diagonal(d: Vector3) -> Self {
        Self {
            row: [
                Vector3::new(d.x, 0.0, 0.0),
                Vector3::new(0.0, d.y, 0.0),
                Vector3::new(0.0, 0.0, d.z),
            ],
        }
    }

    /// Matrix from three column vectors.
    pub fn from_columns(c0: Vector3, c1: Vector3, c2: Vector3) -> Self {
        Self {
            row: [
                Vector3::new(c0.x, c1.x, c2.x),
                Vector3::new(c0.y, c1.y, c2.y),
                Vector3::new(c0.z, c1.z, c2.z),
            ],
        }
    }

    /// Column `i` of the matrix.
    #[inline]
    pub fn column(&self, i: usize) -> Vector3 {
        Vector3::new(self.row[0].get(i), self.row[1].get(i), self.row[2].get(i))
    }

    /// Transposed matrix.
    pub fn transpose(&self) -> Self {
        Self::from_columns(self.row[0], self.row[1], self.row[2])
    }

    /// Matrix-vector product.
    pub fn mul_vec(&self, v: Vector3) -> Vector3 {
        Vector3::new(self.row[0].dot(v), self.row[1].dot(v), self.row[2].dot(v))
    }

    /// Matrix-matrix product.
    pub fn mul_mat(&self, rhs: &Self) -> Self {
        let c0 = self.mul_vec(rhs.column(0));
        let c1 = self.mul_vec(rhs.column(1));
        let c2 = self.mul_vec(rhs.column(2));
        Self::from_columns(c0, c1, c2)
    }

    /// Inverse of a symmetric matrix. Returns `ZERO` when singular.
    pub fn inverse_symmetric(&self) -> Self {
        let m = self;
        let a = m.row[0].x;
        let b = m.row[0].y;
        let c = m.row[0].z;
        let d = m.row[1].y;
        let e = m.row[1].z;
        let f = m.row[2].z;

        let det = a * (d * f - e * e) - b * (b * f - c * e) + c * (b * e - c * d);
        if det.abs() < EPSILON {
            return Self::ZERO;
        }
        let inv_det = 1.0 / det;

        let r00 = (d * f - e * e) * inv_det;
        let r01 = (c * e - b * f) * inv_det;
        let r02 = (b * e - c * d) * inv_det;
        let r11 = (a * f - c * c) * inv_det;
        let r12 = (b * c - a * e) * inv_det;
        let r22 = (a * d - b * b) * inv_det;

        Self {
            row: [
                Vector3::new(r00, r01, r02),
                Vector3::new(r01, r11, r12),
                Vector3::new(r02, r12, r22),
            ],
        }
    }
}

/// Skew-symmetric cross-product matrix of `v`, such that
/// `skew(v).mul_vec(u) == v.cross(u)`.
pub fn skew(v: Vector3) -> Matrix3 {
    Matrix3 {
        row: [
            Vector3::new(0.0, -v.z, v.y),
            Vector3::new(v.z, 0.0, -v.x),
            Vector3::new(-v.y, v.x, 0.0),
        ],
    }
}

/// Transform a point from object space to world space.
#[inline]
pub fn to_world_space(local: Vector3, origin: Vector3, orn: Quaternion) -> Vector3 {
    origin + orn.rotate(local)
}

/// Transform a point from world space to object space.
#[inline]
pub fn to_object_space(world: Vector3, origin: Vector3, orn: Quaternion) -> Vector3 {
    orn.conjugate().rotate(world - origin)
}

/// Rotate a body-frame inverse inertia tensor into world space:
/// `R * I_inv * R^T`.
pub fn rotate_inertia_inv(inertia_inv: &Matrix3, orn: Quaternion) -> Matrix3 {
    let basis = orn.to_matrix();
    basis.mul_mat(inertia_inv).mul_mat(&basis.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cross_product_axes() {
        let c = Vector3::UNIT_X.cross(Vector3::UNIT_Y);
        assert_relative_eq!(c.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_space_orthogonal() {
        for n in [
            Vector3::UNIT_X,
            Vector3::UNIT_Y,
            Vector3::UNIT_Z,
            Vector3::new(0.3, -0.8, 0.52).normalize(),
        ] {
            let (p, q) = plane_space(n);
            assert_relative_eq!(n.dot(p), 0.0, epsilon = 1e-9);
            assert_relative_eq!(n.dot(q), 0.0, epsilon = 1e-9);
            assert_relative_eq!(p.dot(q), 0.0, epsilon = 1e-9);
            assert_relative_eq!(p.length(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(q.length(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_skew_matches_cross() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(-0.5, 0.25, 4.0);
        let a = skew(v).mul_vec(u);
        let b = v.cross(u);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_rotate_axis_angle() {
        let q = Quaternion::from_axis_angle(Vector3::UNIT_Z, core::f64::consts::FRAC_PI_2);
        let v = q.rotate(Vector3::UNIT_X);
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quaternion_matrix_agrees_with_rotate() {
        let q = Quaternion::from_axis_angle(Vector3::new(1.0, 1.0, 0.0).normalize(), 0.7);
        let v = Vector3::new(0.2, -1.5, 3.0);
        let a = q.rotate(v);
        let b = q.to_matrix().mul_vec(v);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-9);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-9);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-9);
    }

    #[test]
    fn test_integrate_keeps_unit_length() {
        let mut q = Quaternion::IDENTITY;
        let w = Vector3::new(3.0, -2.0, 1.0);
        for _ in 0..600 {
            q = integrate(q, w, 1.0 / 60.0);
        }
        assert_relative_eq!(q.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_inverse_symmetric_roundtrip() {
        let m = Matrix3 {
            row: [
                Vector3::new(2.0, 0.3, 0.1),
                Vector3::new(0.3, 3.0, 0.2),
                Vector3::new(0.1, 0.2, 4.0),
            ],
        };
        let inv = m.inverse_symmetric();
        let id = m.mul_mat(&inv);
        assert_relative_eq!(id.row[0].x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(id.row[1].y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(id.row[2].z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(id.row[0].y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_angle_wraps() {
        assert_relative_eq!(normalize_angle(PI2 + 0.1), 0.1, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-PI2 - 0.1), -0.1, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(0.5), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_world_object_space_roundtrip() {
        let orn = Quaternion::from_axis_angle(Vector3::UNIT_Y, 1.2);
        let origin = Vector3::new(5.0, -2.0, 7.0);
        let local = Vector3::new(0.3, 0.4, -0.5);
        let world = to_world_space(local, origin, orn);
        let back = to_object_space(world, origin, orn);
        assert_relative_eq!(back.x, local.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, local.y, epsilon = 1e-9);
        assert_relative_eq!(back.z, local.z, epsilon = 1e-9);
    }
}
