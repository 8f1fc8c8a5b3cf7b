//! Rigid-body transforms used by the scene model.
//!
//! [`Se3`] stores the rotation as a plain 3×3 matrix instead of a unit
//! quaternion. The codec writes rotation matrices produced by the rotation
//! parameterization straight into it, and the Jacobian multiplies those
//! matrices with the rotation partials, so a matrix is the natural storage.
//!
//! Naming follows the `a_to_b` convention: `world_to_view.act(p_world)` returns
//! the point in view coordinates.

use nalgebra::{Matrix3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Element of SE(3): `p' = R·p + T`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Se3 {
    /// Rotation matrix
    pub r: Matrix3<f64>,
    /// Translation vector
    pub t: Vector3<f64>,
}

impl Default for Se3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Se3 {
    pub fn new(r: Matrix3<f64>, t: Vector3<f64>) -> Self {
        Self { r, t }
    }

    pub fn identity() -> Self {
        Self {
            r: Matrix3::identity(),
            t: Vector3::zeros(),
        }
    }

    /// Builds a transform from a scaled rotation axis (axis·angle) and a translation.
    pub fn from_axis_angle(axis_angle: Vector3<f64>, t: Vector3<f64>) -> Self {
        let r = nalgebra::Rotation3::new(axis_angle).into_inner();
        Self { r, t }
    }

    /// Applies the transform to a Euclidean point.
    #[inline]
    pub fn act(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.r * p + self.t
    }

    /// Applies the transform to a homogeneous point `(x, y, z, w)`.
    ///
    /// Returns the homogeneous 3-vector `R·(x,y,z) + T·w`. For `w = 1` this is
    /// identical to [`Se3::act`]; for `w = 0` only the rotation acts.
    #[inline]
    pub fn act_homogeneous(&self, p: &Vector4<f64>) -> Vector3<f64> {
        self.r * p.xyz() + self.t * p.w
    }

    /// Returns the transform that applies `self` first and then `next`.
    ///
    /// With `self = world_to_parent` and `next = parent_to_view` this yields
    /// `world_to_view`: `R = R_next·R_self`, `T = R_next·T_self + T_next`.
    pub fn then(&self, next: &Se3) -> Se3 {
        Se3 {
            r: next.r * self.r,
            t: next.r * self.t + next.t,
        }
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Se3 {
        let rt = self.r.transpose();
        Se3 {
            r: rt,
            t: -(rt * self.t),
        }
    }
}

/// Compute skew-symmetric matrix from a 3D vector.
///
/// Returns the cross-product matrix [v]× such that [v]× w = v × w.
///
/// ```text
/// [  0  -vz   vy ]
/// [ vz    0  -vx ]
/// [-vy   vx    0 ]
/// ```
#[inline]
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
