//! Minimal rotation parameterizations and their partial derivatives.
//!
//! The codec stores every unknown rotation as a short parameter vector and the
//! Jacobian needs `∂R/∂θᵢ` for each of those parameters. Both go through
//! [`RotationParameterization`], so swapping the SO(3) representation changes
//! the parameter layout and the derivatives together.
//!
//! | Variant      | Params | Layout         | Notes                                   |
//! |--------------|--------|----------------|-----------------------------------------|
//! | `Rodrigues`  | 3      | axis·angle     | minimal, singular direction at angle 0 handled analytically |
//! | `Quaternion` | 4      | (w, x, y, z)   | over-parameterized, normalized on decode |

use crate::geometry::skew_symmetric;
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Largest parameter count over all variants.
pub const MAX_ROTATION_PARAMS: usize = 4;

/// Below this rotation angle the Rodrigues partials use their limit form.
const RODRIGUES_SMALL_ANGLE: f64 = 1e-8;

/// Strategy for encoding a rotation matrix into optimization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationParameterization {
    /// Rotation vector: direction is the axis, norm is the angle in radians.
    #[default]
    Rodrigues,
    /// Unnormalized quaternion `(w, x, y, z)`; the rotation is that of `q/|q|`.
    Quaternion,
}

/// A decoded rotation together with its partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationJacobian {
    /// The rotation matrix for the parameters
    pub rotation: Matrix3<f64>,
    partials: [Matrix3<f64>; MAX_ROTATION_PARAMS],
    len: usize,
}

impl RotationJacobian {
    /// `∂R/∂θᵢ`
    #[inline]
    pub fn partial(&self, i: usize) -> &Matrix3<f64> {
        &self.partials[i]
    }

    /// All partials, one per rotation parameter.
    pub fn partials(&self) -> &[Matrix3<f64>] {
        &self.partials[..self.len]
    }
}

impl RotationParameterization {
    /// Number of parameters used to describe one rotation.
    pub fn parameter_length(&self) -> usize {
        match self {
            RotationParameterization::Rodrigues => 3,
            RotationParameterization::Quaternion => 4,
        }
    }

    /// Writes the parameters of `rotation` into `out[..parameter_length()]`.
    pub fn encode(&self, rotation: &Matrix3<f64>, out: &mut [f64]) {
        let rot = Rotation3::from_matrix_unchecked(*rotation);
        match self {
            RotationParameterization::Rodrigues => {
                let v = rot.scaled_axis();
                out[..3].copy_from_slice(v.as_slice());
            }
            RotationParameterization::Quaternion => {
                let q = UnitQuaternion::from_rotation_matrix(&rot);
                // canonical hemisphere
                let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
                out[0] = sign * q.w;
                out[1] = sign * q.i;
                out[2] = sign * q.j;
                out[3] = sign * q.k;
            }
        }
    }

    /// Rotation matrix described by `params[..parameter_length()]`.
    pub fn decode(&self, params: &[f64]) -> Matrix3<f64> {
        match self {
            RotationParameterization::Rodrigues => {
                Rotation3::new(Vector3::new(params[0], params[1], params[2])).into_inner()
            }
            RotationParameterization::Quaternion => {
                let (w, x, y, z) = (params[0], params[1], params[2], params[3]);
                quaternion_matrix(w, x, y, z) / (w * w + x * x + y * y + z * z)
            }
        }
    }

    /// Decodes the rotation and computes `∂R/∂θᵢ` for every parameter.
    pub fn jacobian(&self, params: &[f64]) -> RotationJacobian {
        let mut partials = [Matrix3::zeros(); MAX_ROTATION_PARAMS];
        let rotation = match self {
            RotationParameterization::Rodrigues => {
                let v = Vector3::new(params[0], params[1], params[2]);
                let rotation = Rotation3::new(v).into_inner();
                rodrigues_partials(&v, &rotation, &mut partials);
                rotation
            }
            RotationParameterization::Quaternion => {
                let (w, x, y, z) = (params[0], params[1], params[2], params[3]);
                quaternion_partials(w, x, y, z, &mut partials)
            }
        };
        RotationJacobian {
            rotation,
            partials,
            len: self.parameter_length(),
        }
    }
}

/// Partials of `R = exp([v]×)`, Gallego & Yezzi (2015):
///
/// ```text
/// ∂R/∂vᵢ = (vᵢ[v]× + [v × (I − R)eᵢ]×) · R / |v|²
/// ```
///
/// At `v = 0` this reduces to `[eᵢ]×`.
fn rodrigues_partials(
    v: &Vector3<f64>,
    rotation: &Matrix3<f64>,
    partials: &mut [Matrix3<f64>; MAX_ROTATION_PARAMS],
) {
    let theta2 = v.norm_squared();
    if theta2.sqrt() < RODRIGUES_SMALL_ANGLE {
        for (i, partial) in partials.iter_mut().take(3).enumerate() {
            *partial = skew_symmetric(&Vector3::ith(i, 1.0));
        }
        return;
    }

    let skew_v = skew_symmetric(v);
    let i_minus_r = Matrix3::identity() - rotation;
    for (i, partial) in partials.iter_mut().take(3).enumerate() {
        let column = i_minus_r.column(i).into_owned();
        let inner = skew_v * v[i] + skew_symmetric(&v.cross(&column));
        *partial = inner * rotation / theta2;
    }
}

/// `|q|²·R(q)` for the quaternion `(w, x, y, z)`.
fn quaternion_matrix(w: f64, x: f64, y: f64, z: f64) -> Matrix3<f64> {
    Matrix3::new(
        w * w + x * x - y * y - z * z,
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        w * w - x * x + y * y - z * z,
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        w * w - x * x - y * y + z * z,
    )
}

/// R = M(q)/n², so ∂R/∂qᵢ = (∂M/∂qᵢ)/n² − 2qᵢ·M/n⁴.
fn quaternion_partials(
    w: f64,
    x: f64,
    y: f64,
    z: f64,
    partials: &mut [Matrix3<f64>; MAX_ROTATION_PARAMS],
) -> Matrix3<f64> {
    let n2 = w * w + x * x + y * y + z * z;
    let m = quaternion_matrix(w, x, y, z);
    let rotation = m / n2;

    let dm = [
        Matrix3::new(w, -z, y, z, w, -x, -y, x, w) * 2.0,
        Matrix3::new(x, y, z, y, -x, -w, z, w, -x) * 2.0,
        Matrix3::new(-y, x, w, x, y, z, -w, z, -y) * 2.0,
        Matrix3::new(-z, -w, x, w, -z, y, x, y, z) * 2.0,
    ];
    let q = [w, x, y, z];
    for i in 0..4 {
        partials[i] = dm[i] / n2 - rotation * (2.0 * q[i] / n2);
    }
    rotation
}
