//! Camera projection models for bundle adjustment.
//!
//! Every model maps a point in the camera frame to a pixel, starting from the
//! normalized image coordinates `nx = x/z`, `ny = y/z`, and supplies analytic
//! partial derivatives with respect to the point and to its own intrinsic
//! parameters.
//!
//! # Key Components
//!
//! - **`CameraModel` trait**: capability interface shared by all models
//! - **`BundleCamera`**: closed sum type over the supported models, used by the
//!   scene structure so dispatch is a single `match`
//!
//! # Available Camera Models
//!
//! - **Pinhole**: fx, fy, cx, cy and an optional skew
//! - **PinholeBrown**: pinhole plus N radial and optional tangential coefficients
//! - **PinholeSimplified**: single focal length with two radial terms (BAL style)
//!
//! Points with `z == 0` are not rejected. Projection divides by `z` and the
//! resulting `NaN`/`Inf` is left for the solver to reject.

use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod pinhole;
pub mod pinhole_brown;
pub mod pinhole_simplified;

pub use pinhole::PinholeCamera;
pub use pinhole_brown::PinholeBrownCamera;
pub use pinhole_simplified::PinholeSimplifiedCamera;

/// Trait for camera projection models.
pub trait CameraModel: Send + Sync + Clone + std::fmt::Debug {
    /// Projects a camera-frame point to pixel coordinates.
    fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64>;

    /// Jacobian of projection w.r.t. camera-frame point coordinates (2×3).
    ///
    /// Returns ∂(u,v)/∂(x,y,z).
    fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64>;

    /// Jacobian of projection w.r.t. intrinsic parameters.
    ///
    /// Writes ∂u/∂intrinsics into `grad_x` and ∂v/∂intrinsics into `grad_y`.
    /// Both slices must hold at least [`CameraModel::intrinsic_count`] values;
    /// the order matches [`CameraModel::get_intrinsic`].
    fn jacobian_intrinsics(&self, p_cam: &Vector3<f64>, grad_x: &mut [f64], grad_y: &mut [f64]);

    /// Number of intrinsic parameters exposed to the optimizer.
    fn intrinsic_count(&self) -> usize;

    /// Reads the intrinsics from `params[..intrinsic_count()]`.
    fn set_intrinsic(&mut self, params: &[f64]);

    /// Writes the intrinsics into `out[..intrinsic_count()]`.
    fn get_intrinsic(&self, out: &mut [f64]);

    /// Get model name identifier.
    fn model_name(&self) -> &'static str;
}

/// Camera models supported by the scene structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BundleCamera {
    Pinhole(PinholeCamera),
    PinholeBrown(PinholeBrownCamera),
    PinholeSimplified(PinholeSimplifiedCamera),
}

impl From<PinholeCamera> for BundleCamera {
    fn from(camera: PinholeCamera) -> Self {
        BundleCamera::Pinhole(camera)
    }
}

impl From<PinholeBrownCamera> for BundleCamera {
    fn from(camera: PinholeBrownCamera) -> Self {
        BundleCamera::PinholeBrown(camera)
    }
}

impl From<PinholeSimplifiedCamera> for BundleCamera {
    fn from(camera: PinholeSimplifiedCamera) -> Self {
        BundleCamera::PinholeSimplified(camera)
    }
}

macro_rules! dispatch {
    ($self:expr, $camera:ident => $body:expr) => {
        match $self {
            BundleCamera::Pinhole($camera) => $body,
            BundleCamera::PinholeBrown($camera) => $body,
            BundleCamera::PinholeSimplified($camera) => $body,
        }
    };
}

impl CameraModel for BundleCamera {
    fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        dispatch!(self, c => c.project(p_cam))
    }

    fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        dispatch!(self, c => c.jacobian_point(p_cam))
    }

    fn jacobian_intrinsics(&self, p_cam: &Vector3<f64>, grad_x: &mut [f64], grad_y: &mut [f64]) {
        dispatch!(self, c => c.jacobian_intrinsics(p_cam, grad_x, grad_y))
    }

    fn intrinsic_count(&self) -> usize {
        dispatch!(self, c => c.intrinsic_count())
    }

    fn set_intrinsic(&mut self, params: &[f64]) {
        dispatch!(self, c => c.set_intrinsic(params))
    }

    fn get_intrinsic(&self, out: &mut [f64]) {
        dispatch!(self, c => c.get_intrinsic(out))
    }

    fn model_name(&self) -> &'static str {
        dispatch!(self, c => c.model_name())
    }
}

/// Normalized image coordinates and `1/z`.
#[inline]
pub(crate) fn normalize(p_cam: &Vector3<f64>) -> (f64, f64, f64) {
    let inv_z = 1.0 / p_cam.z;
    (p_cam.x * inv_z, p_cam.y * inv_z, inv_z)
}

/// Chains ∂(u,v)/∂(nx,ny) with ∂(nx,ny)/∂(x,y,z).
///
/// ```text
/// ∂nx/∂(x,y,z) = [1/z, 0, -nx/z]
/// ∂ny/∂(x,y,z) = [0, 1/z, -ny/z]
/// ```
#[inline]
pub(crate) fn chain_normalized(
    d_uv_d_n: &Matrix2<f64>,
    nx: f64,
    ny: f64,
    inv_z: f64,
) -> Matrix2x3<f64> {
    let du_dz = -(d_uv_d_n[(0, 0)] * nx + d_uv_d_n[(0, 1)] * ny) * inv_z;
    let dv_dz = -(d_uv_d_n[(1, 0)] * nx + d_uv_d_n[(1, 1)] * ny) * inv_z;
    Matrix2x3::new(
        d_uv_d_n[(0, 0)] * inv_z,
        d_uv_d_n[(0, 1)] * inv_z,
        du_dz,
        d_uv_d_n[(1, 0)] * inv_z,
        d_uv_d_n[(1, 1)] * inv_z,
        dv_dz,
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_matches_inner_model() {
        let inner = PinholeCamera::new(500.0, 480.0, 320.0, 240.0);
        let camera = BundleCamera::from(inner.clone());
        let p = Vector3::new(0.1, -0.2, 2.0);

        assert_eq!(camera.project(&p), inner.project(&p));
        assert_eq!(camera.intrinsic_count(), 4);
        assert_eq!(camera.model_name(), "pinhole");
    }

    #[test]
    fn test_set_intrinsic_through_enum() {
        let mut camera = BundleCamera::from(PinholeSimplifiedCamera::new(400.0, 0.0, 0.0));
        camera.set_intrinsic(&[450.0, 0.01, -0.002]);
        let mut out = [0.0; 3];
        camera.get_intrinsic(&mut out);
        assert_eq!(out, [450.0, 0.01, -0.002]);
    }

    #[test]
    fn test_degenerate_depth_propagates_non_finite() {
        let camera = BundleCamera::from(PinholeCamera::new(500.0, 500.0, 320.0, 240.0));
        let pixel = camera.project(&Vector3::new(1.0, 0.0, 0.0));
        assert!(!pixel.x.is_finite());
    }
}
