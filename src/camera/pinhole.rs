//! Pinhole Camera Model
//!
//! ```text
//! nx = x/z,  ny = y/z
//! u = fx·nx + skew·ny + cx
//! v = fy·ny + cy
//! ```
//!
//! # Parameters
//!
//! fx, fy, cx, cy and, when `zero_skew` is false, skew. Intrinsics are
//! exposed to the optimizer in that order.

use super::{CameraModel, chain_normalized, normalize};
use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole camera with optional skew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
    /// When true the skew is fixed at zero and not optimized.
    pub zero_skew: bool,
}

impl PinholeCamera {
    /// Pinhole camera without skew.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
            zero_skew: true,
        }
    }

    /// Pinhole camera whose skew is an optimized intrinsic.
    pub fn with_skew(fx: f64, fy: f64, cx: f64, cy: f64, skew: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew,
            zero_skew: false,
        }
    }
}

impl CameraModel for PinholeCamera {
    fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        let (nx, ny, _) = normalize(p_cam);
        Vector2::new(
            self.fx * nx + self.skew * ny + self.cx,
            self.fy * ny + self.cy,
        )
    }

    fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let (nx, ny, inv_z) = normalize(p_cam);
        let d_uv_d_n = Matrix2::new(self.fx, self.skew, 0.0, self.fy);
        chain_normalized(&d_uv_d_n, nx, ny, inv_z)
    }

    fn jacobian_intrinsics(&self, p_cam: &Vector3<f64>, grad_x: &mut [f64], grad_y: &mut [f64]) {
        let (nx, ny, _) = normalize(p_cam);

        grad_x[0] = nx;
        grad_x[1] = 0.0;
        grad_x[2] = 1.0;
        grad_x[3] = 0.0;

        grad_y[0] = 0.0;
        grad_y[1] = ny;
        grad_y[2] = 0.0;
        grad_y[3] = 1.0;

        if !self.zero_skew {
            grad_x[4] = ny;
            grad_y[4] = 0.0;
        }
    }

    fn intrinsic_count(&self) -> usize {
        if self.zero_skew { 4 } else { 5 }
    }

    fn set_intrinsic(&mut self, params: &[f64]) {
        self.fx = params[0];
        self.fy = params[1];
        self.cx = params[2];
        self.cy = params[3];
        if !self.zero_skew {
            self.skew = params[4];
        }
    }

    fn get_intrinsic(&self, out: &mut [f64]) {
        out[0] = self.fx;
        out[1] = self.fy;
        out[2] = self.cx;
        out[3] = self.cy;
        if !self.zero_skew {
            out[4] = self.skew;
        }
    }

    fn model_name(&self) -> &'static str {
        "pinhole"
    }
}
