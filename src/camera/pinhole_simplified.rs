//! Simplified pinhole camera (Bundle Adjustment in the Large style)
//!
//! ```text
//! nx = x/z,  ny = y/z,  r² = nx² + ny²
//! s = 1 + k₁·r² + k₂·r⁴
//! u = f·s·nx
//! v = f·s·ny
//! ```
//!
//! The principal point is at the origin; pixel coordinates are expected to be
//! centered by the caller. Intrinsics: f, k₁, k₂.

use super::{CameraModel, chain_normalized, normalize};
use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeSimplifiedCamera {
    pub f: f64,
    pub k1: f64,
    pub k2: f64,
}

impl PinholeSimplifiedCamera {
    pub fn new(f: f64, k1: f64, k2: f64) -> Self {
        Self { f, k1, k2 }
    }
}

impl CameraModel for PinholeSimplifiedCamera {
    fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        let (nx, ny, _) = normalize(p_cam);
        let r2 = nx * nx + ny * ny;
        let s = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        Vector2::new(self.f * s * nx, self.f * s * ny)
    }

    fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let (nx, ny, inv_z) = normalize(p_cam);
        let r2 = nx * nx + ny * ny;
        let s = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        let ds_dr2 = self.k1 + 2.0 * self.k2 * r2;

        let cross = self.f * 2.0 * nx * ny * ds_dr2;
        let d_uv_d_n = Matrix2::new(
            self.f * (s + 2.0 * nx * nx * ds_dr2),
            cross,
            cross,
            self.f * (s + 2.0 * ny * ny * ds_dr2),
        );
        chain_normalized(&d_uv_d_n, nx, ny, inv_z)
    }

    fn jacobian_intrinsics(&self, p_cam: &Vector3<f64>, grad_x: &mut [f64], grad_y: &mut [f64]) {
        let (nx, ny, _) = normalize(p_cam);
        let r2 = nx * nx + ny * ny;
        let r4 = r2 * r2;
        let s = 1.0 + self.k1 * r2 + self.k2 * r4;

        grad_x[0] = s * nx;
        grad_x[1] = self.f * nx * r2;
        grad_x[2] = self.f * nx * r4;

        grad_y[0] = s * ny;
        grad_y[1] = self.f * ny * r2;
        grad_y[2] = self.f * ny * r4;
    }

    fn intrinsic_count(&self) -> usize {
        3
    }

    fn set_intrinsic(&mut self, params: &[f64]) {
        self.f = params[0];
        self.k1 = params[1];
        self.k2 = params[2];
    }

    fn get_intrinsic(&self, out: &mut [f64]) {
        out[0] = self.f;
        out[1] = self.k1;
        out[2] = self.k2;
    }

    fn model_name(&self) -> &'static str {
        "pinhole_simplified"
    }
}
