//! Pinhole camera with Brown radial/tangential distortion
//!
//! # Mathematical Model
//!
//! ```text
//! nx = x/z,  ny = y/z
//! r² = nx² + ny²
//!
//! Radial distortion (N coefficients):
//! sum = k₁·r² + k₂·r⁴ + … + k_N·r^(2N)
//!
//! Tangential distortion:
//! dx = nx·(1 + sum) + 2·t₁·nx·ny + t₂·(r² + 2·nx²)
//! dy = ny·(1 + sum) + t₁·(r² + 2·ny²) + 2·t₂·nx·ny
//!
//! u = fx·dx + skew·dy + cx
//! v = fy·dy + cy
//! ```
//!
//! # Parameters
//!
//! fx, fy, cx, cy, [skew], k₁ … k_N, [t₁, t₂]
//!
//! # References
//!
//! - Brown, "Decentering Distortion of Lenses", 1966

use super::{CameraModel, chain_normalized, normalize};
use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole + Brown distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeBrownCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
    /// Radial coefficients k₁ … k_N
    pub radial: Vec<f64>,
    pub t1: f64,
    pub t2: f64,
    /// When true the skew is fixed at zero and not optimized.
    pub zero_skew: bool,
    /// When false t₁ and t₂ are fixed at zero and not optimized.
    pub tangential: bool,
}

/// Distorted normalized coordinates and their derivatives.
struct Distortion {
    dx: f64,
    dy: f64,
    /// ∂(dx,dy)/∂(nx,ny)
    jacobian: Matrix2<f64>,
}

impl PinholeBrownCamera {
    /// Camera with `radial.len()` radial terms, tangential terms enabled and zero skew.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, radial: Vec<f64>, t1: f64, t2: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
            radial,
            t1,
            t2,
            zero_skew: true,
            tangential: true,
        }
    }

    /// Camera with radial distortion only.
    pub fn radial_only(fx: f64, fy: f64, cx: f64, cy: f64, radial: Vec<f64>) -> Self {
        Self {
            tangential: false,
            ..Self::new(fx, fy, cx, cy, radial, 0.0, 0.0)
        }
    }

    /// Makes the skew an optimized intrinsic.
    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self.zero_skew = false;
        self
    }

    /// Index of the first radial coefficient in the intrinsic vector.
    fn radial_offset(&self) -> usize {
        if self.zero_skew { 4 } else { 5 }
    }

    fn distort(&self, nx: f64, ny: f64) -> Distortion {
        let r2 = nx * nx + ny * ny;

        let mut sum = 0.0;
        let mut dsum_dr2 = 0.0;
        let mut r2_pow = r2; // r2^(i+1)
        let mut r2_pow_prev = 1.0; // r2^i
        for (i, k) in self.radial.iter().enumerate() {
            sum += k * r2_pow;
            dsum_dr2 += k * (i as f64 + 1.0) * r2_pow_prev;
            r2_pow_prev = r2_pow;
            r2_pow *= r2;
        }
        let a = 1.0 + sum;

        let dx = nx * a + 2.0 * self.t1 * nx * ny + self.t2 * (r2 + 2.0 * nx * nx);
        let dy = ny * a + self.t1 * (r2 + 2.0 * ny * ny) + 2.0 * self.t2 * nx * ny;

        let cross = 2.0 * nx * ny * dsum_dr2 + 2.0 * self.t1 * nx + 2.0 * self.t2 * ny;
        let jacobian = Matrix2::new(
            a + 2.0 * nx * nx * dsum_dr2 + 2.0 * self.t1 * ny + 6.0 * self.t2 * nx,
            cross,
            cross,
            a + 2.0 * ny * ny * dsum_dr2 + 6.0 * self.t1 * ny + 2.0 * self.t2 * nx,
        );

        Distortion { dx, dy, jacobian }
    }
}

impl CameraModel for PinholeBrownCamera {
    fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        let (nx, ny, _) = normalize(p_cam);
        let d = self.distort(nx, ny);
        Vector2::new(
            self.fx * d.dx + self.skew * d.dy + self.cx,
            self.fy * d.dy + self.cy,
        )
    }

    fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let (nx, ny, inv_z) = normalize(p_cam);
        let d = self.distort(nx, ny);
        let k = Matrix2::new(self.fx, self.skew, 0.0, self.fy);
        chain_normalized(&(k * d.jacobian), nx, ny, inv_z)
    }

    fn jacobian_intrinsics(&self, p_cam: &Vector3<f64>, grad_x: &mut [f64], grad_y: &mut [f64]) {
        let (nx, ny, _) = normalize(p_cam);
        let d = self.distort(nx, ny);
        let r2 = nx * nx + ny * ny;

        // ∂u/∂(fx,fy,cx,cy), ∂v/∂(fx,fy,cx,cy)
        grad_x[..4].copy_from_slice(&[d.dx, 0.0, 1.0, 0.0]);
        grad_y[..4].copy_from_slice(&[0.0, d.dy, 0.0, 1.0]);

        let mut index = 4;
        if !self.zero_skew {
            grad_x[index] = d.dy;
            grad_y[index] = 0.0;
            index += 1;
        }

        let mut r2_pow = r2;
        for _ in 0..self.radial.len() {
            let ddx = nx * r2_pow;
            let ddy = ny * r2_pow;
            grad_x[index] = self.fx * ddx + self.skew * ddy;
            grad_y[index] = self.fy * ddy;
            r2_pow *= r2;
            index += 1;
        }

        if self.tangential {
            // t1
            let ddx = 2.0 * nx * ny;
            let ddy = r2 + 2.0 * ny * ny;
            grad_x[index] = self.fx * ddx + self.skew * ddy;
            grad_y[index] = self.fy * ddy;
            // t2
            let ddx = r2 + 2.0 * nx * nx;
            let ddy = 2.0 * nx * ny;
            grad_x[index + 1] = self.fx * ddx + self.skew * ddy;
            grad_y[index + 1] = self.fy * ddy;
        }
    }

    fn intrinsic_count(&self) -> usize {
        self.radial_offset() + self.radial.len() + if self.tangential { 2 } else { 0 }
    }

    fn set_intrinsic(&mut self, params: &[f64]) {
        self.fx = params[0];
        self.fy = params[1];
        self.cx = params[2];
        self.cy = params[3];
        if !self.zero_skew {
            self.skew = params[4];
        }
        let offset = self.radial_offset();
        let n = self.radial.len();
        self.radial.copy_from_slice(&params[offset..offset + n]);
        if self.tangential {
            self.t1 = params[offset + n];
            self.t2 = params[offset + n + 1];
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
        let offset = self.radial_offset();
        let n = self.radial.len();
        out[offset..offset + n].copy_from_slice(&self.radial);
        if self.tangential {
            out[offset + n] = self.t1;
            out[offset + n + 1] = self.t2;
        }
    }

    fn model_name(&self) -> &'static str {
        "pinhole_brown"
    }
}
