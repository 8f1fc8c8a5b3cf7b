//! Evaluation settings shared by the residual function, the Schur Jacobian
//! and the diagnostics.

use crate::rotation::RotationParameterization;
use serde::{Deserialize, Serialize};

/// Configuration for a bundle adjustment problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    /// How unknown rotations are stored in the parameter vector
    pub rotation: RotationParameterization,
    /// Evaluate residuals of different views on the rayon thread pool
    pub parallel: bool,
    /// Pixel error thresholds reported by the evaluation, ascending
    pub inlier_thresholds: Vec<f64>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            rotation: RotationParameterization::Rodrigues,
            parallel: false,
            inlier_thresholds: vec![0.5, 1.0, 2.0, 3.0, 5.0],
        }
    }
}

impl BundleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rotation parameterization.
    pub fn with_rotation(mut self, rotation: RotationParameterization) -> Self {
        self.rotation = rotation;
        self
    }

    /// Enable or disable parallel residual evaluation.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the evaluation thresholds. They are sorted ascending.
    pub fn with_inlier_thresholds(mut self, mut thresholds: Vec<f64>) -> Self {
        thresholds.sort_by(f64::total_cmp);
        self.inlier_thresholds = thresholds;
        self
    }
}
