//! Scene data model consumed by the codec, residual functions and Jacobians.
//!
//! A scene is built once per optimization problem by the reconstruction
//! pipeline. The engine never resizes it: the codec only overwrites the numeric
//! fields of entries that are not marked `known`.
//!
//! - [`SceneStructureMetric`]: points, cameras, motions, views (optionally
//!   relative to a parent view) and rigid bodies
//! - [`SceneStructureProjective`]: points and per-view 3×4 projection matrices
//! - [`SceneObservations`]: per-view pixel observations, split into a general
//!   stream and a rigid-body stream

use crate::camera::{BundleCamera, CameraModel, PinholeCamera};
use nalgebra::{Vector3, Vector4};
use serde::{Deserialize, Serialize};

pub mod metric;
pub mod observations;
pub mod projective;

pub use metric::{SceneMotion, SceneRigid, SceneStructureMetric, SceneView};
pub use observations::{Observation, ObservationView, SceneObservations};
pub use projective::{ProjectiveView, SceneStructureProjective};

/// A 3-D feature.
///
/// The coordinate is always stored homogeneous. Euclidean scenes keep `w = 1`
/// and only `x, y, z` are parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePoint {
    pub coordinate: Vector4<f64>,
    /// Views which observe this point
    pub views: Vec<usize>,
}

impl Default for ScenePoint {
    fn default() -> Self {
        Self {
            coordinate: Vector4::new(0.0, 0.0, 0.0, 1.0),
            views: Vec::new(),
        }
    }
}

impl ScenePoint {
    /// Euclidean location. For homogeneous points this divides by `w`.
    pub fn euclidean(&self) -> Vector3<f64> {
        self.coordinate.xyz() / self.coordinate.w
    }

    pub(crate) fn connect_view(&mut self, view: usize) {
        if !self.views.contains(&view) {
            self.views.push(view);
        }
    }

    pub(crate) fn remove_view(&mut self, view: usize) -> bool {
        match self.views.iter().position(|&v| v == view) {
            Some(i) => {
                self.views.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

/// Camera intrinsics plus the flag that excludes them from optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCamera {
    pub known: bool,
    pub model: BundleCamera,
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self {
            known: true,
            model: BundleCamera::Pinhole(PinholeCamera::new(1.0, 1.0, 0.0, 0.0)),
        }
    }
}

/// Start of each unknown camera's intrinsics relative to the first camera parameter.
pub(crate) fn camera_parameter_offsets(cameras: &[SceneCamera]) -> (Vec<Option<usize>>, usize) {
    let mut offsets = Vec::with_capacity(cameras.len());
    let mut index = 0;
    for camera in cameras {
        if camera.known {
            offsets.push(None);
        } else {
            offsets.push(Some(index));
            index += camera.model.intrinsic_count();
        }
    }
    (offsets, index)
}

/// Width of a point in the parameter vector.
#[inline]
pub(crate) fn point_length(homogeneous: bool) -> usize {
    if homogeneous { 4 } else { 3 }
}
