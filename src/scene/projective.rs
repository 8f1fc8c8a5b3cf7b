//! Projective scene: every view is a raw 3×4 camera matrix `P`.
//!
//! `h = P·X` is handed to the view's camera model as a camera-frame point, so
//! an identity-intrinsics pinhole yields the classic `(h₀/h₂, h₁/h₂)`. There is
//! no relative-view chaining and no rigid bodies.

use super::{SceneCamera, ScenePoint, camera_parameter_offsets, point_length};
use crate::camera::{BundleCamera, PinholeCamera};
use crate::error::{BundleError, BundleResult};
use nalgebra::{Matrix3x4, Vector4};
use serde::{Deserialize, Serialize};

/// Parameters of one unknown projective view.
pub const PROJECTIVE_VIEW_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectiveView {
    pub known: bool,
    pub world_to_view: Matrix3x4<f64>,
    pub camera: usize,
    /// Image size in pixels, informational only
    pub width: usize,
    pub height: usize,
}

impl Default for ProjectiveView {
    fn default() -> Self {
        Self {
            known: true,
            world_to_view: Matrix3x4::identity(),
            camera: 0,
            width: 0,
            height: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneStructureProjective {
    homogeneous: bool,
    pub points: Vec<ScenePoint>,
    pub cameras: Vec<SceneCamera>,
    pub views: Vec<ProjectiveView>,
}

impl SceneStructureProjective {
    pub fn new(homogeneous: bool) -> Self {
        Self {
            homogeneous,
            points: Vec::new(),
            cameras: Vec::new(),
            views: Vec::new(),
        }
    }

    /// Allocates views and points with a single known identity camera, so a
    /// view's matrix alone defines the pixel `(h₀/h₂, h₁/h₂)`.
    pub fn initialize(&mut self, total_views: usize, total_points: usize) {
        self.cameras = vec![SceneCamera {
            known: true,
            model: BundleCamera::Pinhole(PinholeCamera::new(1.0, 1.0, 0.0, 0.0)),
        }];
        self.views = vec![ProjectiveView::default(); total_views];
        self.points = vec![ScenePoint::default(); total_points];
    }

    /// Replaces the cameras. Views keep their camera indices.
    pub fn initialize_cameras(&mut self, total_cameras: usize) {
        self.cameras = vec![SceneCamera::default(); total_cameras];
    }

    pub fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    pub fn point_length(&self) -> usize {
        point_length(self.homogeneous)
    }

    pub fn set_camera(&mut self, index: usize, known: bool, model: impl Into<BundleCamera>) {
        self.cameras[index] = SceneCamera {
            known,
            model: model.into(),
        };
    }

    pub fn set_view(
        &mut self,
        view: usize,
        known: bool,
        world_to_view: Matrix3x4<f64>,
        width: usize,
        height: usize,
    ) {
        let entry = &mut self.views[view];
        entry.known = known;
        entry.world_to_view = world_to_view;
        entry.width = width;
        entry.height = height;
    }

    pub fn set_view_camera(&mut self, view: usize, camera: usize) {
        self.views[view].camera = camera;
    }

    pub fn set_point(&mut self, index: usize, x: f64, y: f64, z: f64) {
        self.points[index].coordinate = Vector4::new(x, y, z, 1.0);
    }

    pub fn set_point_homogeneous(&mut self, index: usize, x: f64, y: f64, z: f64, w: f64) {
        self.points[index].coordinate = Vector4::new(x, y, z, w);
    }

    pub fn connect_point_to_view(&mut self, point: usize, view: usize) {
        self.points[point].connect_view(view);
    }

    pub fn unknown_view_count(&self) -> usize {
        self.views.iter().filter(|v| !v.known).count()
    }

    pub fn unknown_camera_parameter_count(&self) -> usize {
        camera_parameter_offsets(&self.cameras).1
    }

    pub fn validate(&self) -> BundleResult<()> {
        for (index, view) in self.views.iter().enumerate() {
            if view.camera >= self.cameras.len() {
                return Err(BundleError::Structure(format!(
                    "projective view {index} references camera {} but only {} exist",
                    view.camera,
                    self.cameras.len()
                )));
            }
        }
        Ok(())
    }
}
