//! Metric scene: Euclidean (or homogeneous) points seen through SE(3) poses.
//!
//! Views reference one camera and one motion. A view without a parent uses its
//! motion directly as `world_to_view`. A view with a parent uses it as
//! `parent_to_view`, giving
//!
//! ```text
//! world_to_view = parent_to_view ∘ world_to_parent
//! ```
//!
//! applied recursively up to a root view. Parents must have a lower index than
//! their children, so a single forward pass over the views resolves every
//! chain. Many views may share one motion (e.g. the fixed baseline of a stereo
//! rig).

use super::{SceneCamera, ScenePoint, camera_parameter_offsets, point_length};
use crate::camera::BundleCamera;
use crate::error::{BundleError, BundleResult};
use crate::geometry::Se3;
use nalgebra::Vector4;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rigid transform plus the flag that excludes it from optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMotion {
    pub known: bool,
    pub parent_to_view: Se3,
}

/// One image: which camera took it and which motion places it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneView {
    pub camera: usize,
    /// Index of the motion from the parent (or world) to this view
    pub parent_to_view: usize,
    /// Parent view, if this view's pose is relative to another view
    pub parent: Option<usize>,
}

/// Group of points that move together under one object-to-world transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRigid {
    pub known: bool,
    pub object_to_world: Se3,
    /// Global index of this object's first point in the rigid-point index space
    pub index_first: usize,
    /// Points in object coordinates. Euclidean scenes keep `w = 1`.
    pub points: Vec<Vector4<f64>>,
}

impl SceneRigid {
    pub fn set_point(&mut self, index: usize, x: f64, y: f64, z: f64) {
        self.points[index] = Vector4::new(x, y, z, 1.0);
    }

    pub fn set_point_homogeneous(&mut self, index: usize, x: f64, y: f64, z: f64, w: f64) {
        self.points[index] = Vector4::new(x, y, z, w);
    }
}

/// Scene for metric bundle adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneStructureMetric {
    homogeneous: bool,
    pub points: Vec<ScenePoint>,
    pub cameras: Vec<SceneCamera>,
    pub motions: Vec<SceneMotion>,
    pub views: Vec<SceneView>,
    pub rigids: Vec<SceneRigid>,
    /// Global rigid-point index to rigid index
    lookup_rigid: Vec<usize>,
}

impl SceneStructureMetric {
    /// Empty scene. `homogeneous` selects 4-parameter points.
    pub fn new(homogeneous: bool) -> Self {
        Self {
            homogeneous,
            points: Vec::new(),
            cameras: Vec::new(),
            motions: Vec::new(),
            views: Vec::new(),
            rigids: Vec::new(),
            lookup_rigid: Vec::new(),
        }
    }

    /// Allocates cameras, views, points and rigid bodies. Motions are created
    /// with [`Self::add_motion`] or [`Self::set_view_motion`].
    pub fn initialize(
        &mut self,
        total_cameras: usize,
        total_views: usize,
        total_points: usize,
        total_rigid: usize,
    ) {
        self.cameras = vec![SceneCamera::default(); total_cameras];
        self.views = vec![
            SceneView {
                camera: 0,
                parent_to_view: 0,
                parent: None,
            };
            total_views
        ];
        self.points = vec![ScenePoint::default(); total_points];
        self.motions.clear();
        self.rigids = (0..total_rigid)
            .map(|_| SceneRigid {
                known: true,
                object_to_world: Se3::identity(),
                index_first: 0,
                points: Vec::new(),
            })
            .collect();
        self.lookup_rigid.clear();
    }

    pub fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    /// Parameters per point: 3 for Euclidean, 4 for homogeneous.
    pub fn point_length(&self) -> usize {
        point_length(self.homogeneous)
    }

    pub fn set_camera(&mut self, index: usize, known: bool, model: impl Into<BundleCamera>) {
        self.cameras[index] = SceneCamera {
            known,
            model: model.into(),
        };
    }

    /// Adds a motion and returns its index.
    pub fn add_motion(&mut self, known: bool, parent_to_view: Se3) -> usize {
        self.motions.push(SceneMotion {
            known,
            parent_to_view,
        });
        self.motions.len() - 1
    }

    /// Assigns camera, motion and optional parent to a view.
    pub fn set_view(&mut self, view: usize, camera: usize, motion: usize, parent: Option<usize>) {
        self.views[view] = SceneView {
            camera,
            parent_to_view: motion,
            parent,
        };
    }

    /// Creates a dedicated world-to-view motion for a root view. Returns the motion index.
    pub fn set_view_motion(
        &mut self,
        view: usize,
        camera: usize,
        known: bool,
        world_to_view: Se3,
    ) -> usize {
        let motion = self.add_motion(known, world_to_view);
        self.set_view(view, camera, motion, None);
        motion
    }

    pub fn set_point(&mut self, index: usize, x: f64, y: f64, z: f64) {
        self.points[index].coordinate = Vector4::new(x, y, z, 1.0);
    }

    pub fn set_point_homogeneous(&mut self, index: usize, x: f64, y: f64, z: f64, w: f64) {
        self.points[index].coordinate = Vector4::new(x, y, z, w);
    }

    /// Records that `view` observes `point`.
    pub fn connect_point_to_view(&mut self, point: usize, view: usize) {
        self.points[point].connect_view(view);
    }

    /// Declares a rigid body with `total_points` local points and rebuilds the
    /// rigid-point index space.
    pub fn set_rigid(
        &mut self,
        index: usize,
        known: bool,
        object_to_world: Se3,
        total_points: usize,
    ) {
        let rigid = &mut self.rigids[index];
        rigid.known = known;
        rigid.object_to_world = object_to_world;
        rigid.points = vec![Vector4::new(0.0, 0.0, 0.0, 1.0); total_points];
        self.assign_ids_to_rigid_points();
    }

    /// Recomputes `index_first` for every rigid body and the global lookup table.
    pub fn assign_ids_to_rigid_points(&mut self) {
        self.lookup_rigid.clear();
        let mut index = 0;
        for (rigid_index, rigid) in self.rigids.iter_mut().enumerate() {
            rigid.index_first = index;
            index += rigid.points.len();
            self.lookup_rigid
                .extend(std::iter::repeat_n(rigid_index, rigid.points.len()));
        }
    }

    /// Total number of points across all rigid bodies.
    pub fn rigid_point_count(&self) -> usize {
        self.lookup_rigid.len()
    }

    /// Rigid body owning the global rigid point `index`.
    pub fn lookup_rigid(&self, index: usize) -> Option<usize> {
        self.lookup_rigid.get(index).copied()
    }

    /// Motion of the view, i.e. parent-to-view (or world-to-view for a root view).
    pub fn parent_to_view(&self, view: usize) -> &Se3 {
        &self.motions[self.views[view].parent_to_view].parent_to_view
    }

    /// True if at least one view refers to the motion.
    pub fn is_motion_referenced(&self, motion: usize) -> bool {
        self.views.iter().any(|v| v.parent_to_view == motion)
    }

    /// Reference flag for every motion.
    pub(crate) fn motion_references(&self) -> Vec<bool> {
        let mut referenced = vec![false; self.motions.len()];
        for view in &self.views {
            if let Some(flag) = referenced.get_mut(view.parent_to_view) {
                *flag = true;
            }
        }
        referenced
    }

    pub fn unknown_rigid_count(&self) -> usize {
        self.rigids.iter().filter(|r| !r.known).count()
    }

    /// Motions that carry parameters: unknown and referenced by a view.
    pub fn unknown_motion_count(&self) -> usize {
        let referenced = self.motion_references();
        self.motions
            .iter()
            .zip(referenced)
            .filter(|(m, r)| !m.known && *r)
            .count()
    }

    /// Total intrinsic parameters over all unknown cameras.
    pub fn unknown_camera_parameter_count(&self) -> usize {
        camera_parameter_offsets(&self.cameras).1
    }

    /// Checks every cross reference and the parent ordering.
    ///
    /// A parent index must be strictly less than its child's index. This rules
    /// out cycles and lets every chain be resolved in one forward pass.
    pub fn validate(&self) -> BundleResult<()> {
        for (index, view) in self.views.iter().enumerate() {
            if view.camera >= self.cameras.len() {
                return Err(BundleError::Structure(format!(
                    "view {index} references camera {} but only {} exist",
                    view.camera,
                    self.cameras.len()
                )));
            }
            if view.parent_to_view >= self.motions.len() {
                return Err(BundleError::Structure(format!(
                    "view {index} references motion {} but only {} exist",
                    view.parent_to_view,
                    self.motions.len()
                )));
            }
            if let Some(parent) = view.parent {
                if parent >= index {
                    return Err(BundleError::Structure(format!(
                        "view {index} has parent {parent}; parents must have a lower index"
                    )));
                }
            }
        }

        let expected: usize = self.rigids.iter().map(|r| r.points.len()).sum();
        if expected != self.lookup_rigid.len() {
            return Err(BundleError::Structure(
                "rigid point lookup is stale; call assign_ids_to_rigid_points()".to_string(),
            ));
        }
        for (index, point) in self.points.iter().enumerate() {
            if let Some(&view) = point.views.iter().find(|&&v| v >= self.views.len()) {
                return Err(BundleError::Structure(format!(
                    "point {index} is connected to view {view} but only {} exist",
                    self.views.len()
                )));
            }
        }
        Ok(())
    }

    /// Resolves the effective world-to-view transform of every view.
    ///
    /// Root views copy their motion; relative views compose their motion with
    /// the already resolved transform of their parent. Fails if a parent index
    /// is not lower than its child's, which is the only way a cycle can appear.
    pub fn world_to_views(&self) -> BundleResult<Vec<Se3>> {
        let mut world_to_view: Vec<Se3> = Vec::with_capacity(self.views.len());
        for (index, view) in self.views.iter().enumerate() {
            let motion = self.motions.get(view.parent_to_view).ok_or_else(|| {
                BundleError::Structure(format!(
                    "view {index} references motion {} but only {} exist",
                    view.parent_to_view,
                    self.motions.len()
                ))
            })?;
            let resolved = match view.parent {
                None => motion.parent_to_view,
                Some(parent) if parent < index => {
                    world_to_view[parent].then(&motion.parent_to_view)
                }
                Some(parent) => {
                    return Err(BundleError::Structure(format!(
                        "view {index} has parent {parent}; parents must have a lower index"
                    )));
                }
            };
            world_to_view.push(resolved);
        }
        Ok(world_to_view)
    }

    /// Removes the listed points (sorted ascending) and returns the old-to-new index map.
    pub fn remove_points(&mut self, sorted_indices: &[usize]) -> Vec<Option<usize>> {
        let mut old_to_new = vec![None; self.points.len()];
        let mut removed = 0;
        let mut cursor = sorted_indices.iter().peekable();
        for (old, slot) in old_to_new.iter_mut().enumerate() {
            if cursor.peek() == Some(&&old) {
                cursor.next();
                removed += 1;
            } else {
                *slot = Some(old - removed);
            }
        }

        let mut index = 0;
        self.points.retain(|_| {
            let keep = old_to_new[index].is_some();
            index += 1;
            keep
        });
        debug!(removed, remaining = self.points.len(), "removed points");
        old_to_new
    }
}
