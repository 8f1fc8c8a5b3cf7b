//! Schur Jacobian of [`SceneStructureMetric`] residuals.
//!
//! # Chain rule
//!
//! For an observation of the homogeneous world point `X = (x, y, z, w)` in
//! view `v` with `c = R·(x,y,z) + T·w` and pixel `π(c)`:
//!
//! ```text
//! ∂π/∂(x,y,z) = ∂π/∂c · R
//! ∂π/∂w       = ∂π/∂c · T
//! ```
//!
//! A view chained to parents `v = v₀ → v₁ → … → v_k` (root `v_k`) sees
//! `c = M₀(M₁(…M_k(X)))`. With `A_j = R₀·R₁·…·R_{j−1}` and `p_j` the point in
//! the frame of `v_{j+1}` (or `X` itself for the root):
//!
//! ```text
//! ∂c/∂θ_j = A_j · ∂R_j/∂θ · p_j
//! ∂c/∂T_j = A_j · w
//! ```
//!
//! The ancestor walk is an explicit loop carrying `A_j`. Known motions only
//! extend `A_j`. Ancestors may receive contributions from many descendants, so
//! view columns are accumulated with [`JacobianStorage::add`].
//!
//! A rigid body enters once, between the object frame and the view:
//! `c = R_view·(R_obj·y + T_obj·w) + T_view·w`.

use super::{JacobianStorage, JacobianWorkspace};
use crate::camera::CameraModel;
use crate::codec::{CodecSceneStructureMetric, ParameterLayout};
use crate::config::BundleConfig;
use crate::error::{BundleError, BundleResult};
use crate::geometry::Se3;
use crate::residual::metric::rigid_point_in_world;
use crate::residual::{check_configured, view_row_starts};
use crate::rotation::RotationParameterization;
use crate::scene::{SceneObservations, SceneStructureMetric};
use nalgebra::{Matrix2x3, Matrix3, Vector3, Vector4};
use tracing::debug;

/// Fills the left (points, rigid bodies) and right (motions, cameras) blocks.
#[derive(Debug, Clone)]
pub struct MetricSchurJacobian {
    codec: CodecSceneStructureMetric,
    row_starts: Vec<usize>,
    workspace: JacobianWorkspace,
}

/// Everything that stays fixed while the observations of one view are processed.
struct ViewContext<'a> {
    view: usize,
    structure: &'a SceneStructureMetric,
    world_to_view: &'a [Se3],
    rotation: RotationParameterization,
}

impl MetricSchurJacobian {
    pub fn configure(
        structure: &SceneStructureMetric,
        observations: &SceneObservations,
        config: &BundleConfig,
    ) -> BundleResult<Self> {
        structure.validate()?;
        observations.check_indices(
            structure.views.len(),
            structure.points.len(),
            structure.rigid_point_count(),
        )?;

        let codec = CodecSceneStructureMetric::new(structure, config.rotation);
        debug!(
            left = codec.layout().left_count(),
            right = codec.layout().right_count(),
            "configured metric Schur Jacobian"
        );
        Ok(Self {
            codec,
            row_starts: view_row_starts(observations),
            workspace: JacobianWorkspace::default(),
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.codec.layout().parameter_count()
    }

    pub fn residual_count(&self) -> usize {
        self.row_starts.last().copied().unwrap_or(0)
    }

    /// Decodes `input` into `structure` and writes both Jacobian blocks.
    pub fn process<L, R>(
        &mut self,
        input: &[f64],
        structure: &mut SceneStructureMetric,
        observations: &SceneObservations,
        left: &mut L,
        right: &mut R,
    ) -> BundleResult<()>
    where
        L: JacobianStorage,
        R: JacobianStorage,
    {
        check_configured(&self.row_starts, structure.views.len(), observations)?;
        self.codec.decode(input, structure)?;
        let structure = &*structure;
        let layout = self.codec.layout();
        let rotation = self.codec.rotation();
        let rows = self.residual_count();

        left.reshape(rows, layout.left_count());
        right.reshape(rows, layout.right_count());

        let max_intrinsics = structure
            .cameras
            .iter()
            .map(|c| c.model.intrinsic_count())
            .max()
            .unwrap_or(0);
        let workspace = &mut self.workspace;
        workspace.reset(structure.motions.len(), structure.rigids.len(), max_intrinsics);

        for (index, slot) in workspace.rigid_partials.iter_mut().enumerate() {
            if let Some(offset) = layout.rigid_offset(index) {
                *slot = Some(rotation.jacobian(&input[offset..]));
            }
        }

        let world_to_view = structure.world_to_views()?;

        for (view_index, view) in structure.views.iter().enumerate() {
            let motion = view.parent_to_view;
            if let Some(offset) = layout.view_offset(motion) {
                if workspace.motion_partials[motion].is_none() {
                    let start = layout.left_count() + offset;
                    workspace.motion_partials[motion] = Some(rotation.jacobian(&input[start..]));
                }
            }

            let context = ViewContext {
                view: view_index,
                structure,
                world_to_view: &world_to_view,
                rotation,
            };
            let camera = &structure.cameras[view.camera].model;
            let camera_offset = layout.camera_offset(view.camera);
            let w2v = &world_to_view[view_index];
            let mut row = self.row_starts[view_index];

            for observation in observations.views[view_index].iter() {
                let point = &structure.points[observation.index].coordinate;
                let camera_point = w2v.act_homogeneous(point);
                let gradient = camera.jacobian_point(&camera_point);

                // point block
                let column = layout.point_offset(observation.index);
                let d_xyz = gradient * w2v.r;
                for k in 0..3 {
                    left.set(row, column + k, d_xyz[(0, k)]);
                    left.set(row + 1, column + k, d_xyz[(1, k)]);
                }
                if layout.point_length() == 4 {
                    let d_w = gradient * w2v.t;
                    left.set(row, column + 3, d_w.x);
                    left.set(row + 1, column + 3, d_w.y);
                }

                partial_view_se3(&context, workspace, layout, point, &gradient, row, right)?;
                if let Some(offset) = camera_offset {
                    partial_intrinsics(camera, &camera_point, workspace, offset, row, right);
                }
                row += 2;
            }

            let Some(rigid_observations) = observations.views_rigid.get(view_index) else {
                continue;
            };
            for observation in rigid_observations.iter() {
                let rigid_index = structure.lookup_rigid(observation.index).ok_or_else(|| {
                    BundleError::ObservationIndex {
                        view: view_index,
                        stream: "rigid",
                        index: observation.index,
                        available: structure.rigid_point_count(),
                    }
                })?;
                let rigid = &structure.rigids[rigid_index];
                let local = &rigid.points[observation.index - rigid.index_first];
                let world = rigid_point_in_world(&rigid.object_to_world, local);
                let camera_point = w2v.act_homogeneous(&world);
                let gradient = camera.jacobian_point(&camera_point);

                if let (Some(column), Some(partials)) = (
                    layout.rigid_offset(rigid_index),
                    workspace.rigid_partials[rigid_index].as_ref(),
                ) {
                    partial_rigid_se3(
                        &w2v.r,
                        partials.partials(),
                        local,
                        &gradient,
                        column,
                        row,
                        left,
                    );
                }

                partial_view_se3(&context, workspace, layout, &world, &gradient, row, right)?;
                if let Some(offset) = camera_offset {
                    partial_intrinsics(camera, &camera_point, workspace, offset, row, right);
                }
                row += 2;
            }
        }
        Ok(())
    }
}

/// Writes a 2-row block `[a; b]` into column `column`.
#[inline]
fn add_column<S: JacobianStorage>(storage: &mut S, row: usize, column: usize, a: f64, b: f64) {
    storage.add(row, column, a);
    storage.add(row + 1, column, b);
}

/// Partials of the view pose and of every unknown ancestor motion.
fn partial_view_se3<S: JacobianStorage>(
    context: &ViewContext<'_>,
    workspace: &JacobianWorkspace,
    layout: &ParameterLayout,
    world: &Vector4<f64>,
    gradient: &Matrix2x3<f64>,
    row: usize,
    right: &mut S,
) -> BundleResult<()> {
    let structure = context.structure;
    let rotation_length = context.rotation.parameter_length();
    let mut accumulated = Matrix3::<f64>::identity();
    let mut current = context.view;

    loop {
        let view = &structure.views[current];
        let motion = view.parent_to_view;

        if let Some(column) = layout.view_offset(motion) {
            let partials = workspace.motion_partials[motion].as_ref().ok_or_else(|| {
                BundleError::Structure(format!(
                    "rotation partials of motion {motion} requested before its view was processed"
                ))
            })?;
            let input: Vector3<f64> = match view.parent {
                Some(parent) => context.world_to_view[parent].act_homogeneous(world),
                None => world.xyz(),
            };
            let weighted = gradient * accumulated;

            for (k, d_r) in partials.partials().iter().enumerate() {
                let d = weighted * (d_r * input);
                add_column(right, row, column + k, d.x, d.y);
            }
            for k in 0..3 {
                add_column(
                    right,
                    row,
                    column + rotation_length + k,
                    weighted[(0, k)] * world.w,
                    weighted[(1, k)] * world.w,
                );
            }
        }

        match view.parent {
            Some(parent) => {
                accumulated *= structure.motions[motion].parent_to_view.r;
                current = parent;
            }
            None => return Ok(()),
        }
    }
}

/// Partials of the object-to-world transform of a rigid body.
fn partial_rigid_se3<S: JacobianStorage>(
    view_rotation: &Matrix3<f64>,
    rotation_partials: &[Matrix3<f64>],
    local: &Vector4<f64>,
    gradient: &Matrix2x3<f64>,
    column: usize,
    row: usize,
    left: &mut S,
) {
    let weighted = gradient * view_rotation;
    let local_xyz = local.xyz();
    for (k, d_r) in rotation_partials.iter().enumerate() {
        let d = weighted * (d_r * local_xyz);
        left.set(row, column + k, d.x);
        left.set(row + 1, column + k, d.y);
    }
    let translation = column + rotation_partials.len();
    for k in 0..3 {
        left.set(row, translation + k, weighted[(0, k)] * local.w);
        left.set(row + 1, translation + k, weighted[(1, k)] * local.w);
    }
}

fn partial_intrinsics<C: CameraModel, S: JacobianStorage>(
    camera: &C,
    camera_point: &Vector3<f64>,
    workspace: &mut JacobianWorkspace,
    offset: usize,
    row: usize,
    right: &mut S,
) {
    let count = camera.intrinsic_count();
    camera.jacobian_intrinsics(camera_point, &mut workspace.grad_x, &mut workspace.grad_y);
    for k in 0..count {
        right.set(row, offset + k, workspace.grad_x[k]);
        right.set(row + 1, offset + k, workspace.grad_y[k]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::jacobian::TripletAccumulator;
    use nalgebra::DMatrix;

    fn two_level_scene() -> (SceneStructureMetric, SceneObservations) {
        let mut scene = SceneStructureMetric::new(false);
        scene.initialize(1, 2, 2, 0);
        scene.set_camera(0, true, PinholeCamera::new(400.0, 400.0, 320.0, 240.0));
        scene.set_view_motion(
            0,
            0,
            false,
            Se3::from_axis_angle(Vector3::new(0.05, -0.02, 0.01), Vector3::new(0.1, 0.0, 0.0)),
        );
        let relative = scene.add_motion(
            false,
            Se3::from_axis_angle(Vector3::new(0.0, 0.1, 0.0), Vector3::new(-0.5, 0.0, 0.0)),
        );
        scene.set_view(1, 0, relative, Some(0));
        scene.set_point(0, 0.2, -0.1, 4.0);
        scene.set_point(1, -0.3, 0.4, 5.0);

        let mut observations = SceneObservations::new(2, false);
        for view in 0..2 {
            for point in 0..2 {
                scene.connect_point_to_view(point, view);
                observations.view_mut(view).add(point, 300.0, 200.0);
            }
        }
        (scene, observations)
    }

    #[test]
    fn test_child_view_fills_parent_motion_columns() {
        let (mut scene, observations) = two_level_scene();
        let mut jacobian =
            MetricSchurJacobian::configure(&scene, &observations, &BundleConfig::default())
                .unwrap();
        let codec = CodecSceneStructureMetric::new(&scene, RotationParameterization::Rodrigues);
        let mut input = vec![0.0; codec.layout().parameter_count()];
        codec.encode(&scene, &mut input).unwrap();

        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);
        jacobian
            .process(&input, &mut scene, &observations, &mut left, &mut right)
            .unwrap();

        assert_eq!(left.shape(), (8, 6));
        assert_eq!(right.shape(), (8, 12));
        // rows of view 1 depend on the root motion (columns 0..6)
        let root_block = right.view((4, 0), (4, 6));
        assert!(root_block.norm() > 0.0);
        // rows of view 0 do not depend on the child motion
        let child_block = right.view((0, 6), (4, 6));
        assert_eq!(child_block.norm(), 0.0);
    }

    #[test]
    fn test_dense_and_sparse_agree() {
        let (mut scene, observations) = two_level_scene();
        let mut jacobian =
            MetricSchurJacobian::configure(&scene, &observations, &BundleConfig::default())
                .unwrap();
        let codec = CodecSceneStructureMetric::new(&scene, RotationParameterization::Rodrigues);
        let mut input = vec![0.0; codec.layout().parameter_count()];
        codec.encode(&scene, &mut input).unwrap();

        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);
        jacobian
            .process(&input, &mut scene, &observations, &mut left, &mut right)
            .unwrap();

        let mut sparse_left = TripletAccumulator::default();
        let mut sparse_right = TripletAccumulator::default();
        jacobian
            .process(
                &input,
                &mut scene,
                &observations,
                &mut sparse_left,
                &mut sparse_right,
            )
            .unwrap();

        assert!((sparse_left.to_dense() - &left).norm() < 1e-12);
        assert!((sparse_right.to_dense() - &right).norm() < 1e-12);
    }

    #[test]
    fn test_observations_changed_after_configure() {
        let (mut scene, mut observations) = two_level_scene();
        let mut jacobian =
            MetricSchurJacobian::configure(&scene, &observations, &BundleConfig::default())
                .unwrap();
        let codec = CodecSceneStructureMetric::new(&scene, RotationParameterization::Rodrigues);
        let mut input = vec![0.0; codec.layout().parameter_count()];
        codec.encode(&scene, &mut input).unwrap();
        observations.view_mut(1).add(0, 310.0, 210.0);

        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);
        let result = jacobian.process(&input, &mut scene, &observations, &mut left, &mut right);
        assert!(matches!(result, Err(BundleError::InvalidInput(_))));
    }
}
