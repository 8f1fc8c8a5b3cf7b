//! Schur Jacobian of [`SceneStructureProjective`] residuals.
//!
//! With `h = P·X` and pixel `π(h)`:
//!
//! ```text
//! ∂π/∂X     = ∂π/∂h · P
//! ∂π/∂P[r,c] = ∂π/∂h_r · X_c
//! ```
//!
//! The 12 entries of an unknown `P` occupy columns `offset + 4·r + c`.

use super::{JacobianStorage, JacobianWorkspace};
use crate::camera::CameraModel;
use crate::codec::CodecSceneStructureProjective;
use crate::config::BundleConfig;
use crate::error::BundleResult;
use crate::residual::{check_configured, view_row_starts};
use crate::scene::{SceneObservations, SceneStructureProjective};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProjectiveSchurJacobian {
    codec: CodecSceneStructureProjective,
    row_starts: Vec<usize>,
    workspace: JacobianWorkspace,
}

impl ProjectiveSchurJacobian {
    pub fn configure(
        structure: &SceneStructureProjective,
        observations: &SceneObservations,
        _config: &BundleConfig,
    ) -> BundleResult<Self> {
        structure.validate()?;
        observations.check_indices(structure.views.len(), structure.points.len(), 0)?;

        let codec = CodecSceneStructureProjective::new(structure);
        debug!(
            left = codec.layout().left_count(),
            right = codec.layout().right_count(),
            "configured projective Schur Jacobian"
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

    pub fn process<L, R>(
        &mut self,
        input: &[f64],
        structure: &mut SceneStructureProjective,
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
        workspace.reset(0, 0, max_intrinsics);

        for (view_index, view) in structure.views.iter().enumerate() {
            let camera = &structure.cameras[view.camera].model;
            let camera_offset = layout.camera_offset(view.camera);
            let view_offset = layout.view_offset(view_index);
            let p = &view.world_to_view;
            let mut row = self.row_starts[view_index];

            for observation in observations.views[view_index].iter() {
                let x = &structure.points[observation.index].coordinate;
                let h = p * x;
                let gradient = camera.jacobian_point(&h);

                let column = layout.point_offset(observation.index);
                let d_x = gradient * p;
                for k in 0..layout.point_length() {
                    left.set(row, column + k, d_x[(0, k)]);
                    left.set(row + 1, column + k, d_x[(1, k)]);
                }

                if let Some(offset) = view_offset {
                    for r in 0..3 {
                        for c in 0..4 {
                            right.set(row, offset + 4 * r + c, gradient[(0, r)] * x[c]);
                            right.set(row + 1, offset + 4 * r + c, gradient[(1, r)] * x[c]);
                        }
                    }
                }

                if let Some(offset) = camera_offset {
                    let count = camera.intrinsic_count();
                    camera.jacobian_intrinsics(&h, &mut workspace.grad_x, &mut workspace.grad_y);
                    for k in 0..count {
                        right.set(row, offset + k, workspace.grad_x[k]);
                        right.set(row + 1, offset + k, workspace.grad_y[k]);
                    }
                }
                row += 2;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, Matrix3x4};

    #[test]
    fn test_view_columns_follow_row_major_layout() {
        let mut scene = SceneStructureProjective::new(false);
        scene.initialize(1, 1);
        let p = Matrix3x4::new(1.0, 0.0, 0.0, 0.1, 0.0, 1.0, 0.0, 0.2, 0.0, 0.0, 1.0, 2.0);
        scene.set_view(0, false, p, 640, 480);
        scene.set_point(0, 0.5, -0.5, 3.0);

        let mut observations = SceneObservations::new(1, false);
        observations.view_mut(0).add(0, 0.0, 0.0);

        let mut jacobian =
            ProjectiveSchurJacobian::configure(&scene, &observations, &BundleConfig::default())
                .unwrap();
        let mut input = vec![0.0; jacobian.parameter_count()];
        CodecSceneStructureProjective::new(&scene)
            .encode(&scene, &mut input)
            .unwrap();

        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);
        jacobian
            .process(&input, &mut scene, &observations, &mut left, &mut right)
            .unwrap();
        assert_eq!(left.shape(), (2, 3));
        assert_eq!(right.shape(), (2, 12));

        // h = (0.6, -0.3, 5); u = h0/h2 so ∂u/∂P[0,c] = X_c / h2
        let h2 = 5.0;
        for (c, x) in [0.5, -0.5, 3.0, 1.0].iter().enumerate() {
            assert!((right[(0, c)] - x / h2).abs() < 1e-12);
            assert_eq!(right[(0, 4 + c)], 0.0);
        }
    }

    #[test]
    fn test_view_count_changed_after_configure() {
        let mut scene = SceneStructureProjective::new(false);
        scene.initialize(1, 1);
        scene.set_view(0, false, Matrix3x4::identity(), 640, 480);
        scene.set_point(0, 0.5, -0.5, 3.0);
        let mut observations = SceneObservations::new(1, false);
        observations.view_mut(0).add(0, 0.0, 0.0);

        let mut jacobian =
            ProjectiveSchurJacobian::configure(&scene, &observations, &BundleConfig::default())
                .unwrap();
        let input = vec![0.0; jacobian.parameter_count()];
        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);

        let mut wider = SceneObservations::new(2, false);
        wider.view_mut(0).add(0, 0.0, 0.0);
        assert!(matches!(
            jacobian.process(&input, &mut scene, &wider, &mut left, &mut right),
            Err(crate::error::BundleError::InvalidInput(_))
        ));

        scene.initialize(2, 1);
        assert!(matches!(
            jacobian.process(&input, &mut scene, &observations, &mut left, &mut right),
            Err(crate::error::BundleError::Structure(_))
        ));
    }
}
