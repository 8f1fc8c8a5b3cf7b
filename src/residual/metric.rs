//! Residuals of a [`SceneStructureMetric`].

use super::{check_configured, split_rows, view_row_starts};
use crate::camera::CameraModel;
use crate::codec::CodecSceneStructureMetric;
use crate::config::BundleConfig;
use crate::error::{BundleError, BundleResult};
use crate::geometry::Se3;
use crate::scene::{ObservationView, SceneObservations, SceneStructureMetric};
use nalgebra::{Vector2, Vector4};
use rayon::prelude::*;
use tracing::debug;

/// World coordinates of a rigid-body point as a homogeneous 4-vector.
#[inline]
pub(crate) fn rigid_point_in_world(object_to_world: &Se3, local: &Vector4<f64>) -> Vector4<f64> {
    object_to_world.act_homogeneous(local).push(local.w)
}

/// Predicted pixels minus observations for every view.
#[derive(Debug, Clone)]
pub struct MetricResidualFunction {
    codec: CodecSceneStructureMetric,
    row_starts: Vec<usize>,
    parallel: bool,
}

impl MetricResidualFunction {
    /// Checks the scene against its observations and fixes the parameter layout.
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
        let row_starts = view_row_starts(observations);
        debug!(
            parameters = codec.layout().parameter_count(),
            residuals = row_starts.last().copied().unwrap_or(0),
            views = structure.views.len(),
            "configured metric residual function"
        );
        Ok(Self {
            codec,
            row_starts,
            parallel: config.parallel,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.codec.layout().parameter_count()
    }

    pub fn residual_count(&self) -> usize {
        self.row_starts.last().copied().unwrap_or(0)
    }

    pub fn codec(&self) -> &CodecSceneStructureMetric {
        &self.codec
    }

    /// Decodes `input` into `structure` and writes all residuals into `output`.
    pub fn process(
        &self,
        input: &[f64],
        structure: &mut SceneStructureMetric,
        observations: &SceneObservations,
        output: &mut [f64],
    ) -> BundleResult<()> {
        BundleError::check_length(self.residual_count(), output.len())?;
        check_configured(&self.row_starts, structure.views.len(), observations)?;
        self.codec.decode(input, structure)?;
        let world_to_view = structure.world_to_views()?;
        let structure = &*structure;

        let chunks = split_rows(output, &self.row_starts);
        if self.parallel {
            chunks
                .into_par_iter()
                .enumerate()
                .try_for_each(|(view, out)| {
                    view_residuals(structure, observations, &world_to_view[view], view, out)
                })
        } else {
            for (view, out) in chunks.into_iter().enumerate() {
                view_residuals(structure, observations, &world_to_view[view], view, out)?;
            }
            Ok(())
        }
    }
}

fn write_residual(out: &mut [f64], index: usize, predicted: Vector2<f64>, observed: Vector2<f64>) {
    out[2 * index] = predicted.x - observed.x;
    out[2 * index + 1] = predicted.y - observed.y;
}

fn view_residuals(
    structure: &SceneStructureMetric,
    observations: &SceneObservations,
    world_to_view: &Se3,
    view: usize,
    out: &mut [f64],
) -> BundleResult<()> {
    let camera = &structure.cameras[structure.views[view].camera].model;

    let general: &ObservationView = &observations.views[view];
    for (i, observation) in general.iter().enumerate() {
        let point = &structure.points[observation.index].coordinate;
        let camera_point = world_to_view.act_homogeneous(point);
        write_residual(out, i, camera.project(&camera_point), observation.pixel);
    }

    let Some(rigid_observations) = observations.views_rigid.get(view) else {
        return Ok(());
    };
    let offset = general.len();
    for (i, observation) in rigid_observations.iter().enumerate() {
        let rigid = structure.lookup_rigid(observation.index).ok_or_else(|| {
            BundleError::ObservationIndex {
                view,
                stream: "rigid",
                index: observation.index,
                available: structure.rigid_point_count(),
            }
        })?;
        let rigid = &structure.rigids[rigid];
        let local = &rigid.points[observation.index - rigid.index_first];
        let world = rigid_point_in_world(&rigid.object_to_world, local);
        let camera_point = world_to_view.act_homogeneous(&world);
        write_residual(
            out,
            offset + i,
            camera.project(&camera_point),
            observation.pixel,
        );
    }
    Ok(())
}
