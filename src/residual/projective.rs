//! Residuals of a [`SceneStructureProjective`].

use super::{check_configured, split_rows, view_row_starts};
use crate::camera::CameraModel;
use crate::codec::CodecSceneStructureProjective;
use crate::config::BundleConfig;
use crate::error::{BundleError, BundleResult};
use crate::scene::{SceneObservations, SceneStructureProjective};
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProjectiveResidualFunction {
    codec: CodecSceneStructureProjective,
    row_starts: Vec<usize>,
    parallel: bool,
}

impl ProjectiveResidualFunction {
    pub fn configure(
        structure: &SceneStructureProjective,
        observations: &SceneObservations,
        config: &BundleConfig,
    ) -> BundleResult<Self> {
        structure.validate()?;
        // no rigid bodies, so any rigid observation is out of range
        observations.check_indices(structure.views.len(), structure.points.len(), 0)?;

        let codec = CodecSceneStructureProjective::new(structure);
        let row_starts = view_row_starts(observations);
        debug!(
            parameters = codec.layout().parameter_count(),
            residuals = row_starts.last().copied().unwrap_or(0),
            "configured projective residual function"
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

    pub fn codec(&self) -> &CodecSceneStructureProjective {
        &self.codec
    }

    pub fn process(
        &self,
        input: &[f64],
        structure: &mut SceneStructureProjective,
        observations: &SceneObservations,
        output: &mut [f64],
    ) -> BundleResult<()> {
        BundleError::check_length(self.residual_count(), output.len())?;
        check_configured(&self.row_starts, structure.views.len(), observations)?;
        self.codec.decode(input, structure)?;
        let structure = &*structure;

        let chunks = split_rows(output, &self.row_starts);
        if self.parallel {
            chunks
                .into_par_iter()
                .enumerate()
                .for_each(|(view, out)| view_residuals(structure, observations, view, out));
        } else {
            for (view, out) in chunks.into_iter().enumerate() {
                view_residuals(structure, observations, view, out);
            }
        }
        Ok(())
    }
}

fn view_residuals(
    structure: &SceneStructureProjective,
    observations: &SceneObservations,
    view: usize,
    out: &mut [f64],
) {
    let entry = &structure.views[view];
    let camera = &structure.cameras[entry.camera].model;
    for (i, observation) in observations.views[view].iter().enumerate() {
        let h = entry.world_to_view * structure.points[observation.index].coordinate;
        let predicted = camera.project(&h);
        out[2 * i] = predicted.x - observation.pixel.x;
        out[2 * i + 1] = predicted.y - observation.pixel.y;
    }
}
