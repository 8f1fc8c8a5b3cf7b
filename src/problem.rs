//! Solver-facing API.
//!
//! A [`SchurProblem`] owns a scene and its observations and exposes the fixed
//! parameter/residual sizes plus residual and Jacobian evaluation for any
//! parameter vector. Residuals and Jacobians share one codec layout, so the
//! columns of `[left | right]` line up with the parameter vector.
//!
//! ```text
//! let mut problem = MetricBundleProblem::new(structure, observations, &config)?;
//! let x0 = problem.encode_parameters()?;
//! let r = problem.compute_residuals(x0.as_slice())?;
//! let (left, right) = problem.compute_jacobian_sparse(x0.as_slice())?;
//! ```

use crate::config::BundleConfig;
use crate::error::BundleResult;
use crate::jacobian::{
    JacobianStorage, MetricSchurJacobian, ProjectiveSchurJacobian, TripletAccumulator,
};
use crate::residual::{MetricResidualFunction, ProjectiveResidualFunction};
use crate::scene::{SceneObservations, SceneStructureMetric, SceneStructureProjective};
use faer::sparse::SparseColMat;
use nalgebra::{DMatrix, DVector};
use tracing::info;

/// Numerical interface consumed by an external Schur-complement solver.
pub trait SchurProblem {
    /// Length of the parameter vector.
    fn parameter_count(&self) -> usize;

    /// Length of the residual vector, two per observation.
    fn residual_count(&self) -> usize;

    /// Columns of the left (point) block.
    fn left_count(&self) -> usize;

    /// Observations the residuals are computed against.
    fn observations(&self) -> &SceneObservations;

    /// Current scene state as a parameter vector.
    fn encode_parameters(&self) -> BundleResult<DVector<f64>>;

    /// Residuals `predicted − observed` at `parameters`.
    fn compute_residuals(&mut self, parameters: &[f64]) -> BundleResult<DVector<f64>>;

    /// Writes both Jacobian blocks at `parameters` into any storage.
    fn compute_jacobian<L, R>(
        &mut self,
        parameters: &[f64],
        left: &mut L,
        right: &mut R,
    ) -> BundleResult<()>
    where
        L: JacobianStorage,
        R: JacobianStorage;

    /// Dense left and right Jacobian blocks.
    fn compute_jacobian_dense(
        &mut self,
        parameters: &[f64],
    ) -> BundleResult<(DMatrix<f64>, DMatrix<f64>)> {
        let mut left = DMatrix::zeros(0, 0);
        let mut right = DMatrix::zeros(0, 0);
        self.compute_jacobian(parameters, &mut left, &mut right)?;
        Ok((left, right))
    }

    /// Sparse left and right Jacobian blocks.
    fn compute_jacobian_sparse(
        &mut self,
        parameters: &[f64],
    ) -> BundleResult<(SparseColMat<usize, f64>, SparseColMat<usize, f64>)> {
        let mut left = TripletAccumulator::default();
        let mut right = TripletAccumulator::default();
        self.compute_jacobian(parameters, &mut left, &mut right)?;
        Ok((left.to_sparse()?, right.to_sparse()?))
    }
}

/// Metric bundle adjustment problem.
#[derive(Debug, Clone)]
pub struct MetricBundleProblem {
    structure: SceneStructureMetric,
    observations: SceneObservations,
    residuals: MetricResidualFunction,
    jacobian: MetricSchurJacobian,
}

impl MetricBundleProblem {
    /// Validates the scene against its observations and fixes the layout.
    pub fn new(
        structure: SceneStructureMetric,
        observations: SceneObservations,
        config: &BundleConfig,
    ) -> BundleResult<Self> {
        let residuals = MetricResidualFunction::configure(&structure, &observations, config)?;
        let jacobian = MetricSchurJacobian::configure(&structure, &observations, config)?;
        info!(
            points = structure.points.len(),
            views = structure.views.len(),
            observations = observations.observation_count(),
            parameters = residuals.parameter_count(),
            rotation = ?config.rotation,
            "metric bundle problem"
        );
        Ok(Self {
            structure,
            observations,
            residuals,
            jacobian,
        })
    }

    pub fn structure(&self) -> &SceneStructureMetric {
        &self.structure
    }

    pub fn into_parts(self) -> (SceneStructureMetric, SceneObservations) {
        (self.structure, self.observations)
    }
}

impl SchurProblem for MetricBundleProblem {
    fn parameter_count(&self) -> usize {
        self.residuals.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.residuals.residual_count()
    }

    fn left_count(&self) -> usize {
        self.residuals.codec().layout().left_count()
    }

    fn observations(&self) -> &SceneObservations {
        &self.observations
    }

    fn encode_parameters(&self) -> BundleResult<DVector<f64>> {
        let mut parameters = DVector::zeros(self.parameter_count());
        self.residuals
            .codec()
            .encode(&self.structure, parameters.as_mut_slice())?;
        Ok(parameters)
    }

    fn compute_residuals(&mut self, parameters: &[f64]) -> BundleResult<DVector<f64>> {
        let mut output = DVector::zeros(self.residual_count());
        self.residuals.process(
            parameters,
            &mut self.structure,
            &self.observations,
            output.as_mut_slice(),
        )?;
        Ok(output)
    }

    fn compute_jacobian<L, R>(
        &mut self,
        parameters: &[f64],
        left: &mut L,
        right: &mut R,
    ) -> BundleResult<()>
    where
        L: JacobianStorage,
        R: JacobianStorage,
    {
        self.jacobian.process(
            parameters,
            &mut self.structure,
            &self.observations,
            left,
            right,
        )
    }
}

/// Projective bundle adjustment problem.
#[derive(Debug, Clone)]
pub struct ProjectiveBundleProblem {
    structure: SceneStructureProjective,
    observations: SceneObservations,
    residuals: ProjectiveResidualFunction,
    jacobian: ProjectiveSchurJacobian,
}

impl ProjectiveBundleProblem {
    pub fn new(
        structure: SceneStructureProjective,
        observations: SceneObservations,
        config: &BundleConfig,
    ) -> BundleResult<Self> {
        let residuals = ProjectiveResidualFunction::configure(&structure, &observations, config)?;
        let jacobian = ProjectiveSchurJacobian::configure(&structure, &observations, config)?;
        info!(
            points = structure.points.len(),
            views = structure.views.len(),
            observations = observations.observation_count(),
            parameters = residuals.parameter_count(),
            "projective bundle problem"
        );
        Ok(Self {
            structure,
            observations,
            residuals,
            jacobian,
        })
    }

    pub fn structure(&self) -> &SceneStructureProjective {
        &self.structure
    }

    pub fn into_parts(self) -> (SceneStructureProjective, SceneObservations) {
        (self.structure, self.observations)
    }
}

impl SchurProblem for ProjectiveBundleProblem {
    fn parameter_count(&self) -> usize {
        self.residuals.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.residuals.residual_count()
    }

    fn left_count(&self) -> usize {
        self.residuals.codec().layout().left_count()
    }

    fn observations(&self) -> &SceneObservations {
        &self.observations
    }

    fn encode_parameters(&self) -> BundleResult<DVector<f64>> {
        let mut parameters = DVector::zeros(self.parameter_count());
        self.residuals
            .codec()
            .encode(&self.structure, parameters.as_mut_slice())?;
        Ok(parameters)
    }

    fn compute_residuals(&mut self, parameters: &[f64]) -> BundleResult<DVector<f64>> {
        let mut output = DVector::zeros(self.residual_count());
        self.residuals.process(
            parameters,
            &mut self.structure,
            &self.observations,
            output.as_mut_slice(),
        )?;
        Ok(output)
    }

    fn compute_jacobian<L, R>(
        &mut self,
        parameters: &[f64],
        left: &mut L,
        right: &mut R,
    ) -> BundleResult<()>
    where
        L: JacobianStorage,
        R: JacobianStorage,
    {
        self.jacobian.process(
            parameters,
            &mut self.structure,
            &self.observations,
            left,
            right,
        )
    }
}
