//! Reprojection diagnostics.
//!
//! Summarizes a residual vector per view (mean/max pixel error and the mean
//! signed offset, i.e. bias) and as inlier fractions for a set of pixel
//! thresholds. The report is for inspection only and never feeds back into the
//! optimization.

use crate::config::BundleConfig;
use crate::error::{BundleError, BundleResult};
use crate::problem::SchurProblem;
use crate::residual::view_row_starts;
use crate::scene::SceneObservations;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reprojection error statistics of one view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewErrorStatistics {
    pub observations: usize,
    pub mean_error: f64,
    pub max_error: f64,
    pub bias_x: f64,
    pub bias_y: f64,
}

/// Fraction of observations whose pixel error is at most `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InlierBucket {
    pub threshold: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionReport {
    pub views: Vec<ViewErrorStatistics>,
    pub buckets: Vec<InlierBucket>,
    pub observations: usize,
    pub mean_error: f64,
    pub max_error: f64,
}

impl ReprojectionReport {
    /// Builds the report from residuals laid out in observation order.
    pub fn from_residuals(
        residuals: &[f64],
        observations: &SceneObservations,
        thresholds: &[f64],
    ) -> BundleResult<Self> {
        let starts = view_row_starts(observations);
        let expected = starts.last().copied().unwrap_or(0);
        BundleError::check_length(expected, residuals.len())?;

        let mut report = ReprojectionReport {
            observations: residuals.len() / 2,
            ..Default::default()
        };
        let mut within = vec![0usize; thresholds.len()];
        let mut total_error = 0.0;

        for window in starts.windows(2) {
            let block = &residuals[window[0]..window[1]];
            let mut stats = ViewErrorStatistics {
                observations: block.len() / 2,
                ..Default::default()
            };
            for pair in block.chunks_exact(2) {
                let error = pair[0].hypot(pair[1]);
                stats.mean_error += error;
                stats.max_error = stats.max_error.max(error);
                stats.bias_x += pair[0];
                stats.bias_y += pair[1];
                for (count, threshold) in within.iter_mut().zip(thresholds) {
                    if error <= *threshold {
                        *count += 1;
                    }
                }
            }
            total_error += stats.mean_error;
            report.max_error = report.max_error.max(stats.max_error);
            if stats.observations > 0 {
                let n = stats.observations as f64;
                stats.mean_error /= n;
                stats.bias_x /= n;
                stats.bias_y /= n;
            }
            report.views.push(stats);
        }

        if report.observations > 0 {
            report.mean_error = total_error / report.observations as f64;
        }
        report.buckets = thresholds
            .iter()
            .zip(within)
            .map(|(&threshold, count)| InlierBucket {
                threshold,
                fraction: if report.observations > 0 {
                    count as f64 / report.observations as f64
                } else {
                    0.0
                },
            })
            .collect();
        Ok(report)
    }

    /// Logs the overall numbers and the inlier buckets.
    pub fn log_summary(&self) {
        debug!(
            observations = self.observations,
            mean_error = self.mean_error,
            max_error = self.max_error,
            "reprojection error"
        );
        for bucket in &self.buckets {
            debug!(
                threshold = bucket.threshold,
                percent = 100.0 * bucket.fraction,
                "inlier fraction"
            );
        }
    }
}

/// Evaluates the residuals at the problem's current state, bucketed by
/// [`BundleConfig::inlier_thresholds`].
pub fn evaluate<P: SchurProblem>(
    problem: &mut P,
    config: &BundleConfig,
) -> BundleResult<ReprojectionReport> {
    let parameters = problem.encode_parameters()?;
    let residuals = problem.compute_residuals(parameters.as_slice())?;
    let report = ReprojectionReport::from_residuals(
        residuals.as_slice(),
        problem.observations(),
        &config.inlier_thresholds,
    )?;
    report.log_summary();
    Ok(report)
}
