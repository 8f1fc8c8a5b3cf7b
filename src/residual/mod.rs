//! Reprojection residuals: `predicted − observed`, two rows per observation.
//!
//! Rows are ordered per view in index order. Within a view the general
//! observations come first, followed by the rigid-body observations, each in
//! list order. The Schur Jacobians write their rows in the same order.

use crate::error::{BundleError, BundleResult};
use crate::scene::SceneObservations;

pub mod metric;
pub mod projective;

pub use metric::MetricResidualFunction;
pub use projective::ProjectiveResidualFunction;

/// First residual row of every view, plus the total row count as the last entry.
pub(crate) fn view_row_starts(observations: &SceneObservations) -> Vec<usize> {
    let mut starts = Vec::with_capacity(observations.views.len() + 1);
    let mut row = 0;
    for (view, general) in observations.views.iter().enumerate() {
        starts.push(row);
        row += 2 * general.len();
        if let Some(rigid) = observations.views_rigid.get(view) {
            row += 2 * rigid.len();
        }
    }
    starts.push(row);
    starts
}

/// Fails unless the scene and observations passed to a `process` call still
/// have the view count and per-view observation counts fixed at configuration.
pub(crate) fn check_configured(
    row_starts: &[usize],
    total_views: usize,
    observations: &SceneObservations,
) -> BundleResult<()> {
    let configured_views = row_starts.len().saturating_sub(1);
    if total_views != configured_views {
        return Err(BundleError::Structure(format!(
            "scene has {total_views} views but was configured with {configured_views}"
        )));
    }
    if view_row_starts(observations) != row_starts {
        return Err(BundleError::InvalidInput(
            "observations differ from the ones used at configuration".to_string(),
        ));
    }
    Ok(())
}

/// Splits `output` into one mutable slice per view according to `starts`.
pub(crate) fn split_rows<'a>(mut output: &'a mut [f64], starts: &[usize]) -> Vec<&'a mut [f64]> {
    let mut chunks = Vec::with_capacity(starts.len().saturating_sub(1));
    for window in starts.windows(2) {
        let (head, tail) = std::mem::take(&mut output).split_at_mut(window[1] - window[0]);
        chunks.push(head);
        output = tail;
    }
    chunks
}
