//! Pixel observations grouped per view.
//!
//! Each view owns two streams: `views[v]` references scene points and
//! `views_rigid[v]` references rigid-body points through the global
//! rigid-point index. Residual rows follow the iteration order of these lists,
//! so the order observations are added in is the order they appear in the
//! residual vector.

use crate::error::{BundleError, BundleResult};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// One pixel measurement of a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Point index (general stream) or global rigid-point index (rigid stream)
    pub index: usize,
    pub pixel: Vector2<f64>,
}

/// Observations made by a single view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationView {
    observations: Vec<Observation>,
}

impl ObservationView {
    pub fn add(&mut self, index: usize, x: f64, y: f64) {
        self.observations.push(Observation {
            index,
            pixel: Vector2::new(x, y),
        });
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, i: usize) -> &Observation {
        &self.observations[i]
    }

    pub fn set_pixel(&mut self, i: usize, x: f64, y: f64) {
        self.observations[i].pixel = Vector2::new(x, y);
    }

    /// Position of the first observation of `index` in this view.
    pub fn position_of(&self, index: usize) -> Option<usize> {
        self.observations.iter().position(|o| o.index == index)
    }

    /// Removes the `i`-th observation, preserving the order of the rest.
    pub fn remove(&mut self, i: usize) -> Observation {
        self.observations.remove(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&Observation) -> bool) {
        self.observations.retain(f);
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Observation> {
        self.observations.iter_mut()
    }
}

/// All observations of a scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneObservations {
    pub views: Vec<ObservationView>,
    /// Rigid-body stream. Empty when the scene has no rigid bodies.
    pub views_rigid: Vec<ObservationView>,
}

impl SceneObservations {
    /// Empty observations for `total_views` views. The rigid stream is only
    /// allocated when `with_rigid` is set.
    pub fn new(total_views: usize, with_rigid: bool) -> Self {
        Self {
            views: vec![ObservationView::default(); total_views],
            views_rigid: if with_rigid {
                vec![ObservationView::default(); total_views]
            } else {
                Vec::new()
            },
        }
    }

    pub fn has_rigid(&self) -> bool {
        !self.views_rigid.is_empty()
    }

    pub fn view(&self, view: usize) -> &ObservationView {
        &self.views[view]
    }

    pub fn view_mut(&mut self, view: usize) -> &mut ObservationView {
        &mut self.views[view]
    }

    pub fn view_rigid_mut(&mut self, view: usize) -> &mut ObservationView {
        &mut self.views_rigid[view]
    }

    pub fn observation_count_general(&self) -> usize {
        self.views.iter().map(ObservationView::len).sum()
    }

    pub fn observation_count_rigid(&self) -> usize {
        self.views_rigid.iter().map(ObservationView::len).sum()
    }

    /// Total observations over both streams.
    pub fn observation_count(&self) -> usize {
        self.observation_count_general() + self.observation_count_rigid()
    }

    /// Checks the view count and that every index resolves.
    ///
    /// `total_points` bounds the general stream and `total_rigid_points` the
    /// rigid stream.
    pub fn check_indices(
        &self,
        total_views: usize,
        total_points: usize,
        total_rigid_points: usize,
    ) -> BundleResult<()> {
        if self.views.len() != total_views {
            return Err(BundleError::InvalidInput(format!(
                "observations cover {} views but the structure has {total_views}",
                self.views.len()
            )));
        }
        if self.has_rigid() && self.views_rigid.len() != total_views {
            return Err(BundleError::InvalidInput(format!(
                "rigid observations cover {} views but the structure has {total_views}",
                self.views_rigid.len()
            )));
        }

        let streams = [
            ("general", &self.views, total_points),
            ("rigid", &self.views_rigid, total_rigid_points),
        ];
        for (stream, views, available) in streams {
            for (view, observations) in views.iter().enumerate() {
                if let Some(bad) = observations.iter().find(|o| o.index >= available) {
                    return Err(BundleError::ObservationIndex {
                        view,
                        stream,
                        index: bad.index,
                        available,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut obs = SceneObservations::new(2, true);
        obs.view_mut(0).add(0, 1.0, 2.0);
        obs.view_mut(1).add(1, 3.0, 4.0);
        obs.view_mut(1).add(0, 5.0, 6.0);
        obs.view_rigid_mut(1).add(0, 7.0, 8.0);

        assert_eq!(obs.observation_count_general(), 3);
        assert_eq!(obs.observation_count_rigid(), 1);
        assert_eq!(obs.observation_count(), 4);
        assert_eq!(obs.view(1).position_of(0), Some(1));
    }

    #[test]
    fn test_bad_index_is_reported() {
        let mut obs = SceneObservations::new(2, false);
        obs.view_mut(1).add(7, 0.0, 0.0);

        let err = obs.check_indices(2, 5, 0).unwrap_err();
        assert_eq!(
            err,
            BundleError::ObservationIndex {
                view: 1,
                stream: "general",
                index: 7,
                available: 5
            }
        );
    }

    #[test]
    fn test_rigid_index_bounded_by_rigid_points() {
        let mut obs = SceneObservations::new(1, true);
        obs.view_rigid_mut(0).add(2, 0.0, 0.0);
        assert!(obs.check_indices(1, 10, 2).is_err());
        assert!(obs.check_indices(1, 10, 3).is_ok());
    }

    #[test]
    fn test_view_count_mismatch() {
        let obs = SceneObservations::new(3, false);
        assert!(matches!(
            obs.check_indices(2, 0, 0),
            Err(BundleError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut view = ObservationView::default();
        for i in 0..4 {
            view.add(i, i as f64, 0.0);
        }
        view.remove(1);
        let order: Vec<usize> = view.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }
}
