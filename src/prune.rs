//! Removal of outliers and weakly constrained elements from a metric scene.
//!
//! Observation pruning can leave points with too few views and views with too
//! few points, so a typical clean-up is
//!
//! ```text
//! prune_observations_by_error_rank(0.95)
//! prune_points(2)
//! prune_views(10)
//! prune_unused_cameras()
//! ```
//!
//! Only the general observation stream is ranked or tested for depth. Every
//! operation keeps `ScenePoint::views` and the observation indices consistent.

use crate::camera::CameraModel;
use crate::error::{BundleError, BundleResult};
use crate::scene::{SceneObservations, SceneStructureMetric};
use nalgebra::Vector3;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use tracing::{debug, info};

/// Prunes a metric scene and its observations in place.
pub struct PruneStructureFromSceneMetric<'a> {
    structure: &'a mut SceneStructureMetric,
    observations: &'a mut SceneObservations,
}

/// Point index and its Euclidean coordinates, stored in the neighbor tree.
struct IndexedPoint(usize, Vector3<f64>);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

struct ObservationError {
    view: usize,
    index_in_view: usize,
    error: f64,
}

impl<'a> PruneStructureFromSceneMetric<'a> {
    pub fn new(
        structure: &'a mut SceneStructureMetric,
        observations: &'a mut SceneObservations,
    ) -> Self {
        Self {
            structure,
            observations,
        }
    }

    /// Keeps the `inlier_fraction` of observations with the lowest reprojection
    /// error and removes the rest. Returns the number removed.
    pub fn prune_observations_by_error_rank(
        &mut self,
        inlier_fraction: f64,
    ) -> BundleResult<usize> {
        if !inlier_fraction.is_finite() {
            return Err(BundleError::InvalidInput(format!(
                "inlier fraction must be finite, got {inlier_fraction}"
            )));
        }
        let world_to_view = self.structure.world_to_views()?;

        let mut errors = Vec::with_capacity(self.observations.observation_count_general());
        for (view, observations) in self.observations.views.iter().enumerate() {
            let camera = &self.structure.cameras[self.structure.views[view].camera].model;
            for (index_in_view, observation) in observations.iter().enumerate() {
                let point = &self.structure.points[observation.index].coordinate;
                let predicted = camera.project(&world_to_view[view].act_homogeneous(point));
                errors.push(ObservationError {
                    view,
                    index_in_view,
                    error: (predicted - observation.pixel).norm_squared(),
                });
            }
        }

        errors.sort_by(|a, b| a.error.total_cmp(&b.error));
        let keep = ((errors.len() as f64) * inlier_fraction.clamp(0.0, 1.0)) as usize;
        let mut marked = vec![Vec::new(); self.observations.views.len()];
        for e in &errors[keep..] {
            marked[e.view].push(e.index_in_view);
        }
        let removed = self.remove_marked(marked);
        info!(removed, kept = keep, "pruned observations by error rank");
        Ok(removed)
    }

    /// Removes observations of points that lie on or behind the image plane of
    /// the observing view. Returns the number removed.
    pub fn prune_observations_behind_camera(&mut self) -> BundleResult<usize> {
        let world_to_view = self.structure.world_to_views()?;

        let mut marked = vec![Vec::new(); self.observations.views.len()];
        for (view, observations) in self.observations.views.iter().enumerate() {
            for (index_in_view, observation) in observations.iter().enumerate() {
                let point = &self.structure.points[observation.index].coordinate;
                let camera_point = world_to_view[view].act_homogeneous(point);
                // homogeneous depth carries the sign of w
                let depth = if point.w < 0.0 {
                    -camera_point.z
                } else {
                    camera_point.z
                };
                if depth <= 0.0 {
                    marked[view].push(index_in_view);
                }
            }
        }
        let removed = self.remove_marked(marked);
        info!(removed, "pruned observations behind camera");
        Ok(removed)
    }

    /// Removes points seen by fewer than `min_views` views, together with
    /// their observations. Returns the number of points removed.
    pub fn prune_points(&mut self, min_views: usize) -> usize {
        let pruned: Vec<usize> = self
            .structure
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.views.len() < min_views)
            .map(|(i, _)| i)
            .collect();
        self.remove_points(&pruned);
        info!(removed = pruned.len(), min_views, "pruned weakly observed points");
        pruned.len()
    }

    /// Removes points with fewer than `neighbors` other points within
    /// `distance`, together with their observations. Returns the number removed.
    ///
    /// Distances are Euclidean, so points at infinity never have neighbors.
    pub fn prune_points_by_neighbors(&mut self, neighbors: usize, distance: f64) -> usize {
        let cloud: Vec<Vector3<f64>> =
            self.structure.points.iter().map(|p| p.euclidean()).collect();
        let tree = RTree::bulk_load(
            cloud
                .iter()
                .enumerate()
                .filter(|(_, p)| p.iter().all(|v| v.is_finite()))
                .map(|(i, p)| IndexedPoint(i, *p))
                .collect(),
        );
        let limit = distance * distance;

        let pruned: Vec<usize> = cloud
            .iter()
            .enumerate()
            .filter(|(i, p)| {
                if !p.iter().all(|v| v.is_finite()) {
                    return neighbors > 0;
                }
                let close = tree
                    .locate_within_distance([p.x, p.y, p.z], limit)
                    .filter(|q| q.0 != *i)
                    .take(neighbors)
                    .count();
                close < neighbors
            })
            .map(|(i, _)| i)
            .collect();
        self.remove_points(&pruned);
        info!(removed = pruned.len(), neighbors, distance, "pruned isolated points");
        pruned.len()
    }

    /// Removes views with `count` or fewer observations. Views that are the
    /// parent of a kept view are kept as well. Returns the number removed.
    pub fn prune_views(&mut self, count: usize) -> usize {
        let total = self.structure.views.len();
        let mut keep = vec![false; total];
        for view in (0..total).rev() {
            if self.observations.views[view].len() > count {
                keep[view] = true;
            }
            if keep[view] {
                if let Some(parent) = self.structure.views[view].parent {
                    keep[parent] = true;
                }
            }
        }

        let mut old_to_new = vec![None; total];
        let mut next = 0;
        for (view, kept) in keep.iter().enumerate() {
            if *kept {
                old_to_new[view] = Some(next);
                next += 1;
            }
        }

        for point in &mut self.structure.points {
            point.views = point
                .views
                .iter()
                .filter_map(|&v| old_to_new.get(v).copied().flatten())
                .collect();
        }

        let mut index = 0;
        self.structure.views.retain(|_| {
            index += 1;
            keep[index - 1]
        });
        for view in &mut self.structure.views {
            // kept views only have kept parents
            view.parent = view.parent.and_then(|p| old_to_new[p]);
        }

        index = 0;
        self.observations.views.retain(|_| {
            index += 1;
            keep[index - 1]
        });
        if self.observations.has_rigid() {
            index = 0;
            self.observations.views_rigid.retain(|_| {
                index += 1;
                keep[index - 1]
            });
        }

        let removed = total - next;
        info!(removed, remaining = next, "pruned views");
        removed
    }

    /// Removes cameras no view references and renumbers the rest. Returns the
    /// number removed.
    pub fn prune_unused_cameras(&mut self) -> usize {
        let mut used = vec![false; self.structure.cameras.len()];
        for view in &self.structure.views {
            used[view.camera] = true;
        }

        let mut old_to_new = vec![0; used.len()];
        let mut next = 0;
        for (camera, is_used) in used.iter().enumerate() {
            if *is_used {
                old_to_new[camera] = next;
                next += 1;
            }
        }

        let mut index = 0;
        self.structure.cameras.retain(|_| {
            index += 1;
            used[index - 1]
        });
        for view in &mut self.structure.views {
            view.camera = old_to_new[view.camera];
        }

        let removed = used.len() - next;
        debug!(removed, "pruned unused cameras");
        removed
    }

    /// Removes the marked general observations (per view, any order) and
    /// disconnects points that are no longer observed by that view.
    fn remove_marked(&mut self, mut marked: Vec<Vec<usize>>) -> usize {
        let mut removed = 0;
        for (view, indices) in marked.iter_mut().enumerate() {
            indices.sort_unstable();
            let observations = &mut self.observations.views[view];
            for &i in indices.iter().rev() {
                let observation = observations.remove(i);
                if observations.position_of(observation.index).is_none() {
                    self.structure.points[observation.index].remove_view(view);
                }
                removed += 1;
            }
        }
        removed
    }

    /// Removes points (sorted ascending), their observations, and renumbers
    /// the remaining observation indices.
    fn remove_points(&mut self, sorted: &[usize]) {
        if sorted.is_empty() {
            return;
        }
        let old_to_new = self.structure.remove_points(sorted);
        for observations in &mut self.observations.views {
            observations.retain(|o| old_to_new[o.index].is_some());
            for observation in observations.iter_mut() {
                if let Some(new) = old_to_new[observation.index] {
                    observation.index = new;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::geometry::Se3;

    /// Two root views along the x axis observing a row of points at z = 5.
    fn scene(total_points: usize) -> (SceneStructureMetric, SceneObservations) {
        let camera = PinholeCamera::new(500.0, 500.0, 320.0, 240.0);
        let mut structure = SceneStructureMetric::new(false);
        structure.initialize(2, 2, total_points, 0);
        structure.set_camera(0, true, camera.clone());
        structure.set_camera(1, true, camera.clone());
        structure.set_view_motion(0, 0, true, Se3::identity());
        structure.set_view_motion(
            1,
            0,
            true,
            Se3::new(nalgebra::Matrix3::identity(), nalgebra::Vector3::new(-1.0, 0.0, 0.0)),
        );

        let mut observations = SceneObservations::new(2, false);
        let world_to_view = structure.world_to_views().unwrap();
        for i in 0..total_points {
            structure.set_point(i, i as f64 * 0.1, 0.0, 5.0);
            for view in 0..2 {
                let p = structure.points[i].coordinate;
                let pixel = camera.project(&world_to_view[view].act_homogeneous(&p));
                observations.view_mut(view).add(i, pixel.x, pixel.y);
                structure.connect_point_to_view(i, view);
            }
        }
        (structure, observations)
    }

    #[test]
    fn test_error_rank_removes_worst() {
        let (mut structure, mut observations) = scene(5);
        // corrupt two observations
        observations.view_mut(0).set_pixel(2, 0.0, 0.0);
        observations.view_mut(1).set_pixel(4, 1000.0, 0.0);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        let removed = prune.prune_observations_by_error_rank(0.8).unwrap();
        assert_eq!(removed, 2);

        assert_eq!(observations.view(0).position_of(2), None);
        assert_eq!(observations.view(1).position_of(4), None);
        assert_eq!(structure.points[2].views, vec![1]);
        assert_eq!(structure.points[4].views, vec![0]);
    }

    #[test]
    fn test_behind_camera() {
        let (mut structure, mut observations) = scene(3);
        structure.set_point(1, 0.0, 0.0, -2.0);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_observations_behind_camera().unwrap(), 2);
        assert!(structure.points[1].views.is_empty());
        assert_eq!(observations.observation_count(), 4);
    }

    #[test]
    fn test_prune_points_renumbers_observations() {
        let (mut structure, mut observations) = scene(4);
        observations.view_mut(1).remove(1);
        structure.points[1].remove_view(1);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_points(2), 1);

        assert_eq!(structure.points.len(), 3);
        let indices: Vec<usize> = observations.view(0).iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(observations.observation_count(), 6);
    }

    #[test]
    fn test_prune_isolated_points() {
        let (mut structure, mut observations) = scene(4);
        structure.set_point(3, 50.0, 0.0, 5.0);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_points_by_neighbors(1, 0.5), 1);
        assert_eq!(structure.points.len(), 3);
        assert!(observations.views.iter().all(|v| v.iter().all(|o| o.index < 3)));
    }

    #[test]
    fn test_neighbor_count_excludes_self() {
        // points at x = 0.0, 0.1, 0.2, 0.3, 0.4; the two ends have one neighbor
        let (mut structure, mut observations) = scene(5);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_points_by_neighbors(2, 0.15), 2);
        assert_eq!(structure.points.len(), 3);
        assert!((structure.points[0].coordinate.x - 0.1).abs() < 1e-12);
        assert_eq!(observations.observation_count(), 6);
    }

    #[test]
    fn test_points_at_infinity_have_no_neighbors() {
        let (mut structure, mut observations) = scene(4);
        structure.points[1].coordinate = nalgebra::Vector4::new(0.1, 0.0, 5.0, 0.0);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_points_by_neighbors(0, 0.5), 0);
        assert_eq!(prune.prune_points_by_neighbors(1, 0.5), 1);
        assert_eq!(structure.points.len(), 3);
        assert!(structure.points.iter().all(|p| p.coordinate.w == 1.0));
    }

    #[test]
    fn test_error_rank_rejects_nan_fraction() {
        let (mut structure, mut observations) = scene(3);

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert!(matches!(
            prune.prune_observations_by_error_rank(f64::NAN),
            Err(BundleError::InvalidInput(_))
        ));
        assert_eq!(observations.observation_count(), 6);
    }

    #[test]
    fn test_prune_views_keeps_parents() {
        let (mut structure, mut observations) = scene(3);
        // view 1 becomes relative to view 0, and view 0 loses its observations
        structure.views[1].parent = Some(0);
        for _ in 0..3 {
            observations.view_mut(0).remove(0);
        }

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_views(0), 0);
        assert_eq!(structure.views.len(), 2);

        // detach and prune again
        structure.views[1].parent = None;
        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_views(0), 1);
        assert_eq!(structure.views.len(), 1);
        assert_eq!(observations.views.len(), 1);
        assert!(structure.points.iter().all(|p| p.views == vec![0]));
    }

    #[test]
    fn test_prune_unused_cameras() {
        let (mut structure, mut observations) = scene(1);
        structure.views[1].camera = 1;
        structure.views[0].camera = 1;

        let mut prune = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        assert_eq!(prune.prune_unused_cameras(), 1);
        assert_eq!(structure.cameras.len(), 1);
        assert!(structure.views.iter().all(|v| v.camera == 0));
    }
}
