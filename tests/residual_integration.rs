//! Integration tests for residual evaluation, diagnostics and pruning through
//! the public problem API.

use scene_test_utils::*;

use bundle_schur::{
    BundleConfig, BundleError, CameraModel, MetricBundleProblem, PinholeCamera,
    PruneStructureFromSceneMetric, RotationParameterization, SceneObservations,
    SceneStructureMetric, SchurProblem, Se3, evaluate,
};
use nalgebra::Vector3;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn assert_approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() < eps,
        "Values {} and {} differ by more than {}",
        a,
        b,
        eps
    );
}

fn single_point_scene(x: f64) -> (SceneStructureMetric, SceneObservations) {
    let mut structure = SceneStructureMetric::new(false);
    structure.initialize(1, 1, 1, 0);
    structure.set_camera(0, true, PinholeCamera::new(500.0, 500.0, 320.0, 240.0));
    structure.set_view_motion(0, 0, true, Se3::identity());
    structure.set_point(0, x, 0.0, 5.0);
    structure.connect_point_to_view(0, 0);
    let mut observations = SceneObservations::new(1, false);
    observations.view_mut(0).add(0, 320.0, 240.0);
    (structure, observations)
}

// ============================================================================
// Residual values
// ============================================================================

#[test]
fn test_point_on_axis_has_zero_residual() -> TestResult {
    let (structure, observations) = single_point_scene(0.0);
    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let x = problem.encode_parameters()?;
    let residuals = problem.compute_residuals(x.as_slice())?;
    assert_eq!(residuals.len(), 2);
    assert_approx_eq(residuals[0], 0.0, 1e-12);
    assert_approx_eq(residuals[1], 0.0, 1e-12);
    Ok(())
}

#[test]
fn test_shifted_point_residual() -> TestResult {
    let (structure, observations) = single_point_scene(0.0);
    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let residuals = problem.compute_residuals(&[1.0, 0.0, 5.0])?;
    assert_approx_eq(residuals[0], 100.0, 1e-9);
    assert_approx_eq(residuals[1], 0.0, 1e-9);
    Ok(())
}

#[test]
fn test_ground_truth_scene_has_zero_residuals() -> TestResult {
    for rotation in [
        RotationParameterization::Rodrigues,
        RotationParameterization::Quaternion,
    ] {
        let options = SceneOptions {
            pixel_noise: 0.0,
            cameras_known: false,
            ..Default::default()
        };
        let (structure, observations) = build_scene(options);
        let config = BundleConfig::default().with_rotation(rotation);
        let mut problem = MetricBundleProblem::new(structure, observations, &config)?;

        let x = problem.encode_parameters()?;
        let residuals = problem.compute_residuals(x.as_slice())?;
        assert_eq!(residuals.len(), 3 * (5 + 2) * 2);
        assert!(residuals.amax() < 1e-8, "max residual {}", residuals.amax());
    }
    Ok(())
}

#[test]
fn test_noise_appears_in_row_order() -> TestResult {
    let (structure, observations) = build_scene(SceneOptions::default());
    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let x = problem.encode_parameters()?;
    let residuals = problem.compute_residuals(x.as_slice())?;

    // per view: 5 general observations offset by (+0.5, -0.5), then 2 rigid by (-0.5, 0)
    let per_view = (5 + 2) * 2;
    for view in 0..3 {
        let block = &residuals.as_slice()[view * per_view..(view + 1) * per_view];
        for pair in block[..10].chunks_exact(2) {
            assert_approx_eq(pair[0], -0.5, 1e-8);
            assert_approx_eq(pair[1], 0.5, 1e-8);
        }
        for pair in block[10..].chunks_exact(2) {
            assert_approx_eq(pair[0], 0.5, 1e-8);
            assert_approx_eq(pair[1], 0.0, 1e-8);
        }
    }
    Ok(())
}

#[test]
fn test_homogeneous_matches_euclidean() -> TestResult {
    let (euclidean, observations) = build_scene(SceneOptions::default());
    let (homogeneous, _) = build_scene(SceneOptions {
        homogeneous: true,
        ..Default::default()
    });

    let mut problem_e =
        MetricBundleProblem::new(euclidean, observations.clone(), &BundleConfig::default())?;
    let mut problem_h =
        MetricBundleProblem::new(homogeneous, observations, &BundleConfig::default())?;

    let r_e = problem_e.compute_residuals(problem_e.encode_parameters()?.as_slice())?;
    let r_h = problem_h.compute_residuals(problem_h.encode_parameters()?.as_slice())?;
    assert_eq!(r_e.len(), r_h.len());
    for (a, b) in r_e.iter().zip(r_h.iter()) {
        assert_approx_eq(*a, *b, 1e-9);
    }
    Ok(())
}

#[test]
fn test_parallel_matches_sequential() -> TestResult {
    let (structure, observations) = build_scene(SceneOptions::default());
    let mut sequential = MetricBundleProblem::new(
        structure.clone(),
        observations.clone(),
        &BundleConfig::default(),
    )?;
    let mut parallel = MetricBundleProblem::new(
        structure,
        observations,
        &BundleConfig::default().with_parallel(true),
    )?;

    let x = perturbed_parameters(&sequential, 1e-2, 21);
    assert_eq!(
        sequential.compute_residuals(&x)?,
        parallel.compute_residuals(&x)?
    );
    Ok(())
}

#[test]
fn test_chained_view_sees_composed_pose() -> TestResult {
    let parent = Se3::from_axis_angle(Vector3::new(0.0, 0.1, 0.0), Vector3::new(0.5, 0.0, 0.0));
    let child = Se3::from_axis_angle(Vector3::new(0.05, 0.0, 0.0), Vector3::new(0.0, 0.2, 0.0));

    let mut structure = SceneStructureMetric::new(false);
    structure.initialize(1, 2, 1, 0);
    structure.set_camera(0, true, pinhole());
    let m0 = structure.add_motion(true, parent);
    let m1 = structure.add_motion(false, child);
    structure.set_view(0, 0, m0, None);
    structure.set_view(1, 0, m1, Some(0));
    structure.set_point(0, 0.2, -0.1, 4.0);

    // observation computed from the explicitly composed pose
    let composed = parent.then(&child);
    let pixel = pinhole().project(&composed.act(&Vector3::new(0.2, -0.1, 4.0)));
    let mut observations = SceneObservations::new(2, false);
    observations.view_mut(1).add(0, pixel.x, pixel.y);

    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let residuals = problem.compute_residuals(problem.encode_parameters()?.as_slice())?;
    assert_approx_eq(residuals[0], 0.0, 1e-9);
    assert_approx_eq(residuals[1], 0.0, 1e-9);
    Ok(())
}

// ============================================================================
// Error paths
// ============================================================================

#[test]
fn test_observation_index_out_of_range() {
    let (structure, mut observations) = single_point_scene(0.0);
    observations.view_mut(0).add(3, 10.0, 10.0);
    let err = MetricBundleProblem::new(structure, observations, &BundleConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        BundleError::ObservationIndex {
            view: 0,
            index: 3,
            ..
        }
    ));
}

#[test]
fn test_parent_after_child_is_rejected() {
    let mut structure = SceneStructureMetric::new(false);
    structure.initialize(1, 2, 0, 0);
    structure.set_camera(0, true, pinhole());
    let m0 = structure.add_motion(false, Se3::identity());
    let m1 = structure.add_motion(false, Se3::identity());
    structure.set_view(0, 0, m0, Some(1));
    structure.set_view(1, 0, m1, None);

    let observations = SceneObservations::new(2, false);
    let err = MetricBundleProblem::new(structure, observations, &BundleConfig::default())
        .unwrap_err();
    assert!(matches!(err, BundleError::Structure(_)));
}

#[test]
fn test_wrong_parameter_length() -> TestResult {
    let (structure, observations) = build_scene(SceneOptions::default());
    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let too_short = vec![0.0; problem.parameter_count() - 1];
    assert!(matches!(
        problem.compute_residuals(&too_short),
        Err(BundleError::ParameterLength { .. })
    ));
    assert!(problem.compute_jacobian_sparse(&too_short).is_err());
    Ok(())
}

#[test]
fn test_point_on_camera_plane_propagates_non_finite() -> TestResult {
    let (structure, observations) = single_point_scene(0.0);
    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    let residuals = problem.compute_residuals(&[1.0, 0.0, 0.0])?;
    assert!(!residuals[0].is_finite());
    Ok(())
}

// ============================================================================
// Diagnostics and pruning
// ============================================================================

#[test]
fn test_evaluate_reports_noise() -> TestResult {
    let (structure, observations) = build_scene(SceneOptions::default());
    let config = BundleConfig::default().with_inlier_thresholds(vec![0.6, 0.1]);
    let mut problem = MetricBundleProblem::new(structure, observations, &config)?;
    let report = evaluate(&mut problem, &config)?;

    assert_eq!(report.observations, 3 * 7);
    assert_eq!(report.views.len(), 3);
    assert_approx_eq(report.max_error, 0.5_f64.hypot(0.5), 1e-8);
    assert_eq!(report.buckets.len(), 2);
    assert_approx_eq(report.buckets[0].threshold, 0.1, 1e-12);
    assert_approx_eq(report.buckets[0].fraction, 0.0, 1e-12);
    assert_approx_eq(report.buckets[1].fraction, 6.0 / 21.0, 1e-12);
    Ok(())
}

#[test]
fn test_evaluate_uses_default_thresholds() -> TestResult {
    let (structure, observations) = build_scene(SceneOptions {
        pixel_noise: 0.0,
        ..Default::default()
    });
    let config = BundleConfig::default();
    let mut problem = MetricBundleProblem::new(structure, observations, &config)?;
    let report = evaluate(&mut problem, &config)?;

    let thresholds: Vec<f64> = report.buckets.iter().map(|b| b.threshold).collect();
    assert_eq!(thresholds, config.inlier_thresholds);
    assert!(report.buckets.iter().all(|b| b.fraction == 1.0));
    Ok(())
}

#[test]
fn test_prune_outlier_then_optimize_layout() -> TestResult {
    let (mut structure, mut observations) = build_scene(SceneOptions {
        pixel_noise: 0.0,
        ..Default::default()
    });
    observations.view_mut(2).set_pixel(4, 900.0, -50.0);

    let removed = {
        let mut pruner = PruneStructureFromSceneMetric::new(&mut structure, &mut observations);
        pruner.prune_observations_by_error_rank(0.95)?
    };
    assert_eq!(removed, 1);
    assert_eq!(observations.view(2).len(), 4);
    assert_eq!(observations.view(2).position_of(4), None);

    let mut problem = MetricBundleProblem::new(structure, observations, &BundleConfig::default())?;
    assert_eq!(problem.residual_count(), (3 * 7 - 1) * 2);
    let residuals = problem.compute_residuals(problem.encode_parameters()?.as_slice())?;
    assert!(residuals.amax() < 1e-8);
    Ok(())
}
