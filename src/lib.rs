//! # Bundle Schur
//!
//! Residual and Jacobian engine for bundle adjustment. Given a reconstructed
//! scene (points, cameras, poses, relative view chains, rigid bodies) and the
//! pixel observations of its points, it computes
//!
//! - the reprojection residuals `predicted − observed`, and
//! - the Jacobian split into a **left** block (points and rigid bodies) and a
//!   **right** block (view poses and camera intrinsics),
//!
//! so that an external nonlinear least-squares solver can eliminate the point
//! block with the Schur complement.
//!
//! ## Features
//!
//! - **Metric and projective scenes**: SE(3) poses with parent chaining, or raw 3×4 camera matrices
//! - **Euclidean and homogeneous points**: points at infinity are supported in both scene types
//! - **Camera models**: pinhole with optional skew, Brown radial/tangential, simplified BAL pinhole
//! - **Rotation parameterizations**: Rodrigues vector or quaternion
//! - **Dense or sparse output**: `nalgebra` matrices or `faer` compressed sparse column matrices
//! - **Diagnostics and pruning**: per-view reprojection statistics and outlier removal
//!
//! The nonlinear solver itself is not part of this crate.

pub mod camera;
pub mod codec;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod geometry;
pub mod jacobian;
pub mod logger;
pub mod problem;
pub mod prune;
pub mod residual;
pub mod rotation;
pub mod scene;

pub use camera::{
    BundleCamera, CameraModel, PinholeBrownCamera, PinholeCamera, PinholeSimplifiedCamera,
};
pub use codec::{CodecSceneStructureMetric, CodecSceneStructureProjective, ParameterLayout};
pub use config::BundleConfig;
pub use error::{BundleError, BundleResult};
pub use evaluation::{ReprojectionReport, ViewErrorStatistics, evaluate};
pub use geometry::Se3;
pub use jacobian::{
    JacobianStorage, JacobianWorkspace, MetricSchurJacobian, ProjectiveSchurJacobian,
    TripletAccumulator,
};
pub use logger::{init_logger, init_logger_with_level};
pub use problem::{MetricBundleProblem, ProjectiveBundleProblem, SchurProblem};
pub use prune::PruneStructureFromSceneMetric;
pub use residual::{MetricResidualFunction, ProjectiveResidualFunction};
pub use rotation::RotationParameterization;
pub use scene::{
    SceneCamera, SceneObservations, ScenePoint, SceneStructureMetric, SceneStructureProjective,
};
