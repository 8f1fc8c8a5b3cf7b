//! Mapping between the flat optimization vector and a scene's unknown fields.
//!
//! # Parameter order
//!
//! Metric scenes:
//!
//! ```text
//! points                    N × (3 | 4)
//! unknown rigid transforms  (rotation params, tx, ty, tz) each
//! unknown motions           (rotation params, tx, ty, tz) each, only if referenced by a view
//! unknown cameras           intrinsic_count() each
//! ```
//!
//! Projective scenes replace rigid transforms and motions with the 12 entries
//! of each unknown view's 3×4 matrix, row-major.
//!
//! Points and rigid transforms form the left Jacobian block; everything after
//! them forms the right block. Known entries occupy no slot.

use crate::camera::CameraModel;
use crate::error::{BundleError, BundleResult};
use crate::geometry::Se3;
use crate::rotation::RotationParameterization;
use crate::scene::projective::PROJECTIVE_VIEW_LENGTH;
use crate::scene::{
    SceneCamera, ScenePoint, SceneStructureMetric, SceneStructureProjective,
    camera_parameter_offsets,
};
use nalgebra::Vector3;

/// Column offsets of every parameter group, computed once per configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    point_length: usize,
    total_points: usize,
    rigid_offsets: Vec<Option<usize>>,
    /// Motion offsets (metric) or projective view offsets
    view_offsets: Vec<Option<usize>>,
    camera_offsets: Vec<Option<usize>>,
    left_count: usize,
    total_count: usize,
}

impl ParameterLayout {
    /// Layout of a metric scene for the given rotation parameterization.
    pub fn metric(structure: &SceneStructureMetric, rotation: RotationParameterization) -> Self {
        let se3_length = rotation.parameter_length() + 3;
        let point_length = structure.point_length();
        let mut index = structure.points.len() * point_length;

        let rigid_offsets = structure
            .rigids
            .iter()
            .map(|rigid| {
                (!rigid.known).then(|| {
                    let offset = index;
                    index += se3_length;
                    offset
                })
            })
            .collect();
        let left_count = index;

        let referenced = structure.motion_references();
        let view_offsets = structure
            .motions
            .iter()
            .zip(referenced)
            .map(|(motion, referenced)| {
                (!motion.known && referenced).then(|| {
                    let offset = index;
                    index += se3_length;
                    offset
                })
            })
            .collect();

        let (camera_offsets, total_count) = shift_cameras(&structure.cameras, index);

        Self {
            point_length,
            total_points: structure.points.len(),
            rigid_offsets,
            view_offsets,
            camera_offsets,
            left_count,
            total_count,
        }
    }

    /// Layout of a projective scene.
    pub fn projective(structure: &SceneStructureProjective) -> Self {
        let point_length = structure.point_length();
        let mut index = structure.points.len() * point_length;
        let left_count = index;

        let view_offsets = structure
            .views
            .iter()
            .map(|view| {
                (!view.known).then(|| {
                    let offset = index;
                    index += PROJECTIVE_VIEW_LENGTH;
                    offset
                })
            })
            .collect();

        let (camera_offsets, total_count) = shift_cameras(&structure.cameras, index);

        Self {
            point_length,
            total_points: structure.points.len(),
            rigid_offsets: Vec::new(),
            view_offsets,
            camera_offsets,
            left_count,
            total_count,
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.total_count
    }

    /// Columns of the left (point + rigid) block.
    pub fn left_count(&self) -> usize {
        self.left_count
    }

    /// Columns of the right (view + camera) block.
    pub fn right_count(&self) -> usize {
        self.total_count - self.left_count
    }

    pub fn point_length(&self) -> usize {
        self.point_length
    }

    pub fn total_points(&self) -> usize {
        self.total_points
    }

    #[inline]
    pub fn point_offset(&self, point: usize) -> usize {
        point * self.point_length
    }

    /// Column of an unknown rigid transform in the left block.
    #[inline]
    pub fn rigid_offset(&self, rigid: usize) -> Option<usize> {
        self.rigid_offsets.get(rigid).copied().flatten()
    }

    /// Column of an unknown motion (metric) or view (projective) in the right block.
    #[inline]
    pub fn view_offset(&self, index: usize) -> Option<usize> {
        self.view_offsets
            .get(index)
            .copied()
            .flatten()
            .map(|o| o - self.left_count)
    }

    /// Column of an unknown camera's first intrinsic in the right block.
    #[inline]
    pub fn camera_offset(&self, camera: usize) -> Option<usize> {
        self.camera_offsets
            .get(camera)
            .copied()
            .flatten()
            .map(|o| o - self.left_count)
    }

    fn view_offset_absolute(&self, index: usize) -> Option<usize> {
        self.view_offsets.get(index).copied().flatten()
    }

    fn camera_offset_absolute(&self, camera: usize) -> Option<usize> {
        self.camera_offsets.get(camera).copied().flatten()
    }

    fn check_points(&self, points: &[ScenePoint]) -> BundleResult<()> {
        if points.len() != self.total_points {
            return Err(BundleError::Structure(format!(
                "scene has {} points but was configured with {}",
                points.len(),
                self.total_points
            )));
        }
        Ok(())
    }
}

fn shift_cameras(cameras: &[SceneCamera], start: usize) -> (Vec<Option<usize>>, usize) {
    let (offsets, count) = camera_parameter_offsets(cameras);
    let offsets = offsets.into_iter().map(|o| o.map(|o| o + start)).collect();
    (offsets, start + count)
}

fn decode_points(input: &[f64], points: &mut [ScenePoint], point_length: usize) {
    for (point, values) in points.iter_mut().zip(input.chunks_exact(point_length)) {
        point.coordinate.x = values[0];
        point.coordinate.y = values[1];
        point.coordinate.z = values[2];
        if point_length == 4 {
            point.coordinate.w = values[3];
        }
    }
}

fn encode_points(points: &[ScenePoint], output: &mut [f64], point_length: usize) {
    for (point, values) in points.iter().zip(output.chunks_exact_mut(point_length)) {
        values.copy_from_slice(&point.coordinate.as_slice()[..point_length]);
    }
}

fn decode_cameras(input: &[f64], cameras: &mut [SceneCamera], layout: &ParameterLayout) {
    for (index, camera) in cameras.iter_mut().enumerate() {
        if let Some(offset) = layout.camera_offset_absolute(index) {
            camera.model.set_intrinsic(&input[offset..]);
        }
    }
}

fn encode_cameras(cameras: &[SceneCamera], output: &mut [f64], layout: &ParameterLayout) {
    for (index, camera) in cameras.iter().enumerate() {
        if let Some(offset) = layout.camera_offset_absolute(index) {
            camera.model.get_intrinsic(&mut output[offset..]);
        }
    }
}

/// Reads rotation parameters followed by a translation.
pub(crate) fn decode_se3(rotation: RotationParameterization, values: &[f64]) -> Se3 {
    let n = rotation.parameter_length();
    Se3 {
        r: rotation.decode(values),
        t: Vector3::new(values[n], values[n + 1], values[n + 2]),
    }
}

fn encode_se3(rotation: RotationParameterization, se3: &Se3, values: &mut [f64]) {
    let n = rotation.parameter_length();
    rotation.encode(&se3.r, values);
    values[n..n + 3].copy_from_slice(se3.t.as_slice());
}

/// Codec for [`SceneStructureMetric`].
#[derive(Debug, Clone)]
pub struct CodecSceneStructureMetric {
    rotation: RotationParameterization,
    layout: ParameterLayout,
}

impl CodecSceneStructureMetric {
    pub fn new(structure: &SceneStructureMetric, rotation: RotationParameterization) -> Self {
        Self {
            rotation,
            layout: ParameterLayout::metric(structure, rotation),
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn rotation(&self) -> RotationParameterization {
        self.rotation
    }

    /// Overwrites every unknown field of `structure` from `input`.
    pub fn decode(&self, input: &[f64], structure: &mut SceneStructureMetric) -> BundleResult<()> {
        BundleError::check_length(self.layout.parameter_count(), input.len())?;
        self.layout.check_points(&structure.points)?;

        decode_points(input, &mut structure.points, self.layout.point_length);
        for (index, rigid) in structure.rigids.iter_mut().enumerate() {
            if let Some(offset) = self.layout.rigid_offset(index) {
                rigid.object_to_world = decode_se3(self.rotation, &input[offset..]);
            }
        }
        for (index, motion) in structure.motions.iter_mut().enumerate() {
            if let Some(offset) = self.layout.view_offset_absolute(index) {
                motion.parent_to_view = decode_se3(self.rotation, &input[offset..]);
            }
        }
        decode_cameras(input, &mut structure.cameras, &self.layout);
        Ok(())
    }

    /// Writes every unknown field of `structure` into `output`.
    pub fn encode(&self, structure: &SceneStructureMetric, output: &mut [f64]) -> BundleResult<()> {
        BundleError::check_length(self.layout.parameter_count(), output.len())?;
        self.layout.check_points(&structure.points)?;

        encode_points(&structure.points, output, self.layout.point_length);
        for (index, rigid) in structure.rigids.iter().enumerate() {
            if let Some(offset) = self.layout.rigid_offset(index) {
                encode_se3(self.rotation, &rigid.object_to_world, &mut output[offset..]);
            }
        }
        for (index, motion) in structure.motions.iter().enumerate() {
            if let Some(offset) = self.layout.view_offset_absolute(index) {
                encode_se3(self.rotation, &motion.parent_to_view, &mut output[offset..]);
            }
        }
        encode_cameras(&structure.cameras, output, &self.layout);
        Ok(())
    }
}

/// Codec for [`SceneStructureProjective`].
#[derive(Debug, Clone)]
pub struct CodecSceneStructureProjective {
    layout: ParameterLayout,
}

impl CodecSceneStructureProjective {
    pub fn new(structure: &SceneStructureProjective) -> Self {
        Self {
            layout: ParameterLayout::projective(structure),
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn decode(
        &self,
        input: &[f64],
        structure: &mut SceneStructureProjective,
    ) -> BundleResult<()> {
        BundleError::check_length(self.layout.parameter_count(), input.len())?;
        self.layout.check_points(&structure.points)?;

        decode_points(input, &mut structure.points, self.layout.point_length);
        for (index, view) in structure.views.iter_mut().enumerate() {
            if let Some(offset) = self.layout.view_offset_absolute(index) {
                let values = &input[offset..offset + PROJECTIVE_VIEW_LENGTH];
                for (i, value) in values.iter().enumerate() {
                    view.world_to_view[(i / 4, i % 4)] = *value;
                }
            }
        }
        decode_cameras(input, &mut structure.cameras, &self.layout);
        Ok(())
    }

    pub fn encode(
        &self,
        structure: &SceneStructureProjective,
        output: &mut [f64],
    ) -> BundleResult<()> {
        BundleError::check_length(self.layout.parameter_count(), output.len())?;
        self.layout.check_points(&structure.points)?;

        encode_points(&structure.points, output, self.layout.point_length);
        for (index, view) in structure.views.iter().enumerate() {
            if let Some(offset) = self.layout.view_offset_absolute(index) {
                let values = &mut output[offset..offset + PROJECTIVE_VIEW_LENGTH];
                for (i, value) in values.iter_mut().enumerate() {
                    *value = view.world_to_view[(i / 4, i % 4)];
                }
            }
        }
        encode_cameras(&structure.cameras, output, &self.layout);
        Ok(())
    }
}
