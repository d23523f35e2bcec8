//! Parametric maps: floating point frames to a scalar volume.
//!
//! A parametric map stores one real valued image per frame (ADC, T1, ...)
//! with the same multi-frame geometry as a segmentation. Frames are placed
//! on the voxel grid by position, values are kept as stored and can be
//! mapped to real world values with the slope and intercept of the first
//! real world value mapping item.

use crate::context::ConversionContext;
use crate::error::{ConversionError, GeometryError, PixelFormatError};
use crate::geometry::{VolumeGeometry, VolumeGeometryResolver};
use crate::segmentation::{CodedConcept, OrientationRecord, PixelMeasures};

use log::{debug, info};
use ndarray::{Array3, s};
use serde::{Deserialize, Serialize};
use std::time::Instant;

fn default_series_description() -> String {
    "Parametric map".into()
}

fn default_series_number() -> String {
    "300".into()
}

fn default_instance_number() -> String {
    "1".into()
}

fn default_slope() -> f64 {
    1.0
}

fn default_laterality() -> String {
    "U".into()
}

/// Description of a parametric map in the dcmqi JSON layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParametricMapMetadata {
    #[serde(default = "default_series_description")]
    pub series_description: String,
    #[serde(default = "default_series_number")]
    pub series_number: String,
    #[serde(default = "default_instance_number")]
    pub instance_number: String,
    #[serde(default)]
    pub body_part_examined: String,
    #[serde(default = "default_slope")]
    pub real_world_value_slope: f64,
    #[serde(default)]
    pub real_world_value_intercept: f64,
    /// Fourth value of ImageType.
    #[serde(default)]
    pub derived_pixel_contrast: String,
    #[serde(default = "default_laterality")]
    pub frame_laterality: String,
    #[serde(default)]
    pub derivation_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_units_code: Option<CodedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_method_code: Option<CodedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_value_code: Option<CodedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anatomic_region_sequence: Option<CodedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_code: Option<CodedConcept>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_image_diffusion_b_values: Vec<String>,
}

impl Default for ParametricMapMetadata {
    fn default() -> Self {
        Self {
            series_description: default_series_description(),
            series_number: default_series_number(),
            instance_number: default_instance_number(),
            body_part_examined: String::new(),
            real_world_value_slope: default_slope(),
            real_world_value_intercept: 0.0,
            derived_pixel_contrast: String::new(),
            frame_laterality: default_laterality(),
            derivation_description: String::new(),
            measurement_units_code: None,
            measurement_method_code: None,
            quantity_value_code: None,
            anatomic_region_sequence: None,
            derivation_code: None,
            source_image_diffusion_b_values: Vec::new(),
        }
    }
}

impl ParametricMapMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn real_world_value(&self, stored: f32) -> f64 {
        f64::from(stored) * self.real_world_value_slope + self.real_world_value_intercept
    }
}

/// One frame of a parametric map.
#[derive(Clone, Debug, PartialEq)]
pub struct ParametricFrame {
    pub position: Option<[f64; 3]>,
    /// Stored values, row-major.
    pub values: Vec<f32>,
}

/// In-memory parametric map as produced by the DICOM adapter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParametricMap {
    pub rows: usize,
    pub columns: usize,
    pub orientation: OrientationRecord,
    pub pixel_measures: Option<PixelMeasures>,
    pub frames: Vec<ParametricFrame>,
    pub metadata: ParametricMapMetadata,
}

impl ParametricMap {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            ..Default::default()
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.rows * self.columns
    }

    /// Appends a frame and returns its index.
    pub fn add_frame(&mut self, frame: ParametricFrame) -> Result<usize, PixelFormatError> {
        if frame.values.len() != self.num_pixels() {
            return Err(PixelFormatError::LengthMismatch {
                expected: self.num_pixels(),
                actual: frame.values.len(),
            });
        }
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }
}

/// A scalar volume with stored parametric values.
#[derive(Clone, Debug, PartialEq)]
pub struct ParametricVolume {
    /// Voxels as `(slice, row, column)`.
    pub data: Array3<f32>,
    pub geometry: VolumeGeometry,
}

impl ParametricVolume {
    pub fn get(&self, column: usize, row: usize, slice: usize) -> Option<f32> {
        self.data.get((slice, row, column)).copied()
    }

    /// Voxels mapped through the real world value slope and intercept.
    pub fn real_world_values(&self, metadata: &ParametricMapMetadata) -> Array3<f64> {
        self.data.mapv(|v| metadata.real_world_value(v))
    }
}

pub struct ParametricMapReconstructor;

impl ParametricMapReconstructor {
    /// Build the scalar volume of a parametric map
    ///
    /// # Arguments
    ///
    /// * `map` - Frames with positions and a common orientation
    /// * `ctx` - Receives spacing warnings
    ///
    /// # Errors
    ///
    /// Returns error if the geometry cannot be resolved or a frame falls
    /// outside of it. Slices without a frame stay zero.
    pub fn reconstruct(
        map: &ParametricMap,
        ctx: &mut ConversionContext,
    ) -> Result<ParametricVolume, ConversionError> {
        let start = Instant::now();
        let orientation = map
            .orientation
            .common()
            .ok_or(GeometryError::MissingOrientation)?;
        let measures = map.pixel_measures.ok_or(GeometryError::MissingPixelSpacing)?;
        let positions = map
            .frames
            .iter()
            .enumerate()
            .map(|(i, frame)| frame.position.ok_or(GeometryError::MissingPosition { frame: i }))
            .collect::<Result<Vec<_>, _>>()?;

        let geometry = VolumeGeometryResolver::resolve_positions(
            orientation,
            &positions,
            &measures,
            [map.columns, map.rows],
            ctx,
        )?;

        let slices = positions
            .iter()
            .enumerate()
            .map(|(frame, &position)| geometry.locate_frame(frame, position).map(|[_, _, z]| z))
            .collect::<Result<Vec<_>, _>>()?;

        let [columns, rows, depth] = geometry.extent;
        let mut data = Array3::zeros((depth, rows, columns));
        for (index, (frame, slice)) in map.frames.iter().zip(slices).enumerate() {
            if frame.values.len() != map.num_pixels() {
                return Err(PixelFormatError::LengthMismatch {
                    expected: map.num_pixels(),
                    actual: frame.values.len(),
                }
                .into());
            }
            debug!("Writing frame {index} to slice {slice}");
            let mut plane = data.slice_mut(s![slice, .., ..]);
            for (voxel, &value) in plane.iter_mut().zip(&frame.values) {
                *voxel = value;
            }
        }

        info!(
            "Reconstructed parametric map of {} frames into {:?} in {:?}",
            map.frames.len(),
            geometry.extent,
            start.elapsed()
        );
        Ok(ParametricVolume { data, geometry })
    }
}
