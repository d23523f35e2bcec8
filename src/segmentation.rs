//! In-memory model of a segmentation object.
//!
//! These are the records the DICOM adapter produces and the converters
//! consume. Functional group content is typed directly (orientation,
//! position, frame content, segment reference), so nothing downstream has to
//! inspect generic datasets.

use crate::enums::{AlgorithmType, ColorModel, SegmentationType, SegmentsOverlap};
use crate::error::{OverlapError, PixelFormatError};
use crate::geometry::Orientation;
use crate::metadata::SeriesInfo;
use crate::pixels::{PixelData, pack_bits};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 1-based segment number, 0 is reserved for background.
pub type SegmentNumber = u16;

/// A code triplet (code value, coding scheme, meaning).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodedConcept {
    pub code_value: String,
    pub coding_scheme_designator: String,
    pub code_meaning: String,
}

impl CodedConcept {
    pub fn new(value: &str, scheme: &str, meaning: &str) -> Self {
        Self {
            code_value: value.to_owned(),
            coding_scheme_designator: scheme.to_owned(),
            code_meaning: meaning.to_owned(),
        }
    }
}

/// Entry of the segment catalog.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segment {
    pub number: SegmentNumber,
    pub label: String,
    pub description: Option<String>,
    pub algorithm_type: AlgorithmType,
    pub algorithm_name: Option<String>,
    pub category: Option<CodedConcept>,
    pub property_type: Option<CodedConcept>,
    pub property_type_modifier: Option<CodedConcept>,
    pub anatomic_region: Option<CodedConcept>,
    pub anatomic_region_modifier: Option<CodedConcept>,
    pub tracking_id: Option<String>,
    pub tracking_uid: Option<String>,
    /// Recommended display colour as DICOM scaled CIELab.
    pub recommended_cielab: Option<[u16; 3]>,
}

impl Segment {
    pub fn new(number: SegmentNumber, label: impl Into<String>) -> Self {
        Self {
            number,
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_cielab(mut self, cielab: [u16; 3]) -> Self {
        self.recommended_cielab = Some(cielab);
        self
    }
}

/// How the plane orientation functional group is present in the dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OrientationRecord {
    /// One orientation in the shared functional groups.
    Shared(Orientation),
    /// An orientation per frame, frames may not be parallel.
    PerFrame(Vec<Orientation>),
    #[default]
    Missing,
}

impl OrientationRecord {
    /// The shared orientation, or the first frame's when every per-frame
    /// orientation agrees with it within tolerance.
    pub fn common(&self) -> Option<&Orientation> {
        match self {
            Self::Shared(orientation) => Some(orientation),
            Self::PerFrame(orientations) => {
                let (first, rest) = orientations.split_first()?;
                rest.iter().all(|o| first.approx_eq(o)).then_some(first)
            }
            Self::Missing => None,
        }
    }
}

/// Pixel measures functional group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelMeasures {
    /// Row spacing, column spacing (DICOM order).
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
}

impl PixelMeasures {
    const EPSILON: f64 = 1e-5;

    pub fn new(pixel_spacing: [f64; 2]) -> Self {
        Self {
            pixel_spacing,
            slice_thickness: None,
            spacing_between_slices: None,
        }
    }

    /// Spacing between slices if present, else slice thickness, ignoring
    /// values that are (close to) zero.
    pub fn declared_slice_spacing(&self) -> Option<f64> {
        self.spacing_between_slices
            .filter(|v| v.abs() > Self::EPSILON)
            .or_else(|| self.slice_thickness.filter(|v| v.abs() > Self::EPSILON))
    }

    pub fn declared_slice_thickness(&self) -> Option<f64> {
        self.slice_thickness.filter(|v| v.abs() > Self::EPSILON)
    }
}

/// Frame content functional group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameContent {
    pub stack_id: Option<String>,
    pub in_stack_position: Option<u32>,
    pub dimension_index: Vec<u32>,
    pub comments: Option<String>,
}

/// Reference to a source image instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceImageRef {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
}

/// Lookup tables for a palette colour label map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaletteColorLut {
    pub entries: usize,
    pub first_mapped: u16,
    pub bits: u16,
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl PaletteColorLut {
    /// Descriptor triplet as written to the dataset.
    pub fn descriptor(&self) -> [usize; 3] {
        [self.entries, self.first_mapped as usize, self.bits as usize]
    }

    /// RGB entry for a segment, if it is covered by the tables.
    pub fn color(&self, segment: SegmentNumber) -> Option<[u16; 3]> {
        let index = (segment as usize).checked_sub(self.first_mapped as usize)?;
        Some([
            *self.red.get(index)?,
            *self.green.get(index)?,
            *self.blue.get(index)?,
        ])
    }
}

/// One physical frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub pixels: PixelData,
    /// Image position (patient).
    pub position: Option<[f64; 3]>,
    /// Referenced segment number, absent for label maps.
    pub referenced_segment: Option<SegmentNumber>,
    pub frame_content: FrameContent,
    pub derivation: Vec<SourceImageRef>,
}

impl Frame {
    pub fn new(pixels: PixelData, position: Option<[f64; 3]>) -> Self {
        Self {
            pixels,
            position,
            referenced_segment: None,
            frame_content: FrameContent::default(),
            derivation: Vec::new(),
        }
    }

    /// A binary frame for `segment` from a row-major mask.
    pub fn binary(mask: &[u8], position: [f64; 3], segment: SegmentNumber) -> Self {
        let mut frame = Self::new(PixelData::Packed(pack_bits(mask)), Some(position));
        frame.referenced_segment = Some(segment);
        frame
    }
}

/// A segmentation object: frames plus the segment catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct Segmentation {
    pub segmentation_type: SegmentationType,
    pub rows: usize,
    pub columns: usize,
    pub bits_allocated: u16,
    pub orientation: OrientationRecord,
    pub pixel_measures: Option<PixelMeasures>,
    pub frames: Vec<Frame>,
    pub segments: BTreeMap<SegmentNumber, Segment>,
    pub color_model: ColorModel,
    pub palette: Option<PaletteColorLut>,
    pub segments_overlap: SegmentsOverlap,
    /// Instances referenced anywhere in the object, unique by instance UID.
    pub referenced_instances: Vec<SourceImageRef>,
    pub series: SeriesInfo,
    pub sop_instance_uid: Option<String>,
}

impl Segmentation {
    pub fn new(segmentation_type: SegmentationType, rows: usize, columns: usize) -> Self {
        let bits_allocated = match segmentation_type {
            SegmentationType::Binary => 1,
            SegmentationType::Fractional | SegmentationType::Labelmap => 8,
        };
        Self {
            segmentation_type,
            rows,
            columns,
            bits_allocated,
            orientation: OrientationRecord::Missing,
            pixel_measures: None,
            frames: Vec::new(),
            segments: BTreeMap::new(),
            color_model: ColorModel::default(),
            palette: None,
            segments_overlap: SegmentsOverlap::default(),
            referenced_instances: Vec::new(),
            series: SeriesInfo::default(),
            sop_instance_uid: None,
        }
    }

    pub fn with_geometry(mut self, orientation: Orientation, pixel_measures: PixelMeasures) -> Self {
        self.orientation = OrientationRecord::Shared(orientation);
        self.pixel_measures = Some(pixel_measures);
        self
    }

    pub fn num_pixels(&self) -> usize {
        self.rows * self.columns
    }

    /// Adds a segment to the catalog, replacing one with the same number.
    ///
    /// # Errors
    ///
    /// Returns [`OverlapError::ReservedSegmentNumber`] for segment number 0,
    /// which label volumes use for the background.
    pub fn add_segment(&mut self, segment: Segment) -> Result<(), OverlapError> {
        if segment.number == 0 {
            return Err(OverlapError::ReservedSegmentNumber);
        }
        self.segments.insert(segment.number, segment);
        Ok(())
    }

    /// Appends a frame and returns its index.
    pub fn add_frame(&mut self, frame: Frame) -> Result<usize, PixelFormatError> {
        frame.pixels.validate(self.num_pixels())?;
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }

    pub fn shared_orientation(&self) -> Option<&Orientation> {
        match &self.orientation {
            OrientationRecord::Shared(orientation) => Some(orientation),
            _ => None,
        }
    }

    /// See [`OrientationRecord::common`].
    pub fn common_orientation(&self) -> Option<&Orientation> {
        self.orientation.common()
    }
}
