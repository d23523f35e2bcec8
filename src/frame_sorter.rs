//! Ordering of physical frames along the slice normal and grouping of frames
//! at the same position into logical frames.

use crate::error::GeometryError;
use crate::geometry::Orientation;
use crate::segmentation::{PixelMeasures, Segmentation};

use log::debug;

/// Frames closer than `slice thickness × SLICE_TOLERANCE_FACTOR` belong to the
/// same logical frame.
pub const SLICE_TOLERANCE_FACTOR: f64 = 0.01;

/// A physical frame and its signed distance along the slice normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SortedFrame {
    pub frame: usize,
    pub distance: f64,
}

/// Physical frame indices sharing one position, in sorted order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogicalFrame(pub Vec<usize>);

impl LogicalFrame {
    pub fn frames(&self) -> &[usize] {
        &self.0
    }
}

pub struct FrameSorter;

impl FrameSorter {
    /// Sorts frame positions by ascending distance along the slice normal.
    ///
    /// Distances are measured from the first position. Frames at equal
    /// distances keep their input order.
    pub fn sort(
        orientation: &Orientation,
        positions: &[[f64; 3]],
    ) -> Result<Vec<SortedFrame>, GeometryError> {
        let normal = orientation.slice_direction()?;
        let Some(&reference) = positions.first() else {
            return Ok(Vec::new());
        };

        let mut sorted: Vec<SortedFrame> = positions
            .iter()
            .enumerate()
            .map(|(frame, position)| SortedFrame {
                frame,
                distance: Orientation::distance(&normal, reference, *position),
            })
            .collect();
        sorted.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(sorted)
    }

    /// Sorts the frames of a segmentation whose frames share one orientation.
    pub fn sort_segmentation(segmentation: &Segmentation) -> Result<Vec<SortedFrame>, GeometryError> {
        let orientation = segmentation
            .common_orientation()
            .ok_or(GeometryError::MissingOrientation)?;
        let positions = segmentation
            .frames
            .iter()
            .enumerate()
            .map(|(i, f)| f.position.ok_or(GeometryError::MissingPosition { frame: i }))
            .collect::<Result<Vec<_>, _>>()?;
        Self::sort(orientation, &positions)
    }
}

pub struct FramePositionGrouper;

impl FramePositionGrouper {
    pub fn tolerance(slice_thickness: f64) -> f64 {
        slice_thickness * SLICE_TOLERANCE_FACTOR
    }

    /// Splits sorted frames into contiguous logical frames.
    ///
    /// A frame joins the current bucket when its distance to the previous
    /// frame is below the tolerance.
    pub fn group(sorted: &[SortedFrame], slice_thickness: f64) -> Vec<LogicalFrame> {
        let tolerance = Self::tolerance(slice_thickness);
        let mut logical: Vec<LogicalFrame> = Vec::new();
        let mut previous: Option<f64> = None;

        for frame in sorted {
            let same_position = previous.is_some_and(|p| (frame.distance - p).abs() < tolerance);
            match logical.last_mut() {
                Some(bucket) if same_position => bucket.0.push(frame.frame),
                _ => logical.push(LogicalFrame(vec![frame.frame])),
            }
            previous = Some(frame.distance);
        }

        debug!(
            "Grouped {} frames into {} logical frames (tolerance {tolerance})",
            sorted.len(),
            logical.len()
        );
        logical
    }

    /// Thickness used for the grouping tolerance: the declared slice
    /// thickness, else the gap between the two lowest distinct positions,
    /// else 1.0.
    pub fn grouping_thickness(measures: Option<&PixelMeasures>, sorted: &[SortedFrame]) -> f64 {
        if let Some(thickness) = measures.and_then(PixelMeasures::declared_slice_thickness) {
            return thickness;
        }
        let first = sorted.first().map(|f| f.distance);
        sorted
            .iter()
            .map(|f| f.distance)
            .find(|d| Some(*d) != first)
            .zip(first)
            .map(|(second, first)| (second - first).abs())
            .unwrap_or(1.0)
    }
}
