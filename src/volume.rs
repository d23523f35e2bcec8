use crate::error::ConversionError;
use crate::geometry::VolumeGeometry;

use ndarray::{Array3, ArrayView2, s};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// A 3D label image.
///
/// Voxels are stored as `(slice, row, column)`; accessors take
/// `(column, row, slice)` indices to match [`VolumeGeometry`].
#[derive(Clone, Debug, PartialEq)]
pub struct LabelVolume {
    pub data: Array3<u16>,
    pub geometry: VolumeGeometry,
}

impl LabelVolume {
    /// Zero-filled volume covering `geometry`.
    pub fn zeros(geometry: VolumeGeometry) -> Self {
        let [columns, rows, slices] = geometry.extent;
        Self {
            data: Array3::zeros((slices, rows, columns)),
            geometry,
        }
    }

    /// Wrap existing voxels.
    ///
    /// # Errors
    ///
    /// Returns error if the array shape does not match the geometry extent
    pub fn new(data: Array3<u16>, geometry: VolumeGeometry) -> Result<Self, ConversionError> {
        let [columns, rows, slices] = geometry.extent;
        if data.dim() != (slices, rows, columns) {
            return Err(ConversionError::InconsistentDimensions);
        }
        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (slices, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, column: usize, row: usize, slice: usize) -> Option<u16> {
        self.data.get((slice, row, column)).copied()
    }

    /// Returns `false` if the index is outside the volume.
    pub fn set(&mut self, column: usize, row: usize, slice: usize, value: u16) -> bool {
        match self.data.get_mut((slice, row, column)) {
            Some(voxel) => {
                *voxel = value;
                true
            }
            None => false,
        }
    }

    /// One slice as a `(row, column)` view.
    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, u16>> {
        (index < self.dim().0).then(|| self.data.slice(s![index, .., ..]))
    }

    /// Distinct non-zero labels in order of first appearance, scanning slice
    /// by slice, row by row.
    pub fn labels(&self) -> Vec<u16> {
        let mut seen = Vec::new();
        for &value in self.data.iter() {
            if value != 0 && !seen.contains(&value) {
                seen.push(value);
            }
        }
        seen
    }

    /// Inclusive range of slices containing `label`, `None` if it is absent.
    pub fn slice_range(&self, label: u16) -> Option<RangeInclusive<usize>> {
        let occupied = |i: &usize| self.data.slice(s![*i, .., ..]).iter().any(|&v| v == label);
        let slices = self.dim().0;
        let first = (0..slices).find(occupied)?;
        let last = (first..slices).rev().find(occupied)?;
        Some(first..=last)
    }

    /// Slice ranges of all labels, keyed by label.
    pub fn label_slice_ranges(&self) -> BTreeMap<u16, RangeInclusive<usize>> {
        let mut ranges: BTreeMap<u16, RangeInclusive<usize>> = BTreeMap::new();
        for (slice, plane) in self.data.outer_iter().enumerate() {
            for &value in plane.iter().filter(|&&v| v != 0) {
                ranges
                    .entry(value)
                    .and_modify(|r| *r = *r.start()..=slice)
                    .or_insert(slice..=slice);
            }
        }
        ranges
    }

    /// Number of voxels equal to `label`.
    pub fn count(&self, label: u16) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }

    /// Whether the two volumes share the same voxel grid extent.
    pub fn same_extent(&self, other: &LabelVolume) -> bool {
        self.geometry.extent == other.geometry.extent
    }

    /// Binary mask of `label` on one slice, row-major.
    pub fn slice_mask(&self, index: usize, label: u16) -> Option<Vec<u8>> {
        let plane = self.slice(index)?;
        Some(plane.iter().map(|&v| u8::from(v == label)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn geometry(extent: [usize; 3]) -> VolumeGeometry {
        VolumeGeometry {
            row_direction: Vector3::x(),
            column_direction: Vector3::y(),
            slice_direction: Vector3::z(),
            origin: Vector3::zeros(),
            spacing: [1.0, 1.0, 1.0],
            extent,
        }
    }

    #[test]
    fn indices_are_column_row_slice() {
        let mut volume = LabelVolume::zeros(geometry([4, 3, 2]));
        assert_eq!(volume.dim(), (2, 3, 4));
        assert!(volume.set(3, 2, 1, 7));
        assert_eq!(volume.data[[1, 2, 3]], 7);
        assert_eq!(volume.get(3, 2, 1), Some(7));
        assert!(!volume.set(4, 0, 0, 1), "column 4 is outside");
        assert_eq!(volume.get(0, 0, 2), None);
    }

    #[test]
    fn labels_follow_raster_order() {
        let mut volume = LabelVolume::zeros(geometry([2, 2, 2]));
        volume.set(1, 1, 0, 5);
        volume.set(0, 0, 1, 2);
        volume.set(0, 1, 0, 9);
        assert_eq!(volume.labels(), vec![9, 5, 2]);
    }

    #[test]
    fn slice_ranges_cover_first_to_last_occurrence() {
        let mut volume = LabelVolume::zeros(geometry([2, 2, 5]));
        volume.set(0, 0, 1, 3);
        volume.set(1, 1, 3, 3);
        volume.set(1, 0, 2, 4);
        assert_eq!(volume.slice_range(3), Some(1..=3));
        assert_eq!(volume.slice_range(4), Some(2..=2));
        assert_eq!(volume.slice_range(1), None);

        let ranges = volume.label_slice_ranges();
        assert_eq!(ranges[&3], 1..=3);
        assert_eq!(ranges[&4], 2..=2);
    }

    #[test]
    fn new_checks_shape_against_extent() {
        let data = Array3::zeros((2, 3, 4));
        assert!(LabelVolume::new(data.clone(), geometry([4, 3, 2])).is_ok());
        assert!(matches!(
            LabelVolume::new(data, geometry([3, 3, 2])),
            Err(ConversionError::InconsistentDimensions)
        ));
    }

    #[test]
    fn slice_mask_selects_one_label() {
        let mut volume = LabelVolume::zeros(geometry([2, 2, 1]));
        volume.set(0, 0, 0, 1);
        volume.set(1, 0, 0, 2);
        assert_eq!(volume.slice_mask(0, 2), Some(vec![0, 1, 0, 0]));
        assert_eq!(volume.slice_mask(1, 2), None);
    }
}
