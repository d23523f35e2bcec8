#![allow(dead_code)]

use dicom_seg_volume::enums::SegmentationType;
use dicom_seg_volume::geometry::{Orientation, VolumeGeometry};
use dicom_seg_volume::metadata::{SegmentAttributes, SegmentationMetadata};
use dicom_seg_volume::segmentation::{Frame, PixelMeasures, Segment, Segmentation};
use dicom_seg_volume::volume::LabelVolume;
use dicom_seg_volume::enums::AlgorithmType;
use nalgebra::Vector3;

/// Axial binary segmentation with the given in-plane size and spacing
/// (row spacing, column spacing).
pub fn binary_segmentation(rows: usize, columns: usize, pixel_spacing: [f64; 2]) -> Segmentation {
    Segmentation::new(SegmentationType::Binary, rows, columns)
        .with_geometry(Orientation::axial(), PixelMeasures::new(pixel_spacing))
}

/// Adds segments numbered from 1 with the given labels, each with a colour.
pub fn add_segments(segmentation: &mut Segmentation, labels: &[&str]) {
    for (i, label) in labels.iter().enumerate() {
        let number = i as u16 + 1;
        segmentation
            .add_segment(Segment::new(number, *label).with_cielab([40000, 30000 + number * 1000, 32896]))
            .expect("segment numbers start at 1");
    }
}

/// Adds a binary frame for `segment` at height `z`; `set` lists the row-major
/// pixel indices that belong to the segment.
pub fn add_mask(segmentation: &mut Segmentation, segment: u16, z: f64, set: &[usize]) -> usize {
    let mut mask = vec![0u8; segmentation.num_pixels()];
    for &i in set {
        mask[i] = 1;
    }
    segmentation
        .add_frame(Frame::binary(&mask, [0.0, 0.0, z], segment))
        .expect("mask has one value per pixel")
}

/// Grid rotated 30 degrees about the slice axis.
pub fn oblique_geometry(extent: [usize; 3], spacing: [f64; 3]) -> VolumeGeometry {
    let (sin, cos) = 30f64.to_radians().sin_cos();
    VolumeGeometry {
        row_direction: Vector3::new(cos, sin, 0.0),
        column_direction: Vector3::new(-sin, cos, 0.0),
        slice_direction: Vector3::z(),
        origin: Vector3::new(-120.5, 33.0, -42.0),
        spacing,
        extent,
    }
}

/// Manual segment attributes for each label list.
pub fn manual_metadata(labels: &[&[u16]]) -> SegmentationMetadata {
    SegmentationMetadata {
        segment_attributes: labels
            .iter()
            .map(|ids| {
                ids.iter()
                    .map(|&id| SegmentAttributes {
                        segment_label: Some(format!("label {id}")),
                        segment_algorithm_type: AlgorithmType::Manual,
                        ..SegmentAttributes::new(id)
                    })
                    .collect()
            })
            .collect(),
        ..Default::default()
    }
}

/// A volume with three non-overlapping labels (2, 5 and 9) on slices 1 to 4
/// of 6.
pub fn three_label_volume() -> LabelVolume {
    let mut volume = LabelVolume::zeros(oblique_geometry([5, 4, 6], [0.5, 0.75, 2.5]));
    for slice in 1..=3 {
        volume.set(0, 0, slice, 2);
        volume.set(1, 0, slice, 2);
    }
    for slice in 2..=4 {
        volume.set(4, 3, slice, 5);
    }
    volume.set(2, 2, 3, 9);
    volume.set(3, 2, 3, 9);
    volume
}

pub fn assert_close(a: [f64; 3], b: [f64; 3], what: &str) {
    for axis in 0..3 {
        assert!(
            (a[axis] - b[axis]).abs() < 1e-6,
            "{what} differs on axis {axis}: {a:?} vs {b:?}"
        );
    }
}
