mod common;

use common::{add_mask, add_segments, binary_segmentation};
use dicom_seg_volume::segmentation::{Frame, Segment};
use dicom_seg_volume::{
    ConversionContext, ConversionError, GeometryError, LabelVolumeReconstructor, OverlapError,
    ReconstructOptions,
};

#[test]
fn near_duplicate_positions_share_a_slice() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut seg = binary_segmentation(2, 2, [1.0, 1.0]);
    if let Some(measures) = seg.pixel_measures.as_mut() {
        measures.slice_thickness = Some(2.0);
    }
    add_segments(&mut seg, &["a", "b"]);
    add_mask(&mut seg, 1, 0.0, &[0]);
    add_mask(&mut seg, 2, 0.001, &[3]);
    add_mask(&mut seg, 1, 2.0, &[0]);
    add_mask(&mut seg, 1, 4.0, &[0]);

    let mut ctx = ConversionContext::with_seed(0);
    let options = ReconstructOptions {
        merge_segments: true,
    };
    let reconstructor = LabelVolumeReconstructor::new(&seg, options, &mut ctx).unwrap();
    assert_eq!(reconstructor.geometry().extent, [2, 2, 3]);
    assert_eq!(reconstructor.geometry().spacing[2], 2.0);
    assert!(ctx.warnings().is_empty(), "{:?}", ctx.warnings());

    let volume = reconstructor.volume(0).unwrap().unwrap();
    assert_eq!(volume.get(0, 0, 0), Some(1));
    assert_eq!(volume.get(1, 1, 0), Some(2));
    assert_eq!(volume.count(1), 3);
}

#[test]
fn segment_zero_is_never_written_as_background() {
    let mut seg = binary_segmentation(2, 2, [1.0, 1.0]);
    assert!(matches!(
        seg.add_segment(Segment::new(0, "zero")),
        Err(OverlapError::ReservedSegmentNumber)
    ));

    seg.segments.insert(0, Segment::new(0, "zero"));
    seg.add_frame(Frame::binary(&[1, 1, 1, 1], [0.0; 3], 0)).unwrap();
    let mut ctx = ConversionContext::with_seed(0);
    let result = LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx);
    assert!(matches!(
        result,
        Err(ConversionError::Overlap(OverlapError::ReservedSegmentNumber))
    ));
}

#[test]
fn frame_off_the_grid_fails_its_group_only() {
    let mut seg = binary_segmentation(4, 4, [1.0, 1.0]);
    add_segments(&mut seg, &["inside", "shifted"]);
    add_mask(&mut seg, 1, 0.0, &[0, 5]);
    add_mask(&mut seg, 1, 1.0, &[5]);
    let shifted = seg
        .add_frame(Frame::binary(&[1; 16], [0.0, 6.0, 1.0], 2))
        .unwrap();

    let mut ctx = ConversionContext::with_seed(0);
    let reconstructor =
        LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx).unwrap();
    let results: Vec<_> = reconstructor.volumes().collect();
    assert_eq!(results.len(), 2);

    let inside = results[0].as_ref().unwrap();
    assert_eq!(inside.count(1), 3);
    match &results[1] {
        Err(ConversionError::Geometry(GeometryError::OutOfBounds { frame, index, extent })) => {
            assert_eq!(*frame, shifted);
            assert_eq!(index[1], 6);
            assert_eq!(*extent, [4, 4, 2]);
        }
        other => panic!("expected out of bounds error, got {other:?}"),
    }
}

#[test]
fn merged_group_with_off_grid_frame_fails() {
    let mut seg = binary_segmentation(2, 2, [1.0, 1.0]);
    add_segments(&mut seg, &["a", "b"]);
    add_mask(&mut seg, 1, 0.0, &[0]);
    add_mask(&mut seg, 1, 1.0, &[0]);
    seg.add_frame(Frame::binary(&[0, 0, 0, 1], [-5.0, 0.0, 1.0], 2))
        .unwrap();

    let mut ctx = ConversionContext::with_seed(0);
    let options = ReconstructOptions {
        merge_segments: true,
    };
    let reconstructor = LabelVolumeReconstructor::new(&seg, options, &mut ctx).unwrap();
    assert_eq!(reconstructor.groups().len(), 1);
    assert!(matches!(
        reconstructor.volume(0),
        Some(Err(ConversionError::Geometry(GeometryError::OutOfBounds { frame: 2, .. })))
    ));
}
