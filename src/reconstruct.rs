//! Frames to label volumes.

use crate::color::srgb_from_integer_scaled_cielab;
use crate::context::{ConversionContext, ConversionWarning};
use crate::enums::{AlgorithmType, SegmentationType};
use crate::error::{ConversionError, GeometryError, OverlapError};
use crate::geometry::{VolumeGeometry, VolumeGeometryResolver};
use crate::metadata::{SegmentAttributes, SegmentationMetadata};
use crate::overlap::{OverlapResolver, SegmentGroup};
use crate::segmentation::{Segment, SegmentNumber, Segmentation};
use crate::volume::LabelVolume;

use log::{debug, info};
use ndarray::{Array3, s};
use std::collections::BTreeMap;

/// Recommended display colour assumed for segments that have none.
pub const DEFAULT_CIELAB: [u16; 3] = [43803, 26565, 37722];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconstructOptions {
    /// Put non-overlapping segments into shared volumes.
    pub merge_segments: bool,
}

/// Builds one label volume per segment group.
///
/// Geometry and grouping are resolved once in [`LabelVolumeReconstructor::new`];
/// volumes are only allocated when they are pulled from
/// [`LabelVolumeReconstructor::volumes`].
pub struct LabelVolumeReconstructor<'a> {
    segmentation: &'a Segmentation,
    geometry: VolumeGeometry,
    groups: Vec<SegmentGroup>,
    frames_for_segment: BTreeMap<SegmentNumber, Vec<usize>>,
}

impl<'a> LabelVolumeReconstructor<'a> {
    /// Prepare the reconstruction of a segmentation
    ///
    /// # Arguments
    ///
    /// * `segmentation` - Source frames and segment catalog
    /// * `options` - Whether to merge non-overlapping segments
    /// * `ctx` - Receives spacing and grouping warnings
    ///
    /// # Errors
    ///
    /// Returns error if the geometry cannot be resolved or frames do not
    /// reference valid segments. Merging falls back to one volume per
    /// segment only when frames are not parallel or segments overlap.
    pub fn new(
        segmentation: &'a Segmentation,
        options: ReconstructOptions,
        ctx: &mut ConversionContext,
    ) -> Result<Self, ConversionError> {
        let geometry = VolumeGeometryResolver::resolve(segmentation, ctx)?;
        let mut resolver = OverlapResolver::new(segmentation);

        let groups = if options.merge_segments {
            match resolver.non_overlapping_groups() {
                Ok(groups) => groups.to_vec(),
                Err(err @ (OverlapError::FramesNotParallel | OverlapError::Overlap { .. })) => {
                    ctx.warn(ConversionWarning::MergeFallback {
                        reason: err.to_string(),
                    });
                    Self::single_segment_groups(segmentation)
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            Self::single_segment_groups(segmentation)
        };
        info!(
            "Reconstructing {} segments into {} volumes",
            segmentation.segments.len(),
            groups.len()
        );

        let mut frames_for_segment = BTreeMap::new();
        for segment in groups.iter().flat_map(SegmentGroup::segments) {
            frames_for_segment.insert(segment, resolver.frames_for_segment(segment)?);
        }

        Ok(Self {
            segmentation,
            geometry,
            groups,
            frames_for_segment,
        })
    }

    fn single_segment_groups(segmentation: &Segmentation) -> Vec<SegmentGroup> {
        segmentation
            .segments
            .keys()
            .map(|&s| SegmentGroup::single(s))
            .collect()
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn groups(&self) -> &[SegmentGroup] {
        &self.groups
    }

    /// Volumes in group order. Each call starts over from the first group.
    pub fn volumes(&self) -> impl Iterator<Item = Result<LabelVolume, ConversionError>> + '_ {
        self.groups.iter().map(|group| self.build_volume(group))
    }

    /// Volume of group `index`, `None` if there is no such group.
    pub fn volume(&self, index: usize) -> Option<Result<LabelVolume, ConversionError>> {
        self.groups.get(index).map(|group| self.build_volume(group))
    }

    fn build_volume(&self, group: &SegmentGroup) -> Result<LabelVolume, ConversionError> {
        let segmentation = self.segmentation;

        // place every frame before writing so a failure leaves nothing behind
        let mut placements = Vec::new();
        for segment in group.segments() {
            let frames = self
                .frames_for_segment
                .get(&segment)
                .map_or(&[][..], Vec::as_slice);
            for &frame in frames {
                let position = segmentation.frames[frame]
                    .position
                    .ok_or(GeometryError::MissingPosition { frame })?;
                let [_, _, slice] = self.geometry.locate_frame(frame, position)?;
                placements.push((segment, frame, slice));
            }
        }

        let mut volume = LabelVolume::zeros(self.geometry.clone());
        let num_pixels = segmentation.num_pixels();
        for (segment, frame, slice) in placements {
            debug!("Writing segment {segment} frame {frame} to slice {slice}");
            let values = segmentation.frames[frame].pixels.values(num_pixels)?;
            let mut plane = volume.data.slice_mut(s![slice, .., ..]);
            for (voxel, &value) in plane.iter_mut().zip(values.iter()) {
                match segmentation.segmentation_type {
                    SegmentationType::Binary if value != 0 => *voxel = segment,
                    SegmentationType::Fractional if value != 0 => *voxel = value,
                    SegmentationType::Labelmap if value == segment => *voxel = value,
                    _ => {}
                }
            }
        }
        Ok(volume)
    }

    /// Segment descriptions, one list per group.
    pub fn metadata(&self, ctx: &mut ConversionContext) -> SegmentationMetadata {
        let mut per_group = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let mut attributes = Vec::with_capacity(group.len());
            for number in group.segments() {
                if let Some(segment) = self.segmentation.segments.get(&number) {
                    attributes.push(segment_attributes(segment, ctx));
                }
            }
            per_group.push(attributes);
        }
        SegmentationMetadata {
            series: self.segmentation.series.clone(),
            segment_attributes: per_group,
        }
    }
}

/// Frames of one segment stacked in file order, without patient geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentStack {
    pub segment: SegmentNumber,
    /// Physical frame index of each stacked plane.
    pub frames: Vec<usize>,
    /// Voxels as `(frame, row, column)`, holding the segment number or the
    /// fractional value.
    pub data: Array3<u16>,
}

/// Stacks the frames of every segment without resolving geometry.
///
/// Used for segmentations whose frames do not share an orientation and so
/// have no common voxel grid.
///
/// # Errors
///
/// Returns error if frames do not reference valid segments or pixel data
/// is malformed
pub fn segment_stacks(segmentation: &Segmentation) -> Result<Vec<SegmentStack>, ConversionError> {
    let mut resolver = OverlapResolver::new(segmentation);
    let num_pixels = segmentation.num_pixels();
    let mut stacks = Vec::with_capacity(segmentation.segments.len());

    for &segment in segmentation.segments.keys() {
        let frames = resolver.frames_for_segment(segment)?;
        let mut data = Array3::zeros((frames.len(), segmentation.rows, segmentation.columns));
        for (plane, &frame) in frames.iter().enumerate() {
            let values = segmentation.frames[frame].pixels.values(num_pixels)?;
            let mut target = data.slice_mut(s![plane, .., ..]);
            for (voxel, &value) in target.iter_mut().zip(values.iter()) {
                *voxel = match segmentation.segmentation_type {
                    SegmentationType::Binary if value != 0 => segment,
                    SegmentationType::Fractional => value,
                    SegmentationType::Labelmap if value == segment => value,
                    _ => 0,
                };
            }
        }
        debug!("Stacked {} frames for segment {segment}", frames.len());
        stacks.push(SegmentStack {
            segment,
            frames,
            data,
        });
    }
    Ok(stacks)
}

/// Describes a catalog segment; the label id is the segment number.
pub fn segment_attributes(segment: &Segment, ctx: &mut ConversionContext) -> SegmentAttributes {
    let cielab = segment.recommended_cielab.unwrap_or_else(|| {
        ctx.warn(ConversionWarning::MissingColor {
            segment: segment.number,
        });
        DEFAULT_CIELAB
    });

    let mut attributes = SegmentAttributes::new(segment.number);
    attributes.segment_label = Some(segment.label.clone()).filter(|l| !l.is_empty());
    attributes.segment_description = segment.description.clone();
    attributes.segment_algorithm_type = segment.algorithm_type;
    if segment.algorithm_type != AlgorithmType::Manual {
        attributes.segment_algorithm_name = segment
            .algorithm_name
            .clone()
            .filter(|name| !name.is_empty());
    }
    attributes.category = segment.category.clone();
    attributes.property_type = segment.property_type.clone();
    attributes.property_type_modifier = segment.property_type_modifier.clone();
    attributes.anatomic_region = segment.anatomic_region.clone();
    attributes.anatomic_region_modifier = segment.anatomic_region_modifier.clone();
    attributes.recommended_display_rgb = srgb_from_integer_scaled_cielab(cielab);
    attributes.tracking_identifier = segment.tracking_id.clone();
    attributes.tracking_uid = segment.tracking_uid.clone();
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverlapError;
    use crate::geometry::Orientation;
    use crate::pixels::PixelData;
    use crate::segmentation::{Frame, OrientationRecord, PixelMeasures};

    fn two_segments() -> Segmentation {
        let mut seg = Segmentation::new(SegmentationType::Binary, 2, 2)
            .with_geometry(Orientation::axial(), PixelMeasures::new([1.0, 1.0]));
        seg.add_segment(Segment::new(1, "a")).unwrap();
        seg.add_segment(Segment::new(2, "b").with_cielab([65535, 32896, 32896])).unwrap();
        seg.add_frame(Frame::binary(&[1, 0, 0, 0], [0.0, 0.0, 0.0], 1)).unwrap();
        seg.add_frame(Frame::binary(&[0, 0, 0, 1], [0.0, 0.0, 0.0], 2)).unwrap();
        seg.add_frame(Frame::binary(&[0, 1, 1, 0], [0.0, 0.0, 2.0], 2)).unwrap();
        seg
    }

    #[test]
    fn merged_segments_share_a_volume() {
        let seg = two_segments();
        let mut ctx = ConversionContext::with_seed(0);
        let options = ReconstructOptions {
            merge_segments: true,
        };
        let reconstructor = LabelVolumeReconstructor::new(&seg, options, &mut ctx).unwrap();
        let volumes: Vec<_> = reconstructor.volumes().collect::<Result<_, _>>().unwrap();
        assert_eq!(volumes.len(), 1);

        let v = &volumes[0];
        assert_eq!(v.dim(), (2, 2, 2));
        assert_eq!(v.get(0, 0, 0), Some(1));
        assert_eq!(v.get(1, 1, 0), Some(2));
        assert_eq!(v.get(1, 0, 1), Some(2));
        assert_eq!(v.get(0, 1, 1), Some(2));
        assert_eq!(v.count(0), 4);
    }

    #[test]
    fn unmerged_segments_get_own_volumes() {
        let seg = two_segments();
        let mut ctx = ConversionContext::with_seed(0);
        let reconstructor =
            LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx).unwrap();
        assert_eq!(reconstructor.groups().len(), 2);

        let second = reconstructor.volume(1).unwrap().unwrap();
        assert_eq!(second.count(2), 3);
        assert_eq!(second.count(1), 0);

        let again: Vec<_> = reconstructor.volumes().collect::<Result<_, _>>().unwrap();
        assert_eq!(again[1], second, "volumes must be reproducible");
        assert!(reconstructor.volume(2).is_none());
    }

    #[test]
    fn frames_outside_the_volume_are_rejected() {
        let mut seg = two_segments();
        seg.add_frame(Frame::binary(&[1, 1, 1, 1], [-3.0, 0.0, 2.0], 1)).unwrap();
        let mut ctx = ConversionContext::with_seed(0);
        let reconstructor =
            LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx).unwrap();
        let err = reconstructor.volume(0).unwrap().unwrap_err();
        assert!(
            matches!(
                err,
                ConversionError::Geometry(GeometryError::OutOfBounds { frame: 3, .. })
            ),
            "got {err:?}"
        );
        // the other group is unaffected
        assert!(reconstructor.volume(1).unwrap().is_ok());
    }

    #[test]
    fn identical_per_frame_orientations_fall_back_to_single_volumes() {
        let mut seg = two_segments();
        seg.orientation = OrientationRecord::PerFrame(vec![Orientation::axial(); 3]);
        let mut resolver = OverlapResolver::new(&seg);
        assert_eq!(
            resolver.non_overlapping_groups().unwrap_err(),
            OverlapError::FramesNotParallel
        );

        let mut ctx = ConversionContext::with_seed(0);
        let options = ReconstructOptions {
            merge_segments: true,
        };
        let r = LabelVolumeReconstructor::new(&seg, options, &mut ctx).unwrap();
        assert_eq!(r.geometry().extent, [2, 2, 2]);
        let volumes: Vec<_> = r.volumes().collect::<Result<_, _>>().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].count(1), 1);
        assert_eq!(volumes[1].count(2), 3);
        assert_eq!(
            ctx.warnings(),
            &[ConversionWarning::MergeFallback {
                reason: OverlapError::FramesNotParallel.to_string()
            }]
        );
    }

    #[test]
    fn differing_orientations_have_no_volume_but_stack_per_segment() {
        let mut seg = two_segments();
        let coronal = Orientation::new([1.0, 0.0, 0.0], [0.0, 0.0, -1.0]);
        seg.orientation =
            OrientationRecord::PerFrame(vec![Orientation::axial(), coronal, Orientation::axial()]);
        let mut ctx = ConversionContext::with_seed(0);
        assert!(matches!(
            LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx),
            Err(ConversionError::Geometry(GeometryError::MissingOrientation))
        ));

        let stacks = segment_stacks(&seg).unwrap();
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0].segment, 1);
        assert_eq!(stacks[0].frames, vec![0]);
        assert_eq!(stacks[0].data.dim(), (1, 2, 2));
        assert_eq!(stacks[1].frames, vec![1, 2]);
        assert_eq!(
            stacks[1].data.iter().copied().collect::<Vec<_>>(),
            vec![0, 0, 0, 2, 0, 2, 2, 0]
        );
    }

    #[test]
    fn merge_does_not_hide_invalid_segment_references() {
        let mut seg = two_segments();
        seg.add_frame(Frame::binary(&[1, 0, 0, 0], [0.0, 0.0, 2.0], 7)).unwrap();
        let mut ctx = ConversionContext::with_seed(0);
        let options = ReconstructOptions {
            merge_segments: true,
        };
        assert!(matches!(
            LabelVolumeReconstructor::new(&seg, options, &mut ctx),
            Err(ConversionError::Overlap(OverlapError::UnknownSegment {
                frame: 3,
                segment: 7
            }))
        ));
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn segment_zero_frames_are_rejected() {
        let mut seg = two_segments();
        // bypasses add_segment, as a hand-built catalog could
        seg.segments.insert(0, Segment::new(0, "background"));
        seg.add_frame(Frame::binary(&[1, 1, 1, 1], [0.0, 0.0, 2.0], 0)).unwrap();
        let mut ctx = ConversionContext::with_seed(0);
        let result = LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx);
        assert!(
            matches!(
                result,
                Err(ConversionError::Overlap(OverlapError::ReservedSegmentNumber))
            ),
            "segment 0 must not be written as background"
        );
    }

    #[test]
    fn fractional_and_labelmap_values_are_copied() {
        let mut seg = Segmentation::new(SegmentationType::Fractional, 1, 3)
            .with_geometry(Orientation::axial(), PixelMeasures::new([1.0, 1.0]));
        seg.add_segment(Segment::new(1, "prob")).unwrap();
        let mut frame = Frame::new(PixelData::U8(vec![0, 128, 255]), Some([0.0; 3]));
        frame.referenced_segment = Some(1);
        seg.add_frame(frame).unwrap();
        let mut ctx = ConversionContext::with_seed(0);
        let r = LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx).unwrap();
        let v = r.volume(0).unwrap().unwrap();
        assert_eq!(v.data.iter().copied().collect::<Vec<_>>(), vec![0, 128, 255]);

        let mut labels = Segmentation::new(SegmentationType::Labelmap, 1, 3)
            .with_geometry(Orientation::axial(), PixelMeasures::new([1.0, 1.0]));
        labels.add_segment(Segment::new(1, "a")).unwrap();
        labels.add_segment(Segment::new(5, "b")).unwrap();
        labels
            .add_frame(Frame::new(PixelData::U8(vec![5, 0, 1]), Some([0.0; 3])))
            .unwrap();
        let r = LabelVolumeReconstructor::new(&labels, ReconstructOptions::default(), &mut ctx)
            .unwrap();
        let v = r.volume(1).unwrap().unwrap();
        assert_eq!(v.data.iter().copied().collect::<Vec<_>>(), vec![5, 0, 0]);
    }

    #[test]
    fn metadata_uses_default_colour_when_missing() {
        let seg = two_segments();
        let mut ctx = ConversionContext::with_seed(0);
        let r = LabelVolumeReconstructor::new(&seg, ReconstructOptions::default(), &mut ctx).unwrap();
        let meta = r.metadata(&mut ctx);
        assert_eq!(meta.segment_attributes.len(), 2);

        let a = &meta.segment_attributes[0][0];
        assert_eq!(a.label_id, 1);
        assert_eq!(a.segment_label.as_deref(), Some("a"));
        assert_eq!(
            a.recommended_display_rgb,
            srgb_from_integer_scaled_cielab(DEFAULT_CIELAB)
        );
        let b = &meta.segment_attributes[1][0];
        assert!(b.recommended_display_rgb.iter().all(|&c| c >= 254));
        assert_eq!(ctx.warnings(), &[ConversionWarning::MissingColor { segment: 1 }]);
    }

    #[test]
    fn metadata_groups_follow_merged_volumes() {
        let mut seg = two_segments();
        seg.segments.get_mut(&1).unwrap().recommended_cielab = Some([21169, 53249, 5175]);
        let mut ctx = ConversionContext::with_seed(0);
        let options = ReconstructOptions {
            merge_segments: true,
        };
        let r = LabelVolumeReconstructor::new(&seg, options, &mut ctx).unwrap();
        let meta = r.metadata(&mut ctx);
        assert_eq!(meta.segment_attributes.len(), 1);
        let labels: Vec<u16> = meta.segment_attributes[0].iter().map(|a| a.label_id).collect();
        assert_eq!(labels, vec![1, 2]);
        assert!(ctx.warnings().is_empty());

        let single = segment_attributes(&seg.segments[&2], &mut ctx);
        assert_eq!(single, meta.segment_attributes[0][1]);
    }

    #[test]
    fn algorithm_name_is_kept_for_non_manual_segments() {
        let mut ctx = ConversionContext::with_seed(0);
        let mut segment = Segment::new(1, "auto").with_cielab(DEFAULT_CIELAB);
        segment.algorithm_name = Some("thresholding".into());
        assert_eq!(segment_attributes(&segment, &mut ctx).segment_algorithm_name, None);

        segment.algorithm_type = AlgorithmType::Automatic;
        assert_eq!(
            segment_attributes(&segment, &mut ctx)
                .segment_algorithm_name
                .as_deref(),
            Some("thresholding")
        );
    }
}
