//! Label volumes to segmentation frames.

use crate::color::integer_scaled_cielab_from_srgb;
use crate::enums::{AlgorithmType, SegmentationType, SegmentsOverlap};
use crate::error::ConversionError;
use crate::geometry::Orientation;
use crate::metadata::{SegmentAttributes, SegmentationMetadata};
use crate::segmentation::{
    Frame, FrameContent, PixelMeasures, Segment, SegmentNumber, Segmentation, SourceImageRef,
};
use crate::volume::LabelVolume;

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// An image the segmentation was drawn on.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceImage {
    pub reference: SourceImageRef,
    /// Image position (patient).
    pub position: [f64; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Only emit frames between the first and last slice holding a label.
    pub skip_empty_slices: bool,
    /// Renumber segments so that segment numbers equal the label values.
    pub sort_by_label: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            skip_empty_slices: true,
            sort_by_label: false,
        }
    }
}

/// Output of [`SegmentationAssembler::assemble`].
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledSegmentation {
    pub segmentation: Segmentation,
    /// Label value each segment was built from, keyed by segment number.
    pub segment_labels: BTreeMap<SegmentNumber, u16>,
}

pub struct SegmentationAssembler;

impl SegmentationAssembler {
    /// Build a binary segmentation from label volumes
    ///
    /// Every distinct non-zero label of every volume becomes one segment.
    /// Segments are numbered from 1 in the order they are encountered:
    /// volume by volume, ascending label value within a volume.
    ///
    /// # Arguments
    ///
    /// * `volumes` - Label volumes sharing one voxel grid
    /// * `metadata` - Series attributes and one attribute list per volume
    /// * `source_images` - Images referenced by the frames of their slice
    /// * `options` - Slice range and numbering policy
    ///
    /// # Errors
    ///
    /// Returns error if the metadata does not describe every label, the
    /// volumes disagree on their extent, or there are too many segments
    pub fn assemble(
        volumes: &[LabelVolume],
        metadata: &SegmentationMetadata,
        source_images: &[SourceImage],
        options: AssembleOptions,
    ) -> Result<AssembledSegmentation, ConversionError> {
        if volumes.len() != metadata.segment_attributes.len() || volumes.is_empty() {
            return Err(ConversionError::MetadataMismatch {
                volumes: volumes.len(),
                lists: metadata.segment_attributes.len(),
            });
        }
        let first = &volumes[0];
        if volumes.iter().any(|v| !v.same_extent(first)) {
            return Err(ConversionError::InconsistentDimensions);
        }

        let geometry = &first.geometry;
        let [columns, rows, slices] = geometry.extent;
        let orientation = Orientation::new(
            geometry.row_direction.into(),
            geometry.column_direction.into(),
        );
        let mut measures = PixelMeasures::new([geometry.spacing[1], geometry.spacing[0]]);
        measures.slice_thickness = Some(geometry.spacing[2]);
        measures.spacing_between_slices = Some(geometry.spacing[2]);

        let mut segmentation = Segmentation::new(SegmentationType::Binary, rows, columns)
            .with_geometry(orientation, measures);
        segmentation.series = metadata.series.clone();
        segmentation.segments_overlap = if volumes.len() == 1 {
            SegmentsOverlap::No
        } else {
            SegmentsOverlap::Undefined
        };

        let slice_sources = Self::map_source_images(first, source_images);
        let mut referenced = BTreeSet::new();
        let mut segment_labels = BTreeMap::new();

        for (index, volume) in volumes.iter().enumerate() {
            let ranges = volume.label_slice_ranges();
            info!("Found {} label(s) in volume {index}", ranges.len());

            for (label, range) in ranges {
                let attributes = metadata
                    .attributes(index, label)
                    .ok_or(ConversionError::MissingLabelMetadata {
                        volume: index,
                        label,
                    })?;

                let count = segment_labels.len() + 1;
                let number = SegmentNumber::try_from(count)
                    .map_err(|_| ConversionError::TooManySegments(count))?;
                segmentation.add_segment(Self::segment_from_attributes(number, attributes)?)?;
                segment_labels.insert(number, label);

                let (first_slice, last_slice) = if options.skip_empty_slices {
                    (*range.start(), *range.end())
                } else {
                    (0, slices - 1)
                };
                debug!(
                    "Encoding label {label} as segment {number}, slices {first_slice} to {last_slice}"
                );

                for slice in first_slice..=last_slice {
                    let Some(mask) = volume.slice_mask(slice, label) else {
                        continue;
                    };
                    let mut frame =
                        Frame::binary(&mask, geometry.index_to_point([0, 0, slice]), number);
                    frame.frame_content = FrameContent {
                        dimension_index: vec![u32::from(number), (slice - first_slice + 1) as u32],
                        ..Default::default()
                    };
                    frame.derivation = slice_sources[slice].clone();
                    for source in &frame.derivation {
                        if referenced.insert(source.sop_instance_uid.clone()) {
                            segmentation.referenced_instances.push(source.clone());
                        }
                    }
                    segmentation.add_frame(frame)?;
                }
            }
        }

        if options.sort_by_label {
            Self::sort_by_label(&mut segmentation, &segment_labels)?;
            segment_labels = segment_labels.into_values().map(|l| (l, l)).collect();
        }

        Ok(AssembledSegmentation {
            segmentation,
            segment_labels,
        })
    }

    /// Source images per slice of `volume`; images off the grid are skipped.
    fn map_source_images(volume: &LabelVolume, images: &[SourceImage]) -> Vec<Vec<SourceImageRef>> {
        let geometry = &volume.geometry;
        let mut slice_sources = vec![Vec::new(); geometry.extent[2]];
        // source images may cover a wider field of view, only the slice matters
        for image in images {
            let [_, _, slice] = geometry.point_to_index(image.position);
            match usize::try_from(slice).ok().filter(|&s| s < slice_sources.len()) {
                Some(slice) => slice_sources[slice].push(image.reference.clone()),
                None => debug!(
                    "Source image {} maps to slice {slice}, skipping",
                    image.reference.sop_instance_uid
                ),
            }
        }
        let mapped = slice_sources.iter().filter(|s| !s.is_empty()).count();
        info!(
            "{mapped} of {} slices mapped to source images",
            slice_sources.len()
        );
        slice_sources
    }

    fn segment_from_attributes(
        number: SegmentNumber,
        attributes: &SegmentAttributes,
    ) -> Result<Segment, ConversionError> {
        let algorithm_name = match attributes.segment_algorithm_type {
            AlgorithmType::Manual => None,
            _ => Some(
                attributes
                    .segment_algorithm_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .ok_or(ConversionError::MissingAlgorithmName {
                        label: attributes.label_id,
                    })?,
            ),
        };

        let label = attributes
            .segment_label
            .clone()
            .filter(|label| !label.is_empty())
            .or_else(|| {
                attributes
                    .property_type
                    .as_ref()
                    .map(|code| code.code_meaning.clone())
            })
            .unwrap_or_default();

        Ok(Segment {
            number,
            label,
            description: attributes.segment_description.clone(),
            algorithm_type: attributes.segment_algorithm_type,
            algorithm_name,
            category: attributes.category.clone(),
            property_type: attributes.property_type.clone(),
            property_type_modifier: attributes.property_type_modifier.clone(),
            anatomic_region: attributes.anatomic_region.clone(),
            anatomic_region_modifier: attributes.anatomic_region_modifier.clone(),
            tracking_id: attributes.tracking_identifier.clone(),
            tracking_uid: attributes.tracking_uid.clone(),
            recommended_cielab: Some(integer_scaled_cielab_from_srgb(
                attributes.recommended_display_rgb,
            )),
        })
    }

    /// Renumber segments to their label values.
    ///
    /// The label values must be exactly `1..=n` for `n` segments.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::LabelOrder`] if a label is out of range,
    /// used twice, or a frame references an unmapped segment
    pub fn sort_by_label(
        segmentation: &mut Segmentation,
        segment_labels: &BTreeMap<SegmentNumber, u16>,
    ) -> Result<(), ConversionError> {
        info!("Rearranging segments to restore original label order");
        let count = segmentation.segments.len();

        let mut segments = BTreeMap::new();
        for (number, segment) in &segmentation.segments {
            let label = *segment_labels.get(number).ok_or_else(|| {
                ConversionError::LabelOrder(format!("segment {number} has no label"))
            })?;
            if label == 0 || usize::from(label) > count {
                return Err(ConversionError::LabelOrder(format!(
                    "label {label} is out of range 1..={count}"
                )));
            }
            let renumbered = Segment {
                number: label,
                ..segment.clone()
            };
            if segments.insert(label, renumbered).is_some() {
                return Err(ConversionError::LabelOrder(format!(
                    "label {label} is used by more than one segment"
                )));
            }
        }

        for (index, frame) in segmentation.frames.iter_mut().enumerate() {
            let Some(old) = frame.referenced_segment else {
                continue;
            };
            let label = *segment_labels.get(&old).ok_or_else(|| {
                ConversionError::LabelOrder(format!(
                    "frame {index} references unknown segment {old}"
                ))
            })?;
            frame.referenced_segment = Some(label);
            if let Some(first) = frame.frame_content.dimension_index.first_mut() {
                *first = u32::from(label);
            }
        }

        segmentation.segments = segments;
        Ok(())
    }
}
