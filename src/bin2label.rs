//! Conversion of binary segmentations into label maps.

use crate::color::scaled_srgb_from_integer_scaled_cielab;
use crate::context::{ConversionContext, ConversionWarning};
use crate::enums::{ColorModel, SegmentationType, SegmentsOverlap};
use crate::error::{ColorError, ConversionError, GeometryError, OverlapError};
use crate::overlap::OverlapResolver;
use crate::pixels::PixelData;
use crate::segmentation::{
    Frame, FrameContent, PaletteColorLut, SegmentNumber, Segmentation, SourceImageRef,
};

use log::{debug, info};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Stack ID of the single position-sorted stack in label map output.
pub const LABELMAP_STACK_ID: &str = "Frame Position";

/// SOP Class UID of (binary or fractional) Segmentation Storage.
pub const SEGMENTATION_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.66.4";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionFlags {
    /// Fail instead of passing label map input through.
    pub error_if_already_labelmap: bool,
    pub output_color_model: ColorModel,
    /// Generate palette colours for segments without a recommended colour.
    pub force_palette: bool,
}

/// Result of a label map conversion.
#[derive(Clone, Debug, PartialEq)]
pub enum LabelmapConversion {
    Converted(Segmentation),
    /// Input already is a label map and is used as is.
    Unchanged,
}

pub struct BinaryToLabelmapConverter;

impl BinaryToLabelmapConverter {
    /// Convert a binary segmentation into a label map
    ///
    /// # Arguments
    ///
    /// * `source` - Binary segmentation without overlapping segments
    /// * `flags` - Output colour model and handling of label map input
    /// * `ctx` - Receives warnings and provides random palette colours
    ///
    /// # Errors
    ///
    /// Returns error if the source is fractional, segments overlap, a palette
    /// colour is missing or frames are malformed
    pub fn convert(
        source: &Segmentation,
        flags: ConversionFlags,
        ctx: &mut ConversionContext,
    ) -> Result<LabelmapConversion, ConversionError> {
        match source.segmentation_type {
            SegmentationType::Labelmap if flags.error_if_already_labelmap => {
                return Err(ConversionError::AlreadyLabelmap);
            }
            SegmentationType::Labelmap => {
                info!("Segmentation already is a label map, no conversion required");
                return Ok(LabelmapConversion::Unchanged);
            }
            SegmentationType::Fractional => return Err(ConversionError::FractionalToLabelmap),
            SegmentationType::Binary => {}
        }

        let mut resolver = OverlapResolver::new(source);
        if let Some((first, second)) = resolver.overlap_matrix()?.first_overlap() {
            return Err(OverlapError::Overlap { first, second }.into());
        }

        let max_segment = source.segments.keys().next_back().copied().unwrap_or(0);
        let bits = Self::pixel_width(max_segment);
        debug!("Using {bits} bit pixel data for segments up to #{max_segment}");

        let colors = match flags.output_color_model {
            ColorModel::Palette => Some(Self::palette_colors(source, flags.force_palette, ctx)?),
            ColorModel::Monochrome2 => None,
        };

        let logical = resolver.logical_frames()?.to_vec();
        let by_position = resolver.segments_by_logical_position()?.to_vec();
        let num_pixels = source.num_pixels();

        let mut output = Segmentation::new(SegmentationType::Labelmap, source.rows, source.columns);
        output.bits_allocated = bits;
        output.orientation = source.orientation.clone();
        output.pixel_measures = source.pixel_measures;
        output.color_model = flags.output_color_model;
        output.segments_overlap = SegmentsOverlap::No;
        output.series = source.series.clone();
        output.referenced_instances = source.referenced_instances.clone();
        if let Some(uid) = &source.sop_instance_uid {
            output.referenced_instances.push(SourceImageRef {
                sop_class_uid: SEGMENTATION_STORAGE.to_owned(),
                sop_instance_uid: uid.clone(),
            });
        }

        for (index, (logical_frame, pairs)) in logical.iter().zip(&by_position).enumerate() {
            let first = logical_frame.frames().first().copied().unwrap_or_default();
            let position = source.frames[first]
                .position
                .ok_or(GeometryError::MissingPosition { frame: first })?;

            let mut pixels = PixelData::zeros(bits, num_pixels)?;
            let mut derivation = BTreeSet::new();
            for &(segment, frame) in pairs {
                let source_frame = &source.frames[frame];
                let mask = source_frame.pixels.values(num_pixels)?;
                for (i, _) in mask.iter().enumerate().filter(|(_, v)| **v != 0) {
                    pixels.set(i, segment);
                }
                derivation.extend(source_frame.derivation.iter().cloned());
            }

            let mut frame = Frame::new(pixels, Some(position));
            let in_stack_position = index as u32 + 1;
            frame.frame_content = FrameContent {
                stack_id: Some(LABELMAP_STACK_ID.to_owned()),
                in_stack_position: Some(in_stack_position),
                dimension_index: vec![1, in_stack_position],
                comments: Self::frame_comments(source, pairs.iter().map(|(s, _)| *s)),
            };
            frame.derivation = derivation.into_iter().collect();
            output.add_frame(frame)?;
        }

        for (&number, segment) in &source.segments {
            let mut segment = segment.clone();
            if colors.is_some() {
                segment.recommended_cielab = None;
            }
            output.segments.insert(number, segment);
        }
        output.palette = colors.map(|colors| Self::palette_lut(&colors, max_segment as usize, bits));

        info!(
            "Converted {} frames into {} label map frames",
            source.frames.len(),
            output.frames.len()
        );
        Ok(LabelmapConversion::Converted(output))
    }

    /// 8 bit pixels if every segment number fits into a byte.
    pub fn pixel_width(max_segment: SegmentNumber) -> u16 {
        if max_segment <= u8::MAX as SegmentNumber {
            8
        } else {
            16
        }
    }

    /// Recommended CIELab colour of every segment.
    ///
    /// # Errors
    ///
    /// Returns [`ColorError::MissingCIELab`] for the first segment without a
    /// colour unless `force_palette` is set, in which case a random colour is
    /// generated.
    pub fn palette_colors(
        source: &Segmentation,
        force_palette: bool,
        ctx: &mut ConversionContext,
    ) -> Result<BTreeMap<SegmentNumber, [u16; 3]>, ColorError> {
        let mut colors = BTreeMap::new();
        for (&number, segment) in &source.segments {
            let lab = match segment.recommended_cielab {
                Some(lab) => lab,
                None if force_palette => {
                    let rng = ctx.rng();
                    let lab = [
                        rng.random_range(1..=u16::MAX),
                        rng.random_range(1..=u16::MAX),
                        rng.random_range(1..=u16::MAX),
                    ];
                    ctx.warn(ConversionWarning::RandomPaletteColor { segment: number });
                    lab
                }
                None => return Err(ColorError::MissingCIELab { segment: number }),
            };
            colors.insert(number, lab);
        }
        Ok(colors)
    }

    fn palette_lut(colors: &BTreeMap<SegmentNumber, [u16; 3]>, entries: usize, bits: u16) -> PaletteColorLut {
        let max = if bits == 16 {
            u16::MAX
        } else {
            u8::MAX as u16
        };
        let mut lut = PaletteColorLut {
            entries,
            first_mapped: 1,
            bits,
            red: vec![0; entries],
            green: vec![0; entries],
            blue: vec![0; entries],
        };
        for (&segment, &lab) in colors {
            let Some(i) = (segment as usize).checked_sub(1) else {
                continue;
            };
            let [r, g, b] = scaled_srgb_from_integer_scaled_cielab(lab, max);
            lut.red[i] = r;
            lut.green[i] = g;
            lut.blue[i] = b;
            debug!("Segment #{segment} uses RGB colour ({r}, {g}, {b})");
        }
        lut
    }

    fn frame_comments(
        source: &Segmentation,
        segments: impl Iterator<Item = SegmentNumber>,
    ) -> Option<String> {
        let labels: Vec<&str> = segments
            .filter_map(|s| source.segments.get(&s))
            .map(|s| s.label.as_str())
            .collect();
        (!labels.is_empty()).then(|| labels.join("; "))
    }
}
