//! Reading segmentation and source image datasets with dicom-rs.

use crate::assemble::SourceImage;
use crate::enums::{AlgorithmType, ColorModel, SegmentationType, SegmentsOverlap};
use crate::error::{OverlapError, PixelFormatError};
use crate::geometry::Orientation;
use crate::metadata::SeriesInfo;
use crate::paramap::{ParametricFrame, ParametricMap, ParametricMapMetadata};
use crate::pixels::{PixelData, extract_packed_frame};
use crate::segmentation::{
    CodedConcept, Frame, FrameContent, OrientationRecord, PaletteColorLut, PixelMeasures, Segment,
    Segmentation, SourceImageRef,
};

use dicom::core::Tag;
use dicom::core::value::ConvertValueError;
use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use dicom_dictionary_std::tags;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentationLoaderError {
    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Unsupported segmentation type: {0}")]
    UnsupportedSegmentationType(String),

    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Pixel format error: {0}")]
    PixelFormat(#[from] PixelFormatError),

    #[error("Invalid segment: {0}")]
    Segment(#[from] OverlapError),

    #[error("Value conversion error: {0}")]
    Convert(#[from] ConvertValueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

fn items(obj: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    obj.get(tag).and_then(|e| e.items()).unwrap_or(&[])
}

fn first_item(obj: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    items(obj, tag).first()
}

fn string(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = obj.get(tag)?.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    (!value.is_empty()).then(|| value.to_owned())
}

fn floats(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.get(tag)?.to_multi_float64().ok()
}

fn float(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    obj.get(tag)?.to_float64().ok()
}

fn uint(obj: &InMemDicomObject, tag: Tag) -> Option<u32> {
    obj.get(tag)?.to_int::<u32>().ok()
}

fn coded_concept(obj: &InMemDicomObject, tag: Tag) -> Option<CodedConcept> {
    let item = first_item(obj, tag)?;
    Some(CodedConcept {
        code_value: string(item, tags::CODE_VALUE).unwrap_or_default(),
        coding_scheme_designator: string(item, tags::CODING_SCHEME_DESIGNATOR).unwrap_or_default(),
        code_meaning: string(item, tags::CODE_MEANING).unwrap_or_default(),
    })
}

fn source_image_ref(obj: &InMemDicomObject) -> Option<SourceImageRef> {
    Some(SourceImageRef {
        sop_class_uid: string(obj, tags::REFERENCED_SOP_CLASS_UID)?,
        sop_instance_uid: string(obj, tags::REFERENCED_SOP_INSTANCE_UID)?,
    })
}

/// Functional group macro of one frame: per-frame content wins over shared.
fn functional_group<'a>(
    per_frame: Option<&'a InMemDicomObject>,
    shared: Option<&'a InMemDicomObject>,
    sequence: Tag,
) -> Option<&'a InMemDicomObject> {
    per_frame
        .and_then(|fg| first_item(fg, sequence))
        .or_else(|| shared.and_then(|fg| first_item(fg, sequence)))
}

pub struct SegmentationLoader;

impl SegmentationLoader {
    /// Load a segmentation from a DICOM SEG file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Segmentation, SegmentationLoaderError> {
        let object = open_file(path.as_ref())?;
        Self::load_from_dicom_object(&object)
    }

    /// Load a segmentation from a DICOM SEG object
    ///
    /// # Arguments
    ///
    /// * `dicom_object` - Dataset of a segmentation instance
    ///
    /// # Errors
    ///
    /// Returns error if required attributes are missing or the pixel data
    /// does not match the declared frame layout
    pub fn load_from_dicom_object(
        dicom_object: &InMemDicomObject,
    ) -> Result<Segmentation, SegmentationLoaderError> {
        let type_value = string(dicom_object, tags::SEGMENTATION_TYPE)
            .ok_or(SegmentationLoaderError::MissingAttribute("SegmentationType"))?;
        let segmentation_type = SegmentationType::from_dicom(&type_value)
            .ok_or(SegmentationLoaderError::UnsupportedSegmentationType(type_value))?;
        let rows = uint(dicom_object, tags::ROWS)
            .ok_or(SegmentationLoaderError::MissingAttribute("Rows"))? as usize;
        let columns = uint(dicom_object, tags::COLUMNS)
            .ok_or(SegmentationLoaderError::MissingAttribute("Columns"))? as usize;

        let mut segmentation = Segmentation::new(segmentation_type, rows, columns);
        if let Some(bits) = uint(dicom_object, tags::BITS_ALLOCATED) {
            segmentation.bits_allocated =
                u16::try_from(bits).map_err(|_| PixelFormatError::UnsupportedBitDepth(bits))?;
        }
        segmentation.sop_instance_uid = string(dicom_object, tags::SOP_INSTANCE_UID);
        segmentation.segments_overlap = string(dicom_object, tags::SEGMENTS_OVERLAP)
            .map_or(SegmentsOverlap::Undefined, |v| SegmentsOverlap::from_dicom(&v));
        segmentation.series = Self::read_series(dicom_object);
        segmentation.referenced_instances = Self::read_referenced_instances(dicom_object);

        if let Some(model) = string(dicom_object, tags::PHOTOMETRIC_INTERPRETATION)
            .and_then(|v| ColorModel::from_dicom(&v))
        {
            segmentation.color_model = model;
        }
        if segmentation.color_model == ColorModel::Palette {
            segmentation.palette = Self::read_palette(dicom_object);
        }

        for item in items(dicom_object, tags::SEGMENT_SEQUENCE) {
            match Self::read_segment(item) {
                Some(segment) => segmentation.add_segment(segment)?,
                None => warn!("Skipping segment item without a segment number"),
            }
        }

        let shared = first_item(dicom_object, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE);
        let per_frame = items(dicom_object, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE);
        segmentation.orientation = Self::read_orientation(shared, per_frame);
        segmentation.pixel_measures = functional_group(per_frame.first(), shared, tags::PIXEL_MEASURES_SEQUENCE)
            .and_then(Self::read_pixel_measures);

        let number_of_frames = uint(dicom_object, tags::NUMBER_OF_FRAMES).unwrap_or(1) as usize;
        let pixel_data = dicom_object
            .get(tags::PIXEL_DATA)
            .ok_or(SegmentationLoaderError::MissingAttribute("PixelData"))?
            .to_bytes()?;

        let num_pixels = segmentation.num_pixels();
        for index in 0..number_of_frames {
            let pixels = Self::frame_pixels(&pixel_data, segmentation.bits_allocated, index, num_pixels)?;
            let frame = Self::read_frame(pixels, per_frame.get(index), shared);
            segmentation.add_frame(frame)?;
        }

        info!(
            "Loaded {:?} segmentation with {} frames and {} segments",
            segmentation.segmentation_type,
            segmentation.frames.len(),
            segmentation.segments.len()
        );
        Ok(segmentation)
    }

    fn frame_pixels(
        data: &[u8],
        bits_allocated: u16,
        index: usize,
        num_pixels: usize,
    ) -> Result<PixelData, PixelFormatError> {
        match bits_allocated {
            1 => Ok(PixelData::Packed(extract_packed_frame(data, index, num_pixels)?)),
            8 | 16 => {
                let frame_len = num_pixels * usize::from(bits_allocated / 8);
                let start = index * frame_len;
                let bytes = data.get(start..).unwrap_or(&[]);
                if bytes.len() < frame_len {
                    return Err(PixelFormatError::LengthMismatch {
                        expected: start + frame_len,
                        actual: data.len(),
                    });
                }
                PixelData::from_raw(bits_allocated, &bytes[..frame_len], num_pixels)
            }
            other => Err(PixelFormatError::UnsupportedBitDepth(u32::from(other))),
        }
    }

    fn read_frame(
        pixels: PixelData,
        per_frame: Option<&InMemDicomObject>,
        shared: Option<&InMemDicomObject>,
    ) -> Frame {
        let position = functional_group(per_frame, shared, tags::PLANE_POSITION_SEQUENCE)
            .and_then(|item| floats(item, tags::IMAGE_POSITION_PATIENT))
            .and_then(|p| <[f64; 3]>::try_from(p).ok());

        let mut frame = Frame::new(pixels, position);
        frame.referenced_segment = functional_group(per_frame, shared, tags::SEGMENT_IDENTIFICATION_SEQUENCE)
            .and_then(|item| uint(item, tags::REFERENCED_SEGMENT_NUMBER))
            .and_then(|n| u16::try_from(n).ok());

        if let Some(content) = per_frame.and_then(|fg| first_item(fg, tags::FRAME_CONTENT_SEQUENCE)) {
            frame.frame_content = FrameContent {
                stack_id: string(content, tags::STACK_ID),
                in_stack_position: uint(content, tags::IN_STACK_POSITION_NUMBER),
                dimension_index: content
                    .get(tags::DIMENSION_INDEX_VALUES)
                    .and_then(|e| e.to_multi_int::<u32>().ok())
                    .unwrap_or_default(),
                comments: string(content, tags::FRAME_COMMENTS),
            };
        }

        if let Some(fg) = per_frame {
            frame.derivation = items(fg, tags::DERIVATION_IMAGE_SEQUENCE)
                .iter()
                .flat_map(|derivation| items(derivation, tags::SOURCE_IMAGE_SEQUENCE))
                .filter_map(source_image_ref)
                .collect();
        }
        frame
    }

    fn read_orientation(
        shared: Option<&InMemDicomObject>,
        per_frame: &[InMemDicomObject],
    ) -> OrientationRecord {
        let orientation = |fg: &InMemDicomObject| {
            first_item(fg, tags::PLANE_ORIENTATION_SEQUENCE)
                .and_then(|item| floats(item, tags::IMAGE_ORIENTATION_PATIENT))
                .and_then(|values| Orientation::from_cosines(&values))
        };

        if let Some(shared) = shared.and_then(orientation) {
            return OrientationRecord::Shared(shared);
        }
        let per_frame: Option<Vec<_>> = per_frame.iter().map(orientation).collect();
        match per_frame {
            Some(list) if !list.is_empty() => {
                debug!("Plane orientation is stored per frame");
                OrientationRecord::PerFrame(list)
            }
            _ => OrientationRecord::Missing,
        }
    }

    fn read_pixel_measures(item: &InMemDicomObject) -> Option<PixelMeasures> {
        let spacing = floats(item, tags::PIXEL_SPACING)?;
        let mut measures = PixelMeasures::new([*spacing.first()?, *spacing.get(1)?]);
        measures.slice_thickness = float(item, tags::SLICE_THICKNESS);
        measures.spacing_between_slices = float(item, tags::SPACING_BETWEEN_SLICES);
        Some(measures)
    }

    fn read_segment(item: &InMemDicomObject) -> Option<Segment> {
        let number = u16::try_from(uint(item, tags::SEGMENT_NUMBER)?).ok()?;
        let mut segment = Segment::new(number, string(item, tags::SEGMENT_LABEL).unwrap_or_default());
        segment.description = string(item, tags::SEGMENT_DESCRIPTION);
        segment.algorithm_type = string(item, tags::SEGMENT_ALGORITHM_TYPE)
            .and_then(|v| AlgorithmType::from_dicom(&v))
            .unwrap_or_default();
        segment.algorithm_name = string(item, tags::SEGMENT_ALGORITHM_NAME);
        segment.category = coded_concept(item, tags::SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE);
        segment.property_type = coded_concept(item, tags::SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE);
        segment.property_type_modifier = first_item(item, tags::SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE)
            .and_then(|t| coded_concept(t, tags::SEGMENTED_PROPERTY_TYPE_MODIFIER_CODE_SEQUENCE));
        segment.anatomic_region = coded_concept(item, tags::ANATOMIC_REGION_SEQUENCE);
        segment.anatomic_region_modifier = first_item(item, tags::ANATOMIC_REGION_SEQUENCE)
            .and_then(|r| coded_concept(r, tags::ANATOMIC_REGION_MODIFIER_SEQUENCE));
        segment.tracking_id = string(item, tags::TRACKING_ID);
        segment.tracking_uid = string(item, tags::TRACKING_UID);
        segment.recommended_cielab = item
            .get(tags::RECOMMENDED_DISPLAY_CIE_LAB_VALUE)
            .and_then(|e| e.to_multi_int::<u16>().ok())
            .and_then(|v| <[u16; 3]>::try_from(v).ok());
        Some(segment)
    }

    fn read_series(dicom_object: &InMemDicomObject) -> SeriesInfo {
        let defaults = SeriesInfo::default();
        let or = |tag, default: String| string(dicom_object, tag).unwrap_or(default);
        SeriesInfo {
            content_creator_name: or(tags::CONTENT_CREATOR_NAME, defaults.content_creator_name),
            clinical_trial_coordinating_center_name: or(
                tags::CLINICAL_TRIAL_COORDINATING_CENTER_NAME,
                defaults.clinical_trial_coordinating_center_name,
            ),
            clinical_trial_series_id: or(tags::CLINICAL_TRIAL_SERIES_ID, defaults.clinical_trial_series_id),
            clinical_trial_time_point_id: or(
                tags::CLINICAL_TRIAL_TIME_POINT_ID,
                defaults.clinical_trial_time_point_id,
            ),
            series_description: or(tags::SERIES_DESCRIPTION, defaults.series_description),
            series_number: or(tags::SERIES_NUMBER, defaults.series_number),
            instance_number: or(tags::INSTANCE_NUMBER, defaults.instance_number),
            body_part_examined: or(tags::BODY_PART_EXAMINED, defaults.body_part_examined),
        }
    }

    fn read_referenced_instances(dicom_object: &InMemDicomObject) -> Vec<SourceImageRef> {
        let mut seen = BTreeSet::new();
        items(dicom_object, tags::REFERENCED_SERIES_SEQUENCE)
            .iter()
            .flat_map(|series| items(series, tags::REFERENCED_INSTANCE_SEQUENCE))
            .filter_map(source_image_ref)
            .filter(|r| seen.insert(r.sop_instance_uid.clone()))
            .collect()
    }

    fn read_palette(dicom_object: &InMemDicomObject) -> Option<PaletteColorLut> {
        let descriptor = dicom_object
            .get(tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR)?
            .to_multi_int::<u16>()
            .ok()?;
        let [entries, first_mapped, bits] = <[u16; 3]>::try_from(descriptor).ok()?;
        for tag in [tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR, tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR] {
            if dicom_object.get(tag).is_none() {
                warn!("Palette descriptor {tag} is missing, assuming it matches red");
            }
        }
        let table = |tag| {
            dicom_object
                .get(tag)
                .and_then(|e| e.to_multi_int::<u16>().ok())
        };
        Some(PaletteColorLut {
            // 0 stands for 2^16 entries
            entries: if entries == 0 { 65536 } else { usize::from(entries) },
            first_mapped,
            bits,
            red: table(tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA)?,
            green: table(tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA)?,
            blue: table(tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DATA)?,
        })
    }
}

pub struct ParametricMapLoader;

impl ParametricMapLoader {
    /// Load a parametric map from a DICOM file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<ParametricMap, SegmentationLoaderError> {
        let object = open_file(path.as_ref())?;
        Self::load_from_dicom_object(&object)
    }

    /// Load a parametric map from a DICOM object
    ///
    /// Float, double float and 16-bit integer pixel data are read. Integer
    /// values are kept as stored; the real world value mapping of the first
    /// frame ends up in the metadata.
    ///
    /// # Errors
    ///
    /// Returns error if rows, columns or pixel data are missing, or the pixel
    /// data holds fewer values than the frames need
    pub fn load_from_dicom_object(
        dicom_object: &InMemDicomObject,
    ) -> Result<ParametricMap, SegmentationLoaderError> {
        let rows = uint(dicom_object, tags::ROWS)
            .ok_or(SegmentationLoaderError::MissingAttribute("Rows"))? as usize;
        let columns = uint(dicom_object, tags::COLUMNS)
            .ok_or(SegmentationLoaderError::MissingAttribute("Columns"))? as usize;
        let mut map = ParametricMap::new(rows, columns);

        let shared = first_item(dicom_object, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE);
        let per_frame = items(dicom_object, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE);
        map.orientation = SegmentationLoader::read_orientation(shared, per_frame);
        map.pixel_measures = functional_group(per_frame.first(), shared, tags::PIXEL_MEASURES_SEQUENCE)
            .and_then(SegmentationLoader::read_pixel_measures);
        map.metadata = Self::read_metadata(dicom_object, per_frame.first(), shared);

        let values = Self::pixel_values(dicom_object)?;
        let num_pixels = map.num_pixels();
        let number_of_frames = uint(dicom_object, tags::NUMBER_OF_FRAMES).unwrap_or(1) as usize;
        for index in 0..number_of_frames {
            let start = index * num_pixels;
            let frame_values = values
                .get(start..start + num_pixels)
                .ok_or(PixelFormatError::LengthMismatch {
                    expected: start + num_pixels,
                    actual: values.len(),
                })?;
            let position = functional_group(per_frame.get(index), shared, tags::PLANE_POSITION_SEQUENCE)
                .and_then(|item| floats(item, tags::IMAGE_POSITION_PATIENT))
                .and_then(|p| <[f64; 3]>::try_from(p).ok());
            map.add_frame(ParametricFrame {
                position,
                values: frame_values.to_vec(),
            })?;
        }

        info!(
            "Loaded parametric map with {} frames of {rows} x {columns}",
            map.frames.len()
        );
        Ok(map)
    }

    fn pixel_values(dicom_object: &InMemDicomObject) -> Result<Vec<f32>, SegmentationLoaderError> {
        if let Some(element) = dicom_object.get(tags::FLOAT_PIXEL_DATA) {
            return Ok(element.to_multi_float32()?);
        }
        if let Some(element) = dicom_object.get(tags::DOUBLE_FLOAT_PIXEL_DATA) {
            debug!("Narrowing double float pixel data to single precision");
            return Ok(element.to_multi_float64()?.into_iter().map(|v| v as f32).collect());
        }

        let bytes = dicom_object
            .get(tags::PIXEL_DATA)
            .ok_or(SegmentationLoaderError::MissingAttribute("FloatPixelData"))?
            .to_bytes()?;
        let bits = uint(dicom_object, tags::BITS_ALLOCATED).unwrap_or(16);
        if bits != 16 {
            return Err(PixelFormatError::UnsupportedBitDepth(bits).into());
        }
        let signed = uint(dicom_object, tags::PIXEL_REPRESENTATION) == Some(1);
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| {
                let raw = [pair[0], pair[1]];
                if signed {
                    f32::from(i16::from_le_bytes(raw))
                } else {
                    f32::from(u16::from_le_bytes(raw))
                }
            })
            .collect())
    }

    fn read_metadata(
        dicom_object: &InMemDicomObject,
        first_frame: Option<&InMemDicomObject>,
        shared: Option<&InMemDicomObject>,
    ) -> ParametricMapMetadata {
        let mut metadata = ParametricMapMetadata::default();
        let set = |target: &mut String, tag| {
            if let Some(value) = string(dicom_object, tag) {
                *target = value;
            }
        };
        set(&mut metadata.series_description, tags::SERIES_DESCRIPTION);
        set(&mut metadata.series_number, tags::SERIES_NUMBER);
        set(&mut metadata.instance_number, tags::INSTANCE_NUMBER);
        set(&mut metadata.body_part_examined, tags::BODY_PART_EXAMINED);
        if let Some(contrast) = dicom_object
            .get(tags::IMAGE_TYPE)
            .and_then(|e| e.to_multi_str().ok())
            .and_then(|values| values.get(3).map(|v| v.trim().to_owned()))
        {
            metadata.derived_pixel_contrast = contrast;
        }

        if let Some(mapping) = functional_group(first_frame, shared, tags::REAL_WORLD_VALUE_MAPPING_SEQUENCE) {
            metadata.real_world_value_slope = float(mapping, tags::REAL_WORLD_VALUE_SLOPE).unwrap_or(1.0);
            metadata.real_world_value_intercept = float(mapping, tags::REAL_WORLD_VALUE_INTERCEPT).unwrap_or(0.0);
            metadata.measurement_units_code = coded_concept(mapping, tags::MEASUREMENT_UNITS_CODE_SEQUENCE);
            for quantity in items(mapping, tags::QUANTITY_DEFINITION_SEQUENCE) {
                let name = coded_concept(quantity, tags::CONCEPT_NAME_CODE_SEQUENCE)
                    .map(|c| c.code_meaning)
                    .unwrap_or_default();
                match name.as_str() {
                    "Quantity" => {
                        metadata.quantity_value_code = coded_concept(quantity, tags::CONCEPT_CODE_SEQUENCE)
                    }
                    "Measurement Method" => {
                        metadata.measurement_method_code = coded_concept(quantity, tags::CONCEPT_CODE_SEQUENCE)
                    }
                    "Source image diffusion b-value" => metadata
                        .source_image_diffusion_b_values
                        .extend(string(quantity, tags::NUMERIC_VALUE)),
                    other => debug!("Ignoring quantity definition {other:?}"),
                }
            }
        }

        if let Some(derivation) = functional_group(first_frame, shared, tags::DERIVATION_IMAGE_SEQUENCE) {
            metadata.derivation_code = coded_concept(derivation, tags::DERIVATION_CODE_SEQUENCE);
            if let Some(description) = string(derivation, tags::DERIVATION_DESCRIPTION) {
                metadata.derivation_description = description;
            }
        }
        if let Some(anatomy) = functional_group(first_frame, shared, tags::FRAME_ANATOMY_SEQUENCE) {
            metadata.anatomic_region_sequence = coded_concept(anatomy, tags::ANATOMIC_REGION_SEQUENCE);
            if let Some(laterality) = string(anatomy, tags::FRAME_LATERALITY) {
                metadata.frame_laterality = laterality;
            }
        }
        metadata
    }
}

pub struct SourceImageLoader;

impl SourceImageLoader {
    /// Collect source image references from DICOM objects
    ///
    /// Objects without SOP instance UID or image position are skipped, as
    /// are repeated instances.
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Vec<SourceImage> {
        Self::collect_unique(dicom_objects.iter().map(|object| &**object))
    }

    fn collect_unique<'a>(
        dicom_objects: impl IntoIterator<Item = &'a InMemDicomObject>,
    ) -> Vec<SourceImage> {
        let mut seen = BTreeSet::new();
        dicom_objects
            .into_iter()
            .filter_map(Self::extract_source_image)
            .filter(|image| seen.insert(image.reference.sop_instance_uid.clone()))
            .collect()
    }

    /// Load source images from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
    ) -> Result<Vec<SourceImage>, SegmentationLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(SegmentationLoaderError::NoValidImages);
        }

        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path) {
                Ok(object) => Some(object),
                Err(err) => {
                    warn!("Skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();

        let images = Self::load_from_dicom_objects(&objects);
        if images.is_empty() {
            return Err(SegmentationLoaderError::NoValidImages);
        }
        info!("Loaded {} source images", images.len());
        Ok(images)
    }

    fn extract_source_image(dicom_object: &InMemDicomObject) -> Option<SourceImage> {
        let position = floats(dicom_object, tags::IMAGE_POSITION_PATIENT)?;
        Some(SourceImage {
            reference: SourceImageRef {
                sop_class_uid: string(dicom_object, tags::SOP_CLASS_UID)?,
                sop_instance_uid: string(dicom_object, tags::SOP_INSTANCE_UID)?,
            },
            position: <[f64; 3]>::try_from(position).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    fn element(tag: Tag, vr: VR, value: PrimitiveValue) -> DataElement<InMemDicomObject> {
        DataElement::new(tag, vr, value)
    }

    fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
        DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
    }

    fn decimals(values: &[f64]) -> PrimitiveValue {
        PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
    }

    fn item(elements: Vec<DataElement<InMemDicomObject>>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(elements)
    }

    fn frame_groups(z: f64, segment: u16) -> InMemDicomObject {
        item(vec![
            sequence(
                tags::PLANE_POSITION_SEQUENCE,
                vec![item(vec![element(
                    tags::IMAGE_POSITION_PATIENT,
                    VR::DS,
                    decimals(&[0.0, 0.0, z]),
                )])],
            ),
            sequence(
                tags::SEGMENT_IDENTIFICATION_SEQUENCE,
                vec![item(vec![element(
                    tags::REFERENCED_SEGMENT_NUMBER,
                    VR::US,
                    PrimitiveValue::from(segment),
                )])],
            ),
        ])
    }

    fn binary_seg() -> InMemDicomObject {
        let shared = item(vec![
            sequence(
                tags::PLANE_ORIENTATION_SEQUENCE,
                vec![item(vec![element(
                    tags::IMAGE_ORIENTATION_PATIENT,
                    VR::DS,
                    decimals(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                )])],
            ),
            sequence(
                tags::PIXEL_MEASURES_SEQUENCE,
                vec![item(vec![
                    element(tags::PIXEL_SPACING, VR::DS, decimals(&[0.5, 0.5])),
                    element(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from("2")),
                ])],
            ),
        ]);
        let segment = item(vec![
            element(tags::SEGMENT_NUMBER, VR::US, PrimitiveValue::from(1_u16)),
            element(tags::SEGMENT_LABEL, VR::LO, PrimitiveValue::from("Liver")),
            element(tags::SEGMENT_ALGORITHM_TYPE, VR::CS, PrimitiveValue::from("MANUAL")),
            element(
                tags::RECOMMENDED_DISPLAY_CIE_LAB_VALUE,
                VR::US,
                PrimitiveValue::U16([43803_u16, 26565, 37722].into_iter().collect()),
            ),
        ]);

        // two 3x3 frames packed without padding, both set their first pixel
        let pixel_data: Vec<u8> = vec![0b0000_0001, 0b0000_0010, 0b0000_0000];

        item(vec![
            element(tags::SEGMENTATION_TYPE, VR::CS, PrimitiveValue::from("BINARY")),
            element(tags::ROWS, VR::US, PrimitiveValue::from(3_u16)),
            element(tags::COLUMNS, VR::US, PrimitiveValue::from(3_u16)),
            element(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(1_u16)),
            element(tags::NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::from("2")),
            element(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("7")),
            sequence(tags::SEGMENT_SEQUENCE, vec![segment]),
            sequence(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE, vec![shared]),
            sequence(
                tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
                vec![frame_groups(0.0, 1), frame_groups(2.0, 1)],
            ),
            element(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(pixel_data)),
        ])
    }

    #[test]
    fn loads_binary_segmentation() {
        let seg = SegmentationLoader::load_from_dicom_object(&binary_seg()).unwrap();
        assert_eq!(seg.segmentation_type, SegmentationType::Binary);
        assert_eq!((seg.rows, seg.columns), (3, 3));
        assert_eq!(seg.frames.len(), 2);
        assert_eq!(seg.shared_orientation(), Some(&Orientation::axial()));
        assert_eq!(seg.pixel_measures.unwrap().declared_slice_thickness(), Some(2.0));
        assert_eq!(seg.series.series_number, "7");
        assert_eq!(seg.series.content_creator_name, "Reader1");

        let segment = &seg.segments[&1];
        assert_eq!(segment.label, "Liver");
        assert_eq!(segment.recommended_cielab, Some([43803, 26565, 37722]));

        assert_eq!(seg.frames[1].position, Some([0.0, 0.0, 2.0]));
        assert_eq!(seg.frames[1].referenced_segment, Some(1));
        assert_eq!(
            seg.frames[0].pixels.values(9).unwrap().as_ref(),
            &[1, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            seg.frames[1].pixels.values(9).unwrap().as_ref(),
            &[1, 0, 0, 0, 0, 0, 0, 0, 0],
            "second frame starts at bit 9"
        );
    }

    #[test]
    fn missing_segmentation_type_is_an_error() {
        let mut object = binary_seg();
        object.remove_element(tags::SEGMENTATION_TYPE);
        assert!(matches!(
            SegmentationLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::MissingAttribute("SegmentationType"))
        ));
    }

    #[test]
    fn truncated_pixel_data_is_an_error() {
        let mut object = binary_seg();
        object.put(element(
            tags::NUMBER_OF_FRAMES,
            VR::IS,
            PrimitiveValue::from("3"),
        ));
        assert!(matches!(
            SegmentationLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::PixelFormat(
                PixelFormatError::LengthMismatch { .. }
            ))
        ));
    }

    #[test]
    fn segment_number_zero_is_rejected() {
        let mut object = binary_seg();
        let background = item(vec![
            element(tags::SEGMENT_NUMBER, VR::US, PrimitiveValue::from(0_u16)),
            element(tags::SEGMENT_LABEL, VR::LO, PrimitiveValue::from("Background")),
        ]);
        object.put(sequence(tags::SEGMENT_SEQUENCE, vec![background]));
        assert!(matches!(
            SegmentationLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::Segment(
                OverlapError::ReservedSegmentNumber
            ))
        ));
    }

    #[test]
    fn unsupported_bits_allocated_is_an_error() {
        let mut object = binary_seg();
        object.put(element(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(12_u16)));
        assert!(matches!(
            SegmentationLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::PixelFormat(
                PixelFormatError::UnsupportedBitDepth(12)
            ))
        ));

        // wider than any pixel depth, must not wrap around to a valid one
        object.put(element(tags::BITS_ALLOCATED, VR::UL, PrimitiveValue::from(65_544_u32)));
        assert!(matches!(
            SegmentationLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::PixelFormat(
                PixelFormatError::UnsupportedBitDepth(65_544)
            ))
        ));
    }

    fn code(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject {
        item(vec![
            element(tags::CODE_VALUE, VR::SH, PrimitiveValue::from(value)),
            element(tags::CODING_SCHEME_DESIGNATOR, VR::SH, PrimitiveValue::from(scheme)),
            element(tags::CODE_MEANING, VR::LO, PrimitiveValue::from(meaning)),
        ])
    }

    fn adc_map() -> InMemDicomObject {
        let quantity = item(vec![
            sequence(tags::CONCEPT_NAME_CODE_SEQUENCE, vec![code("246205007", "SCT", "Quantity")]),
            sequence(
                tags::CONCEPT_CODE_SEQUENCE,
                vec![code("113041", "DCM", "Apparent Diffusion Coefficient")],
            ),
        ]);
        let b_value = item(vec![
            sequence(
                tags::CONCEPT_NAME_CODE_SEQUENCE,
                vec![code("113045", "DCM", "Source image diffusion b-value")],
            ),
            element(tags::NUMERIC_VALUE, VR::DS, PrimitiveValue::from("1400")),
        ]);
        let mapping = item(vec![
            element(tags::REAL_WORLD_VALUE_SLOPE, VR::FD, PrimitiveValue::from(0.001_f64)),
            element(tags::REAL_WORLD_VALUE_INTERCEPT, VR::FD, PrimitiveValue::from(0.0_f64)),
            sequence(tags::MEASUREMENT_UNITS_CODE_SEQUENCE, vec![code("um2/s", "UCUM", "um2/s")]),
            sequence(tags::QUANTITY_DEFINITION_SEQUENCE, vec![quantity, b_value]),
        ]);
        let shared = item(vec![
            sequence(
                tags::PLANE_ORIENTATION_SEQUENCE,
                vec![item(vec![element(
                    tags::IMAGE_ORIENTATION_PATIENT,
                    VR::DS,
                    decimals(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                )])],
            ),
            sequence(
                tags::PIXEL_MEASURES_SEQUENCE,
                vec![item(vec![element(tags::PIXEL_SPACING, VR::DS, decimals(&[1.0, 1.0]))])],
            ),
            sequence(tags::REAL_WORLD_VALUE_MAPPING_SEQUENCE, vec![mapping]),
        ]);
        let position = |z: f64| {
            item(vec![sequence(
                tags::PLANE_POSITION_SEQUENCE,
                vec![item(vec![element(
                    tags::IMAGE_POSITION_PATIENT,
                    VR::DS,
                    decimals(&[0.0, 0.0, z]),
                )])],
            )])
        };

        item(vec![
            element(
                tags::IMAGE_TYPE,
                VR::CS,
                PrimitiveValue::Strs(
                    ["DERIVED", "PRIMARY", "", "ADC"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
            ),
            element(tags::ROWS, VR::US, PrimitiveValue::from(1_u16)),
            element(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)),
            element(tags::NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::from("2")),
            element(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from("ADC map")),
            sequence(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE, vec![shared]),
            sequence(
                tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
                vec![position(3.0), position(0.0)],
            ),
            element(
                tags::FLOAT_PIXEL_DATA,
                VR::OF,
                PrimitiveValue::F32([1.5_f32, 2.5, 800.0, 1200.0].into_iter().collect()),
            ),
        ])
    }

    #[test]
    fn loads_float_parametric_map() {
        let map = ParametricMapLoader::load_from_dicom_object(&adc_map()).unwrap();
        assert_eq!((map.rows, map.columns), (1, 2));
        assert_eq!(map.frames.len(), 2);
        assert_eq!(map.frames[0].values, vec![1.5, 2.5]);
        assert_eq!(map.frames[1].values, vec![800.0, 1200.0]);
        assert_eq!(map.frames[1].position, Some([0.0, 0.0, 0.0]));
        assert_eq!(map.orientation.common(), Some(&Orientation::axial()));

        let metadata = &map.metadata;
        assert_eq!(metadata.series_description, "ADC map");
        assert_eq!(metadata.derived_pixel_contrast, "ADC");
        assert_eq!(metadata.real_world_value_slope, 0.001);
        assert_eq!(
            metadata.quantity_value_code.as_ref().map(|c| c.code_meaning.as_str()),
            Some("Apparent Diffusion Coefficient")
        );
        assert_eq!(
            metadata.measurement_units_code.as_ref().map(|c| c.coding_scheme_designator.as_str()),
            Some("UCUM")
        );
        assert_eq!(metadata.source_image_diffusion_b_values, vec!["1400".to_string()]);
        assert_eq!(metadata.frame_laterality, "U");
    }

    #[test]
    fn short_parametric_pixel_data_is_an_error() {
        let mut object = adc_map();
        object.put(element(tags::NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::from("3")));
        assert!(matches!(
            ParametricMapLoader::load_from_dicom_object(&object),
            Err(SegmentationLoaderError::PixelFormat(
                PixelFormatError::LengthMismatch {
                    expected: 6,
                    actual: 4
                }
            ))
        ));
    }

    #[test]
    fn integer_parametric_pixels_respect_pixel_representation() {
        let mut object = adc_map();
        object.remove_element(tags::FLOAT_PIXEL_DATA);
        let bytes: Vec<u8> = [-2_i16, 7, 300, -1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        object.put(element(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)));
        object.put(element(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)));
        object.put(element(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)));
        let map = ParametricMapLoader::load_from_dicom_object(&object).unwrap();
        assert_eq!(map.frames[0].values, vec![-2.0, 7.0]);
        assert_eq!(map.frames[1].values, vec![300.0, -1.0]);
    }

    #[test]
    fn source_images_are_deduplicated() {
        let image = |uid: &str| {
            item(vec![
                element(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.3")),
                element(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(uid)),
                element(tags::IMAGE_POSITION_PATIENT, VR::DS, decimals(&[0.0, 0.0, 1.5])),
            ])
        };
        let objects = [image("1.1"), image("1.1"), image("1.2"), item(vec![])];
        let images = SourceImageLoader::collect_unique(&objects);
        assert_eq!(
            images
                .iter()
                .map(|i| i.reference.sop_instance_uid.as_str())
                .collect::<Vec<_>>(),
            vec!["1.1", "1.2"]
        );
        assert_eq!(images[0].position, [0.0, 0.0, 1.5]);
    }
}
