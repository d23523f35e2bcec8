//! JSON description of a segmentation.
//!
//! Key names follow the dcmqi metadata format so existing description files
//! can be used unchanged.

use crate::color::Rgb;
use crate::enums::AlgorithmType;
use crate::segmentation::CodedConcept;

use serde::{Deserialize, Serialize};

/// Default display colour for segments without one.
pub const DEFAULT_RGB: Rgb = [128, 174, 128];

/// Series level attributes of the segmentation object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SeriesInfo {
    pub content_creator_name: String,
    pub clinical_trial_coordinating_center_name: String,
    #[serde(rename = "ClinicalTrialSeriesID")]
    pub clinical_trial_series_id: String,
    #[serde(rename = "ClinicalTrialTimePointID")]
    pub clinical_trial_time_point_id: String,
    pub series_description: String,
    pub series_number: String,
    pub instance_number: String,
    pub body_part_examined: String,
}

impl Default for SeriesInfo {
    fn default() -> Self {
        Self {
            content_creator_name: "Reader1".into(),
            clinical_trial_coordinating_center_name: String::new(),
            clinical_trial_series_id: "Session1".into(),
            clinical_trial_time_point_id: "1".into(),
            series_description: "Segmentation".into(),
            series_number: "300".into(),
            instance_number: "1".into(),
            body_part_examined: String::new(),
        }
    }
}

fn default_label_id() -> u16 {
    1
}

fn default_algorithm_type() -> AlgorithmType {
    AlgorithmType::Semiautomatic
}

fn default_rgb() -> Rgb {
    DEFAULT_RGB
}

/// Description of one label of one input volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SegmentAttributes {
    #[serde(rename = "labelID", default = "default_label_id")]
    pub label_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_description: Option<String>,
    #[serde(default = "default_algorithm_type")]
    pub segment_algorithm_type: AlgorithmType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_algorithm_name: Option<String>,
    #[serde(
        rename = "SegmentedPropertyCategoryCodeSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<CodedConcept>,
    #[serde(
        rename = "SegmentedPropertyTypeCodeSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub property_type: Option<CodedConcept>,
    #[serde(
        rename = "SegmentedPropertyTypeModifierCodeSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub property_type_modifier: Option<CodedConcept>,
    #[serde(
        rename = "AnatomicRegionSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub anatomic_region: Option<CodedConcept>,
    #[serde(
        rename = "AnatomicRegionModifierSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub anatomic_region_modifier: Option<CodedConcept>,
    #[serde(rename = "recommendedDisplayRGBValue", default = "default_rgb")]
    pub recommended_display_rgb: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_identifier: Option<String>,
    #[serde(
        rename = "TrackingUniqueIdentifier",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tracking_uid: Option<String>,
}

impl SegmentAttributes {
    pub fn new(label_id: u16) -> Self {
        Self {
            label_id,
            segment_label: None,
            segment_description: None,
            segment_algorithm_type: default_algorithm_type(),
            segment_algorithm_name: None,
            category: None,
            property_type: None,
            property_type_modifier: None,
            anatomic_region: None,
            anatomic_region_modifier: None,
            recommended_display_rgb: DEFAULT_RGB,
            tracking_identifier: None,
            tracking_uid: None,
        }
    }
}

/// Series attributes plus one list of segment attributes per label volume.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMetadata {
    #[serde(flatten)]
    pub series: SeriesInfo,
    #[serde(rename = "segmentAttributes", default)]
    pub segment_attributes: Vec<Vec<SegmentAttributes>>,
}

impl SegmentationMetadata {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Attributes for `label` of volume `volume`.
    pub fn attributes(&self, volume: usize, label: u16) -> Option<&SegmentAttributes> {
        self.segment_attributes
            .get(volume)?
            .iter()
            .find(|a| a.label_id == label)
    }
}
