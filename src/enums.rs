use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentationType {
    Binary,
    Fractional,
    Labelmap,
}

impl SegmentationType {
    pub fn from_dicom(value: &str) -> Option<Self> {
        match value.trim() {
            "BINARY" => Some(Self::Binary),
            "FRACTIONAL" => Some(Self::Fractional),
            "LABELMAP" => Some(Self::Labelmap),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlgorithmType {
    #[default]
    Manual,
    Automatic,
    Semiautomatic,
}

impl AlgorithmType {
    pub fn from_dicom(value: &str) -> Option<Self> {
        match value.trim() {
            "MANUAL" => Some(Self::Manual),
            "AUTOMATIC" => Some(Self::Automatic),
            "SEMIAUTOMATIC" => Some(Self::Semiautomatic),
            _ => None,
        }
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::Automatic => "AUTOMATIC",
            Self::Semiautomatic => "SEMIAUTOMATIC",
        };
        f.write_str(s)
    }
}

/// Photometric interpretation of a label map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorModel {
    #[default]
    Monochrome2,
    Palette,
}

impl ColorModel {
    pub fn from_dicom(value: &str) -> Option<Self> {
        match value.trim() {
            "MONOCHROME2" => Some(Self::Monochrome2),
            "PALETTE COLOR" => Some(Self::Palette),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SegmentsOverlap {
    Yes,
    No,
    #[default]
    Undefined,
}

impl SegmentsOverlap {
    pub fn from_dicom(value: &str) -> Self {
        match value.trim() {
            "YES" => Self::Yes,
            "NO" => Self::No,
            _ => Self::Undefined,
        }
    }
}
