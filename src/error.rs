use crate::segmentation::SegmentNumber;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Image orientation is missing or not shared across frames")]
    MissingOrientation,

    #[error("Image position is missing for frame {frame}")]
    MissingPosition { frame: usize },

    #[error("Frame {frame} maps to index {index:?}, outside of extent {extent:?}")]
    OutOfBounds {
        frame: usize,
        index: [i64; 3],
        extent: [usize; 3],
    },

    #[error("Row and column directions do not span a plane, slice axis is undefined")]
    AmbiguousSliceAxis,

    #[error("Missing pixel spacing information")]
    MissingPixelSpacing,

    #[error("Computed {slices} slices from {positions} distinct positions")]
    ImplausibleExtent { slices: f64, positions: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PixelFormatError {
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u32),

    #[error("Pixel data length mismatch: expected {expected}, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OverlapError {
    #[error("Image orientation is per-frame, frames are probably not parallel")]
    FramesNotParallel,

    #[error("Segments {first} and {second} overlap")]
    Overlap {
        first: SegmentNumber,
        second: SegmentNumber,
    },

    #[error("Frame {frame} does not reference a segment")]
    MissingSegmentReference { frame: usize },

    #[error("Frame {frame} references segment {segment} which is not defined")]
    UnknownSegment {
        frame: usize,
        segment: SegmentNumber,
    },

    #[error("Segment number 0 is reserved for the background")]
    ReservedSegmentNumber,

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    PixelFormat(#[from] PixelFormatError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColorError {
    #[error("Segment {segment} has no recommended display CIELab value")]
    MissingCIELab { segment: SegmentNumber },
}

/// Failure of one of the directional drivers.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Overlap(#[from] OverlapError),

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error(transparent)]
    PixelFormat(#[from] PixelFormatError),

    #[error("Segmentation is already a label map")]
    AlreadyLabelmap,

    #[error("Fractional segmentations cannot be converted to a label map")]
    FractionalToLabelmap,

    #[error("Got {volumes} label volumes but {lists} segment attribute lists")]
    MetadataMismatch { volumes: usize, lists: usize },

    #[error("No segment attributes for label {label} of volume {volume}")]
    MissingLabelMetadata { volume: usize, label: u16 },

    #[error("Algorithm name must be specified for non-manual segment {label}")]
    MissingAlgorithmName { label: u16 },

    #[error("Inconsistent volume dimensions")]
    InconsistentDimensions,

    #[error("Cannot restore label order: {0}")]
    LabelOrder(String),

    #[error("Too many segments: {0}")]
    TooManySegments(usize),
}
