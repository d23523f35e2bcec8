//! # DICOM-seg-volume library
//!
//! This crate converts DICOM segmentations between their multi-frame
//! representation and 3D label volumes.
//!
//! This library is part of the dicom-rs ecosystem and leverages its
//! components to read segmentation objects and their source images.
//! Segmentations can be loaded from a [`FileDicomObject<InMemDicomObject>`]
//! or a file, source images from a specified folder where each ".dcm" file
//! is read in parallel using rayon. The conversion itself works on plain
//! records and does not depend on dicom-rs:
//!  - Frames to volumes: frames are placed on a voxel grid derived from
//!    their positions. Segments that never overlap can share one volume.
//!  - Volumes to frames: every label of every volume becomes a binary
//!    segment with one frame per slice it occupies.
//!  - Binary to label map: non-overlapping binary segments are merged into
//!    one frame per position, optionally with a palette colour table.
//!
//! Segmentations are assumed to have parallel frames (a shared plane
//! orientation) and uncompressed pixel data.
//!
//! # Examples
//!
//! ## Reading a segmentation into label volumes
//!
//! ```no_run
//! # use dicom_seg_volume::{ConversionContext, LabelVolumeReconstructor, ReconstructOptions, SegmentationLoader};
//! let segmentation = SegmentationLoader::load_from_file("seg.dcm")
//!     .expect("should have loaded segmentation");
//! let mut ctx = ConversionContext::new();
//! let options = ReconstructOptions { merge_segments: true };
//! let reconstructor = LabelVolumeReconstructor::new(&segmentation, options, &mut ctx)
//!     .expect("should have resolved the volume geometry");
//! for volume in reconstructor.volumes() {
//!     let volume = volume.expect("should have placed every frame");
//!     println!("{:?} with labels {:?}", volume.dim(), volume.labels());
//! }
//! ```
//!
//! [`FileDicomObject<InMemDicomObject>`]: https://docs.rs/dicom-object/latest/dicom_object/struct.FileDicomObject.html

pub mod assemble;
pub mod bin2label;
pub mod color;
pub mod context;
pub mod dicom_io;
pub mod enums;
pub mod error;
pub mod frame_sorter;
pub mod geometry;
pub mod metadata;
pub mod overlap;
pub mod paramap;
pub mod pixels;
pub mod reconstruct;
pub mod segmentation;
pub mod volume;

pub use assemble::{AssembleOptions, AssembledSegmentation, SegmentationAssembler, SourceImage};
pub use bin2label::{BinaryToLabelmapConverter, ConversionFlags, LabelmapConversion};
pub use context::{ConversionContext, ConversionWarning};
pub use dicom_io::{
    ParametricMapLoader, SegmentationLoader, SegmentationLoaderError, SourceImageLoader,
};
pub use error::{ColorError, ConversionError, GeometryError, OverlapError, PixelFormatError};
pub use geometry::{Orientation, VolumeGeometry, VolumeGeometryResolver};
pub use metadata::{SegmentAttributes, SegmentationMetadata};
pub use overlap::{OverlapMatrix, OverlapResolver, SegmentGroup};
pub use paramap::{
    ParametricMap, ParametricMapMetadata, ParametricMapReconstructor, ParametricVolume,
};
pub use reconstruct::{LabelVolumeReconstructor, ReconstructOptions, SegmentStack, segment_stacks};
pub use segmentation::{Frame, Segment, Segmentation};
pub use volume::LabelVolume;
