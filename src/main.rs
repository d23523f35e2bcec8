use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dicom_seg_volume::{
    AssembleOptions, BinaryToLabelmapConverter, ConversionContext, ConversionFlags, LabelVolume,
    LabelVolumeReconstructor, LabelmapConversion, OverlapResolver, ParametricMapLoader,
    ParametricMapReconstructor, ReconstructOptions,
    SegmentationAssembler, SegmentationLoader, SegmentationMetadata, SourceImageLoader,
    VolumeGeometry, VolumeGeometryResolver, enums::ColorModel, frame_sorter::FrameSorter,
    Segmentation, segment_stacks, segmentation::OrientationRecord,
};
use log::info;
use nalgebra::Vector3;
use ndarray::Array3;
use ndarray_npy::{read_npy, write_npy};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "segvol",
    about = "Convert DICOM segmentations to and from label volumes",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print geometry, logical frames, overlap matrix and segment groups
    Inspect {
        #[arg(value_name = "SEG")]
        input: PathBuf,
    },

    /// Write one label volume per segment group as .npy plus JSON sidecars
    Seg2volume {
        #[arg(value_name = "SEG")]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT_DIR")]
        output: PathBuf,

        /// Put non-overlapping segments into shared volumes
        #[arg(long)]
        merge_segments: bool,
    },

    /// Write the scalar volume of a parametric map as .npy plus JSON sidecars
    Paramap2volume {
        #[arg(value_name = "PARAMAP")]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT_DIR")]
        output: PathBuf,

        /// Apply the real world value slope and intercept
        #[arg(long)]
        real_world_values: bool,
    },

    /// Build a binary segmentation from volumes written by seg2volume
    Volume2seg {
        #[arg(value_name = "VOLUMES", required = true)]
        volumes: Vec<PathBuf>,

        /// Geometry sidecar written by seg2volume
        #[arg(long, value_name = "JSON")]
        geometry: PathBuf,

        /// Segment metadata, one attribute list per volume
        #[arg(long, value_name = "JSON")]
        metadata: PathBuf,

        /// Directory with the source images (.dcm)
        #[arg(long, value_name = "DIR")]
        source_images: Option<PathBuf>,

        /// Emit frames for every slice, not only the labelled range
        #[arg(long)]
        keep_empty_slices: bool,

        /// Renumber segments to their label values
        #[arg(long)]
        sort_by_label: bool,
    },

    /// Convert a binary segmentation into a label map
    Bin2label {
        #[arg(value_name = "SEG")]
        input: PathBuf,

        #[arg(long, value_enum, default_value = "monochrome")]
        color_model: ColorModelArg,

        /// Generate palette colours for segments without one
        #[arg(long)]
        force_palette: bool,

        /// Fail if the input already is a label map
        #[arg(long)]
        error_if_labelmap: bool,

        /// Seed for generated palette colours
        #[arg(long, value_name = "N")]
        seed: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorModelArg {
    Monochrome,
    Palette,
}

impl From<ColorModelArg> for ColorModel {
    fn from(value: ColorModelArg) -> Self {
        match value {
            ColorModelArg::Monochrome => ColorModel::Monochrome2,
            ColorModelArg::Palette => ColorModel::Palette,
        }
    }
}

/// Voxel grid placement as stored next to the .npy volumes.
#[derive(Debug, Serialize, Deserialize)]
struct GeometryFile {
    origin: [f64; 3],
    row_direction: [f64; 3],
    column_direction: [f64; 3],
    slice_direction: [f64; 3],
    /// Column, row, slice.
    spacing: [f64; 3],
    /// Columns, rows, slices.
    extent: [usize; 3],
}

impl From<&VolumeGeometry> for GeometryFile {
    fn from(geometry: &VolumeGeometry) -> Self {
        Self {
            origin: geometry.origin.into(),
            row_direction: geometry.row_direction.into(),
            column_direction: geometry.column_direction.into(),
            slice_direction: geometry.slice_direction.into(),
            spacing: geometry.spacing,
            extent: geometry.extent,
        }
    }
}

impl From<GeometryFile> for VolumeGeometry {
    fn from(file: GeometryFile) -> Self {
        Self {
            row_direction: Vector3::from(file.row_direction),
            column_direction: Vector3::from(file.column_direction),
            slice_direction: Vector3::from(file.slice_direction),
            origin: Vector3::from(file.origin),
            spacing: file.spacing,
            extent: file.extent,
        }
    }
}

fn report_warnings(ctx: &mut ConversionContext) {
    for warning in ctx.take_warnings() {
        eprintln!("warning: {warning}");
    }
}

fn inspect(input: &Path) -> Result<()> {
    let segmentation = SegmentationLoader::load_from_file(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let mut ctx = ConversionContext::new();

    println!(
        "{:?} segmentation, {} x {} pixels, {} frames, {} segments",
        segmentation.segmentation_type,
        segmentation.columns,
        segmentation.rows,
        segmentation.frames.len(),
        segmentation.segments.len()
    );
    for segment in segmentation.segments.values() {
        println!("  #{} {} ({})", segment.number, segment.label, segment.algorithm_type);
    }

    let geometry = VolumeGeometryResolver::resolve(&segmentation, &mut ctx)
        .context("Failed to resolve volume geometry")?;
    println!("Origin:  {:?}", <[f64; 3]>::from(geometry.origin));
    println!("Spacing: {:?}", geometry.spacing);
    println!("Extent:  {:?}", geometry.extent);

    let sorted = FrameSorter::sort_segmentation(&segmentation)?;
    let mut resolver = OverlapResolver::new(&segmentation);
    let logical = resolver.logical_frames()?.len();
    println!("{} physical frames at {logical} positions", sorted.len());

    println!("Overlap matrix:\n{}", resolver.overlap_matrix()?);
    for (index, group) in resolver.non_overlapping_groups()?.iter().enumerate() {
        println!("Group {index}: {:?}", group.segments().collect::<Vec<_>>());
    }
    report_warnings(&mut ctx);
    Ok(())
}

fn seg2volume(input: &Path, output: &Path, merge_segments: bool) -> Result<()> {
    let segmentation = SegmentationLoader::load_from_file(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    if matches!(segmentation.orientation, OrientationRecord::PerFrame(_))
        && segmentation.common_orientation().is_none()
    {
        return write_segment_stacks(&segmentation, output);
    }

    let mut ctx = ConversionContext::new();
    let reconstructor =
        LabelVolumeReconstructor::new(&segmentation, ReconstructOptions { merge_segments }, &mut ctx)?;

    for (index, volume) in reconstructor.volumes().enumerate() {
        let volume = volume?;
        let path = output.join(format!("group-{}.npy", index + 1));
        write_npy(&path, &volume.data)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} with labels {:?}", path.display(), volume.labels());
    }

    let geometry = serde_json::to_string_pretty(&GeometryFile::from(reconstructor.geometry()))?;
    fs::write(output.join("geometry.json"), geometry)?;
    let metadata = reconstructor.metadata(&mut ctx).to_json()?;
    fs::write(output.join("metadata.json"), metadata)?;

    println!(
        "Wrote {} volumes to {}",
        reconstructor.groups().len(),
        output.display()
    );
    report_warnings(&mut ctx);
    Ok(())
}

fn paramap2volume(input: &Path, output: &Path, real_world_values: bool) -> Result<()> {
    let map = ParametricMapLoader::load_from_file(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut ctx = ConversionContext::new();
    let volume = ParametricMapReconstructor::reconstruct(&map, &mut ctx)?;
    let path = output.join("paramap.npy");
    let written = if real_world_values {
        write_npy(&path, &volume.real_world_values(&map.metadata))
    } else {
        write_npy(&path, &volume.data)
    };
    written.with_context(|| format!("Failed to write {}", path.display()))?;

    let geometry = serde_json::to_string_pretty(&GeometryFile::from(&volume.geometry))?;
    fs::write(output.join("geometry.json"), geometry)?;
    fs::write(output.join("metadata.json"), map.metadata.to_json()?)?;

    println!("Wrote {} with extent {:?}", path.display(), volume.geometry.extent);
    report_warnings(&mut ctx);
    Ok(())
}

/// Frames with differing orientations share no voxel grid, so each segment
/// is written as a plain stack of its frames.
fn write_segment_stacks(segmentation: &Segmentation, output: &Path) -> Result<()> {
    let stacks = segment_stacks(segmentation)?;
    for stack in &stacks {
        let path = output.join(format!("segment-{}.npy", stack.segment));
        write_npy(&path, &stack.data)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} from frames {:?}", path.display(), stack.frames);
    }
    println!(
        "Frames are not parallel, wrote {} segment stacks without geometry to {}",
        stacks.len(),
        output.display()
    );
    Ok(())
}

fn volume2seg(
    volumes: &[PathBuf],
    geometry: &Path,
    metadata: &Path,
    source_images: Option<&Path>,
    options: AssembleOptions,
) -> Result<()> {
    let geometry: GeometryFile = serde_json::from_str(
        &fs::read_to_string(geometry)
            .with_context(|| format!("Failed to read {}", geometry.display()))?,
    )
    .context("Failed to parse geometry")?;
    let geometry = VolumeGeometry::from(geometry);

    let metadata = SegmentationMetadata::from_json(
        &fs::read_to_string(metadata)
            .with_context(|| format!("Failed to read {}", metadata.display()))?,
    )
    .context("Failed to parse segment metadata")?;

    let volumes = volumes
        .iter()
        .map(|path| -> Result<LabelVolume> {
            let data: Array3<u16> =
                read_npy(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(LabelVolume::new(data, geometry.clone())?)
        })
        .collect::<Result<Vec<_>>>()?;

    let sources = match source_images {
        Some(dir) => SourceImageLoader::load_from_directory(dir)?,
        None => Vec::new(),
    };

    let assembled = SegmentationAssembler::assemble(&volumes, &metadata, &sources, options)?;
    let segmentation = &assembled.segmentation;
    println!(
        "{} segments, {} frames, {} referenced instances",
        segmentation.segments.len(),
        segmentation.frames.len(),
        segmentation.referenced_instances.len()
    );
    for (number, label) in &assembled.segment_labels {
        let frames = segmentation
            .frames
            .iter()
            .filter(|f| f.referenced_segment == Some(*number))
            .count();
        println!("  segment #{number} from label {label}: {frames} frames");
    }
    Ok(())
}

fn bin2label(input: &Path, flags: ConversionFlags, seed: Option<u64>) -> Result<()> {
    let segmentation = SegmentationLoader::load_from_file(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let mut ctx = seed.map_or_else(ConversionContext::new, ConversionContext::with_seed);

    match BinaryToLabelmapConverter::convert(&segmentation, flags, &mut ctx)? {
        LabelmapConversion::Unchanged => println!("Input already is a label map"),
        LabelmapConversion::Converted(labelmap) => {
            println!(
                "Label map with {} frames, {} bit pixels, {} segments",
                labelmap.frames.len(),
                labelmap.bits_allocated,
                labelmap.segments.len()
            );
            if let Some(palette) = &labelmap.palette {
                println!("Palette descriptor: {:?}", palette.descriptor());
            }
        }
    }
    report_warnings(&mut ctx);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Inspect { input } => inspect(&input),
        Commands::Seg2volume {
            input,
            output,
            merge_segments,
        } => seg2volume(&input, &output, merge_segments),
        Commands::Paramap2volume {
            input,
            output,
            real_world_values,
        } => paramap2volume(&input, &output, real_world_values),
        Commands::Volume2seg {
            volumes,
            geometry,
            metadata,
            source_images,
            keep_empty_slices,
            sort_by_label,
        } => volume2seg(
            &volumes,
            &geometry,
            &metadata,
            source_images.as_deref(),
            AssembleOptions {
                skip_empty_slices: !keep_empty_slices,
                sort_by_label,
            },
        ),
        Commands::Bin2label {
            input,
            color_model,
            force_palette,
            error_if_labelmap,
            seed,
        } => bin2label(
            &input,
            ConversionFlags {
                error_if_already_labelmap: error_if_labelmap,
                output_color_model: color_model.into(),
                force_palette,
            },
            seed,
        ),
    }
}
