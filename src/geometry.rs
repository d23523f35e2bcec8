//! Volume geometry derived from frame positions.

use crate::context::{ConversionContext, ConversionWarning};
use crate::error::GeometryError;
use crate::frame_sorter::{FramePositionGrouper, FrameSorter};
use crate::segmentation::{PixelMeasures, Segmentation};

use log::debug;
use nalgebra::{Matrix3, Vector3};

/// Declared and computed slice spacing are considered equal within this
/// distance (mm).
pub const SPACING_TOLERANCE: f64 = 1e-5;

/// Upper bound on slices per distinct frame position. Segments may skip
/// slices, but a grid far larger than that comes from a degenerate spacing.
pub const MAX_SLICES_PER_POSITION: usize = 256;

/// Per-frame orientations whose cosines differ by less than this are
/// treated as one shared orientation.
pub const ORIENTATION_TOLERANCE: f64 = 1e-4;

/// Image orientation (patient): row and column direction cosines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    row: Vector3<f64>,
    column: Vector3<f64>,
}

impl Orientation {
    pub fn new(row: [f64; 3], column: [f64; 3]) -> Self {
        Self {
            row: Vector3::from(row),
            column: Vector3::from(column),
        }
    }

    /// From the six values of Image Orientation (Patient).
    pub fn from_cosines(values: &[f64]) -> Option<Self> {
        match values {
            [r0, r1, r2, c0, c1, c2] => Some(Self::new([*r0, *r1, *r2], [*c0, *c1, *c2])),
            _ => None,
        }
    }

    /// Axial orientation, rows along +x and columns along +y.
    pub fn axial() -> Self {
        Self::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0])
    }

    pub fn cosines(&self) -> [f64; 6] {
        [
            self.row.x,
            self.row.y,
            self.row.z,
            self.column.x,
            self.column.y,
            self.column.z,
        ]
    }

    pub fn row(&self) -> Vector3<f64> {
        self.row
    }

    pub fn column(&self) -> Vector3<f64> {
        self.column
    }

    /// Unit normal of the image plane, `row × column`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::AmbiguousSliceAxis`] if the row and column
    /// directions are (nearly) parallel or zero.
    pub fn slice_direction(&self) -> Result<Vector3<f64>, GeometryError> {
        self.row
            .cross(&self.column)
            .try_normalize(1e-6)
            .ok_or(GeometryError::AmbiguousSliceAxis)
    }

    /// Whether both orientations agree within [`ORIENTATION_TOLERANCE`].
    pub fn approx_eq(&self, other: &Orientation) -> bool {
        self.cosines()
            .iter()
            .zip(other.cosines())
            .all(|(a, b)| (a - b).abs() < ORIENTATION_TOLERANCE)
    }

    /// Signed distance of `position` from `reference` along the slice normal.
    pub fn distance(slice_direction: &Vector3<f64>, reference: [f64; 3], position: [f64; 3]) -> f64 {
        (Vector3::from(position) - Vector3::from(reference)).dot(slice_direction)
    }
}

/// Placement of a voxel grid in patient space.
///
/// Indices are `(column, row, slice)`; spacing and extent use the same
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeGeometry {
    pub row_direction: Vector3<f64>,
    pub column_direction: Vector3<f64>,
    pub slice_direction: Vector3<f64>,
    pub origin: Vector3<f64>,
    pub spacing: [f64; 3],
    pub extent: [usize; 3],
}

impl VolumeGeometry {
    /// Columns of the matrix are the row, column and slice directions.
    pub fn direction(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.row_direction, self.column_direction, self.slice_direction])
    }

    pub fn num_voxels(&self) -> usize {
        self.extent.iter().product()
    }

    pub fn index_to_point(&self, index: [usize; 3]) -> [f64; 3] {
        let p = self.origin
            + self.row_direction * (index[0] as f64 * self.spacing[0])
            + self.column_direction * (index[1] as f64 * self.spacing[1])
            + self.slice_direction * (index[2] as f64 * self.spacing[2]);
        [p.x, p.y, p.z]
    }

    /// Continuous index of a physical point.
    pub fn continuous_index(&self, point: [f64; 3]) -> [f64; 3] {
        let d = Vector3::from(point) - self.origin;
        [
            d.dot(&self.row_direction) / self.spacing[0],
            d.dot(&self.column_direction) / self.spacing[1],
            d.dot(&self.slice_direction) / self.spacing[2],
        ]
    }

    /// Nearest voxel index of a physical point, possibly outside the extent.
    pub fn point_to_index(&self, point: [f64; 3]) -> [i64; 3] {
        self.continuous_index(point).map(|v| v.round() as i64)
    }

    pub fn contains(&self, index: [i64; 3]) -> Option<[usize; 3]> {
        let mut result = [0usize; 3];
        for axis in 0..3 {
            let i = usize::try_from(index[axis]).ok()?;
            if i >= self.extent[axis] {
                return None;
            }
            result[axis] = i;
        }
        Some(result)
    }

    /// Index of the voxel holding the position of `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::OutOfBounds`] if the position falls outside
    /// the extent on any axis.
    pub fn locate_frame(&self, frame: usize, position: [f64; 3]) -> Result<[usize; 3], GeometryError> {
        let index = self.point_to_index(position);
        self.contains(index).ok_or(GeometryError::OutOfBounds {
            frame,
            index,
            extent: self.extent,
        })
    }
}

pub struct VolumeGeometryResolver;

impl VolumeGeometryResolver {
    /// Resolve the volume geometry of a segmentation
    ///
    /// # Arguments
    ///
    /// * `segmentation` - Frames with positions and a common orientation
    /// * `ctx` - Receives a warning if declared and computed spacing differ
    ///
    /// # Errors
    ///
    /// Returns error if frames do not share one orientation, a frame has no
    /// position, pixel measures are missing or the slice count is
    /// implausible
    pub fn resolve(
        segmentation: &Segmentation,
        ctx: &mut ConversionContext,
    ) -> Result<VolumeGeometry, GeometryError> {
        let orientation = segmentation
            .common_orientation()
            .ok_or(GeometryError::MissingOrientation)?;
        let measures = segmentation
            .pixel_measures
            .ok_or(GeometryError::MissingPixelSpacing)?;

        let positions = segmentation
            .frames
            .iter()
            .enumerate()
            .map(|(i, frame)| frame.position.ok_or(GeometryError::MissingPosition { frame: i }))
            .collect::<Result<Vec<_>, _>>()?;

        Self::resolve_positions(
            orientation,
            &positions,
            &measures,
            [segmentation.columns, segmentation.rows],
            ctx,
        )
    }

    /// Resolve geometry from raw positions.
    ///
    /// Positions closer than the frame grouping tolerance count as one
    /// slice. `in_plane_extent` is in (column, row) order.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::ImplausibleExtent`] if the slice count is
    /// more than [`MAX_SLICES_PER_POSITION`] times the number of distinct
    /// positions.
    pub fn resolve_positions(
        orientation: &Orientation,
        positions: &[[f64; 3]],
        measures: &PixelMeasures,
        in_plane_extent: [usize; 2],
        ctx: &mut ConversionContext,
    ) -> Result<VolumeGeometry, GeometryError> {
        let slice_direction = orientation.slice_direction()?;
        let sorted = FrameSorter::sort(orientation, positions)?;
        let lowest = sorted
            .first()
            .ok_or(GeometryError::MissingPosition { frame: 0 })?;
        let origin = positions[lowest.frame];

        let thickness = FramePositionGrouper::grouping_thickness(Some(measures), &sorted);
        let mut distance = vec![0.0; positions.len()];
        for frame in &sorted {
            distance[frame.frame] = frame.distance;
        }
        let distances: Vec<f64> = FramePositionGrouper::group(&sorted, thickness)
            .iter()
            .filter_map(|logical| logical.frames().first())
            .map(|&frame| distance[frame])
            .collect();

        let declared_slice_spacing = measures.declared_slice_spacing();
        let (slice_spacing, span) = match distances.as_slice() {
            [first, second, rest @ ..] => {
                let last = rest.last().unwrap_or(second);
                let computed = (first - second).abs();
                let spacing = match declared_slice_spacing {
                    Some(declared) if (declared - computed).abs() <= SPACING_TOLERANCE => declared,
                    Some(declared) => {
                        ctx.warn(ConversionWarning::SpacingMismatch { declared, computed });
                        computed
                    }
                    None => computed,
                };
                (spacing, (last - first).abs())
            }
            // a single position has no extent along the slice axis
            _ => (declared_slice_spacing.unwrap_or(1.0), 0.0),
        };

        let slices = (span / slice_spacing).round() + 1.0;
        let limit = distances.len().saturating_mul(MAX_SLICES_PER_POSITION);
        if !slices.is_finite() || slices > limit as f64 {
            return Err(GeometryError::ImplausibleExtent {
                slices,
                positions: distances.len(),
            });
        }
        let slices = slices as usize;

        let row_direction = orientation
            .row()
            .try_normalize(1e-6)
            .ok_or(GeometryError::AmbiguousSliceAxis)?;
        let column_direction = orientation
            .column()
            .try_normalize(1e-6)
            .ok_or(GeometryError::AmbiguousSliceAxis)?;

        let geometry = VolumeGeometry {
            row_direction,
            column_direction,
            slice_direction,
            origin: Vector3::from(origin),
            spacing: [measures.pixel_spacing[1], measures.pixel_spacing[0], slice_spacing],
            extent: [in_plane_extent[0], in_plane_extent[1], slices],
        };
        debug!(
            "Resolved geometry: origin {:?}, spacing {:?}, extent {:?}, {} distinct positions",
            origin,
            geometry.spacing,
            geometry.extent,
            distances.len()
        );
        Ok(geometry)
    }
}
