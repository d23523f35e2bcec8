//! Segment overlap analysis.
//!
//! The resolver answers, for one segmentation, which segments live on which
//! frames, which physical frames share a position, which segments overlap at
//! the pixel level and how segments can be grouped so that no group contains
//! two overlapping segments. Each answer is computed on first use and kept
//! for the lifetime of the resolver.

use crate::enums::SegmentationType;
use crate::error::{GeometryError, OverlapError};
use crate::frame_sorter::{FramePositionGrouper, FrameSorter, LogicalFrame};
use crate::pixels::PixelData;
use crate::segmentation::{OrientationRecord, SegmentNumber, Segmentation};

use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

/// `(segment, physical frame)` pairs found at one logical frame.
pub type SegmentsAtPosition = BTreeSet<(SegmentNumber, usize)>;

/// Entry of the overlap matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overlap {
    #[default]
    Unknown,
    No,
    Yes,
}

/// Symmetric segment × segment overlap table, indexed by segment number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapMatrix {
    size: usize,
    entries: Vec<Overlap>,
}

impl OverlapMatrix {
    fn new(size: usize) -> Self {
        let mut entries = vec![Overlap::Unknown; size * size];
        for i in 0..size {
            entries[i * size + i] = Overlap::No;
        }
        Self { size, entries }
    }

    fn offset(&self, a: SegmentNumber, b: SegmentNumber) -> Option<usize> {
        let (a, b) = ((a as usize).checked_sub(1)?, (b as usize).checked_sub(1)?);
        (a < self.size && b < self.size).then_some(a * self.size + b)
    }

    /// Entry for segments `a` and `b`, `None` if either is out of range.
    pub fn get(&self, a: SegmentNumber, b: SegmentNumber) -> Option<Overlap> {
        self.offset(a, b).map(|i| self.entries[i])
    }

    pub fn overlaps(&self, a: SegmentNumber, b: SegmentNumber) -> bool {
        self.get(a, b) == Some(Overlap::Yes)
    }

    fn set(&mut self, a: SegmentNumber, b: SegmentNumber, value: Overlap) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(i) = self.offset(x, y) {
                self.entries[i] = value;
            }
        }
    }

    /// Largest segment number covered by the matrix.
    pub fn size(&self) -> usize {
        self.size
    }

    /// First overlapping pair in ascending order.
    pub fn first_overlap(&self) -> Option<(SegmentNumber, SegmentNumber)> {
        (0..self.size).find_map(|a| {
            (a + 1..self.size)
                .find(|&b| self.entries[a * self.size + b] == Overlap::Yes)
                .map(|b| ((a + 1) as SegmentNumber, (b + 1) as SegmentNumber))
        })
    }

    pub fn has_overlap(&self) -> bool {
        self.entries.contains(&Overlap::Yes)
    }
}

impl fmt::Display for OverlapMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.entries.chunks(self.size.max(1)) {
            let line: Vec<&str> = row
                .iter()
                .map(|e| match e {
                    Overlap::Unknown => "-",
                    Overlap::No => "0",
                    Overlap::Yes => "1",
                })
                .collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Segments that never share a pixel and can live in one label volume.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentGroup(pub BTreeSet<SegmentNumber>);

impl SegmentGroup {
    pub fn single(segment: SegmentNumber) -> Self {
        Self(BTreeSet::from([segment]))
    }

    pub fn segments(&self) -> impl Iterator<Item = SegmentNumber> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, segment: SegmentNumber) -> bool {
        self.0.contains(&segment)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct OverlapResolver<'a> {
    segmentation: &'a Segmentation,
    frame_segments: Option<Vec<Vec<SegmentNumber>>>,
    logical_frames: Option<Vec<LogicalFrame>>,
    segments_by_position: Option<Vec<SegmentsAtPosition>>,
    matrix: Option<OverlapMatrix>,
    groups: Option<Vec<SegmentGroup>>,
}

impl<'a> OverlapResolver<'a> {
    pub fn new(segmentation: &'a Segmentation) -> Self {
        Self {
            segmentation,
            frame_segments: None,
            logical_frames: None,
            segments_by_position: None,
            matrix: None,
            groups: None,
        }
    }

    pub fn segmentation(&self) -> &'a Segmentation {
        self.segmentation
    }

    /// Segments present on a physical frame.
    ///
    /// Label map frames yield every distinct non-zero pixel value, other
    /// frames their referenced segment. Unknown frame indices yield nothing.
    pub fn segments_for_frame(&mut self, frame: usize) -> Result<&[SegmentNumber], OverlapError> {
        let all = self.all_frame_segments()?;
        Ok(all.get(frame).map_or(&[][..], Vec::as_slice))
    }

    /// Physical frames carrying `segment`, ascending.
    pub fn frames_for_segment(&mut self, segment: SegmentNumber) -> Result<Vec<usize>, OverlapError> {
        let all = self.all_frame_segments()?;
        Ok(all
            .iter()
            .enumerate()
            .filter(|(_, segments)| segments.contains(&segment))
            .map(|(frame, _)| frame)
            .collect())
    }

    fn all_frame_segments(&mut self) -> Result<&[Vec<SegmentNumber>], OverlapError> {
        let segments = match self.frame_segments.take() {
            Some(segments) => segments,
            None => collect_frame_segments(self.segmentation)?,
        };
        Ok(self.frame_segments.insert(segments).as_slice())
    }

    /// Physical frames grouped by position, in ascending slice order.
    ///
    /// # Errors
    ///
    /// Returns [`OverlapError::FramesNotParallel`] if the orientation is
    /// stored per frame.
    pub fn logical_frames(&mut self) -> Result<&[LogicalFrame], OverlapError> {
        let frames = match self.logical_frames.take() {
            Some(frames) => frames,
            None => group_logical_frames(self.segmentation)?,
        };
        Ok(self.logical_frames.insert(frames).as_slice())
    }

    /// For each logical frame, the `(segment, physical frame)` pairs on it.
    pub fn segments_by_logical_position(&mut self) -> Result<&[SegmentsAtPosition], OverlapError> {
        let by_position: Vec<SegmentsAtPosition> = match self.segments_by_position.take() {
            Some(by_position) => by_position,
            None => {
                let frame_segments = self.all_frame_segments()?.to_vec();
                let logical = self.logical_frames()?;
                logical
                    .iter()
                    .map(|l| {
                        l.frames()
                            .iter()
                            .flat_map(|&frame| {
                                frame_segments[frame].iter().map(move |&s| (s, frame))
                            })
                            .collect()
                    })
                    .collect()
            }
        };
        Ok(self.segments_by_position.insert(by_position).as_slice())
    }

    /// Pixel level overlap between every pair of segments.
    ///
    /// Segments that never share a logical frame are reported as not
    /// overlapping. The first failing frame comparison aborts the build.
    pub fn overlap_matrix(&mut self) -> Result<&OverlapMatrix, OverlapError> {
        let matrix = match self.matrix.take() {
            Some(matrix) => matrix,
            None => {
                let segmentation = self.segmentation;
                let by_position = self.segments_by_logical_position()?;
                build_overlap_matrix(segmentation, by_position)?
            }
        };
        Ok(&*self.matrix.insert(matrix))
    }

    pub fn has_overlapping_segments(&mut self) -> Result<bool, OverlapError> {
        Ok(self.overlap_matrix()?.has_overlap())
    }

    /// Groups of mutually non-overlapping segments.
    ///
    /// Segments are taken in ascending order and put into the first group
    /// that holds no segment they overlap with. The result is valid but not
    /// necessarily minimal.
    pub fn non_overlapping_groups(&mut self) -> Result<&[SegmentGroup], OverlapError> {
        let groups = match self.groups.take() {
            Some(groups) => groups,
            None => {
                let segments: Vec<SegmentNumber> =
                    self.segmentation.segments.keys().copied().collect();
                let matrix = self.overlap_matrix()?;
                first_fit_groups(&segments, matrix)
            }
        };
        Ok(self.groups.insert(groups).as_slice())
    }
}

fn collect_frame_segments(segmentation: &Segmentation) -> Result<Vec<Vec<SegmentNumber>>, OverlapError> {
    let num_pixels = segmentation.num_pixels();
    let known = |frame: usize, segment: SegmentNumber| {
        if segment == 0 {
            Err(OverlapError::ReservedSegmentNumber)
        } else if segmentation.segments.contains_key(&segment) {
            Ok(segment)
        } else {
            Err(OverlapError::UnknownSegment { frame, segment })
        }
    };

    segmentation
        .frames
        .iter()
        .enumerate()
        .map(|(i, frame)| match segmentation.segmentation_type {
            SegmentationType::Labelmap => frame
                .pixels
                .distinct_nonzero(num_pixels)?
                .into_iter()
                .map(|s| known(i, s))
                .collect(),
            SegmentationType::Binary | SegmentationType::Fractional => {
                let segment = frame
                    .referenced_segment
                    .ok_or(OverlapError::MissingSegmentReference { frame: i })?;
                Ok(vec![known(i, segment)?])
            }
        })
        .collect()
}

fn group_logical_frames(segmentation: &Segmentation) -> Result<Vec<LogicalFrame>, OverlapError> {
    match segmentation.orientation {
        OrientationRecord::Shared(_) => {}
        OrientationRecord::PerFrame(_) => return Err(OverlapError::FramesNotParallel),
        OrientationRecord::Missing => return Err(GeometryError::MissingOrientation.into()),
    }
    let sorted = FrameSorter::sort_segmentation(segmentation)?;
    let thickness =
        FramePositionGrouper::grouping_thickness(segmentation.pixel_measures.as_ref(), &sorted);
    Ok(FramePositionGrouper::group(&sorted, thickness))
}

fn build_overlap_matrix(
    segmentation: &Segmentation,
    by_position: &[SegmentsAtPosition],
) -> Result<OverlapMatrix, OverlapError> {
    let start = Instant::now();
    let size = segmentation
        .segments
        .keys()
        .next_back()
        .map_or(0, |&s| s as usize);
    let mut matrix = OverlapMatrix::new(size);

    for (position, pairs) in by_position.iter().enumerate() {
        let pairs: Vec<_> = pairs.iter().copied().collect();
        for (i, &(seg_a, frame_a)) in pairs.iter().enumerate() {
            for &(seg_b, frame_b) in &pairs[i + 1..] {
                if seg_a == seg_b || matrix.overlaps(seg_a, seg_b) {
                    continue;
                }
                if frames_overlap(segmentation, (seg_a, frame_a), (seg_b, frame_b))? {
                    debug!(
                        "Segments {seg_a} and {seg_b} overlap on logical frame {position} (frames {frame_a}, {frame_b})"
                    );
                    matrix.set(seg_a, seg_b, Overlap::Yes);
                } else if matrix.get(seg_a, seg_b) == Some(Overlap::Unknown) {
                    matrix.set(seg_a, seg_b, Overlap::No);
                }
            }
        }
    }

    // segments never seen together cannot conflict
    for entry in matrix.entries.iter_mut() {
        if *entry == Overlap::Unknown {
            *entry = Overlap::No;
        }
    }
    debug!("Built {size}x{size} overlap matrix in {:?}", start.elapsed());
    Ok(matrix)
}

fn is_foreground(segmentation_type: SegmentationType, value: u16, segment: SegmentNumber) -> bool {
    match segmentation_type {
        SegmentationType::Labelmap => value == segment,
        SegmentationType::Binary | SegmentationType::Fractional => value != 0,
    }
}

fn frames_overlap(
    segmentation: &Segmentation,
    (seg_a, frame_a): (SegmentNumber, usize),
    (seg_b, frame_b): (SegmentNumber, usize),
) -> Result<bool, OverlapError> {
    if frame_a == frame_b {
        return Ok(false);
    }
    let num_pixels = segmentation.num_pixels();
    let a = &segmentation.frames[frame_a].pixels;
    let b = &segmentation.frames[frame_b].pixels;

    match (a, b) {
        (PixelData::Packed(x), PixelData::Packed(y)) if num_pixels % 8 == 0 => {
            a.validate(num_pixels)?;
            b.validate(num_pixels)?;
            Ok(x.iter().zip(y).any(|(p, q)| p & q != 0))
        }
        _ => {
            let kind = segmentation.segmentation_type;
            let va = a.values(num_pixels)?;
            let vb = b.values(num_pixels)?;
            Ok(va
                .iter()
                .zip(vb.iter())
                .any(|(&p, &q)| is_foreground(kind, p, seg_a) && is_foreground(kind, q, seg_b)))
        }
    }
}

fn first_fit_groups(segments: &[SegmentNumber], matrix: &OverlapMatrix) -> Vec<SegmentGroup> {
    let mut groups: Vec<SegmentGroup> = Vec::new();
    for &segment in segments {
        let fits = groups
            .iter_mut()
            .find(|g| g.segments().all(|member| !matrix.overlaps(segment, member)));
        match fits {
            Some(group) => {
                group.0.insert(segment);
            }
            None => groups.push(SegmentGroup::single(segment)),
        }
    }
    info!(
        "Identified {} groups of non-overlapping segments",
        groups.len()
    );
    groups
}
