//! Per-conversion state.

use crate::segmentation::SegmentNumber;

use log::warn;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fmt;

/// Non-fatal conditions noticed while converting.
#[derive(Clone, Debug, PartialEq)]
pub enum ConversionWarning {
    /// Declared slice spacing disagrees with the frame positions.
    SpacingMismatch { declared: f64, computed: f64 },
    /// Overlap grouping failed, every segment gets its own volume.
    MergeFallback { reason: String },
    /// Segment has no recommended colour, a default was used.
    MissingColor { segment: SegmentNumber },
    /// Palette colour for a segment was generated.
    RandomPaletteColor { segment: SegmentNumber },
}

impl fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpacingMismatch { declared, computed } => write!(
                f,
                "declared slice spacing {declared} differs from computed spacing {computed}, using computed"
            ),
            Self::MergeFallback { reason } => write!(
                f,
                "failed to compute non-overlapping segments ({reason}), falling back to one group per segment"
            ),
            Self::MissingColor { segment } => write!(
                f,
                "segment {segment} has no recommended display colour, using default"
            ),
            Self::RandomPaletteColor { segment } => write!(
                f,
                "segment {segment} has no recommended display colour, using random palette colour"
            ),
        }
    }
}

/// State threaded through one conversion.
///
/// Create one per conversion and drop it afterwards; nothing is shared
/// between conversions.
pub struct ConversionContext {
    warnings: Vec<ConversionWarning>,
    rng: StdRng,
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionContext {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Context with a fixed random seed, for reproducible palettes.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            warnings: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Logs and records a warning.
    pub fn warn(&mut self, warning: ConversionWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[ConversionWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<ConversionWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn warnings_are_recorded_in_order() {
        let mut ctx = ConversionContext::with_seed(7);
        ctx.warn(ConversionWarning::MissingColor { segment: 2 });
        ctx.warn(ConversionWarning::MergeFallback {
            reason: "overlap".into(),
        });
        assert_eq!(ctx.warnings().len(), 2);
        assert_eq!(
            ctx.warnings()[0],
            ConversionWarning::MissingColor { segment: 2 }
        );
        assert_eq!(ctx.take_warnings().len(), 2);
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn seeded_contexts_are_reproducible() {
        let mut a = ConversionContext::with_seed(42);
        let mut b = ConversionContext::with_seed(42);
        let x: u16 = a.rng().random_range(1..=u16::MAX);
        let y: u16 = b.rng().random_range(1..=u16::MAX);
        assert_eq!(x, y);
    }
}
