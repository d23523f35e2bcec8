//! Owned frame pixel buffers.
//!
//! Binary segmentation frames are stored bit-packed, least significant bit
//! first, the way DICOM encodes 1 bit pixel data. Fractional and label map
//! frames keep one value per pixel.

use crate::error::PixelFormatError;
use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelData {
    /// 1 bit per pixel, packed LSB first, padded to a whole byte.
    Packed(Vec<u8>),
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// Number of bytes needed to hold `num_pixels` packed bits.
pub fn packed_len(num_pixels: usize) -> usize {
    num_pixels.div_ceil(8)
}

/// Packs a mask (any non-zero value is foreground) into bits.
pub fn pack_bits(mask: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; packed_len(mask.len())];
    for (i, _) in mask.iter().enumerate().filter(|(_, v)| **v != 0) {
        packed[i / 8] |= 1 << (i % 8);
    }
    packed
}

/// Unpacks `num_pixels` bits into one 0/1 byte per pixel.
pub fn unpack_bits(packed: &[u8], num_pixels: usize) -> Result<Vec<u8>, PixelFormatError> {
    let expected = packed_len(num_pixels);
    if packed.len() < expected {
        return Err(PixelFormatError::LengthMismatch {
            expected,
            actual: packed.len(),
        });
    }
    Ok((0..num_pixels)
        .map(|i| (packed[i / 8] >> (i % 8)) & 1)
        .collect())
}

/// Cuts frame `index` out of contiguously packed multi-frame pixel data.
///
/// Frames are not padded to byte boundaries, so a frame may start in the
/// middle of a byte. The returned buffer is byte aligned.
pub fn extract_packed_frame(
    data: &[u8],
    index: usize,
    pixels_per_frame: usize,
) -> Result<Vec<u8>, PixelFormatError> {
    let start_bit = index * pixels_per_frame;
    let end_bit = start_bit + pixels_per_frame;
    let required = packed_len(end_bit);
    if data.len() < required {
        return Err(PixelFormatError::LengthMismatch {
            expected: required,
            actual: data.len(),
        });
    }

    if start_bit % 8 == 0 {
        let start = start_bit / 8;
        let mut frame = data[start..start + packed_len(pixels_per_frame)].to_vec();
        clear_padding_bits(&mut frame, pixels_per_frame);
        return Ok(frame);
    }

    let mut frame = vec![0u8; packed_len(pixels_per_frame)];
    for i in 0..pixels_per_frame {
        let bit = start_bit + i;
        if (data[bit / 8] >> (bit % 8)) & 1 == 1 {
            frame[i / 8] |= 1 << (i % 8);
        }
    }
    Ok(frame)
}

fn clear_padding_bits(frame: &mut [u8], num_pixels: usize) {
    let used = num_pixels % 8;
    if used != 0 {
        if let Some(last) = frame.last_mut() {
            *last &= (1u8 << used) - 1;
        }
    }
}

impl PixelData {
    /// Zero-filled buffer for the given bit depth.
    pub fn zeros(bits_allocated: u16, num_pixels: usize) -> Result<Self, PixelFormatError> {
        match bits_allocated {
            1 => Ok(Self::Packed(vec![0; packed_len(num_pixels)])),
            8 => Ok(Self::U8(vec![0; num_pixels])),
            16 => Ok(Self::U16(vec![0; num_pixels])),
            other => Err(PixelFormatError::UnsupportedBitDepth(u32::from(other))),
        }
    }

    /// Decodes little endian raw bytes of one frame.
    pub fn from_raw(
        bits_allocated: u16,
        bytes: &[u8],
        num_pixels: usize,
    ) -> Result<Self, PixelFormatError> {
        let expected = match bits_allocated {
            1 => packed_len(num_pixels),
            8 => num_pixels,
            16 => num_pixels * 2,
            other => return Err(PixelFormatError::UnsupportedBitDepth(u32::from(other))),
        };
        if bytes.len() < expected {
            return Err(PixelFormatError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let bytes = &bytes[..expected];
        Ok(match bits_allocated {
            1 => Self::Packed(bytes.to_vec()),
            8 => Self::U8(bytes.to_vec()),
            _ => Self::U16(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
        })
    }

    pub fn bits_allocated(&self) -> u16 {
        match self {
            Self::Packed(_) => 1,
            Self::U8(_) => 8,
            Self::U16(_) => 16,
        }
    }

    /// Checks that the buffer holds exactly one frame of `num_pixels`.
    pub fn validate(&self, num_pixels: usize) -> Result<(), PixelFormatError> {
        let (expected, actual) = match self {
            Self::Packed(b) => (packed_len(num_pixels), b.len()),
            Self::U8(v) => (num_pixels, v.len()),
            Self::U16(v) => (num_pixels, v.len()),
        };
        if expected != actual {
            return Err(PixelFormatError::LengthMismatch { expected, actual });
        }
        Ok(())
    }

    /// One value per pixel; packed frames yield 0 or 1.
    pub fn values(&self, num_pixels: usize) -> Result<Cow<'_, [u16]>, PixelFormatError> {
        self.validate(num_pixels)?;
        Ok(match self {
            Self::Packed(b) => Cow::Owned(
                unpack_bits(b, num_pixels)?
                    .into_iter()
                    .map(u16::from)
                    .collect(),
            ),
            Self::U8(v) => Cow::Owned(v.iter().map(|&p| u16::from(p)).collect()),
            Self::U16(v) => Cow::Borrowed(v.as_slice()),
        })
    }

    /// Distinct non-zero values, ascending.
    pub fn distinct_nonzero(&self, num_pixels: usize) -> Result<Vec<u16>, PixelFormatError> {
        let mut values: Vec<u16> = self
            .values(num_pixels)?
            .iter()
            .copied()
            .filter(|&v| v != 0)
            .collect();
        values.sort_unstable();
        values.dedup();
        Ok(values)
    }

    pub fn set(&mut self, index: usize, value: u16) {
        match self {
            Self::Packed(b) => {
                if value != 0 {
                    b[index / 8] |= 1 << (index % 8);
                } else {
                    b[index / 8] &= !(1 << (index % 8));
                }
            }
            Self::U8(v) => v[index] = value as u8,
            Self::U16(v) => v[index] = value,
        }
    }

    /// Number of pixels with a non-zero value.
    pub fn count_nonzero(&self, num_pixels: usize) -> Result<usize, PixelFormatError> {
        Ok(self.values(num_pixels)?.iter().filter(|&&v| v != 0).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_are_lsb_first() {
        let mask = [1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1];
        let packed = pack_bits(&mask);
        assert_eq!(packed, vec![0b0000_0001, 0b0000_0110]);
        assert_eq!(unpack_bits(&packed, mask.len()).unwrap(), mask.to_vec());
    }

    #[test]
    fn unpack_rejects_short_buffers() {
        let err = unpack_bits(&[0xff], 9).unwrap_err();
        assert_eq!(
            err,
            PixelFormatError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn extracts_frames_starting_mid_byte() {
        // three frames of 3x3 pixels packed back to back
        let frames: [[u8; 9]; 3] = [
            [1, 0, 0, 0, 1, 0, 0, 0, 1],
            [0, 1, 0, 1, 0, 1, 0, 1, 0],
            [1, 1, 1, 0, 0, 0, 1, 1, 1],
        ];
        let all: Vec<u8> = frames.iter().flatten().copied().collect();
        let packed = pack_bits(&all);

        for (i, expected) in frames.iter().enumerate() {
            let frame = extract_packed_frame(&packed, i, 9).unwrap();
            assert_eq!(frame, pack_bits(expected), "frame {i}");
        }
    }

    #[test]
    fn aligned_extraction_clears_trailing_bits() {
        let all = [1u8; 12];
        let packed = pack_bits(&all);
        let frame = extract_packed_frame(&packed, 0, 4).unwrap();
        assert_eq!(frame, vec![0b0000_1111]);
    }

    #[test]
    fn from_raw_decodes_little_endian_words() {
        let data = PixelData::from_raw(16, &[1, 0, 0, 1], 2).unwrap();
        assert_eq!(data, PixelData::U16(vec![1, 256]));
        assert_eq!(
            PixelData::from_raw(12, &[0; 4], 2),
            Err(PixelFormatError::UnsupportedBitDepth(12))
        );
    }

    #[test]
    fn distinct_values_skip_background() {
        let data = PixelData::U8(vec![0, 3, 1, 3, 0, 1]);
        assert_eq!(data.distinct_nonzero(6).unwrap(), vec![1, 3]);
    }
}
