//! Shared hard limits for timeline sizing.
//!
//! Frame and element timelines validate their layouts against these before
//! configuring a pool, so a bad configuration fails early instead of
//! allocating an absurd chunk for every pushed object.

use crate::error::TimelineError;

/// Default number of objects a timeline retains.
pub const DEFAULT_MAXIMUM_SIZE: usize = 1000;

/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 65_536;

/// Maximum allowed frame payload in bytes (512 MiB).
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Maximum element slots per element timeline object (one presence bit each).
pub const MAX_ELEMENTS: usize = 64;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Pixels per frame
    pub pixels: usize,
    /// Bytes per frame
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<FrameSize, TimelineError> {
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(TimelineError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_DIMENSION,
        });
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or(TimelineError::SizeOverflow {
            context: "frame pixel count",
        })?;

    let bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or(TimelineError::SizeOverflow {
            context: "frame byte size",
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(TimelineError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    Ok(FrameSize { pixels, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_frame_size() {
        let size = validate_frame_size(10, 20, 3).unwrap();
        assert_eq!(size, FrameSize { pixels: 200, bytes: 600 });
    }

    #[test]
    fn test_dimension_limit() {
        assert!(matches!(
            validate_frame_size(MAX_FRAME_DIMENSION + 1, 1, 1),
            Err(TimelineError::FrameDimensionsTooLarge { .. })
        ));
    }

    #[test]
    fn test_byte_limit() {
        assert!(matches!(
            validate_frame_size(MAX_FRAME_DIMENSION, MAX_FRAME_DIMENSION, 8),
            Err(TimelineError::FrameTooLarge { .. })
        ));
    }
}
