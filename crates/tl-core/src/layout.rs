//! Shapes of timeline payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample type of one frame component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    /// Unsigned 8-bit
    U8,
    /// Signed 8-bit
    I8,
    /// Unsigned 16-bit
    U16,
    /// Signed 16-bit
    I16,
    /// Unsigned 32-bit
    U32,
    /// Signed 32-bit
    I32,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl PixelType {
    /// Bytes per component.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            PixelType::U8 | PixelType::I8 => 1,
            PixelType::U16 | PixelType::I16 => 2,
            PixelType::U32 | PixelType::I32 | PixelType::F32 => 4,
            PixelType::F64 => 8,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelType::U8 => "u8",
            PixelType::I8 => "i8",
            PixelType::U16 => "u16",
            PixelType::I16 => "i16",
            PixelType::U32 => "u32",
            PixelType::I32 => "i32",
            PixelType::F32 => "f32",
            PixelType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Geometry of one image frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Components per pixel (e.g. 3 for RGB)
    pub components: u32,
    /// Sample type of each component
    pub pixel_type: PixelType,
}

impl FrameLayout {
    /// Bytes per pixel across all components.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        self.pixel_type.size() * self.components as usize
    }
}

/// What every buffer of a timeline holds. Fixed once the pool is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BufferLayout {
    /// Opaque bytes.
    Raw {
        /// Bytes per buffer
        chunk_size: usize,
    },
    /// Image frames.
    Frame {
        /// Frame geometry
        frame: FrameLayout,
        /// Bytes per frame
        chunk_size: usize,
    },
    /// Fixed-capacity element sets with a presence mask.
    Elements {
        /// Bytes per element
        element_size: usize,
        /// Element slots per buffer
        max_elements: usize,
        /// Mask plus element storage
        chunk_size: usize,
    },
}

impl BufferLayout {
    /// Bytes per buffer.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        match *self {
            BufferLayout::Raw { chunk_size }
            | BufferLayout::Frame { chunk_size, .. }
            | BufferLayout::Elements { chunk_size, .. } => chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_sizes() {
        assert_eq!(PixelType::U8.size(), 1);
        assert_eq!(PixelType::I16.size(), 2);
        assert_eq!(PixelType::F32.size(), 4);
        assert_eq!(PixelType::F64.size(), 8);
    }

    #[test]
    fn test_pixel_type_names() {
        let parsed: PixelType = serde_json::from_str("\"u16\"").unwrap();
        assert_eq!(parsed, PixelType::U16);
        assert_eq!(PixelType::F64.to_string(), "f64");
    }

    #[test]
    fn test_chunk_size() {
        let frame = FrameLayout {
            width: 10,
            height: 20,
            components: 3,
            pixel_type: PixelType::U16,
        };
        assert_eq!(frame.bytes_per_pixel(), 6);
        assert_eq!(
            BufferLayout::Frame {
                frame,
                chunk_size: 1200
            }
            .chunk_size(),
            1200
        );
        assert_eq!(BufferLayout::Raw { chunk_size: 7 }.chunk_size(), 7);
    }
}
