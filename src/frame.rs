//! Captured Frame Types
//!
//! A [`Frame`] is one full-resolution screen capture handed to the engine
//! each tick. Payloads are reference-counted [`Bytes`] so a capture thread
//! can hand frames across a channel without copying.

use bytes::Bytes;

use crate::error::{EngineError, Result};

/// Pixel format of a captured frame
///
/// Capture paths deliver packed 32-bit pixels; the two orderings seen in
/// practice are supported. The alpha byte is ignored everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// BGRA 32-bit (desktop duplication default)
    Bgra8,
    /// RGBA 32-bit
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel
    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    /// Byte offsets of the (R, G, B) channels within one pixel
    #[inline]
    pub fn rgb_offsets(&self) -> (usize, usize, usize) {
        match self {
            Self::Bgra8 => (2, 1, 0),
            Self::Rgba8 => (0, 1, 2),
        }
    }
}

/// One full-screen capture
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Row stride in bytes (>= width * 4)
    pub stride: u32,

    /// Pixel format
    pub format: PixelFormat,

    /// Pixel data, `stride * height` bytes (last row may be unpadded)
    pub data: Bytes,
}

impl Frame {
    /// Create a frame, validating the payload against its geometry
    pub fn new(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Bytes,
    ) -> Result<Self> {
        let bpp = format.bytes_per_pixel();
        let row_bytes = width as usize * bpp;
        if (stride as usize) < row_bytes {
            return Err(EngineError::FrameSizeMismatch {
                got: stride as usize,
                expected: row_bytes,
                width,
                height,
            });
        }
        // Last row may omit stride padding
        let min_len = if height == 0 {
            0
        } else {
            (height as usize - 1) * stride as usize + row_bytes
        };
        if data.len() < min_len {
            return Err(EngineError::FrameSizeMismatch {
                got: data.len(),
                expected: min_len,
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Create a tightly-packed frame (stride = width * 4)
    pub fn tight(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Result<Self> {
        let stride = width * format.bytes_per_pixel() as u32;
        Self::new(width, height, stride, format, data)
    }

    /// Pixel data of row `y`, `width * 4` bytes
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// True if `other` has the same geometry and format as this frame
    #[inline]
    pub fn matches_layout(&self, other: &Frame) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.stride == other.stride
            && self.format == other.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_tight_valid() {
        let data = Bytes::from(vec![0u8; 64 * 32 * 4]);
        let frame = Frame::tight(64, 32, PixelFormat::Bgra8, data).unwrap();
        assert_eq!(frame.stride, 256);
        assert_eq!(frame.row(31).len(), 256);
    }

    #[test]
    fn test_frame_short_payload_rejected() {
        let data = Bytes::from(vec![0u8; 100]);
        let err = Frame::tight(64, 32, PixelFormat::Bgra8, data).unwrap_err();
        assert!(matches!(err, EngineError::FrameSizeMismatch { .. }));
    }

    #[test]
    fn test_frame_padded_stride() {
        // 60px rows padded to 256-byte stride, last row unpadded
        let stride = 256u32;
        let len = (31 * stride + 60 * 4) as usize;
        let data = Bytes::from(vec![7u8; len]);
        let frame = Frame::new(60, 32, stride, PixelFormat::Rgba8, data).unwrap();
        assert_eq!(frame.row(31).len(), 240);
    }

    #[test]
    fn test_rgb_offsets() {
        assert_eq!(PixelFormat::Bgra8.rgb_offsets(), (2, 1, 0));
        assert_eq!(PixelFormat::Rgba8.rgb_offsets(), (0, 1, 2));
    }
}
