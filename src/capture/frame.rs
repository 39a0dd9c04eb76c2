//! Frame type representing a captured image with metadata.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Creates a size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels (width * height).
    #[inline]
    pub fn pixels(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single captured frame of 8-bit samples, stored row major.
///
/// The buffer may be longer than `width * height`: some transports write
/// a fixed number of trailing bytes past the image. The extra capacity is
/// never exposed through [`pixels`](Self::pixels).
#[derive(Clone)]
pub struct Frame {
    /// Sample buffer, `capacity_pixels` long.
    data: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Capture timestamp.
    timestamp: Instant,
    /// Monotonic sequence number.
    sequence: u64,
}

impl Frame {
    /// Creates a frame from an existing sample buffer.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data: pixels,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Creates a zeroed frame with `padding` extra trailing bytes.
    pub fn zeroed(width: u32, height: u32, padding: usize, sequence: u64) -> Self {
        let capacity = FrameSize::new(width, height).pixels() + padding;
        Self::new(vec![0u8; capacity], width, height, sequence)
    }

    /// Image samples, excluding any trailing padding.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        let end = self.pixel_count().min(self.data.len());
        &self.data[..end]
    }

    /// The whole buffer including padding, for transports to fill.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Sample at column `x`, row `y`.
    pub fn at(&self, x: u32, y: u32) -> Option<u8> {
        self.index(x, y).and_then(|i| self.data.get(i).copied())
    }

    /// Mutable sample at column `x`, row `y`.
    pub fn at_mut(&mut self, x: u32, y: u32) -> Option<&mut u8> {
        self.index(x, y).and_then(|i| self.data.get_mut(i))
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the frame dimensions.
    #[inline]
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.size().pixels()
    }

    /// Buffer length in samples, at least `pixel_count` for a valid frame.
    #[inline]
    pub fn capacity_pixels(&self) -> usize {
        self.data.len()
    }

    /// Validates that the buffer can hold the image.
    pub fn is_valid(&self) -> bool {
        self.data.len() >= self.pixel_count()
    }

    /// Consumes the frame, returning the image samples without padding.
    pub fn into_pixels(mut self) -> Vec<u8> {
        let end = self.pixel_count().min(self.data.len());
        self.data.truncate(end);
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("capacity_pixels", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let pixels = vec![0u8; 640 * 480];
        let frame = Frame::new(pixels, 640, 480, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_frame_invalid_size() {
        let pixels = vec![0u8; 100]; // Wrong size
        let frame = Frame::new(pixels, 640, 480, 1);

        assert!(!frame.is_valid());
        assert_eq!(frame.pixels().len(), 100);
    }

    #[test]
    fn test_padding_hidden_from_pixels() {
        let mut frame = Frame::zeroed(4, 2, 512, 7);
        assert_eq!(frame.capacity_pixels(), 8 + 512);
        assert_eq!(frame.pixels().len(), 8);
        assert_eq!(frame.buffer_mut().len(), 520);
        assert_eq!(frame.into_pixels().len(), 8);
    }

    #[test]
    fn test_row_major_access() {
        let mut frame = Frame::zeroed(3, 2, 0, 0);
        *frame.at_mut(2, 1).unwrap() = 9;

        assert_eq!(frame.pixels()[5], 9);
        assert_eq!(frame.at(2, 1), Some(9));
        assert_eq!(frame.at(3, 0), None);
        assert_eq!(frame.at(0, 2), None);
    }
}
