//! Decoded image and published frame types.

use std::time::Instant;

/// An 8-bit, 3-channel image in BGR channel order.
///
/// Pixels are stored row-major and tightly packed (`width * 3` bytes per row).
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ColorImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ColorImage {
    /// Bytes per pixel.
    pub const CHANNELS: usize = 3;

    /// Wraps an interleaved BGR buffer. Returns `None` if the size is wrong.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if Self::byte_len(width, height) != Some(data.len()) {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
        })
    }

    /// Zero-sized image, published in place of frames that cannot be decoded.
    pub fn empty() -> Self {
        Self::default()
    }

    fn byte_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::CHANNELS)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the `[b, g, r]` triple at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * Self::CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

impl std::fmt::Debug for ColorImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A decoded frame handed to consumers.
///
/// Immutable once published; ownership moves to whichever consumer pops it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    image: ColorImage,
    /// Taken right after dequeue, before decoding.
    timestamp: Instant,
    sequence: u64,
}

impl CapturedFrame {
    pub fn new(image: ColorImage, timestamp: Instant, sequence: u64) -> Self {
        Self {
            image,
            timestamp,
            sequence,
        }
    }

    #[inline]
    pub fn image(&self) -> &ColorImage {
        &self.image
    }

    /// Monotonic time at which the driver delivered the buffer.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Monotonic sequence number, continuous across device reopens.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
