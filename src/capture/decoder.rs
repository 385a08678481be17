//! Raw sensor buffer to BGR conversion.
//!
//! Every decode allocates a fresh output buffer. The raw input belongs to
//! the driver and is handed back as soon as decoding returns.

use super::ColorImage;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Per-frame decode failures. Neither is fatal to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported pixel format {0}; set the camera to 8-bit Bayer, RGB8 or BGR8")]
    UnsupportedFormat(PixelFormat),
    #[error("raw buffer too short: expected {expected} bytes, got {actual}")]
    TruncatedBuffer { expected: usize, actual: usize },
    #[error("frame size {width}x{height} is not addressable")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Color filter site in a Bayer mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSite {
    Red,
    Green,
    Blue,
}

impl ColorSite {
    /// Channel index in a red-first triple.
    #[inline]
    fn index(self) -> usize {
        match self {
            ColorSite::Red => 0,
            ColorSite::Green => 1,
            ColorSite::Blue => 2,
        }
    }
}

/// Arrangement of the 2x2 color filter tile, named by its top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPhase {
    /// `R G / G B`
    Rggb,
    /// `G R / B G`
    Grbg,
    /// `G B / R G`
    Gbrg,
    /// `B G / G R`
    Bggr,
}

impl BayerPhase {
    fn tile(self) -> [ColorSite; 4] {
        use ColorSite::{Blue as B, Green as G, Red as R};
        match self {
            BayerPhase::Rggb => [R, G, G, B],
            BayerPhase::Grbg => [G, R, B, G],
            BayerPhase::Gbrg => [G, B, R, G],
            BayerPhase::Bggr => [B, G, G, R],
        }
    }

    /// Filter color covering pixel `(x, y)`.
    #[inline]
    pub fn site(self, x: usize, y: usize) -> ColorSite {
        self.tile()[(y & 1) * 2 + (x & 1)]
    }
}

/// Pixel layout reported with each raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Interleaved 8-bit, blue first.
    Bgr8,
    /// Interleaved 8-bit, red first.
    Rgb8,
    BayerRg8,
    BayerGr8,
    BayerGb8,
    BayerBg8,
    /// Any other native format code.
    Other(u32),
}

impl PixelFormat {
    // GenICam PFNC codes as reported by the vendor SDK.
    const PFNC_BAYER_GR8: u32 = 0x0108_0008;
    const PFNC_BAYER_RG8: u32 = 0x0108_0009;
    const PFNC_BAYER_GB8: u32 = 0x0108_000A;
    const PFNC_BAYER_BG8: u32 = 0x0108_000B;
    const PFNC_RGB8: u32 = 0x0218_0014;
    const PFNC_BGR8: u32 = 0x0218_0015;

    /// Maps a native PFNC format code.
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::PFNC_BGR8 => PixelFormat::Bgr8,
            Self::PFNC_RGB8 => PixelFormat::Rgb8,
            Self::PFNC_BAYER_RG8 => PixelFormat::BayerRg8,
            Self::PFNC_BAYER_GR8 => PixelFormat::BayerGr8,
            Self::PFNC_BAYER_GB8 => PixelFormat::BayerGb8,
            Self::PFNC_BAYER_BG8 => PixelFormat::BayerBg8,
            other => PixelFormat::Other(other),
        }
    }

    /// Native PFNC format code.
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Bgr8 => Self::PFNC_BGR8,
            PixelFormat::Rgb8 => Self::PFNC_RGB8,
            PixelFormat::BayerRg8 => Self::PFNC_BAYER_RG8,
            PixelFormat::BayerGr8 => Self::PFNC_BAYER_GR8,
            PixelFormat::BayerGb8 => Self::PFNC_BAYER_GB8,
            PixelFormat::BayerBg8 => Self::PFNC_BAYER_BG8,
            PixelFormat::Other(code) => code,
        }
    }

    /// Mosaic phase for single-channel Bayer formats.
    pub fn bayer_phase(self) -> Option<BayerPhase> {
        match self {
            PixelFormat::BayerRg8 => Some(BayerPhase::Rggb),
            PixelFormat::BayerGr8 => Some(BayerPhase::Grbg),
            PixelFormat::BayerGb8 => Some(BayerPhase::Gbrg),
            PixelFormat::BayerBg8 => Some(BayerPhase::Bggr),
            _ => None,
        }
    }

    /// Bytes per pixel in the raw buffer, if the format is supported.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => Some(3),
            PixelFormat::Other(_) => None,
            _ => Some(1),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgr8 => f.write_str("bgr8"),
            PixelFormat::Rgb8 => f.write_str("rgb8"),
            PixelFormat::BayerRg8 => f.write_str("bayer_rg8"),
            PixelFormat::BayerGr8 => f.write_str("bayer_gr8"),
            PixelFormat::BayerGb8 => f.write_str("bayer_gb8"),
            PixelFormat::BayerBg8 => f.write_str("bayer_bg8"),
            PixelFormat::Other(code) => write!(f, "0x{code:08x}"),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = DecodeError;

    /// Accepts the names printed by `Display`, or a `0x`-prefixed code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "bgr8" => PixelFormat::Bgr8,
            "rgb8" => PixelFormat::Rgb8,
            "bayer_rg8" => PixelFormat::BayerRg8,
            "bayer_gr8" => PixelFormat::BayerGr8,
            "bayer_gb8" => PixelFormat::BayerGb8,
            "bayer_bg8" => PixelFormat::BayerBg8,
            other => {
                let code = other
                    .strip_prefix("0x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .unwrap_or(0);
                PixelFormat::from_code(code)
            }
        };
        match format {
            PixelFormat::Other(0) => Err(DecodeError::UnsupportedFormat(format)),
            format => Ok(format),
        }
    }
}

/// Decodes a raw sensor buffer into a freshly allocated BGR image.
///
/// Bytes past `width * height * bytes_per_pixel` (row padding at the end of
/// the buffer) are ignored.
pub fn decode(raw: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<ColorImage, DecodeError> {
    let bytes_per_pixel = format
        .bytes_per_pixel()
        .ok_or(DecodeError::UnsupportedFormat(format))?;
    let (w, h) = (width as usize, height as usize);
    // Dimensions come from the driver; a corrupt header must not overflow.
    let expected = w
        .checked_mul(h)
        .and_then(|pixels| pixels.checked_mul(ColorImage::CHANNELS))
        .map(|_| w * h * bytes_per_pixel)
        .ok_or(DecodeError::InvalidDimensions { width, height })?;
    if raw.len() < expected {
        return Err(DecodeError::TruncatedBuffer {
            expected,
            actual: raw.len(),
        });
    }
    let raw = &raw[..expected];

    let data = match format {
        PixelFormat::Bgr8 => raw.to_vec(),
        PixelFormat::Rgb8 => {
            let mut data = raw.to_vec();
            swap_red_blue(&mut data);
            data
        }
        _ => {
            let phase = format
                .bayer_phase()
                .ok_or(DecodeError::UnsupportedFormat(format))?;
            // Demosaicing leaves these sensors red-first. The swap brings
            // Bayer output in line with the BGR8 path; do not drop it.
            let mut data = demosaic(raw, w, h, phase);
            swap_red_blue(&mut data);
            data
        }
    };

    ColorImage::from_bgr(data, width, height).ok_or(DecodeError::TruncatedBuffer {
        expected,
        actual: raw.len(),
    })
}

/// Swaps the first and third byte of every pixel triple in place.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(ColorImage::CHANNELS) {
        px.swap(0, 2);
    }
}

/// Bilinear demosaic producing red-first triples.
///
/// Each missing channel is the mean of the same-colored samples in the
/// 3x3 neighborhood. Borders mirror without repeating the edge pixel, which
/// keeps the mosaic phase intact at the image boundary.
fn demosaic(raw: &[u8], width: usize, height: usize, phase: BayerPhase) -> Vec<u8> {
    let mut out = vec![0u8; width * height * ColorImage::CHANNELS];

    for y in 0..height {
        for x in 0..width {
            let mut sum = [0u32; 3];
            let mut count = [0u32; 3];

            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let sx = mirror(x as isize + dx, width);
                    let sy = mirror(y as isize + dy, height);
                    let c = phase.site(sx, sy).index();
                    sum[c] += u32::from(raw[sy * width + sx]);
                    count[c] += 1;
                }
            }

            let center = phase.site(x, y).index();
            let o = (y * width + x) * ColorImage::CHANNELS;
            for c in 0..ColorImage::CHANNELS {
                out[o + c] = if c == center {
                    raw[y * width + x]
                } else if count[c] > 0 {
                    ((sum[c] + count[c] / 2) / count[c]) as u8
                } else {
                    0
                };
            }
        }
    }

    out
}

#[inline]
fn mirror(i: isize, len: usize) -> usize {
    let last = len as isize - 1;
    let reflected = if i < 0 {
        -i
    } else if i > last {
        2 * last - i
    } else {
        i
    };
    reflected.clamp(0, last.max(0)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a raw buffer whose every pixel reads as the `[r, g, b]` color.
    fn synthetic(rgb: [u8; 3], width: usize, height: usize, format: PixelFormat) -> Vec<u8> {
        let [r, g, b] = rgb;
        match format.bayer_phase() {
            Some(phase) => (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| match phase.site(x, y) {
                    ColorSite::Red => r,
                    ColorSite::Green => g,
                    ColorSite::Blue => b,
                })
                .collect(),
            None if format == PixelFormat::Rgb8 => [r, g, b].repeat(width * height),
            None => [b, g, r].repeat(width * height),
        }
    }

    fn assert_constant(image: &ColorImage, bgr: [u8; 3]) {
        for y in 0..image.height() {
            for x in 0..image.width() {
                assert_eq!(image.pixel(x, y), Some(bgr), "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_bgr_passthrough() {
        let raw = synthetic([200, 100, 30], 4, 3, PixelFormat::Bgr8);
        let image = decode(&raw, 4, 3, PixelFormat::Bgr8).unwrap();
        assert_eq!(image.data(), raw.as_slice());
    }

    #[test]
    fn test_rgb_is_swapped() {
        let raw = synthetic([200, 100, 30], 4, 3, PixelFormat::Rgb8);
        let image = decode(&raw, 4, 3, PixelFormat::Rgb8).unwrap();
        assert_constant(&image, [30, 100, 200]);
    }

    #[test]
    fn test_every_bayer_phase_decodes_constant_color() {
        for format in [
            PixelFormat::BayerRg8,
            PixelFormat::BayerGr8,
            PixelFormat::BayerGb8,
            PixelFormat::BayerBg8,
        ] {
            for (w, h) in [(8, 6), (5, 7), (2, 2)] {
                let raw = synthetic([200, 100, 30], w, h, format);
                let image = decode(&raw, w as u32, h as u32, format).unwrap();
                assert_eq!(image.width(), w as u32);
                assert_constant(&image, [30, 100, 200]);
            }
        }
    }

    #[test]
    fn test_bayer_channel_order_matches_bgr_path() {
        let rgb = [10, 140, 250];
        let reference = decode(&synthetic(rgb, 6, 4, PixelFormat::Bgr8), 6, 4, PixelFormat::Bgr8).unwrap();
        let bayer = decode(&synthetic(rgb, 6, 4, PixelFormat::BayerBg8), 6, 4, PixelFormat::BayerBg8).unwrap();
        assert_eq!(reference, bayer);
    }

    #[test]
    fn test_bayer_interpolates_missing_channels() {
        // RGGB tile with red 100 at (0,0) and (2,0); green 0 everywhere.
        let raw = vec![
            100, 0, 100, 0, //
            0, 50, 0, 50, //
            100, 0, 100, 0, //
            0, 50, 0, 50,
        ];
        let image = decode(&raw, 4, 4, PixelFormat::BayerRg8).unwrap();
        // Green site at (1,0): red from left/right, blue from below (mirrored above).
        assert_eq!(image.pixel(1, 0), Some([50, 0, 100]));
    }

    #[test]
    fn test_unsupported_format() {
        let raw = vec![0u8; 16];
        let format = PixelFormat::from_code(0x0110_0003);
        assert_eq!(
            decode(&raw, 4, 4, format),
            Err(DecodeError::UnsupportedFormat(format))
        );
    }

    #[test]
    fn test_truncated_buffer() {
        let raw = vec![0u8; 10];
        assert_eq!(
            decode(&raw, 4, 4, PixelFormat::BayerRg8),
            Err(DecodeError::TruncatedBuffer {
                expected: 16,
                actual: 10
            })
        );
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        assert_eq!(
            decode(&[], u32::MAX, u32::MAX, PixelFormat::Bgr8),
            Err(DecodeError::InvalidDimensions {
                width: u32::MAX,
                height: u32::MAX
            })
        );
        assert!(decode(&[], u32::MAX, u32::MAX, PixelFormat::BayerRg8).is_err());
        assert!(decode(&[], u32::MAX, 1, PixelFormat::Rgb8).is_err());
    }

    #[test]
    fn test_output_does_not_alias_input() {
        let raw = synthetic([1, 2, 3], 2, 2, PixelFormat::Bgr8);
        let image = decode(&raw, 2, 2, PixelFormat::Bgr8).unwrap();
        assert_ne!(image.data().as_ptr(), raw.as_ptr());
    }

    #[test]
    fn test_format_codes_and_names() {
        for format in [
            PixelFormat::Bgr8,
            PixelFormat::Rgb8,
            PixelFormat::BayerRg8,
            PixelFormat::BayerGr8,
            PixelFormat::BayerGb8,
            PixelFormat::BayerBg8,
        ] {
            assert_eq!(PixelFormat::from_code(format.code()), format);
            assert_eq!(format.to_string().parse::<PixelFormat>(), Ok(format));
        }
        assert_eq!("0x01100003".parse::<PixelFormat>(), Ok(PixelFormat::Other(0x0110_0003)));
        assert!("yuv422".parse::<PixelFormat>().is_err());
    }
}
