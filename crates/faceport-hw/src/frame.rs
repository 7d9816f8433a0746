//! Frame type and image processing: YUYV conversion, dark detection, JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// One byte per pixel.
    Gray,
    /// Three bytes per pixel, R G B.
    Rgb,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
        }
    }
}

/// A captured camera frame in a packed 8-bit layout.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub sequence: u32,
}

impl Frame {
    /// Per-pixel luma (BT.601 weights for RGB).
    pub fn luma(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Gray => self.data.clone(),
            PixelLayout::Rgb => self
                .data
                .chunks_exact(3)
                .map(|p| ((77 * p[0] as u32 + 150 * p[1] as u32 + 29 * p[2] as u32) >> 8) as u8)
                .collect(),
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let luma = self.luma();
        if luma.is_empty() {
            return 0.0;
        }
        luma.iter().map(|&b| b as f32).sum::<f32>() / luma.len() as f32
    }

    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.luma(), DARK_FRAME_THRESHOLD)
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        encode_jpeg(&self.data, self.width, self.height, self.layout, quality)
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB.
///
/// YUYV packs two pixels per 4 bytes, [Y0, U, Y1, V]; both pixels share U
/// and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = yuyv_len(width, height);
    check_len(yuyv, expected)?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuyv_len(width: u32, height: u32) -> usize {
    (width * height * 2) as usize
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YUV to RGB, integer arithmetic.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Check if a frame is dark: true if more than `threshold_pct` of pixels
/// fall in the darkest bucket (0–31).
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}

/// Encode packed pixels as a baseline JPEG.
pub fn encode_jpeg(
    data: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
    quality: u8,
) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize * layout.channels();
    check_len(data, expected)?;

    let color = match layout {
        PixelLayout::Gray => ExtendedColorType::L8,
        PixelLayout::Rgb => ExtendedColorType::Rgb8,
    };
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &data[..expected],
        width,
        height,
        color,
    )?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Frame {
        Frame {
            data,
            width,
            height,
            layout,
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // U = V = 128 carries no colour; white and black stay neutral.
        let rgb = yuyv_to_rgb(&[235, 128, 16, 128], 2, 1).unwrap();
        assert_eq!(rgb, vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominates_with_high_v() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red channel {}", rgb[0]);
        assert!(rgb[1] < 40 && rgb[2] < 40);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_dark_frame_thresholds() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));

        // 94% dark, 6% bright → not dark
        let mut luma = vec![10u8; 940];
        luma.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&luma, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_rgb_luma_weights() {
        let f = frame(vec![255, 255, 255, 0, 0, 0], 2, 1, PixelLayout::Rgb);
        assert_eq!(f.luma(), vec![255, 0]);
        assert!((f.avg_brightness() - 127.5).abs() < 1e-3);
    }

    #[test]
    fn test_jpeg_has_soi_and_eoi_markers() {
        let f = frame(vec![128u8; 16 * 16 * 3], 16, 16, PixelLayout::Rgb);
        let jpeg = f.to_jpeg(85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_jpeg_rejects_short_buffer() {
        let f = frame(vec![0u8; 10], 16, 16, PixelLayout::Gray);
        assert!(matches!(f.to_jpeg(85), Err(FrameError::InvalidLength { .. })));
    }
}
