//! Frame type and pixel conversion: YUYV and MJPG to RGB, dark detection.

use image::{ImageFormat, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = (self.width() * self.height()) as usize;
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0)).sum::<f32>() / pixels as f32
    }

    /// True if more than `threshold_pct` of the pixels are near-black.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let pixels = (self.width() * self.height()) as usize;
        if pixels == 0 {
            return true;
        }
        let dark = self.image.pixels().filter(|p| luma(p.0) < 32.0).count();
        (dark as f32 / pixels as f32) > threshold_pct
    }
}

/// BT.601 luma of an RGB pixel.
fn luma([r, g, b]: [u8; 3]) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share the
/// chroma pair. Uses the BT.601 limited-range coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let c = 1.164 * (y as f32 - 16.0);
            rgb.push(clamp_u8(c + 1.596 * v));
            rgb.push(clamp_u8(c - 0.392 * u - 0.813 * v));
            rgb.push(clamp_u8(c + 2.017 * u));
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Decode one Motion-JPEG buffer to RGB.
pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    let decoded = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_of(image: RgbImage) -> Frame {
        Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_to_rgb_dimensions() {
        // 4x2 image = 8 pixels, 16 YUYV bytes
        let yuyv = vec![128u8; 16];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // U = V = 128 means no chroma: every channel equals the scaled luma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let p0 = rgb.get_pixel(0, 0);
        let p1 = rgb.get_pixel(1, 0);
        assert_eq!(p0[0], p0[1]);
        assert_eq!(p0[1], p0[2]);
        assert!(p1[0] > p0[0], "brighter Y should give a brighter pixel");
    }

    #[test]
    fn test_yuyv_extremes_clamp() {
        let yuyv = vec![255, 255, 255, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0)[0], 255);
        assert_eq!(rgb.get_pixel(0, 0)[2], 255);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_decode_mjpeg_rejects_garbage() {
        assert!(matches!(decode_mjpeg(&[0, 1, 2, 3]), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_decode_mjpeg_roundtrip_dimensions() {
        let img = RgbImage::from_pixel(8, 6, Rgb([200, 10, 10]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        let decoded = decode_mjpeg(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
    }

    #[test]
    fn test_dark_frame_all_black() {
        let frame = frame_of(RgbImage::new(10, 10));
        assert!(frame.is_dark(0.95));
        assert_eq!(frame.avg_brightness(), 0.0);
    }

    #[test]
    fn test_dark_frame_normal() {
        let frame = frame_of(RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])));
        assert!(!frame.is_dark(0.95));
        assert!((frame.avg_brightness() - 128.0).abs() < 0.5);
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(frame_of(RgbImage::new(0, 0)).is_dark(0.95));
    }
}
