//! Boxes and name labels drawn onto frames for display.

use crate::attendance::Recognition;
use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 24.0;
const LABEL_GAP: i32 = 10;
const JPEG_QUALITY: u8 = 80;

/// DejaVu Sans, see `assets/DejaVuSans-LICENSE`.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("cannot read font {path}: {source}")]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a usable font: {0}")]
    InvalidFont(PathBuf),
    #[error("bundled label font is unusable")]
    BundledFont,
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Draws recognized faces: a box, and the name above it when a font is set.
#[derive(Clone)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    /// Labels in the font at `font_path`, or the bundled one when `None`.
    pub fn load(font_path: Option<&Path>) -> Result<Self, OverlayError> {
        let Some(path) = font_path else {
            return Self::bundled();
        };

        let bytes = std::fs::read(path).map_err(|source| OverlayError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|_| OverlayError::InvalidFont(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), "label font loaded");
        Ok(Self { font: Some(font) })
    }

    pub fn bundled() -> Result<Self, OverlayError> {
        let font = FontArc::try_from_slice(BUNDLED_FONT).map_err(|_| OverlayError::BundledFont)?;
        Ok(Self { font: Some(font) })
    }

    /// Box and label every matched face. Unmatched faces are left undrawn.
    pub fn draw(&self, image: &mut RgbImage, recognitions: &[Recognition]) {
        for recognition in recognitions {
            let Some(name) = &recognition.name else {
                continue;
            };
            let b = &recognition.face_box;
            let (left, top) = (b.left.round() as i32, b.top.round() as i32);
            let width = b.width().round().max(1.0) as u32;
            let height = b.height().round().max(1.0) as u32;

            for inset in 0..BOX_THICKNESS {
                let w = width.saturating_sub(2 * inset as u32).max(1);
                let h = height.saturating_sub(2 * inset as u32).max(1);
                draw_hollow_rect_mut(image, Rect::at(left + inset, top + inset).of_size(w, h), BOX_COLOR);
            }

            if let Some(font) = &self.font {
                let y = (top - LABEL_GAP - LABEL_SCALE as i32).max(0);
                draw_text_mut(image, BOX_COLOR, left, y, PxScale::from(LABEL_SCALE), font, name);
            }
        }
    }
}

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, OverlayError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(image)?;
    Ok(buf)
}
