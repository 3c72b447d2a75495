//! Detection + embedding for a whole frame.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// One face found in a frame, in full-resolution coordinates.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub face_box: FaceBox,
    pub embedding: Embedding,
}

/// Turns an RGB image into detected faces with embeddings.
pub trait FaceAnalyzer {
    /// Detect on a copy of `image` shrunk by `downscale` (1 = full size) and
    /// return faces sorted by detection confidence, highest first.
    fn analyze(&mut self, image: &RgbImage, downscale: u32) -> Result<Vec<DetectedFace>, PipelineError>;
}

/// SCRFD detector + ArcFace recognizer.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FacePipeline {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for FacePipeline {
    fn analyze(&mut self, image: &RgbImage, downscale: u32) -> Result<Vec<DetectedFace>, PipelineError> {
        let factor = downscale.max(1);
        let small = shrink(image, factor);
        let boxes = self.detector.detect(&small)?;

        tracing::debug!(faces = boxes.len(), factor, "detected faces");

        // Embeddings come from the full-resolution frame; only detection runs
        // on the shrunk copy.
        let mut faces = Vec::with_capacity(boxes.len());
        for face_box in boxes {
            let face_box = face_box.scaled(factor as f32);
            let embedding = self.recognizer.extract(image, &face_box)?;
            faces.push(DetectedFace { face_box, embedding });
        }
        Ok(faces)
    }
}

/// Bilinear downscale by an integer factor; factor 1 borrows the input.
pub fn shrink(image: &RgbImage, factor: u32) -> Cow<'_, RgbImage> {
    if factor <= 1 {
        return Cow::Borrowed(image);
    }
    let w = (image.width() / factor).max(1);
    let h = (image.height() / factor).max(1);
    Cow::Owned(imageops::resize(image, w, h, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_quarter() {
        let image = RgbImage::new(640, 480);
        let small = shrink(&image, 4);
        assert_eq!(small.dimensions(), (160, 120));
    }

    #[test]
    fn test_shrink_factor_one_borrows() {
        let image = RgbImage::new(10, 10);
        assert!(matches!(shrink(&image, 1), Cow::Borrowed(_)));
        assert!(matches!(shrink(&image, 0), Cow::Borrowed(_)));
    }

    #[test]
    fn test_shrink_never_zero() {
        let image = RgbImage::new(3, 3);
        assert_eq!(shrink(&image, 8).dimensions(), (1, 1));
    }

    #[test]
    fn test_load_missing_models() {
        let err = FacePipeline::load(Path::new("/nonexistent")).err().unwrap();
        assert!(matches!(err, PipelineError::Detector(DetectorError::ModelNotFound(_))));
    }
}
