//! Enrolled identities, loaded once from a directory of reference images.

use crate::pipeline::FaceAnalyzer;
use crate::types::{Embedding, EnrolledIdentity};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reference image extensions, matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["jpg", "png"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("cannot read enrollment directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no enrolled identities in {0}")]
    Empty(PathBuf),
}

/// Ordered, name-unique set of enrolled identities.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentStore {
    identities: Vec<EnrolledIdentity>,
}

impl EnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from every supported image in `dir`, in file-name order.
    ///
    /// Unreadable images, images without a face and duplicate names are
    /// skipped with a warning. Only a failure to list `dir` is an error.
    pub fn load<A: FaceAnalyzer>(dir: &Path, analyzer: &mut A) -> Result<Self, EnrollmentError> {
        let mut store = Self::new();

        for path in reference_images(dir)? {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                tracing::warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable image, skipping");
                    continue;
                }
            };

            let face = match analyzer.analyze(&image, 1) {
                Ok(faces) => faces.into_iter().next(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "face analysis failed, skipping");
                    continue;
                }
            };

            let Some(face) = face else {
                tracing::warn!(path = %path.display(), "no face found, skipping");
                continue;
            };

            if store.insert(name.clone(), face.embedding) {
                tracing::info!(name = %name, confidence = face.face_box.confidence, "enrolled");
            } else {
                tracing::warn!(path = %path.display(), name = %name, "duplicate name, skipping");
            }
        }

        tracing::info!(dir = %dir.display(), count = store.len(), "enrollment loaded");
        Ok(store)
    }

    /// Like [`load`](Self::load), but an empty result is an error.
    pub fn load_non_empty<A: FaceAnalyzer>(dir: &Path, analyzer: &mut A) -> Result<Self, EnrollmentError> {
        let store = Self::load(dir, analyzer)?;
        if store.is_empty() {
            return Err(EnrollmentError::Empty(dir.to_path_buf()));
        }
        Ok(store)
    }

    /// Append an identity; returns false (and keeps the existing one) if the
    /// name is already enrolled.
    pub fn insert(&mut self, name: String, embedding: Embedding) -> bool {
        if self.identities.iter().any(|i| i.name == name) {
            return false;
        }
        self.identities.push(EnrolledIdentity { name, embedding });
        true
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

fn reference_images(dir: &Path) -> Result<Vec<PathBuf>, EnrollmentError> {
    let read_err = |source| EnrollmentError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && has_supported_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DetectedFace, PipelineError};
    use crate::types::FaceBox;
    use image::{Rgb, RgbImage};

    /// Treats the top-left pixel's red value as "the face": 0 means no face,
    /// anything else becomes a one-dimensional embedding.
    struct PixelAnalyzer {
        calls: usize,
    }

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, image: &RgbImage, downscale: u32) -> Result<Vec<DetectedFace>, PipelineError> {
            assert_eq!(downscale, 1, "enrollment runs at full resolution");
            self.calls += 1;
            let red = image.get_pixel(0, 0)[0];
            if red == 0 {
                return Ok(vec![]);
            }
            let face_box = FaceBox {
                left: 0.0,
                top: 0.0,
                right: 4.0,
                bottom: 4.0,
                confidence: 0.9,
                landmarks: None,
            };
            Ok(vec![
                DetectedFace { face_box, embedding: Embedding::new(vec![red as f32]) },
                DetectedFace { face_box, embedding: Embedding::new(vec![-1.0]) },
            ])
        }
    }

    fn write_png(dir: &Path, file: &str, red: u8) {
        RgbImage::from_pixel(4, 4, Rgb([red, 0, 0]))
            .save(dir.join(file))
            .unwrap();
    }

    #[test]
    fn test_load_one_embedding_per_image() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "bob.png", 20);
        write_png(dir.path(), "alice.png", 10);

        let mut analyzer = PixelAnalyzer { calls: 0 };
        let store = EnrollmentStore::load(dir.path(), &mut analyzer).unwrap();

        assert_eq!(store.len(), 2);
        // File-name order, first face of each image.
        assert_eq!(store.names().collect::<Vec<_>>(), ["alice", "bob"]);
        assert_eq!(store.identities()[0].embedding.values, vec![10.0]);
        assert_eq!(store.identities()[1].embedding.values, vec![20.0]);
    }

    #[test]
    fn test_load_skips_faceless_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 10);
        write_png(dir.path(), "empty.png", 0);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("broken.jpg"), "not a jpeg").unwrap();

        let mut analyzer = PixelAnalyzer { calls: 0 };
        let store = EnrollmentStore::load(dir.path(), &mut analyzer).unwrap();

        assert_eq!(store.names().collect::<Vec<_>>(), ["alice"]);
        // broken.jpg never reaches the analyzer; notes.txt is filtered out.
        assert_eq!(analyzer.calls, 2);
    }

    #[test]
    fn test_load_accepts_uppercase_extension() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([30, 0, 0]))
            .save_with_format(dir.path().join("carol.PNG"), image::ImageFormat::Png)
            .unwrap();

        let mut analyzer = PixelAnalyzer { calls: 0 };
        let store = EnrollmentStore::load(dir.path(), &mut analyzer).unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), ["carol"]);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut jpeg_bytes = Vec::new();
        RgbImage::from_pixel(4, 4, Rgb([200, 0, 0]))
            .write_to(&mut std::io::Cursor::new(&mut jpeg_bytes), image::ImageFormat::Jpeg)
            .unwrap();
        std::fs::write(dir.path().join("alice.jpg"), jpeg_bytes).unwrap();
        write_png(dir.path(), "alice.png", 10);

        let mut analyzer = PixelAnalyzer { calls: 0 };
        let store = EnrollmentStore::load(dir.path(), &mut analyzer).unwrap();

        assert_eq!(store.len(), 1);
        // alice.jpg sorts before alice.png.
        assert!(store.identities()[0].embedding.values[0] > 100.0);
    }

    #[test]
    fn test_load_missing_dir() {
        let mut analyzer = PixelAnalyzer { calls: 0 };
        let err = EnrollmentStore::load(Path::new("/nonexistent/known_faces"), &mut analyzer).unwrap_err();
        assert!(matches!(err, EnrollmentError::ReadDir { .. }));
    }

    #[test]
    fn test_load_non_empty_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = PixelAnalyzer { calls: 0 };
        let err = EnrollmentStore::load_non_empty(dir.path(), &mut analyzer).unwrap_err();
        assert!(matches!(err, EnrollmentError::Empty(_)));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut store = EnrollmentStore::new();
        assert!(store.insert("alice".into(), Embedding::new(vec![1.0])));
        assert!(!store.insert("alice".into(), Embedding::new(vec![2.0])));
        assert_eq!(store.identities()[0].embedding.values, vec![1.0]);
    }
}
