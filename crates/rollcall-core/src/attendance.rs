//! Turns detected faces into attendance: match against the enrolled store,
//! write one Present row per person per day, and sweep absentees.

use crate::enrollment::EnrollmentStore;
use crate::ledger::{Ledger, LedgerError};
use crate::pipeline::{DetectedFace, FaceAnalyzer, PipelineError};
use crate::types::{EuclideanMatcher, FaceBox, MatchError, Matcher};
use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("match failed: {0}")]
    Match(#[from] MatchError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("face analysis failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Outcome for one face in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub face_box: FaceBox,
    /// Enrolled name, set only when the nearest identity is within tolerance.
    pub name: Option<String>,
    /// Distance to the nearest enrolled identity.
    pub distance: f32,
}

/// Matcher plus ledger writer. Owns the only write path into the ledger.
pub struct Recorder {
    store: Arc<EnrollmentStore>,
    ledger: Ledger,
    matcher: EuclideanMatcher,
    tolerance: f32,
}

impl Recorder {
    pub fn new(store: Arc<EnrollmentStore>, ledger: Ledger, tolerance: f32) -> Self {
        Self {
            store,
            ledger,
            matcher: EuclideanMatcher,
            tolerance,
        }
    }

    pub fn store(&self) -> &EnrollmentStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Match every face and mark each recognized person present at `at`.
    ///
    /// Faces beyond tolerance come back with `name: None` and touch nothing.
    /// A failed ledger write is logged and does not drop the face.
    pub fn record(&self, faces: &[DetectedFace], at: NaiveDateTime) -> Result<Vec<Recognition>, AttendanceError> {
        let mut recognitions = Vec::with_capacity(faces.len());

        for face in faces {
            let result = self
                .matcher
                .nearest(&face.embedding, self.store.identities(), self.tolerance)?;

            if let Some(name) = &result.name {
                match self.ledger.mark_present(name, at) {
                    Ok(true) => {
                        tracing::info!(name = %name, distance = result.distance, time = %at, "marked present");
                    }
                    Ok(false) => {}
                    // The face is still reported; the next frame retries the write.
                    Err(e) => tracing::warn!(name = %name, error = %e, "failed to mark present"),
                }
            } else {
                tracing::debug!(distance = result.distance, "face beyond tolerance");
            }

            recognitions.push(Recognition {
                face_box: face.face_box,
                name: result.name,
                distance: result.distance,
            });
        }

        Ok(recognitions)
    }

    /// Mark every enrolled name without a row on `date` as absent.
    pub fn mark_absentees(&self, date: NaiveDate) -> Result<Vec<String>, AttendanceError> {
        let absent = self.ledger.mark_absentees(self.store.names(), date)?;
        tracing::info!(date = %date, count = absent.len(), names = ?absent, "marked absentees");
        Ok(absent)
    }
}

/// One frame in, recognitions out: analysis followed by recording.
pub struct FrameProcessor<A> {
    analyzer: A,
    recorder: Recorder,
    downscale: u32,
}

impl<A: FaceAnalyzer> FrameProcessor<A> {
    pub fn new(analyzer: A, recorder: Recorder, downscale: u32) -> Self {
        Self {
            analyzer,
            recorder,
            downscale,
        }
    }

    pub fn process(&mut self, image: &RgbImage, at: NaiveDateTime) -> Result<Vec<Recognition>, AttendanceError> {
        let faces = self.analyzer.analyze(image, self.downscale)?;
        self.recorder.record(&faces, at)
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn into_recorder(self) -> Recorder {
        self.recorder
    }
}
