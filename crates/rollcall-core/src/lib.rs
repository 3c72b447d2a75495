//! rollcall-core: face recognition and attendance bookkeeping.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. Recognized faces are
//! recorded once per person per day in a CSV ledger.

pub mod alignment;
pub mod attendance;
pub mod config;
pub mod detector;
pub mod enrollment;
pub mod ledger;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use attendance::{AttendanceError, FrameProcessor, Recognition, Recorder};
pub use config::{Config, ConfigError};
pub use enrollment::{EnrollmentError, EnrollmentStore};
pub use ledger::{AttendanceRecord, Ledger, LedgerError, Status};
pub use overlay::{encode_jpeg, Overlay, OverlayError};
pub use pipeline::{DetectedFace, FaceAnalyzer, FacePipeline, PipelineError};
pub use types::{Embedding, EnrolledIdentity, EuclideanMatcher, FaceBox, MatchError, MatchResult, Matcher};
