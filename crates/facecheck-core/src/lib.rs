//! facecheck-core: Local face checks for the capture orchestrator.
//!
//! Pure evaluators only: oval framing geometry, eye-aspect-ratio blink
//! detection, and the ordered pose-stage plan used by enrollment.

pub mod geometry;
pub mod liveness;
pub mod pose;
pub mod types;

pub use geometry::{is_framed, is_valid_detection, CaptureOval};
pub use liveness::{average_ear, BlinkStep, BlinkThresholds};
pub use pose::{EnrollmentPlan, PlanError, PoseLabel, PoseStage};
pub use types::{CapturedImage, FaceBox, FaceObservation, FaceTracker, LandmarkSet};
