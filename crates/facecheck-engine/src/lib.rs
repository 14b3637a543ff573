//! facecheck-engine: Capture orchestrator for attendance and enrollment.
//!
//! Two pure reducers ([`AttendanceSession`], [`EnrollmentSession`]) decide
//! what happens on each poll tick and each remote result. [`spawn_engine`]
//! runs them on one tokio task that owns the camera, samples a frame per
//! tick, and executes the remote calls they request.

pub mod attendance;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod events;

pub use attendance::{AttendanceEvent, AttendanceSession};
pub use config::{AttendanceConfig, Config, EnrollmentConfig};
pub use engine::{spawn_engine, EngineHandle};
pub use enrollment::{EnrollmentEvent, EnrollmentSession};
pub use error::{ConfigError, EngineError};
pub use events::{
    AttendancePhase, AttendanceReport, CallKind, CallOutcome, Effect, EnrollmentPhase,
    EnrollmentReport, RemoteCall, SessionPhase, StatusEvent, StatusSnapshot, StatusUpdate,
    TickInput, Workflow,
};
