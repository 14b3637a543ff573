//! Values flowing in and out of the session reducers.

use facecheck_core::{CapturedImage, FaceObservation, PoseLabel};
use facecheck_gateway::{
    AttendanceOutcome, AttendanceRecord, DuplicateCheck, EmployeeRecord, EmployeeSummary,
    PoseClassification, RegistrationOutcome,
};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Attendance,
    Enrollment,
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Workflow::Attendance => "attendance",
            Workflow::Enrollment => "enrollment",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendancePhase {
    Idle,
    FacePresent,
    Framed,
    HoldCountdown,
    LivenessWait,
    LivenessConfirmed,
    Submitting,
    Result,
    Cooldown,
}

impl AttendancePhase {
    /// Guidance text for a kiosk display.
    pub fn prompt(&self) -> &'static str {
        match self {
            AttendancePhase::Idle => "Step in front of the camera",
            AttendancePhase::FacePresent => "Move your face into the oval",
            AttendancePhase::Framed | AttendancePhase::HoldCountdown => "Hold still",
            AttendancePhase::LivenessWait => "Please blink",
            AttendancePhase::LivenessConfirmed | AttendancePhase::Submitting => "Checking...",
            AttendancePhase::Result => "Done",
            AttendancePhase::Cooldown => "Please wait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    /// Waiting for a blink before the first stage.
    BlinkGate,
    Capturing,
    /// Pause between stages.
    Pacing,
    CheckingDuplicate,
    Submitting,
    Completed,
    DuplicateFound,
    Failed,
}

impl EnrollmentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentPhase::Completed | EnrollmentPhase::DuplicateFound | EnrollmentPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Attendance(AttendancePhase),
    Enrollment(EnrollmentPhase),
}

/// One poll tick's worth of local evidence.
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Most prominent face, or `None` when nothing usable was seen
    /// (including dark or failed frames).
    pub observation: Option<FaceObservation>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl TickInput {
    pub fn empty(frame_width: u32, frame_height: u32) -> Self {
        Self {
            observation: None,
            frame_width,
            frame_height,
        }
    }

    pub fn with_face(observation: FaceObservation, frame_width: u32, frame_height: u32) -> Self {
        Self {
            observation: Some(observation),
            frame_width,
            frame_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ClassifyPose,
    CheckDuplicate,
    ProcessAttendance,
    RegisterFace,
}

/// Remote call requested by a reducer.
///
/// `ClassifyPose` and `ProcessAttendance` are sent with a still of the frame
/// from the tick that requested them; the other calls carry their images.
#[derive(Debug, Clone)]
pub enum RemoteCall {
    ClassifyPose,
    ProcessAttendance,
    CheckDuplicate(CapturedImage),
    RegisterFace {
        employee_id: String,
        images: Vec<CapturedImage>,
    },
}

impl RemoteCall {
    pub fn kind(&self) -> CallKind {
        match self {
            RemoteCall::ClassifyPose => CallKind::ClassifyPose,
            RemoteCall::ProcessAttendance => CallKind::ProcessAttendance,
            RemoteCall::CheckDuplicate(_) => CallKind::CheckDuplicate,
            RemoteCall::RegisterFace { .. } => CallKind::RegisterFace,
        }
    }
}

/// What came back from a remote call.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Pose {
        /// The still that was classified.
        image: CapturedImage,
        classification: PoseClassification,
    },
    Duplicate(DuplicateCheck),
    Attendance(AttendanceOutcome),
    Registration(RegistrationOutcome),
    /// The call itself failed; `message` is shown to the user as-is.
    Failed { kind: CallKind, message: String },
}

impl CallOutcome {
    pub fn kind(&self) -> CallKind {
        match self {
            CallOutcome::Pose { .. } => CallKind::ClassifyPose,
            CallOutcome::Duplicate(_) => CallKind::CheckDuplicate,
            CallOutcome::Attendance(_) => CallKind::ProcessAttendance,
            CallOutcome::Registration(_) => CallKind::RegisterFace,
            CallOutcome::Failed { kind, .. } => *kind,
        }
    }
}

/// Side effect requested by a reducer.
#[derive(Debug, Clone)]
pub enum Effect {
    Notify(StatusEvent),
    Call { generation: u64, call: RemoteCall },
}

/// Presentation of a finished attendance check.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceReport {
    Recognized {
        employee: EmployeeSummary,
        message: Option<String>,
        attendance: Option<AttendanceRecord>,
        /// Service time of the check, or local `HH:MM` when it sent none.
        time: String,
    },
    Rejected {
        message: String,
    },
}

/// Presentation of a finished enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentReport {
    pub employee_id: String,
    pub employee: Option<EmployeeSummary>,
    pub message: Option<String>,
    pub samples_count: usize,
    pub timestamp: Option<String>,
}

/// Events published for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    PhaseChanged(SessionPhase),
    HoldProgress {
        held: Duration,
        required: Duration,
    },
    LivenessTimedOut,
    AttendanceResult(AttendanceReport),
    StageStarted {
        index: usize,
        pose: PoseLabel,
        required: usize,
    },
    SampleAccepted {
        pose: PoseLabel,
        stage_count: usize,
        required: usize,
        total: usize,
    },
    PoseMismatch {
        expected: PoseLabel,
        detected: Option<PoseLabel>,
    },
    ClassificationFailed {
        message: String,
    },
    DuplicateFound {
        employee_id: Option<String>,
        employee_name: Option<String>,
    },
    EnrollmentCompleted(EnrollmentReport),
    EnrollmentFailed {
        message: String,
    },
    SessionEnded {
        workflow: Workflow,
    },
    /// Employee list fetched after a successful enrollment, so the caller
    /// can show who now has face data.
    EnrollmentStatusRefreshed {
        employees: Vec<EmployeeRecord>,
    },
}

impl StatusEvent {
    /// Progress notices that a later event or the status snapshot
    /// supersedes. These may be dropped when the consumer falls behind;
    /// every other event is delivered.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StatusEvent::PhaseChanged(_)
                | StatusEvent::HoldProgress { .. }
                | StatusEvent::LivenessTimedOut
                | StatusEvent::StageStarted { .. }
                | StatusEvent::SampleAccepted { .. }
                | StatusEvent::PoseMismatch { .. }
                | StatusEvent::ClassificationFailed { .. }
        )
    }
}

/// A [`StatusEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub session_id: Uuid,
    pub event: StatusEvent,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusSnapshot {
    pub session_id: Option<Uuid>,
    pub workflow: Option<Workflow>,
    pub phase: Option<SessionPhase>,
    /// A remote call is outstanding.
    pub busy: bool,
}
