//! Request/response bodies exchanged with the recognition service.

use facecheck_core::PoseLabel;
use serde::{Deserialize, Serialize};

/// Body for the single-image endpoints.
#[derive(Debug, Serialize)]
pub(crate) struct ImageRequest<'a> {
    pub image: &'a str,
}

/// Body for batch enrollment.
#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub employee_id: &'a str,
    pub images: Vec<String>,
}

/// Result of `POST /check-pose/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseClassification {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "pose_type")]
    pub pose: Option<PoseLabel>,
    #[serde(default)]
    pub yaw: Option<f32>,
    #[serde(default)]
    pub pitch: Option<f32>,
    #[serde(default)]
    pub roll: Option<f32>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `POST /check-duplicate/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCheck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Employee details echoed back by attendance and enrollment calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    /// Match score as formatted by the service, e.g. "87.50%".
    #[serde(default)]
    pub similarity: Option<String>,
    #[serde(default)]
    pub current_status: Option<String>,
}

/// Day record updated by an attendance call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub check_in: Option<String>,
    #[serde(default)]
    pub check_out: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Result of `POST /process-attendance/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub employee: Option<EmployeeSummary>,
    #[serde(default)]
    pub attendance: Option<AttendanceRecord>,
    /// Service-side wall-clock time of the check, "HH:MM".
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `POST /register-face/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub employee: Option<EmployeeSummary>,
    #[serde(default)]
    pub samples_count: Option<usize>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl RegistrationOutcome {
    /// Service error text, verbatim: `error`, else `details`, else `message`.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.details.as_deref())
            .or(self.message.as_deref())
    }
}

/// Employee row from `GET /api/employees/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_id: String,
    pub full_name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub has_face: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmployeeList {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub employees: Vec<EmployeeRecord>,
    #[serde(default)]
    pub message: Option<String>,
}
