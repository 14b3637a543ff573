//! facecheck-gateway: Client side of the remote recognition service.
//!
//! The orchestrator talks to pose classification, duplicate lookup,
//! attendance processing and batch enrollment only through
//! [`RecognitionGateway`]. [`HttpGateway`] is the JSON-over-HTTP binding.

pub mod client;
pub mod types;

use async_trait::async_trait;
use facecheck_core::CapturedImage;
use thiserror::Error;

pub use client::HttpGateway;
pub use types::{
    AttendanceOutcome, AttendanceRecord, DuplicateCheck, EmployeeRecord, EmployeeSummary,
    PoseClassification, RegistrationOutcome,
};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Remote operations the capture orchestrator depends on.
///
/// Every call is a stateless request/response. Service-level rejections come
/// back as `Ok` values with `success == false`; `Err` means the call itself
/// failed (transport, unexpected status, undecodable body).
#[async_trait]
pub trait RecognitionGateway: Send + Sync {
    async fn classify_pose(&self, image: &CapturedImage) -> Result<PoseClassification, GatewayError>;

    async fn check_duplicate(&self, image: &CapturedImage) -> Result<DuplicateCheck, GatewayError>;

    async fn process_attendance(
        &self,
        image: &CapturedImage,
    ) -> Result<AttendanceOutcome, GatewayError>;

    async fn register_face(
        &self,
        employee_id: &str,
        images: &[CapturedImage],
    ) -> Result<RegistrationOutcome, GatewayError>;

    /// Employees with their enrollment status (`has_face`).
    async fn list_employees(&self) -> Result<Vec<EmployeeRecord>, GatewayError>;
}
