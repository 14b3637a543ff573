//! JSON-over-HTTP binding of [`RecognitionGateway`].

use crate::types::{
    AttendanceOutcome, DuplicateCheck, EmployeeList, EmployeeRecord, ImageRequest,
    PoseClassification, RegisterRequest, RegistrationOutcome,
};
use crate::{GatewayError, RecognitionGateway};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facecheck_core::CapturedImage;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const CHECK_POSE_PATH: &str = "/check-pose/";
const CHECK_DUPLICATE_PATH: &str = "/check-duplicate/";
const PROCESS_ATTENDANCE_PATH: &str = "/process-attendance/";
const REGISTER_FACE_PATH: &str = "/register-face/";
const EMPLOYEES_PATH: &str = "/api/employees/";

/// Longest response body quoted back in a [`GatewayError::Status`].
const MAX_ERROR_BODY: usize = 200;

/// Encode a still as a `data:image/jpeg;base64,...` URL, the form the service expects.
pub fn to_data_url(image: &CapturedImage) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(image.bytes()))
}

/// Recognition service reached over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a client for the service at `base_url` (e.g. `http://10.0.0.5:8000`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let parsed = Url::parse(base_url).map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let started = std::time::Instant::now();
        let response = self.client.post(&url).json(body).send().await?;
        tracing::debug!(
            path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gateway call finished"
        );
        decode(response).await
    }
}

/// Decode a JSON body. Error statuses still carry a structured body from the
/// service, so the body is tried first; only undecodable error responses
/// become [`GatewayError::Status`].
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, GatewayError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    match serde_json::from_slice::<R>(&bytes) {
        Ok(parsed) => Ok(parsed),
        Err(_) if !status.is_success() => {
            let body = String::from_utf8_lossy(&bytes);
            Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            })
        }
        Err(e) => Err(GatewayError::Decode(e.to_string())),
    }
}

#[async_trait]
impl RecognitionGateway for HttpGateway {
    async fn classify_pose(&self, image: &CapturedImage) -> Result<PoseClassification, GatewayError> {
        let data = to_data_url(image);
        self.post_json(CHECK_POSE_PATH, &ImageRequest { image: &data }).await
    }

    async fn check_duplicate(&self, image: &CapturedImage) -> Result<DuplicateCheck, GatewayError> {
        let data = to_data_url(image);
        self.post_json(CHECK_DUPLICATE_PATH, &ImageRequest { image: &data })
            .await
    }

    async fn process_attendance(
        &self,
        image: &CapturedImage,
    ) -> Result<AttendanceOutcome, GatewayError> {
        let data = to_data_url(image);
        self.post_json(PROCESS_ATTENDANCE_PATH, &ImageRequest { image: &data })
            .await
    }

    async fn register_face(
        &self,
        employee_id: &str,
        images: &[CapturedImage],
    ) -> Result<RegistrationOutcome, GatewayError> {
        tracing::info!(employee_id, samples = images.len(), "submitting enrollment batch");
        let request = RegisterRequest {
            employee_id,
            images: images.iter().map(to_data_url).collect(),
        };
        self.post_json(REGISTER_FACE_PATH, &request).await
    }

    async fn list_employees(&self) -> Result<Vec<EmployeeRecord>, GatewayError> {
        let url = format!("{}{EMPLOYEES_PATH}", self.base_url);
        let response = self.client.get(&url).send().await?;
        let list: EmployeeList = decode(response).await?;
        if !list.success {
            return Err(GatewayError::Decode(
                list.message
                    .unwrap_or_else(|| "employee list request was rejected".to_string()),
            ));
        }
        Ok(list.employees)
    }
}
