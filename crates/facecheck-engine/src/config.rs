use crate::error::ConfigError;
use facecheck_core::{BlinkThresholds, CaptureOval, EnrollmentPlan};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Orchestrator configuration.
///
/// Loaded from a TOML file and/or `FACECHECK_*` environment variables.
/// Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the recognition service.
    pub gateway_url: String,
    /// Per-request timeout for gateway calls.
    pub request_timeout_secs: u64,
    /// V4L2 device path.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// JPEG quality (1-100) for uploaded stills.
    pub jpeg_quality: u8,
    pub attendance: AttendanceConfig,
    pub enrollment: EnrollmentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 15,
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            jpeg_quality: 85,
            attendance: AttendanceConfig::default(),
            enrollment: EnrollmentConfig::default(),
        }
    }
}

/// Timing and thresholds for the unattended check-in loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    pub poll_interval_ms: u64,
    /// How long the face must stay framed before liveness is checked.
    pub hold_ms: u64,
    /// Delay between the blink and the submitted snapshot.
    pub settle_ms: u64,
    pub result_display_ms: u64,
    pub cooldown_ms: u64,
    /// Give up waiting for a blink after this long. Unset waits forever.
    pub liveness_timeout_ms: Option<u64>,
    pub oval: CaptureOval,
    pub blink: BlinkThresholds,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            hold_ms: 2000,
            settle_ms: 300,
            result_display_ms: 8000,
            cooldown_ms: 3000,
            liveness_timeout_ms: None,
            oval: CaptureOval::default(),
            blink: BlinkThresholds::default(),
        }
    }
}

impl AttendanceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn result_display(&self) -> Duration {
        Duration::from_millis(self.result_display_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_ms.map(Duration::from_millis)
    }
}

/// Timing and stage plan for guided enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub poll_interval_ms: u64,
    /// Pause between a completed stage and the next one.
    pub stage_pause_ms: u64,
    /// Required samples per stage: front, left, right, up, down.
    pub stage_samples: [usize; 5],
    /// Require a blink before the first stage starts.
    pub blink_gate: bool,
    pub blink: BlinkThresholds,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            stage_pause_ms: 1000,
            stage_samples: EnrollmentPlan::STANDARD_SAMPLES,
            blink_gate: false,
            blink: BlinkThresholds::default(),
        }
    }
}

impl EnrollmentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stage_pause(&self) -> Duration {
        Duration::from_millis(self.stage_pause_ms)
    }
}

impl Config {
    /// Defaults overridden by `FACECHECK_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Read a TOML file, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from `lookup`. Values that fail to parse are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FACECHECK_GATEWAY_URL") {
            self.gateway_url = url;
        }
        if let Some(device) = lookup("FACECHECK_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        override_parsed(&lookup, "FACECHECK_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_parsed(&lookup, "FACECHECK_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&lookup, "FACECHECK_CAMERA_HEIGHT", &mut self.camera_height);
        override_parsed(&lookup, "FACECHECK_JPEG_QUALITY", &mut self.jpeg_quality);

        let att = &mut self.attendance;
        override_parsed(&lookup, "FACECHECK_ATTENDANCE_POLL_MS", &mut att.poll_interval_ms);
        override_parsed(&lookup, "FACECHECK_HOLD_MS", &mut att.hold_ms);
        override_parsed(&lookup, "FACECHECK_SETTLE_MS", &mut att.settle_ms);
        override_parsed(&lookup, "FACECHECK_RESULT_DISPLAY_MS", &mut att.result_display_ms);
        override_parsed(&lookup, "FACECHECK_COOLDOWN_MS", &mut att.cooldown_ms);
        if let Some(ms) = lookup("FACECHECK_LIVENESS_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            // 0 turns the timeout off.
            att.liveness_timeout_ms = (ms > 0).then_some(ms);
        }

        let enr = &mut self.enrollment;
        override_parsed(&lookup, "FACECHECK_ENROLLMENT_POLL_MS", &mut enr.poll_interval_ms);
        override_parsed(&lookup, "FACECHECK_STAGE_PAUSE_MS", &mut enr.stage_pause_ms);
        if let Some(v) = lookup("FACECHECK_BLINK_GATE") {
            enr.blink_gate = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attendance.poll_interval_ms == 0 || self.enrollment.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be non-zero".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(ConfigError::Invalid("camera resolution must be non-zero".into()));
        }
        let blinks = [self.attendance.blink, self.enrollment.blink];
        if blinks.iter().any(|b| !(b.close < b.open)) {
            return Err(ConfigError::Invalid(
                "blink close threshold must be below the open threshold".into(),
            ));
        }
        EnrollmentPlan::new(self.enrollment.stage_samples)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(key).and_then(|v| v.parse().ok()) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.attendance.hold(), Duration::from_secs(2));
        assert_eq!(config.attendance.liveness_timeout(), None);
        assert_eq!(config.enrollment.stage_samples, [5, 5, 5, 3, 2]);
        assert!(!config.enrollment.blink_gate);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::parse(
            r#"
            gateway_url = "http://10.0.0.5:8000"

            [attendance]
            hold_ms = 1500
            liveness_timeout_ms = 10000

            [attendance.blink]
            close = 0.2

            [enrollment]
            stage_samples = [3, 3, 3, 2, 1]
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway_url, "http://10.0.0.5:8000");
        assert_eq!(config.attendance.hold_ms, 1500);
        assert_eq!(config.attendance.liveness_timeout_ms, Some(10000));
        assert_eq!(config.attendance.blink.close, 0.2);
        assert_eq!(config.attendance.blink.open, 0.28);
        assert_eq!(config.attendance.cooldown_ms, 3000);
        assert_eq!(config.enrollment.stage_samples, [3, 3, 3, 2, 1]);
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Config::parse("gateway_url = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("FACECHECK_GATEWAY_URL", "http://svc:9000"),
            ("FACECHECK_HOLD_MS", "3000"),
            ("FACECHECK_STAGE_PAUSE_MS", "250"),
            ("FACECHECK_LIVENESS_TIMEOUT_MS", "8000"),
            ("FACECHECK_BLINK_GATE", "1"),
            ("FACECHECK_JPEG_QUALITY", "not-a-number"),
        ]));
        assert_eq!(config.gateway_url, "http://svc:9000");
        assert_eq!(config.attendance.hold_ms, 3000);
        assert_eq!(config.enrollment.stage_pause_ms, 250);
        assert_eq!(config.attendance.liveness_timeout_ms, Some(8000));
        assert!(config.enrollment.blink_gate);
        assert_eq!(config.jpeg_quality, 85);

        config.apply_env(lookup(&[
            ("FACECHECK_LIVENESS_TIMEOUT_MS", "0"),
            ("FACECHECK_BLINK_GATE", "false"),
        ]));
        assert_eq!(config.attendance.liveness_timeout_ms, None);
        assert!(!config.enrollment.blink_gate);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.attendance.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.enrollment.stage_samples = [5, 0, 5, 3, 2];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.attendance.blink.close = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/facecheck.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
