//! Head poses and the ordered stage plan for multi-pose enrollment.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Head pose as reported by the remote pose classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseLabel {
    Front,
    Left,
    Right,
    Up,
    Down,
}

impl PoseLabel {
    /// Enrollment capture order.
    pub const ORDER: [PoseLabel; 5] = [
        PoseLabel::Front,
        PoseLabel::Left,
        PoseLabel::Right,
        PoseLabel::Up,
        PoseLabel::Down,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoseLabel::Front => "front",
            PoseLabel::Left => "left",
            PoseLabel::Right => "right",
            PoseLabel::Up => "up",
            PoseLabel::Down => "down",
        }
    }

    /// User-facing instruction for this pose.
    pub fn prompt(&self) -> &'static str {
        match self {
            PoseLabel::Front => "Look straight at the camera",
            PoseLabel::Left => "Turn your head slightly to the left",
            PoseLabel::Right => "Turn your head slightly to the right",
            PoseLabel::Up => "Tilt your head up a little",
            PoseLabel::Down => "Tilt your head down a little",
        }
    }
}

impl fmt::Display for PoseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enrollment step: collect `required_samples` frames classified as `label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseStage {
    pub label: PoseLabel,
    pub required_samples: usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("stage '{0}' must require at least one sample")]
    EmptyStage(PoseLabel),
}

/// The five enrollment stages, always in [`PoseLabel::ORDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentPlan {
    stages: Vec<PoseStage>,
}

impl EnrollmentPlan {
    /// Sample counts for front, left, right, up, down.
    pub const STANDARD_SAMPLES: [usize; 5] = [5, 5, 5, 3, 2];

    /// Build a plan from per-stage sample counts (front, left, right, up, down).
    pub fn new(required: [usize; 5]) -> Result<Self, PlanError> {
        let stages = PoseLabel::ORDER
            .iter()
            .zip(required)
            .map(|(&label, required_samples)| {
                if required_samples == 0 {
                    Err(PlanError::EmptyStage(label))
                } else {
                    Ok(PoseStage {
                        label,
                        required_samples,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    /// 20-sample plan: 5 front, 5 left, 5 right, 3 up, 2 down.
    pub fn standard() -> Self {
        Self {
            stages: PoseLabel::ORDER
                .iter()
                .zip(Self::STANDARD_SAMPLES)
                .map(|(&label, required_samples)| PoseStage {
                    label,
                    required_samples,
                })
                .collect(),
        }
    }

    pub fn stages(&self) -> &[PoseStage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&PoseStage> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn total_samples(&self) -> usize {
        self.stages.iter().map(|s| s.required_samples).sum()
    }
}

impl Default for EnrollmentPlan {
    fn default() -> Self {
        Self::standard()
    }
}
