//! Blink-based liveness via the eye aspect ratio (EAR).
//!
//! EAR is the mean vertical eyelid opening divided by the eye-corner width.
//! It drops sharply while the eye is closed. A blink is a fall below the
//! close threshold followed by a rise above the (higher) open threshold;
//! the gap between the two keeps noise around a single cutoff from
//! producing phantom blinks.

use crate::types::LandmarkSet;
use serde::{Deserialize, Serialize};

pub const CLOSE_THRESHOLD: f32 = 0.25;
pub const OPEN_THRESHOLD: f32 = 0.28;

/// Landmark indices describing one eye.
#[derive(Debug, Clone, Copy)]
pub struct EyeLayout {
    /// Horizontal eye corners (outer, inner).
    pub corners: (usize, usize),
    /// Upper/lower eyelid landmark pairs.
    pub lids: &'static [(usize, usize)],
}

/// Face-mesh indices for the subject's left eye.
pub const LEFT_EYE: EyeLayout = EyeLayout {
    corners: (33, 133),
    lids: &[(160, 144), (158, 153)],
};

/// Face-mesh indices for the subject's right eye.
pub const RIGHT_EYE: EyeLayout = EyeLayout {
    corners: (362, 263),
    lids: &[(385, 380), (387, 373)],
};

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// EAR for a single eye. Returns 0.0 when any landmark is missing, the
/// corner distance is zero, or the result is not finite.
pub fn eye_aspect_ratio(landmarks: &LandmarkSet, eye: &EyeLayout) -> f32 {
    let (Some(outer), Some(inner)) = (landmarks.get(eye.corners.0), landmarks.get(eye.corners.1))
    else {
        return 0.0;
    };
    let horizontal = distance(outer, inner);
    if !(horizontal > 0.0) || eye.lids.is_empty() {
        return 0.0;
    }

    let mut vertical = 0.0f32;
    for &(upper, lower) in eye.lids {
        let (Some(u), Some(l)) = (landmarks.get(upper), landmarks.get(lower)) else {
            return 0.0;
        };
        vertical += distance(u, l);
    }
    vertical /= eye.lids.len() as f32;

    let ear = vertical / horizontal;
    if ear.is_finite() {
        ear
    } else {
        0.0
    }
}

/// Mean EAR across both eyes.
pub fn average_ear(landmarks: &LandmarkSet) -> f32 {
    (eye_aspect_ratio(landmarks, &LEFT_EYE) + eye_aspect_ratio(landmarks, &RIGHT_EYE)) / 2.0
}

/// Hysteresis thresholds for blink detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkThresholds {
    pub close: f32,
    pub open: f32,
}

impl Default for BlinkThresholds {
    fn default() -> Self {
        Self {
            close: CLOSE_THRESHOLD,
            open: OPEN_THRESHOLD,
        }
    }
}

/// Outcome of feeding one EAR sample through the blink latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkStep {
    /// New value of the caller-held eye-closed latch.
    pub eye_closed: bool,
    /// True exactly on the sample that completes a close→open cycle.
    pub blinked: bool,
}

impl BlinkThresholds {
    /// Advance the latch with one EAR sample.
    ///
    /// Open eye: latch arms when `ear` drops below `close`.
    /// Closed eye: latch clears and a blink is reported once `ear` rises above `open`.
    pub fn step(&self, eye_closed: bool, ear: f32) -> BlinkStep {
        if !eye_closed {
            BlinkStep {
                eye_closed: ear < self.close,
                blinked: false,
            }
        } else if ear > self.open {
            BlinkStep {
                eye_closed: false,
                blinked: true,
            }
        } else {
            BlinkStep {
                eye_closed: true,
                blinked: false,
            }
        }
    }
}
