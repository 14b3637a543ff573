//! Capture-oval framing test.
//!
//! A face counts as framed when its box is fully inside the visible frame,
//! its centre sits near the middle of the on-screen oval, and most of its
//! corners fall inside a slightly enlarged copy of that oval. The corner
//! term rejects faces that are centred but far too large for the oval.

use crate::types::FaceBox;
use serde::{Deserialize, Serialize};

// --- Named constants (no magic numbers) ---
/// Minimum face size as a fraction of frame width and of frame height.
pub const MIN_FACE_FRACTION: f32 = 0.15;
/// Normalized squared distance of the box centre must stay below this.
const CENTER_TOLERANCE: f32 = 0.8;
/// Corner test uses the oval scaled by this factor.
const CORNER_OVAL_SCALE: f32 = 1.1;
/// Corners that must fall inside the enlarged oval.
const MIN_CORNERS_INSIDE: usize = 3;

/// Target capture region, as fractions of frame width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOval {
    pub center_x: f32,
    pub center_y: f32,
    pub radius_x: f32,
    pub radius_y: f32,
    /// Pixels a face box must keep clear of every frame edge.
    pub edge_margin_px: f32,
}

impl Default for CaptureOval {
    fn default() -> Self {
        Self {
            center_x: 0.5,
            center_y: 0.45,
            radius_x: 0.25,
            radius_y: 0.38,
            edge_margin_px: 10.0,
        }
    }
}

impl CaptureOval {
    /// Whether `face` sits inside this oval for a `frame_w` × `frame_h` frame.
    ///
    /// Never panics; degenerate frames or non-finite boxes are not framed.
    pub fn contains(&self, face: &FaceBox, frame_w: u32, frame_h: u32) -> bool {
        if frame_w == 0 || frame_h == 0 {
            return false;
        }
        let (w, h) = (frame_w as f32, frame_h as f32);

        if !self.clear_of_edges(face, w, h) {
            return false;
        }

        let center_dist = self.normalized_distance_sq(face.center(), w, h, 1.0);
        if !(center_dist < CENTER_TOLERANCE) {
            return false;
        }

        let corners_inside = face
            .corners()
            .iter()
            .filter(|&&corner| self.normalized_distance_sq(corner, w, h, CORNER_OVAL_SCALE) <= 1.0)
            .count();

        corners_inside >= MIN_CORNERS_INSIDE
    }

    /// Oval centre in pixels.
    pub fn center_px(&self, frame_w: u32, frame_h: u32) -> (f32, f32) {
        (
            self.center_x * frame_w as f32,
            self.center_y * frame_h as f32,
        )
    }

    fn clear_of_edges(&self, face: &FaceBox, w: f32, h: f32) -> bool {
        let m = self.edge_margin_px;
        face.x >= m
            && face.y >= m
            && face.x + face.width <= w - m
            && face.y + face.height <= h - m
    }

    /// `((px - cx) / rx)² + ((py - cy) / ry)²` with radii multiplied by `scale`.
    fn normalized_distance_sq(&self, (px, py): (f32, f32), w: f32, h: f32, scale: f32) -> f32 {
        let rx = self.radius_x * w * scale;
        let ry = self.radius_y * h * scale;
        if rx <= 0.0 || ry <= 0.0 {
            return f32::INFINITY;
        }
        let dx = (px - self.center_x * w) / rx;
        let dy = (py - self.center_y * h) / ry;
        dx * dx + dy * dy
    }
}

/// Whether a detection is large enough to count as a face at all:
/// wider than 15% of the frame and taller than 15% of the frame.
pub fn is_valid_detection(face: &FaceBox, frame_w: u32, frame_h: u32) -> bool {
    face.width > MIN_FACE_FRACTION * frame_w as f32
        && face.height > MIN_FACE_FRACTION * frame_h as f32
}

/// Framing test against the default capture oval.
pub fn is_framed(face: &FaceBox, frame_w: u32, frame_h: u32) -> bool {
    CaptureOval::default().contains(face, frame_w, frame_h)
}
