//! Frame type, the frame-source seam, and snapshot encoding.

use crate::camera::CameraError;
use facecheck_core::CapturedImage;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from grayscale pixels, computing the dark flag.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Encode this frame as a grayscale JPEG for upload.
    pub fn encode_jpeg(&self, quality: u8) -> Result<CapturedImage, FrameError> {
        let expected = self.width as usize * self.height as usize;
        if expected == 0 || self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }

        let mut out = Vec::with_capacity(expected / 4);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::L8)
            .map_err(|e| FrameError::Encode(e.to_string()))?;

        Ok(CapturedImage::new(out, self.width, self.height))
    }
}

/// Anything that can hand out the current camera frame on demand.
///
/// `snapshot` is synchronous and must return within one poll period.
pub trait FrameSource: Send {
    fn snapshot(&mut self) -> Result<Frame, CameraError>;
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_extracts_luma() {
        // 4x2 image = 8 pixels, 16 YUYV bytes
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_THRESHOLD));

        // 96% dark → dark; 94% dark → not dark
        let mut gray = vec![10u8; 960];
        gray.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_from_gray_sets_dark_flag() {
        assert!(Frame::from_gray(vec![0; 64], 8, 8, 0).is_dark);
        let bright = Frame::from_gray(vec![200; 64], 8, 8, 1);
        assert!(!bright.is_dark);
        assert_eq!(bright.avg_brightness(), 200.0);
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let data: Vec<u8> = (0..64 * 48).map(|i| (i % 251) as u8).collect();
        let frame = Frame::from_gray(data, 64, 48, 0);
        let image = frame.encode_jpeg(85).unwrap();
        assert_eq!((image.width, image.height), (64, 48));
        // JPEG SOI marker
        assert_eq!(&image.bytes()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_jpeg_rejects_bad_length() {
        let frame = Frame::from_gray(vec![0; 10], 64, 48, 0);
        assert!(matches!(
            frame.encode_jpeg(85),
            Err(FrameError::InvalidLength { expected: 3072, actual: 10 })
        ));
    }
}
