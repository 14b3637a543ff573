//! V4L2 frame source via the `v4l` crate.

use crate::frame::{self, Frame, FrameSource};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// V4L2 nodes scanned by [`Camera::list_devices`].
const MAX_VIDEO_NODES: u32 = 16;
/// Buffers queued for each capture stream.
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Pixel layouts the camera can deliver that convert cheaply to grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2; the luma bytes are kept.
    Yuyv,
    /// 8-bit grayscale, used as-is.
    Grey,
}

impl PixelFormat {
    fn fourcc(&self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Grey => FourCC::new(b"GREY"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [PixelFormat::Yuyv, PixelFormat::Grey]
            .into_iter()
            .find(|f| f.fourcc() == fourcc)
    }

    /// Luma plane of one raw buffer.
    fn luma(&self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(raw, width, height)
                .map_err(|e| CameraError::CaptureFailed(e.to_string())),
            PixelFormat::Grey => {
                let pixels = width as usize * height as usize;
                raw.get(..pixels).map(<[u8]>::to_vec).ok_or_else(|| {
                    CameraError::CaptureFailed(format!(
                        "GREY buffer holds {} bytes, frame needs {pixels}",
                        raw.len()
                    ))
                })
            }
        }
    }
}

/// Exclusive handle on one V4L2 capture device.
///
/// Held by a single orchestrator for its whole lifetime; a second open of
/// the same node from another process fails with [`CameraError::DeviceBusy`].
pub struct Camera {
    device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and ask for `width` × `height`. The driver may
    /// settle on a different size; the negotiated one is stored.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(EBUSY) {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let (format, width, height) = negotiate(&device, width, height)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width,
            height,
            format = ?format,
            "camera opened"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width,
            height,
            format,
        })
    }

    /// Dequeue one frame and reduce it to grayscale.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("start stream: {e}")))?;
        let (raw, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue buffer: {e}")))?;

        let gray = self.format.luma(raw, self.width, self.height)?;
        Ok(Frame::from_gray(gray, self.width, self.height, meta.sequence))
    }

    /// Throw away `count` frames while auto-exposure settles.
    pub fn warm_up(&self, count: usize) {
        for n in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(frame = n, error = %e, "warm-up capture failed");
            }
        }
    }

    /// Capture-capable devices among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                    })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn snapshot(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Request YUYV at the given size and accept YUYV or GREY back.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(PixelFormat, u32, u32), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;
    wanted.fourcc = PixelFormat::Yuyv.fourcc();
    wanted.width = width;
    wanted.height = height;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver offered {:?}, need YUYV or GREY",
            got.fourcc
        ))
    })?;
    Ok((format, got.width, got.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_grey_luma_truncates_padding() {
        let raw = [1u8, 2, 3, 4, 5, 6, 7];
        let gray = PixelFormat::Grey.luma(&raw, 3, 2).unwrap();
        assert_eq!(gray, vec![1, 2, 3, 4, 5, 6]);
        assert!(PixelFormat::Grey.luma(&raw[..5], 3, 2).is_err());
    }

    #[test]
    fn test_yuyv_luma() {
        let raw = [10u8, 128, 20, 128, 30, 128, 40, 128];
        assert_eq!(PixelFormat::Yuyv.luma(&raw, 2, 2).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/facecheck-missing", 640, 480),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
