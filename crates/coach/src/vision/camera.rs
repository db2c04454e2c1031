//! Camera back-ends

use crate::error::CoachError;
use crate::types::VideoFrame;
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "vision")]
use opencv::{core, imgproc, prelude::*, videoio};

/// Grants access to a camera stream
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Fails with [`CoachError::Permission`] when the device cannot be opened
    async fn acquire(&self) -> Result<Box<dyn Camera>, CoachError>;
}

/// An open camera stream
#[async_trait]
pub trait Camera: Send {
    /// Frame size, once the stream has produced its metadata
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// The most recent frame, or `None` if nothing has been decoded yet
    async fn current_frame(&mut self) -> Result<Option<VideoFrame>, CoachError>;

    /// Stop every track of the stream
    fn release(&mut self);
}

/// Frame size as reported by a device property pair, which reads 0 until known
#[cfg_attr(not(feature = "vision"), allow(dead_code))]
pub(crate) fn reported_size(width: f64, height: f64) -> Option<(u32, u32)> {
    (width >= 1.0 && height >= 1.0).then(|| (width as u32, height as u32))
}

/// A black test-pattern stream with a steady frame clock
#[derive(Debug, Clone)]
pub struct SimulatedCameraProvider {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for SimulatedCameraProvider {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[async_trait]
impl CameraProvider for SimulatedCameraProvider {
    async fn acquire(&self) -> Result<Box<dyn Camera>, CoachError> {
        log::warn!("Vision feature not enabled, using simulated camera");
        Ok(Box::new(SimulatedCamera {
            opened_at: Instant::now(),
            frame_period: Duration::from_micros(1_000_000 / u64::from(self.fps.max(1))),
            image: Arc::new(RgbImage::new(self.width, self.height)),
            released: false,
        }))
    }
}

struct SimulatedCamera {
    opened_at: Instant,
    frame_period: Duration,
    image: Arc<RgbImage>,
    released: bool,
}

impl SimulatedCamera {
    fn presentation_time(&self) -> Duration {
        let elapsed = self.opened_at.elapsed();
        let frames = elapsed.as_micros() / self.frame_period.as_micros().max(1);
        self.frame_period * frames as u32
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.released || self.opened_at.elapsed() < self.frame_period {
            return None;
        }
        Some((self.image.width(), self.image.height()))
    }

    async fn current_frame(&mut self) -> Result<Option<VideoFrame>, CoachError> {
        if self.dimensions().is_none() {
            return Ok(None);
        }
        Ok(Some(VideoFrame {
            presentation_time: self.presentation_time(),
            image: Arc::clone(&self.image),
        }))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Webcam capture through OpenCV
#[cfg(feature = "vision")]
pub struct OpenCvCameraProvider {
    index: i32,
}

#[cfg(feature = "vision")]
impl OpenCvCameraProvider {
    pub fn new(index: i32) -> Self {
        Self { index }
    }
}

#[cfg(feature = "vision")]
#[async_trait]
impl CameraProvider for OpenCvCameraProvider {
    async fn acquire(&self) -> Result<Box<dyn Camera>, CoachError> {
        let capture = videoio::VideoCapture::new(self.index, videoio::CAP_ANY)
            .map_err(|e| CoachError::Permission(format!("camera {}: {e}", self.index)))?;
        let opened = capture
            .is_opened()
            .map_err(|e| CoachError::Permission(format!("camera {}: {e}", self.index)))?;
        if !opened {
            return Err(CoachError::Permission(format!(
                "camera {} could not be opened",
                self.index
            )));
        }
        let size = device_size(&capture);
        match size {
            Some((w, h)) => log::info!("Opened camera {} at {w}x{h}", self.index),
            None => log::info!("Opened camera {}, size not reported yet", self.index),
        }
        Ok(Box::new(OpenCvCamera {
            capture: Some(capture),
            opened_at: Instant::now(),
            size,
            frame: core::Mat::default(),
        }))
    }
}

#[cfg(feature = "vision")]
fn device_size(capture: &videoio::VideoCapture) -> Option<(u32, u32)> {
    let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).ok()?;
    let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()?;
    reported_size(width, height)
}

#[cfg(feature = "vision")]
struct OpenCvCamera {
    capture: Option<videoio::VideoCapture>,
    opened_at: Instant,
    size: Option<(u32, u32)>,
    frame: core::Mat,
}

#[cfg(feature = "vision")]
impl OpenCvCamera {
    fn to_rgb(&self) -> Result<RgbImage, CoachError> {
        let mut rgb = core::Mat::default();
        imgproc::cvt_color(&self.frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| CoachError::Transport(format!("color conversion: {e}")))?;
        let bytes = rgb
            .data_bytes()
            .map_err(|e| CoachError::Transport(format!("frame data: {e}")))?;
        RgbImage::from_raw(rgb.cols() as u32, rgb.rows() as u32, bytes.to_vec())
            .ok_or_else(|| CoachError::Transport("frame buffer size mismatch".to_string()))
    }
}

#[cfg(feature = "vision")]
#[async_trait]
impl Camera for OpenCvCamera {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.size
            .or_else(|| self.capture.as_ref().and_then(device_size))
    }

    async fn current_frame(&mut self) -> Result<Option<VideoFrame>, CoachError> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };
        let grabbed = capture
            .read(&mut self.frame)
            .map_err(|e| CoachError::Transport(format!("camera read: {e}")))?;
        if !grabbed || self.frame.empty() {
            return Ok(None);
        }

        // Webcams often report 0 here; fall back to time since open.
        let pos_ms = capture.get(videoio::CAP_PROP_POS_MSEC).unwrap_or(0.0);
        let presentation_time = if pos_ms > 0.0 {
            Duration::from_secs_f64(pos_ms / 1000.0)
        } else {
            self.opened_at.elapsed()
        };

        let image = self.to_rgb()?;
        self.size = Some((image.width(), image.height()));
        Ok(Some(VideoFrame::new(presentation_time, image)))
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                log::warn!("Camera release failed: {e}");
            }
        }
        self.size = None;
    }
}
