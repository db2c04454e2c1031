//! Vision pathway - camera capture, pose detection and hand gestures
//!
//! The capture loop owns the camera, the pose detector, the posture pipeline
//! and the overlay renderer for as long as it runs. Stopping hands them back.

use crate::error::CoachError;
use crate::pipeline::{Calibrator, ClassifyOutcome, PosturePipeline};
use crate::types::{PostureState, VideoFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub mod camera;
mod detector;
pub mod gesture;
pub mod overlay;
pub(crate) mod simulated;
mod udp_landmarks;

pub use camera::{Camera, CameraProvider, SimulatedCameraProvider};
#[cfg(feature = "vision")]
pub use camera::OpenCvCameraProvider;
pub use detector::{Delegate, Detector, DetectorOptions, LandmarkSource, RunningMode};
pub use gesture::{GestureLoop, GestureTimer};
pub use overlay::{LogRenderer, Overlay, Renderer};
pub use simulated::{SimulatedHandSource, SimulatedPoseSource};
pub use udp_landmarks::{parse_landmark_message, LandmarkMessage, UdpLandmarkSource};

/// What a single capture tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Running flag was cleared; the loop exits
    Stopped,
    /// Camera has no dimensions or no decoded frame yet
    NotReady,
    /// Same presentation time as the previous tick
    DuplicateFrame,
    DetectionFailed,
    /// No body in view; overlay cleared
    NoBody,
    Processed(ClassifyOutcome),
}

/// Everything the capture loop keeps between runs
pub struct CaptureParts {
    detector: Detector,
    pipeline: PosturePipeline,
    renderer: Box<dyn Renderer>,
    frames: watch::Sender<Option<VideoFrame>>,
}

impl CaptureParts {
    pub fn new(detector: Detector, pipeline: PosturePipeline, renderer: Box<dyn Renderer>) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            detector,
            pipeline,
            renderer,
            frames,
        }
    }
}

/// The running half of the capture loop
pub struct CaptureWorker {
    camera: Box<dyn Camera>,
    parts: CaptureParts,
    running: Arc<AtomicBool>,
    last_video_time: Option<Duration>,
}

impl CaptureWorker {
    pub fn new(camera: Box<dyn Camera>, parts: CaptureParts, running: Arc<AtomicBool>) -> Self {
        Self {
            camera,
            parts,
            running,
            last_video_time: None,
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.running.load(Ordering::Acquire) {
            return TickOutcome::Stopped;
        }

        let Some(dimensions) = self.camera.dimensions() else {
            return TickOutcome::NotReady;
        };
        let frame = match self.camera.current_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::NotReady,
            Err(e) => {
                log::warn!("Camera read failed: {e}");
                return TickOutcome::NotReady;
            }
        };

        if self.last_video_time == Some(frame.presentation_time) {
            return TickOutcome::DuplicateFrame;
        }
        self.last_video_time = Some(frame.presentation_time);
        self.parts.frames.send_replace(Some(frame.clone()));

        let body = match self.parts.detector.detect(&frame).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Pose detection failed: {e}");
                return TickOutcome::DetectionFailed;
            }
        };
        let Some(body) = body else {
            self.parts.renderer.clear();
            return TickOutcome::NoBody;
        };

        let outcome = self.parts.pipeline.classify(&body).await;
        if outcome != ClassifyOutcome::Discarded {
            let overlay = overlay::build_overlay(&body, dimensions, self.parts.pipeline.state());
            self.parts.renderer.draw(&overlay);
        }
        TickOutcome::Processed(outcome)
    }

    async fn run(mut self, period: Duration) -> CaptureParts {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.tick().await == TickOutcome::Stopped {
                break;
            }
        }
        self.finish()
    }

    /// Release the camera and wipe everything derived from it
    fn finish(mut self) -> CaptureParts {
        self.camera.release();
        self.parts.renderer.clear();
        self.parts.pipeline.clear();
        self.parts.frames.send_replace(None);
        log::info!("Capture loop stopped");
        self.parts
    }
}

/// Start/stop front end of the capture loop
pub struct CaptureLoop {
    provider: Arc<dyn CameraProvider>,
    period: Duration,
    running: Arc<AtomicBool>,
    posture: watch::Receiver<Option<PostureState>>,
    frames: watch::Receiver<Option<VideoFrame>>,
    calibrator: Calibrator,
    idle: Option<CaptureParts>,
    task: Option<JoinHandle<CaptureParts>>,
}

impl CaptureLoop {
    /// `running` must be the flag the pipeline inside `parts` was built with.
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        parts: CaptureParts,
        running: Arc<AtomicBool>,
        period: Duration,
    ) -> Self {
        Self {
            provider,
            period,
            running,
            posture: parts.pipeline.subscribe(),
            frames: parts.frames.subscribe(),
            calibrator: parts.pipeline.calibrator(),
            idle: Some(parts),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Posture state updates, `None` while stopped
    pub fn posture(&self) -> watch::Receiver<Option<PostureState>> {
        self.posture.clone()
    }

    /// Camera frames for other detectors, `None` while stopped
    pub fn frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frames.clone()
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Acquire the camera and begin ticking. A no-op if already running.
    pub async fn start(&mut self) -> Result<(), CoachError> {
        if self.task.is_some() {
            return Ok(());
        }
        let camera = self.provider.acquire().await?;
        let parts = self
            .idle
            .take()
            .ok_or_else(|| CoachError::Configuration("capture loop parts missing".to_string()))?;

        self.running.store(true, Ordering::Release);
        let worker = CaptureWorker::new(camera, parts, Arc::clone(&self.running));
        self.task = Some(tokio::spawn(worker.run(self.period)));
        log::info!("Capture loop started");
        Ok(())
    }

    /// Stop ticking and release the camera. A no-op if not running.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        let parts = match task.await {
            Ok(parts) => parts,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };
        self.idle = Some(parts);
    }
}
