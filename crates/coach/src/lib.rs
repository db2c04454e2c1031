//! # Lock In Coach
//!
//! Real-time posture coaching. A capture loop samples the camera, detects body
//! landmarks and has a remote service classify them; a feedback generator
//! turns posture updates into short coaching text; a hand-gesture loop
//! watches for a held fist that starts a focus interval timer.

pub mod config;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod pipeline;
pub mod timer;
pub mod types;
pub mod vision;

#[cfg(test)]
mod testing;

pub use config::{CoachConfig, Credentials};
pub use error::CoachError;
pub use feedback::{FeedbackGenerator, TipGenerator};
pub use llm::{LLMConnector, TextCompletion};
pub use pipeline::{HttpPostureService, PosturePipeline, PostureService};
pub use timer::{IntervalTimer, TimerHandle};
pub use types::*;
pub use vision::{CaptureLoop, CameraProvider, LandmarkSource, Renderer};

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vision::{CaptureParts, Detector, DetectorOptions, GestureLoop};

/// External collaborators the coach is wired to
pub struct CoachParts {
    pub camera: Arc<dyn CameraProvider>,
    pub pose_source: Box<dyn LandmarkSource>,
    pub hand_source: Box<dyn LandmarkSource>,
    pub posture_service: Arc<dyn PostureService>,
    pub completion: Arc<dyn TextCompletion>,
    pub renderer: Box<dyn Renderer>,
}

/// The main coordinator. Owns every loop and forwards their events to one sink.
pub struct Coach {
    capture: CaptureLoop,
    timer: TimerHandle,
    tips: TipGenerator,
    gesture_running: Arc<AtomicBool>,
    gesture_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Coach {
    /// Wire the loops together and start the background tasks. Capture stays off
    /// until [`Coach::start_capture`].
    pub fn new(config: &CoachConfig, parts: CoachParts, events: Sender<CoachEvent>) -> Self {
        log::info!("Initializing coach...");
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let capture_running = Arc::new(AtomicBool::new(false));
        let pipeline = PosturePipeline::new(parts.posture_service, Arc::clone(&capture_running));
        let capture = CaptureLoop::new(
            parts.camera,
            CaptureParts::new(Detector::new(parts.pose_source), pipeline, parts.renderer),
            capture_running,
            config.frame_period(),
        );

        let (timer, timer_task) = timer::spawn_timer(
            IntervalTimer::new(config.work_duration_secs),
            internal_tx.clone(),
        );

        let feedback_task = FeedbackGenerator::new(
            Arc::clone(&parts.completion),
            config.forward_tilt_threshold_deg,
        )
        .spawn(capture.posture(), internal_tx.clone());

        let gesture_running = Arc::new(AtomicBool::new(true));
        let gesture_task = GestureLoop::new(
            Detector::new(parts.hand_source),
            capture.frames(),
            internal_tx,
        )
        .spawn(config.gesture_period(), Arc::clone(&gesture_running));

        let router_task = tokio::spawn(route_events(
            internal_rx,
            capture.posture(),
            timer.clone(),
            events,
        ));

        log::info!("Coach initialization complete");
        Self {
            capture,
            timer,
            tips: TipGenerator::new(parts.completion),
            gesture_running,
            gesture_task: Some(gesture_task),
            background: vec![timer_task, feedback_task, router_task],
        }
    }

    /// Build the default collaborators from configuration
    pub async fn from_config(
        config: &CoachConfig,
        credentials: &Credentials,
        events: Sender<CoachEvent>,
    ) -> anyhow::Result<Self> {
        #[cfg(feature = "vision")]
        let camera: Arc<dyn CameraProvider> =
            Arc::new(vision::OpenCvCameraProvider::new(config.camera_index));
        #[cfg(not(feature = "vision"))]
        let camera: Arc<dyn CameraProvider> = Arc::new(vision::SimulatedCameraProvider::default());

        let pose_options = DetectorOptions::new(config.max_poses, config.delegate);
        let pose_source: Box<dyn LandmarkSource> = match config.pose_udp_addr {
            Some(addr) => Box::new(vision::UdpLandmarkSource::bind(addr, pose_options).await?),
            None => {
                log::warn!("No pose detector configured, using simulated landmarks");
                Box::new(vision::SimulatedPoseSource::new(pose_options))
            }
        };

        let hand_options = DetectorOptions::new(config.max_hands, config.delegate);
        let hand_source: Box<dyn LandmarkSource> = match config.hand_udp_addr {
            Some(addr) => Box::new(vision::UdpLandmarkSource::bind(addr, hand_options).await?),
            None => {
                log::warn!("No hand detector configured, using simulated landmarks");
                Box::new(vision::SimulatedHandSource::new(hand_options))
            }
        };

        let parts = CoachParts {
            camera,
            pose_source,
            hand_source,
            posture_service: Arc::new(HttpPostureService::new(
                &config.backend_url,
                config.request_timeout(),
            )?),
            completion: Arc::new(LLMConnector::new(config, credentials)?),
            renderer: Box::new(vision::LogRenderer::default()),
        };
        Ok(Self::new(config, parts, events))
    }

    /// Acquire the camera and start the capture loop
    pub async fn start_capture(&mut self) -> Result<(), CoachError> {
        self.capture.start().await
    }

    pub async fn stop_capture(&mut self) {
        self.capture.stop().await;
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn posture(&self) -> Option<PostureState> {
        self.capture.posture().borrow().clone()
    }

    /// Send the current raw angle as the neutral baseline.
    ///
    /// Returns `false` when there is no raw angle to send yet.
    pub fn calibrate(&self) -> bool {
        self.capture.calibrator().calibrate().is_some()
    }

    pub fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    /// Ask for a fresh list of posture tips, hinted by the latest classification
    pub async fn request_tips(&mut self) -> Result<Vec<String>, CoachError> {
        let hint = self
            .posture()
            .map(|s| s.reason_code.unwrap_or_else(|| s.label.as_str().to_string()));
        self.tips.request_tips(hint.as_deref()).await
    }

    /// Shutdown the coach gracefully
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        log::info!("Shutting down coach...");
        self.capture.stop().await;

        self.gesture_running.store(false, Ordering::Release);
        if let Some(task) = self.gesture_task.take() {
            task.await?;
        }
        for task in self.background.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

/// Forward loop events to the sink and start the timer on a confirmed gesture
async fn route_events(
    mut internal: mpsc::UnboundedReceiver<CoachEvent>,
    mut posture: watch::Receiver<Option<PostureState>>,
    timer: TimerHandle,
    sink: Sender<CoachEvent>,
) {
    loop {
        let event = tokio::select! {
            event = internal.recv() => match event {
                Some(event) => event,
                None => break,
            },
            changed = posture.changed() => {
                if changed.is_err() {
                    break;
                }
                CoachEvent::Posture(posture.borrow_and_update().clone())
            }
        };

        if let CoachEvent::GestureConfirmed(GestureTrigger::StartFocusSession) = event {
            timer.start();
        }
        if let Err(e) = sink.send(event) {
            log::debug!("Event sink disconnected: {e}");
        }
    }
}
