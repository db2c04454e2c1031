//! Simulated landmark sources for running without a detection model

use super::detector::{DetectorOptions, LandmarkSource, RunningMode};
use crate::error::CoachError;
use crate::types::{LandmarkFrame, VideoFrame};
use async_trait::async_trait;

const POSE_LANDMARKS: usize = 33;
const HAND_LANDMARKS: usize = 21;

/// Seconds of each gesture cycle spent holding a fist
const FIST_SECS: f64 = 7.0;
const GESTURE_CYCLE_SECS: f64 = 20.0;

/// A seated body whose head slowly drifts forward and back
pub struct SimulatedPoseSource {
    options: DetectorOptions,
}

impl SimulatedPoseSource {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl LandmarkSource for SimulatedPoseSource {
    fn options(&self) -> DetectorOptions {
        self.options
    }

    async fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), CoachError> {
        self.options.running_mode = mode;
        Ok(())
    }

    async fn detect_for_video(
        &mut self,
        _frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<Vec<LandmarkFrame>, CoachError> {
        let t = timestamp_ms / 1000.0;
        let nose_y = 0.35 + 0.06 * (t * 0.2).sin();
        Ok(vec![seated_pose(nose_y as f32)])
    }
}

/// A hand that closes into a fist for a few seconds every cycle
pub struct SimulatedHandSource {
    options: DetectorOptions,
}

impl SimulatedHandSource {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl LandmarkSource for SimulatedHandSource {
    fn options(&self) -> DetectorOptions {
        self.options
    }

    async fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), CoachError> {
        self.options.running_mode = mode;
        Ok(())
    }

    async fn detect_for_video(
        &mut self,
        _frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<Vec<LandmarkFrame>, CoachError> {
        let phase = (timestamp_ms / 1000.0) % GESTURE_CYCLE_SECS;
        let hand = if phase < FIST_SECS { fist() } else { open_hand() };
        Ok(vec![hand])
    }
}

/// 33-point pose with shoulders level and the head above them at `nose_y`
pub(crate) fn seated_pose(nose_y: f32) -> LandmarkFrame {
    let mut points = vec![(0.5, 0.5, 0.0, 0.2); POSE_LANDMARKS];
    points[0] = (0.5, nose_y, -0.3, 0.99);
    points[7] = (0.44, nose_y + 0.01, -0.1, 0.95);
    points[8] = (0.56, nose_y + 0.01, -0.1, 0.95);
    points[11] = (0.38, 0.62, 0.0, 0.98);
    points[12] = (0.62, 0.62, 0.0, 0.98);
    LandmarkFrame::from_points(&points)
}

/// Upright hand with fingertips curled below their middle joints
pub(crate) fn fist() -> LandmarkFrame {
    let mut points = vec![(0.5, 0.6, 0.0, 1.0); HAND_LANDMARKS];
    points[0] = (0.50, 0.80, 0.0, 1.0);
    points[4] = (0.52, 0.62, 0.0, 1.0);
    for (pip, tip, x) in [(6, 8, 0.42), (10, 12, 0.48), (14, 16, 0.54), (18, 20, 0.60)] {
        points[pip] = (x, 0.55, 0.0, 1.0);
        points[tip] = (x, 0.62, 0.0, 1.0);
    }
    LandmarkFrame::from_points(&points)
}

/// Upright hand with every finger extended and the thumb out to the side
pub(crate) fn open_hand() -> LandmarkFrame {
    let mut points = vec![(0.5, 0.5, 0.0, 1.0); HAND_LANDMARKS];
    points[0] = (0.50, 0.80, 0.0, 1.0);
    points[4] = (0.30, 0.60, 0.0, 1.0);
    for (pip, tip, x) in [(6, 8, 0.42), (10, 12, 0.48), (14, 16, 0.54), (18, 20, 0.60)] {
        points[pip] = (x, 0.50, 0.0, 1.0);
        points[tip] = (x, 0.30, 0.0, 1.0);
    }
    LandmarkFrame::from_points(&points)
}
