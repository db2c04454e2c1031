//! Core data types for the coaching client

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single body keypoint produced by the landmark detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Position in the detector's fixed ordering
    pub index: usize,
    /// Horizontal position (normalized 0.0-1.0)
    pub x: f32,
    /// Vertical position (normalized 0.0-1.0, grows downwards)
    pub y: f32,
    /// Depth relative to the hips (pose) or wrist (hand)
    pub z: f32,
    /// Detection confidence (0.0-1.0)
    pub visibility: f32,
}

/// Ordered keypoints for one detected body or hand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub landmarks: Vec<Landmark>,
}

impl LandmarkFrame {
    /// Build a frame from `(x, y, z, visibility)` tuples, assigning indices by position
    pub fn from_points(points: &[(f32, f32, f32, f32)]) -> Self {
        let landmarks = points
            .iter()
            .enumerate()
            .map(|(index, &(x, y, z, visibility))| Landmark { index, x, y, z, visibility })
            .collect();
        Self { landmarks }
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.landmarks.get(index)
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

/// A decoded camera frame. Pixels are shared, so clones are cheap.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation time of the frame in the video stream
    pub presentation_time: Duration,
    pub image: Arc<image::RgbImage>,
}

impl VideoFrame {
    pub fn new(presentation_time: Duration, image: image::RgbImage) -> Self {
        Self {
            presentation_time,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Coarse posture classification returned by the analysis service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostureLabel {
    #[serde(rename = "good_posture")]
    Good,
    #[serde(rename = "bad_posture")]
    Bad,
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl PostureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good_posture",
            Self::Bad => "bad_posture",
            Self::Unknown => "unknown",
        }
    }
}

/// Latest posture classification, replaced wholesale on every successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureState {
    pub label: PostureLabel,
    /// Smoothed forward-head angle after the calibration offset
    pub angle_deg: f32,
    /// Unsmoothed angle before the calibration offset
    pub raw_angle_deg: Option<f32>,
    pub reason_code: Option<String>,
    pub shoulder_level_diff: Option<f32>,
}

/// Snapshot of the hold-to-confirm gesture
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GestureState {
    pub active: bool,
    pub started_at: Option<Instant>,
    /// Milliseconds since the hold started, when active
    pub held_ms: Option<u64>,
    /// Fraction of the dwell time reached (0.0-1.0)
    pub progress: f32,
}

/// Discrete events emitted by the gesture timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureTrigger {
    /// Closed fist held for the full dwell time
    StartFocusSession,
}

/// Snapshot of the focus interval timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining_seconds: u32,
    pub running: bool,
    pub completed_cycles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Good,
    Warning,
    Neutral,
}

/// Short coaching text generated from a posture state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub assessment: String,
    pub instruction: String,
    pub severity: Severity,
    /// Wall-clock generation time in milliseconds since the Unix epoch
    pub generated_at_ms: u64,
}

/// Everything the coordinator forwards to the user-facing sink
#[derive(Debug, Clone)]
pub enum CoachEvent {
    /// New posture classification (`None` once capture stops)
    Posture(Option<PostureState>),
    Feedback(Feedback),
    Gesture(GestureState),
    GestureConfirmed(GestureTrigger),
    Timer(TimerState),
    /// A focus session finished
    CycleComplete { completed_cycles: u32 },
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
