//! Configuration for the coaching client

use crate::error::CoachError;
use crate::vision::Delegate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the text-completion API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Configuration for the coaching client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Camera device index
    pub camera_index: i32,
    /// Base URL of the posture analysis service
    pub backend_url: String,
    /// Capture loop ticks per second
    pub target_fps: u32,
    /// Gesture loop ticks per second
    pub gesture_fps: u32,
    /// Length of one focus session
    pub work_duration_secs: u32,
    /// Angle above which the prompt reports forward head posture
    pub forward_tilt_threshold_deg: f32,
    /// Timeout for classification and calibration requests (ms)
    pub request_timeout_ms: u64,
    /// Timeout for text-completion requests (ms)
    pub completion_timeout_ms: u64,
    /// Text-completion model
    pub model_name: String,
    /// Base URL of the text-completion API
    pub completion_base_url: String,
    pub max_poses: usize,
    pub max_hands: usize,
    pub delegate: Delegate,
    /// Receive pose landmarks from an external detector instead of the simulator
    pub pose_udp_addr: Option<SocketAddr>,
    /// Receive hand landmarks from an external detector instead of the simulator
    pub hand_udp_addr: Option<SocketAddr>,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            backend_url: "http://localhost:3000".to_string(),
            target_fps: 60,
            gesture_fps: 30,
            work_duration_secs: 25 * 60,
            forward_tilt_threshold_deg: 10.0,
            request_timeout_ms: 2_000,
            completion_timeout_ms: 15_000,
            model_name: "gemini-2.5-flash".to_string(),
            completion_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_poses: 1,
            max_hands: 2,
            delegate: Delegate::Gpu,
            pose_udp_addr: None,
            hand_udp_addr: None,
        }
    }
}

impl CoachConfig {
    /// Load a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, CoachError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoachError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            CoachError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.target_fps.max(1)))
    }

    pub fn gesture_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.gesture_fps.max(1)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Secrets required at startup
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("api_key", &"<redacted>").finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, CoachError> {
        Self::from_value(std::env::var(API_KEY_ENV).ok())
    }

    fn from_value(value: Option<String>) -> Result<Self, CoachError> {
        match value.map(|v| v.trim().to_string()) {
            Some(api_key) if !api_key.is_empty() => Ok(Self { api_key }),
            _ => Err(CoachError::Configuration(format!("missing {API_KEY_ENV}"))),
        }
    }
}
