//! Landmark detector contract and the call-site guard around it

use crate::error::CoachError;
use crate::types::{LandmarkFrame, VideoFrame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Where the detector runs its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    Gpu,
    Cpu,
}

/// Detector input mode. The only legal transition is `Image -> Video`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOptions {
    /// Maximum number of bodies (or hands) reported per frame
    pub max_results: usize,
    pub delegate: Delegate,
    pub running_mode: RunningMode,
}

impl DetectorOptions {
    pub fn new(max_results: usize, delegate: Delegate) -> Self {
        Self {
            max_results,
            delegate,
            running_mode: RunningMode::Image,
        }
    }
}

/// The external landmark detection engine
#[async_trait]
pub trait LandmarkSource: Send {
    fn options(&self) -> DetectorOptions;

    async fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), CoachError>;

    /// Detect landmarks in `frame`. `timestamp_ms` must increase on every call.
    async fn detect_for_video(
        &mut self,
        frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<Vec<LandmarkFrame>, CoachError>;
}

/// Drives a [`LandmarkSource`]: switches it to video mode once, feeds it
/// strictly increasing timestamps and keeps only the first result.
pub struct Detector {
    source: Box<dyn LandmarkSource>,
    mode: RunningMode,
    epoch: Instant,
    last_timestamp_ms: f64,
}

impl Detector {
    pub fn new(source: Box<dyn LandmarkSource>) -> Self {
        let mode = source.options().running_mode;
        Self {
            source,
            mode,
            epoch: Instant::now(),
            last_timestamp_ms: f64::NEG_INFINITY,
        }
    }

    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    async fn ensure_video_mode(&mut self) -> Result<(), CoachError> {
        if self.mode == RunningMode::Image {
            self.source.set_running_mode(RunningMode::Video).await?;
            self.mode = RunningMode::Video;
            log::debug!("Detector switched to video mode");
        }
        Ok(())
    }

    fn next_timestamp_ms(&mut self) -> f64 {
        let mut ts = self.epoch.elapsed().as_secs_f64() * 1000.0;
        if ts <= self.last_timestamp_ms {
            ts = self.last_timestamp_ms + 0.001;
        }
        self.last_timestamp_ms = ts;
        ts
    }

    /// Run detection on one frame, returning the first detected body if any
    pub async fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkFrame>, CoachError> {
        self.ensure_video_mode().await?;
        let ts = self.next_timestamp_ms();
        let results = self.source.detect_for_video(frame, ts).await?;
        Ok(results.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blank_frame, pose_frame, FakeLandmarkSource};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn switches_to_video_mode_exactly_once() {
        let source = FakeLandmarkSource::new();
        let switches = source.mode_switches();
        let mut detector = Detector::new(Box::new(source));
        assert_eq!(detector.mode(), RunningMode::Image);

        let frame = blank_frame(Duration::from_millis(33));
        for _ in 0..3 {
            detector.detect(&frame).await.unwrap();
        }

        assert_eq!(detector.mode(), RunningMode::Video);
        assert_eq!(switches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let source = FakeLandmarkSource::new();
        let timestamps = source.timestamps();
        let mut detector = Detector::new(Box::new(source));

        let frame = blank_frame(Duration::ZERO);
        for _ in 0..5 {
            detector.detect(&frame).await.unwrap();
        }

        let ts = timestamps.lock().unwrap().clone();
        assert_eq!(ts.len(), 5);
        assert!(ts.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn keeps_first_body_only() {
        let source = FakeLandmarkSource::new();
        source.push(vec![pose_frame(0.30), pose_frame(0.40)]);
        let mut detector = Detector::new(Box::new(source));

        let body = detector
            .detect(&blank_frame(Duration::ZERO))
            .await
            .unwrap()
            .unwrap();
        assert!((body.get(0).unwrap().y - 0.30).abs() < 1e-6);
    }
}
