//! Hold-to-confirm hand gesture: a closed fist held for the dwell time starts a focus session

use super::detector::Detector;
use crate::types::{CoachEvent, GestureState, GestureTrigger, LandmarkFrame, VideoFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long the fist must be held
pub const DWELL: Duration = Duration::from_millis(5000);

const WRIST: usize = 0;
const THUMB_TIP: usize = 4;
const INDEX_PIP: usize = 6;
const INDEX_TIP: usize = 8;
const MIDDLE_PIP: usize = 10;
const MIDDLE_TIP: usize = 12;
const RING_PIP: usize = 14;
const RING_TIP: usize = 16;
const PINKY_PIP: usize = 18;
const PINKY_TIP: usize = 20;

/// True when all five digits of a 21-point hand are curled.
///
/// A finger is curled when its tip sits below its middle joint. The thumb is
/// curled when its tip is closer to the wrist horizontally than the index
/// finger's middle joint.
pub fn is_closed_fist(hand: &LandmarkFrame) -> bool {
    let point = |i: usize| hand.get(i);
    let (Some(wrist), Some(thumb_tip), Some(index_pip)) =
        (point(WRIST), point(THUMB_TIP), point(INDEX_PIP))
    else {
        return false;
    };

    let fingers_curled = [
        (INDEX_TIP, INDEX_PIP),
        (MIDDLE_TIP, MIDDLE_PIP),
        (RING_TIP, RING_PIP),
        (PINKY_TIP, PINKY_PIP),
    ]
    .iter()
    .all(|&(tip, pip)| match (point(tip), point(pip)) {
        (Some(tip), Some(pip)) => tip.y > pip.y,
        _ => false,
    });

    let thumb_curled = (thumb_tip.x - wrist.x).abs() < (index_pip.x - wrist.x).abs();

    fingers_curled && thumb_curled
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Holding { started_at: Instant },
}

/// Idle/Holding state machine fed one fist observation per tick
#[derive(Debug, Clone)]
pub struct GestureTimer {
    dwell: Duration,
    phase: Phase,
    held: Duration,
}

impl Default for GestureTimer {
    fn default() -> Self {
        Self::new(DWELL)
    }
}

impl GestureTimer {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            phase: Phase::Idle,
            held: Duration::ZERO,
        }
    }

    /// Advance with this tick's observation. Returns a trigger when the hold completes.
    pub fn update(&mut self, fist: bool, now: Instant) -> Option<GestureTrigger> {
        match (self.phase, fist) {
            (Phase::Idle, true) => {
                self.phase = Phase::Holding { started_at: now };
                self.held = Duration::ZERO;
                None
            }
            (Phase::Holding { started_at }, true) => {
                self.held = now.saturating_duration_since(started_at);
                if self.held >= self.dwell {
                    log::info!("Fist held for {} ms, starting focus session", self.held.as_millis());
                    self.reset();
                    Some(GestureTrigger::StartFocusSession)
                } else {
                    None
                }
            }
            (Phase::Holding { .. }, false) => {
                log::debug!("Fist released after {} ms", self.held.as_millis());
                self.reset();
                None
            }
            (Phase::Idle, false) => None,
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.held = Duration::ZERO;
    }

    pub fn state(&self) -> GestureState {
        match self.phase {
            Phase::Idle => GestureState::default(),
            Phase::Holding { started_at } => GestureState {
                active: true,
                started_at: Some(started_at),
                held_ms: Some(self.held.as_millis() as u64),
                progress: (self.held.as_secs_f32() / self.dwell.as_secs_f32()).min(1.0),
            },
        }
    }
}

/// What the hold indicator shows while a fist is held
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressIndicator {
    pub progress: f32,
    pub remaining_secs: u32,
}

pub fn progress_indicator(state: &GestureState) -> Option<ProgressIndicator> {
    if !state.active {
        return None;
    }
    let remaining = ((1.0 - state.progress) * DWELL.as_secs_f32()).ceil();
    Some(ProgressIndicator {
        progress: state.progress,
        remaining_secs: remaining.max(0.0) as u32,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureTick {
    /// No camera frame published (capture stopped)
    NoFrame,
    DuplicateFrame,
    DetectionFailed,
    Observed { fist: bool },
}

/// Runs hand detection on the frames published by the capture loop
pub struct GestureLoop {
    detector: Detector,
    timer: GestureTimer,
    frames: watch::Receiver<Option<VideoFrame>>,
    events: mpsc::UnboundedSender<CoachEvent>,
    last_video_time: Option<Duration>,
}

impl GestureLoop {
    pub fn new(
        detector: Detector,
        frames: watch::Receiver<Option<VideoFrame>>,
        events: mpsc::UnboundedSender<CoachEvent>,
    ) -> Self {
        Self {
            detector,
            timer: GestureTimer::default(),
            frames,
            events,
            last_video_time: None,
        }
    }

    fn publish(&self, event: CoachEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Gesture event dropped, coordinator gone");
        }
    }

    pub async fn tick(&mut self, now: Instant) -> GestureTick {
        let frame = self.frames.borrow().clone();
        let Some(frame) = frame else {
            if self.timer.state().active {
                self.timer.reset();
                self.publish(CoachEvent::Gesture(self.timer.state()));
            }
            self.last_video_time = None;
            return GestureTick::NoFrame;
        };

        if self.last_video_time == Some(frame.presentation_time) {
            return GestureTick::DuplicateFrame;
        }
        self.last_video_time = Some(frame.presentation_time);

        let fist = match self.detector.detect(&frame).await {
            Ok(hand) => hand.as_ref().is_some_and(is_closed_fist),
            Err(e) => {
                log::warn!("Hand detection failed: {e}");
                return GestureTick::DetectionFailed;
            }
        };

        let before = self.timer.state();
        let trigger = self.timer.update(fist, now);
        let after = self.timer.state();
        if after != before {
            self.publish(CoachEvent::Gesture(after));
        }
        if let Some(trigger) = trigger {
            self.publish(CoachEvent::GestureConfirmed(trigger));
        }
        GestureTick::Observed { fist }
    }

    pub fn spawn(mut self, period: Duration, running: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::Acquire) {
                    break;
                }
                self.tick(tokio::time::Instant::now().into_std()).await;
            }
            log::debug!("Gesture loop stopped");
        })
    }
}
