//! Skeleton overlay and correction guidance drawn over the camera feed

use crate::types::{LandmarkFrame, PostureLabel, PostureState};

pub const NOSE: usize = 0;
pub const LEFT_EAR: usize = 7;
pub const RIGHT_EAR: usize = 8;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;

/// Landmarks the overlay cares about
pub const KEY_LANDMARKS: [usize; 5] = [NOSE, LEFT_EAR, RIGHT_EAR, LEFT_SHOULDER, RIGHT_SHOULDER];

const POINT_VISIBILITY: f32 = 0.5;
const SEGMENT_VISIBILITY: f32 = 0.7;

const HIGH_TILT_DEG: f32 = 15.0;
const MEDIUM_TILT_DEG: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayPoint {
    pub index: usize,
    /// Pixel coordinates
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Head and shoulder connections
    Connection,
    /// Shoulder midpoint to nose
    Spine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guidance {
    pub message: &'static str,
    pub intensity: Intensity,
}

/// One frame's worth of drawing instructions
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub width: u32,
    pub height: u32,
    pub points: Vec<OverlayPoint>,
    pub segments: Vec<Segment>,
    pub guidance: Option<Guidance>,
}

/// Correction hint for a non-good posture whose angle crosses a threshold
pub fn guidance_for(state: &PostureState) -> Option<Guidance> {
    if state.label == PostureLabel::Good {
        return None;
    }
    if state.angle_deg >= HIGH_TILT_DEG {
        Some(Guidance {
            message: "Pull chin back significantly",
            intensity: Intensity::High,
        })
    } else if state.angle_deg >= MEDIUM_TILT_DEG {
        Some(Guidance {
            message: "Lift head slightly",
            intensity: Intensity::Medium,
        })
    } else {
        None
    }
}

pub fn build_overlay(
    body: &LandmarkFrame,
    (width, height): (u32, u32),
    posture: Option<&PostureState>,
) -> Overlay {
    let to_px = |i: usize| {
        body.get(i)
            .map(|lm| (lm.x * width as f32, lm.y * height as f32, lm.visibility))
    };

    let points = KEY_LANDMARKS
        .iter()
        .filter_map(|&i| {
            let (x, y, vis) = to_px(i)?;
            (vis > POINT_VISIBILITY).then_some(OverlayPoint { index: i, x, y })
        })
        .collect();

    let confident = |i: usize| to_px(i).filter(|p| p.2 > SEGMENT_VISIBILITY);

    let mut segments = Vec::new();
    for (a, b) in [(NOSE, LEFT_EAR), (NOSE, RIGHT_EAR), (LEFT_SHOULDER, RIGHT_SHOULDER)] {
        if let (Some(p), Some(q)) = (confident(a), confident(b)) {
            segments.push(Segment {
                from: (p.0, p.1),
                to: (q.0, q.1),
                kind: SegmentKind::Connection,
            });
        }
    }
    if let (Some(l), Some(r), Some(nose)) =
        (confident(LEFT_SHOULDER), confident(RIGHT_SHOULDER), confident(NOSE))
    {
        segments.push(Segment {
            from: ((l.0 + r.0) / 2.0, (l.1 + r.1) / 2.0),
            to: (nose.0, nose.1),
            kind: SegmentKind::Spine,
        });
    }

    Overlay {
        width,
        height,
        points,
        segments,
        guidance: posture.and_then(guidance_for),
    }
}

/// Draws overlays on whatever surface backs the camera preview
pub trait Renderer: Send {
    fn draw(&mut self, overlay: &Overlay);
    fn clear(&mut self);
}

/// Renderer for headless runs: logs guidance changes
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_guidance: Option<Guidance>,
}

impl Renderer for LogRenderer {
    fn draw(&mut self, overlay: &Overlay) {
        log::trace!(
            "Overlay {}x{}: {} points, {} segments",
            overlay.width,
            overlay.height,
            overlay.points.len(),
            overlay.segments.len()
        );
        if overlay.guidance != self.last_guidance {
            if let Some(g) = overlay.guidance {
                log::info!("Guidance ({:?}): {}", g.intensity, g.message);
            }
            self.last_guidance = overlay.guidance;
        }
    }

    fn clear(&mut self) {
        self.last_guidance = None;
    }
}
