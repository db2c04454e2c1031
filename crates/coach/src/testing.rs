//! Scripted fakes for the external collaborators

use crate::error::CoachError;
use crate::llm::TextCompletion;
use crate::pipeline::{AnalyzeRequest, PostureService};
use crate::types::{LandmarkFrame, PostureLabel, PostureState, VideoFrame};
use crate::vision::overlay::{Overlay, Renderer};
use crate::vision::{Camera, CameraProvider, Delegate, DetectorOptions, LandmarkSource, RunningMode};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub(crate) fn sample_state() -> PostureState {
    PostureState {
        label: PostureLabel::Bad,
        angle_deg: 14.0,
        raw_angle_deg: Some(18.0),
        reason_code: Some("forward_head".to_string()),
        shoulder_level_diff: Some(0.02),
    }
}

pub(crate) fn good_state() -> PostureState {
    PostureState {
        label: PostureLabel::Good,
        angle_deg: 3.0,
        raw_angle_deg: Some(6.0),
        reason_code: None,
        shoulder_level_diff: Some(0.01),
    }
}

/// 33 confident landmarks with the nose, ears and shoulders placed
pub(crate) fn pose_frame(nose_y: f32) -> LandmarkFrame {
    let mut points = vec![(0.5, 0.5, 0.0, 0.9); 33];
    points[0] = (0.5, nose_y, 0.0, 0.9);
    points[7] = (0.45, nose_y, 0.0, 0.9);
    points[8] = (0.55, nose_y, 0.0, 0.9);
    points[11] = (0.4, 0.6, 0.0, 0.9);
    points[12] = (0.6, 0.6, 0.0, 0.9);
    LandmarkFrame::from_points(&points)
}

pub(crate) fn blank_frame(presentation_time: Duration) -> VideoFrame {
    VideoFrame::new(presentation_time, image::RgbImage::new(4, 4))
}

#[derive(Default)]
pub(crate) struct FakePostureService {
    replies: Mutex<VecDeque<Result<PostureState, CoachError>>>,
    calibrations: Mutex<Vec<f32>>,
    analyze_calls: AtomicUsize,
}

impl FakePostureService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, state: PostureState) {
        self.replies.lock().unwrap().push_back(Ok(state));
    }

    pub fn push_err(&self, err: CoachError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn calibrations(&self) -> Vec<f32> {
        self.calibrations.lock().unwrap().clone()
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostureService for FakePostureService {
    async fn analyze(&self, _request: &AnalyzeRequest) -> Result<PostureState, CoachError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CoachError::Transport("no scripted reply".to_string())))
    }

    async fn calibrate(&self, angle_deg: f32) -> Result<(), CoachError> {
        self.calibrations.lock().unwrap().push(angle_deg);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCompletion {
    replies: Mutex<VecDeque<Result<String, CoachError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_err(&self, err: CoachError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Hold every reply for `delay` after the prompt is recorded
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl TextCompletion for FakeCompletion {
    async fn generate(&self, prompt: &str) -> Result<String, CoachError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CoachError::Transport("no scripted reply".to_string())))
    }
}

#[derive(Default)]
struct CameraState {
    not_ready: AtomicBool,
    released: AtomicBool,
    time: Mutex<Duration>,
    step: Mutex<Duration>,
}

/// Camera whose readiness and presentation time are set by the test
#[derive(Clone, Default)]
pub(crate) struct FakeCamera {
    state: Arc<CameraState>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Advance the presentation time by `step` after every frame
    pub fn advancing(step: Duration) -> Self {
        let camera = Self::new();
        *camera.state.step.lock().unwrap() = step;
        camera
    }

    pub fn set_time(&self, time: Duration) {
        *self.state.time.lock().unwrap() = time;
    }

    pub fn released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for FakeCamera {
    fn dimensions(&self) -> Option<(u32, u32)> {
        (!self.state.not_ready.load(Ordering::SeqCst)).then_some((640, 480))
    }

    async fn current_frame(&mut self) -> Result<Option<VideoFrame>, CoachError> {
        let step = *self.state.step.lock().unwrap();
        let mut time = self.state.time.lock().unwrap();
        let frame = blank_frame(*time);
        *time += step;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.state.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeCameraProvider {
    deny: bool,
    camera: FakeCamera,
    acquisitions: Arc<AtomicUsize>,
}

impl FakeCameraProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn advancing(step: Duration) -> Self {
        Self {
            camera: FakeCamera::advancing(step),
            ..Self::default()
        }
    }

    pub fn camera(&self) -> FakeCamera {
        self.camera.clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraProvider for FakeCameraProvider {
    async fn acquire(&self) -> Result<Box<dyn Camera>, CoachError> {
        if self.deny {
            return Err(CoachError::Permission("denied by user".to_string()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.camera.state.released.store(false, Ordering::SeqCst);
        Ok(Box::new(self.camera.clone()))
    }
}

/// Landmark source returning queued results, then a default
#[derive(Clone)]
pub(crate) struct FakeLandmarkSource {
    options: DetectorOptions,
    queued: Arc<Mutex<VecDeque<Vec<LandmarkFrame>>>>,
    default: Arc<Mutex<Vec<LandmarkFrame>>>,
    calls: Arc<AtomicUsize>,
    mode_switches: Arc<AtomicUsize>,
    timestamps: Arc<Mutex<Vec<f64>>>,
}

impl FakeLandmarkSource {
    pub fn new() -> Self {
        Self {
            options: DetectorOptions::new(1, Delegate::Cpu),
            queued: Arc::default(),
            default: Arc::default(),
            calls: Arc::default(),
            mode_switches: Arc::default(),
            timestamps: Arc::default(),
        }
    }

    pub fn push(&self, result: Vec<LandmarkFrame>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn set_default(&self, result: Vec<LandmarkFrame>) {
        *self.default.lock().unwrap() = result;
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn mode_switches(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.mode_switches)
    }

    pub fn timestamps(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.timestamps)
    }
}

#[async_trait]
impl LandmarkSource for FakeLandmarkSource {
    fn options(&self) -> DetectorOptions {
        self.options
    }

    async fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), CoachError> {
        self.options.running_mode = mode;
        self.mode_switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detect_for_video(
        &mut self,
        _frame: &VideoFrame,
        timestamp_ms: f64,
    ) -> Result<Vec<LandmarkFrame>, CoachError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timestamps.lock().unwrap().push(timestamp_ms);
        let queued = self.queued.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| self.default.lock().unwrap().clone()))
    }
}

#[derive(Default)]
struct RendererLog {
    draws: usize,
    clears: usize,
    last: Option<Overlay>,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingRenderer {
    log: Arc<Mutex<RendererLog>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draws(&self) -> usize {
        self.log.lock().unwrap().draws
    }

    pub fn clears(&self) -> usize {
        self.log.lock().unwrap().clears
    }

    pub fn last(&self) -> Option<Overlay> {
        self.log.lock().unwrap().last.clone()
    }
}

impl Renderer for RecordingRenderer {
    fn draw(&mut self, overlay: &Overlay) {
        let mut log = self.log.lock().unwrap();
        log.draws += 1;
        log.last = Some(overlay.clone());
    }

    fn clear(&mut self) {
        self.log.lock().unwrap().clears += 1;
    }
}

/// What the canned HTTP server received
pub(crate) struct ReceivedRequest {
    /// Request line and headers, lowercased
    pub head: String,
    pub body: String,
}

impl ReceivedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Answer exactly one HTTP request on 127.0.0.1 with a fixed response.
///
/// Returns the base URL and a task that resolves to the request it saw.
pub(crate) async fn serve_once(
    status: &'static str,
    body: &'static str,
) -> (String, JoinHandle<ReceivedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers ended");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        ReceivedRequest {
            head,
            body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
        }
    });
    (format!("http://{addr}"), task)
}
