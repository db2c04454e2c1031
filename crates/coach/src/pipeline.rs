//! Posture Pipeline - turns landmark frames into posture state via the analysis service
//!
//! The pipeline is driven from inside the capture loop's tick, so at most one
//! classification request is ever in flight. Failed requests keep the previous
//! state; a response arriving after capture stopped is dropped.

use crate::error::CoachError;
use crate::types::{LandmarkFrame, PostureLabel, PostureState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One landmark as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WireLandmark {
    pub idx: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

/// Body of `POST /analyze_posture`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub landmarks: Vec<WireLandmark>,
}

impl AnalyzeRequest {
    pub fn from_frame(frame: &LandmarkFrame) -> Self {
        let landmarks = frame
            .landmarks
            .iter()
            .map(|lm| WireLandmark {
                idx: lm.index,
                x: lm.x,
                y: lm.y,
                z: lm.z,
                visibility: lm.visibility,
            })
            .collect();
        Self { landmarks }
    }
}

#[derive(Debug, Serialize)]
struct CalibrateRequest {
    angle_deg: f32,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    state: PostureLabel,
    angle_deg: f32,
    #[serde(default)]
    raw_angle_deg: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    shoulder_level_diff: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzeReply {
    Analysis(AnalyzeResponse),
    Rejected { error: String },
}

/// Decode an `/analyze_posture` response body.
///
/// The service answers `{"error": ...}` with a 200 when too few landmarks are
/// visible; that is reported as a malformed response.
pub fn parse_analyze_reply(body: &str) -> Result<PostureState, CoachError> {
    match serde_json::from_str::<AnalyzeReply>(body)? {
        AnalyzeReply::Analysis(r) => Ok(PostureState {
            label: r.state,
            angle_deg: r.angle_deg,
            raw_angle_deg: r.raw_angle_deg,
            reason_code: r.reason,
            shoulder_level_diff: r.shoulder_level_diff,
        }),
        AnalyzeReply::Rejected { error } => Err(CoachError::MalformedResponse(error)),
    }
}

/// The remote posture classification service
#[async_trait]
pub trait PostureService: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<PostureState, CoachError>;

    /// Store `angle_deg` as the new neutral baseline
    async fn calibrate(&self, angle_deg: f32) -> Result<(), CoachError>;
}

/// HTTP implementation of [`PostureService`]
pub struct HttpPostureService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPostureService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CoachError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoachError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PostureService for HttpPostureService {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<PostureState, CoachError> {
        let url = format!("{}/analyze_posture", self.base_url);
        let resp = self.client.post(url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoachError::Transport(format!("analyze_posture returned {status}")));
        }
        let body = resp.text().await?;
        parse_analyze_reply(&body)
    }

    async fn calibrate(&self, angle_deg: f32) -> Result<(), CoachError> {
        let url = format!("{}/calibrate", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(&CalibrateRequest { angle_deg })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoachError::Transport(format!("calibrate returned {status}")));
        }
        Ok(())
    }
}

/// What a classification attempt did to the posture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// State replaced with the new response
    Updated,
    /// Request failed, previous state kept
    Retained,
    /// Capture stopped while the request was in flight
    Discarded,
}

/// Owns the current [`PostureState`] and publishes snapshots to subscribers
pub struct PosturePipeline {
    service: Arc<dyn PostureService>,
    live: Arc<AtomicBool>,
    state: Option<PostureState>,
    updates: watch::Sender<Option<PostureState>>,
}

impl PosturePipeline {
    /// `live` is the capture loop's running flag, checked before a response is applied.
    pub fn new(service: Arc<dyn PostureService>, live: Arc<AtomicBool>) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            service,
            live,
            state: None,
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PostureState>> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> Option<&PostureState> {
        self.state.as_ref()
    }

    pub async fn classify(&mut self, frame: &LandmarkFrame) -> ClassifyOutcome {
        let request = AnalyzeRequest::from_frame(frame);
        let result = self.service.analyze(&request).await;

        if !self.live.load(Ordering::Acquire) {
            log::debug!("Dropping classification response that arrived after stop");
            return ClassifyOutcome::Discarded;
        }

        match result {
            Ok(state) => {
                log::debug!(
                    "Posture: {} angle={:.2} reason={:?}",
                    state.label.as_str(),
                    state.angle_deg,
                    state.reason_code
                );
                self.state = Some(state.clone());
                self.updates.send_replace(Some(state));
                ClassifyOutcome::Updated
            }
            Err(e) => {
                log::warn!("Posture classification failed, keeping previous state: {e}");
                ClassifyOutcome::Retained
            }
        }
    }

    /// Forget the current state (capture stopped)
    pub fn clear(&mut self) {
        self.state = None;
        self.updates.send_replace(None);
    }

    pub fn calibrator(&self) -> Calibrator {
        Calibrator {
            service: Arc::clone(&self.service),
            state: self.subscribe(),
        }
    }
}

/// Issues calibration requests from the latest published posture state
#[derive(Clone)]
pub struct Calibrator {
    service: Arc<dyn PostureService>,
    state: watch::Receiver<Option<PostureState>>,
}

impl Calibrator {
    /// Send the current raw angle as the new baseline without waiting for the reply.
    ///
    /// Returns `None` and sends nothing when no raw angle is known yet.
    pub fn calibrate(&self) -> Option<JoinHandle<()>> {
        let angle = self.state.borrow().as_ref().and_then(|s| s.raw_angle_deg)?;
        let service = Arc::clone(&self.service);
        log::info!("Calibrating neutral posture at {angle:.2}°");

        Some(tokio::spawn(async move {
            match service.calibrate(angle).await {
                Ok(()) => log::info!("Calibration accepted"),
                Err(e) => log::warn!("Calibration failed: {e}"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pose_frame, sample_state, serve_once, FakePostureService};

    fn pipeline(service: Arc<FakePostureService>) -> (PosturePipeline, Arc<AtomicBool>) {
        let live = Arc::new(AtomicBool::new(true));
        (PosturePipeline::new(service, Arc::clone(&live)), live)
    }

    #[test]
    fn request_carries_every_landmark() {
        let frame = pose_frame(0.5);
        let request = AnalyzeRequest::from_frame(&frame);
        assert_eq!(request.landmarks.len(), 33);
        assert_eq!(request.landmarks[11].idx, 11);

        let json = serde_json::to_value(&request).unwrap();
        let first = &json["landmarks"][0];
        assert!(first.get("idx").is_some());
        assert!(first.get("visibility").is_some());
    }

    #[test]
    fn parses_full_reply() {
        let state = parse_analyze_reply(
            r#"{"state":"bad_posture","angle_deg":14,"raw_angle_deg":18,"reason":"forward_head","shoulder_level_diff":0.02}"#,
        )
        .unwrap();
        assert_eq!(state.label, PostureLabel::Bad);
        assert_eq!(state.angle_deg, 14.0);
        assert_eq!(state.raw_angle_deg, Some(18.0));
        assert_eq!(state.reason_code.as_deref(), Some("forward_head"));
        assert_eq!(state.shoulder_level_diff, Some(0.02));
    }

    #[test]
    fn error_reply_is_malformed() {
        let err = parse_analyze_reply(r#"{"error":"insufficient landmarks visibility"}"#).unwrap_err();
        assert!(matches!(err, CoachError::MalformedResponse(_)));

        let err = parse_analyze_reply("not json").unwrap_err();
        assert!(matches!(err, CoachError::MalformedResponse(_)));
    }

    fn http_service(base_url: &str) -> HttpPostureService {
        HttpPostureService::new(base_url, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn http_analyze_posts_landmarks_and_decodes_reply() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"state":"bad_posture","angle_deg":14.0,"raw_angle_deg":18.0,"reason":"forward_head"}"#,
        )
        .await;

        let request = AnalyzeRequest::from_frame(&pose_frame(0.3));
        let state = http_service(&format!("{base}/")).analyze(&request).await.unwrap();
        assert_eq!(state.label, PostureLabel::Bad);
        assert_eq!(state.raw_angle_deg, Some(18.0));
        assert_eq!(state.reason_code.as_deref(), Some("forward_head"));

        let received = server.await.unwrap();
        assert!(received.head.starts_with("post /analyze_posture "));
        let json = received.json();
        assert_eq!(json["landmarks"].as_array().unwrap().len(), 33);
        assert_eq!(json["landmarks"][0]["idx"], 0);
        assert!((json["landmarks"][0]["y"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn http_error_status_is_transport_failure() {
        let (base, server) = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;
        let request = AnalyzeRequest::from_frame(&pose_frame(0.3));
        let err = http_service(&base).analyze(&request).await.unwrap_err();
        assert!(matches!(err, CoachError::Transport(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_error_body_with_ok_status_is_malformed() {
        let (base, server) =
            serve_once("200 OK", r#"{"error":"insufficient landmarks visibility"}"#).await;
        let request = AnalyzeRequest::from_frame(&pose_frame(0.3));
        let err = http_service(&base).analyze(&request).await.unwrap_err();
        assert!(matches!(err, CoachError::MalformedResponse(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_calibrate_posts_angle() {
        let (base, server) = serve_once("200 OK", r#"{"status":"calibrated"}"#).await;
        http_service(&base).calibrate(18.5).await.unwrap();

        let received = server.await.unwrap();
        assert!(received.head.starts_with("post /calibrate "));
        assert_eq!(received.json()["angle_deg"], 18.5);
    }

    #[tokio::test]
    async fn http_calibrate_rejection_is_transport_failure() {
        let (base, server) = serve_once("422 Unprocessable Entity", "{}").await;
        let err = http_service(&base).calibrate(18.5).await.unwrap_err();
        assert!(matches!(err, CoachError::Transport(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn successful_response_replaces_state() {
        let service = Arc::new(FakePostureService::new());
        service.push_ok(sample_state());
        let (mut pipeline, _live) = pipeline(Arc::clone(&service));
        let mut rx = pipeline.subscribe();

        let outcome = pipeline.classify(&pose_frame(0.5)).await;
        assert_eq!(outcome, ClassifyOutcome::Updated);
        assert_eq!(pipeline.state(), Some(&sample_state()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().clone(), Some(sample_state()));
    }

    #[tokio::test]
    async fn transport_failure_retains_previous_state() {
        let service = Arc::new(FakePostureService::new());
        service.push_ok(sample_state());
        service.push_err(CoachError::Transport("connection refused".into()));
        let (mut pipeline, _live) = pipeline(Arc::clone(&service));

        pipeline.classify(&pose_frame(0.5)).await;
        let before = pipeline.state().cloned();
        let outcome = pipeline.classify(&pose_frame(0.5)).await;

        assert_eq!(outcome, ClassifyOutcome::Retained);
        assert_eq!(pipeline.state().cloned(), before);
    }

    #[tokio::test]
    async fn late_response_after_stop_is_dropped() {
        let service = Arc::new(FakePostureService::new());
        service.push_ok(sample_state());
        let (mut pipeline, live) = pipeline(Arc::clone(&service));

        live.store(false, Ordering::Release);
        let outcome = pipeline.classify(&pose_frame(0.5)).await;

        assert_eq!(outcome, ClassifyOutcome::Discarded);
        assert!(pipeline.state().is_none());
    }

    #[tokio::test]
    async fn clear_publishes_none() {
        let service = Arc::new(FakePostureService::new());
        service.push_ok(sample_state());
        let (mut pipeline, _live) = pipeline(Arc::clone(&service));
        let rx = pipeline.subscribe();

        pipeline.classify(&pose_frame(0.5)).await;
        pipeline.clear();
        assert!(pipeline.state().is_none());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn calibrate_without_state_is_noop() {
        let service = Arc::new(FakePostureService::new());
        let (pipeline, _live) = pipeline(Arc::clone(&service));

        assert!(pipeline.calibrator().calibrate().is_none());
        assert!(service.calibrations().is_empty());
    }

    #[tokio::test]
    async fn calibrate_without_raw_angle_is_noop() {
        let service = Arc::new(FakePostureService::new());
        let mut state = sample_state();
        state.raw_angle_deg = None;
        service.push_ok(state);
        let (mut pipeline, _live) = pipeline(Arc::clone(&service));

        pipeline.classify(&pose_frame(0.5)).await;
        assert!(pipeline.calibrator().calibrate().is_none());
        assert!(service.calibrations().is_empty());
    }

    #[tokio::test]
    async fn calibrate_sends_raw_angle() {
        let service = Arc::new(FakePostureService::new());
        service.push_ok(sample_state());
        let (mut pipeline, _live) = pipeline(Arc::clone(&service));

        pipeline.classify(&pose_frame(0.5)).await;
        let handle = pipeline.calibrator().calibrate().expect("request issued");
        handle.await.unwrap();

        assert_eq!(service.calibrations(), vec![18.0]);
    }
}
