//! Landmarks pushed over UDP by an external detector process

use super::detector::{DetectorOptions, LandmarkSource, RunningMode};
use crate::error::CoachError;
use crate::types::{now_ms, LandmarkFrame, VideoFrame};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Datagrams older than this are treated as "no body in view"
const MAX_AGE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Deserialize)]
struct JsonLandmark {
    x: f32,
    y: f32,
    #[serde(default)]
    z: f32,
    #[serde(default)]
    visibility: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonLandmarkMsg {
    landmarks: Vec<JsonLandmark>,
    /// Sender's wall clock in epoch milliseconds
    #[serde(default)]
    ts: Option<f64>,
}

/// One decoded datagram
#[derive(Debug, Clone)]
pub struct LandmarkMessage {
    pub frame: LandmarkFrame,
    pub sent_at_ms: Option<u64>,
}

/// Parse `{"landmarks":[{"x":..,"y":..,"z":..,"visibility":..}, ...], "ts": ms}`
pub fn parse_landmark_message(msg: &str) -> Option<LandmarkMessage> {
    let msg = msg.trim();
    if msg.is_empty() {
        return None;
    }
    let parsed: JsonLandmarkMsg = serde_json::from_str(msg).ok()?;
    if parsed.landmarks.is_empty() {
        return None;
    }
    let points: Vec<_> = parsed
        .landmarks
        .iter()
        .map(|l| (l.x, l.y, l.z, l.visibility.unwrap_or(1.0).clamp(0.0, 1.0)))
        .collect();
    Some(LandmarkMessage {
        frame: LandmarkFrame::from_points(&points),
        sent_at_ms: parsed
            .ts
            .filter(|ts| ts.is_finite() && *ts >= 0.0)
            .map(|ts| ts as u64),
    })
}

#[derive(Debug)]
struct Received {
    at: Instant,
    sent_at_ms: Option<u64>,
    frame: LandmarkFrame,
}

type Latest = Arc<Mutex<Option<Received>>>;

/// Keep `msg` unless it was already stale when sent or is older than the stored one
fn store(slot: &mut Option<Received>, msg: LandmarkMessage, at: Instant, wall_ms: u64) -> bool {
    if let Some(sent) = msg.sent_at_ms {
        if wall_ms.saturating_sub(sent) > MAX_AGE.as_millis() as u64 {
            return false;
        }
        let previous = slot.as_ref().and_then(|r| r.sent_at_ms);
        if previous.is_some_and(|prev| sent < prev) {
            return false;
        }
    }
    *slot = Some(Received {
        at,
        sent_at_ms: msg.sent_at_ms,
        frame: msg.frame,
    });
    true
}

/// A [`LandmarkSource`] fed by the most recent datagram on a UDP socket
pub struct UdpLandmarkSource {
    options: DetectorOptions,
    local_addr: SocketAddr,
    latest: Latest,
    listener: JoinHandle<()>,
}

impl UdpLandmarkSource {
    pub async fn bind(addr: SocketAddr, options: DetectorOptions) -> Result<Self, CoachError> {
        let sock = UdpSocket::bind(addr)
            .await
            .map_err(|e| CoachError::Configuration(format!("cannot bind {addr}: {e}")))?;
        let local_addr = sock
            .local_addr()
            .map_err(|e| CoachError::Configuration(format!("cannot bind {addr}: {e}")))?;
        log::info!("UDP landmark listener bound on {local_addr}");

        let latest: Latest = Arc::new(Mutex::new(None));
        let storage = Arc::clone(&latest);
        let listener = tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let (len, _src) = match sock.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("UDP landmark recv error: {e}");
                        continue;
                    }
                };
                let Some(msg) = std::str::from_utf8(&buf[..len])
                    .ok()
                    .and_then(parse_landmark_message)
                else {
                    continue;
                };
                if let Ok(mut slot) = storage.lock() {
                    if !store(&mut slot, msg, Instant::now(), now_ms()) {
                        log::trace!("Dropped late landmark datagram");
                    }
                }
            }
        });

        Ok(Self {
            options,
            local_addr,
            latest,
            listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn fresh(&self) -> Option<LandmarkFrame> {
        let slot = self.latest.lock().ok()?;
        let received = slot.as_ref()?;
        (received.at.elapsed() <= MAX_AGE).then(|| received.frame.clone())
    }
}

impl Drop for UdpLandmarkSource {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl LandmarkSource for UdpLandmarkSource {
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
        _timestamp_ms: f64,
    ) -> Result<Vec<LandmarkFrame>, CoachError> {
        Ok(self.fresh().into_iter().take(self.options.max_results).collect())
    }
}
