//! Feedback Generator - rate-limited coaching text from posture updates

use crate::error::CoachError;
use crate::llm::TextCompletion;
use crate::types::{now_ms, CoachEvent, Feedback, PostureLabel, PostureState, Severity};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Minimum time between two generation attempts, measured from attempt start
pub const COOLDOWN: Duration = Duration::from_millis(5000);

const TONES: [&str; 5] = [
    "friendly coach",
    "physio with concise guidance",
    "motivational fitness trainer",
    "ergonomics expert with short tips",
    "calm yoga instructor",
];

const FORMATS: [&str; 3] = [
    "Keep the total response under 50 words.",
    "Write the instruction as a single imperative sentence.",
    "Name the exact body part to move in the instruction.",
];

const TIP_COUNTS: [&str; 3] = [
    "Give exactly 4 concise suggestions.",
    "Return exactly 3 short bullet points.",
    "Provide 5 ultra-brief, practical tips.",
];

const DEFAULT_ASSESSMENT: &str = "Analyzing your posture...";
const DEFAULT_INSTRUCTION: &str = "Maintain your current position.";
const FALLBACK_ASSESSMENT: &str = "Unable to analyze posture at the moment.";
const FALLBACK_INSTRUCTION: &str = "Keep your head aligned with your shoulders.";

const MAX_JSON_TIPS: usize = 8;
const MAX_LINE_TIPS: usize = 6;

fn or_unknown<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

pub fn build_prompt(state: &PostureState, threshold_deg: f32, tone: &str, format: &str) -> String {
    format!(
        "You are a {tone}. Analyze this posture data and give specific, actionable feedback.\n\
         \n\
         Posture analysis data:\n\
         - Forward head angle: {angle}° (threshold: {threshold_deg}°)\n\
         - Raw angle: {raw}°\n\
         - Current state: {label}\n\
         - Issue reason: {reason}\n\
         - Shoulder level difference: {shoulder}\n\
         \n\
         Provide a brief assessment (1-2 sentences) and ONE specific instruction to improve posture.\n\
         {format}\n\
         Format your response as: \"Assessment | Instruction\"",
        angle = state.angle_deg,
        raw = or_unknown(state.raw_angle_deg),
        label = state.label.as_str(),
        reason = or_unknown(state.reason_code.as_deref()),
        shoulder = or_unknown(state.shoulder_level_diff),
    )
}

/// Split `assessment | instruction` on the first `|`, falling back per part
pub fn parse_feedback(text: &str) -> (String, String) {
    let mut parts = text.splitn(2, '|').map(str::trim);
    let assessment = parts.next().filter(|s| !s.is_empty());
    let instruction = parts.next().filter(|s| !s.is_empty());
    match (assessment, instruction) {
        (Some(a), Some(i)) => (a.to_string(), i.to_string()),
        (Some(a), None) if text.contains('|') => (a.to_string(), DEFAULT_INSTRUCTION.to_string()),
        (None, Some(i)) => (DEFAULT_ASSESSMENT.to_string(), i.to_string()),
        _ => (DEFAULT_ASSESSMENT.to_string(), DEFAULT_INSTRUCTION.to_string()),
    }
}

fn severity_for(label: PostureLabel) -> Severity {
    match label {
        PostureLabel::Bad => Severity::Warning,
        PostureLabel::Good | PostureLabel::Unknown => Severity::Good,
    }
}

/// Turns posture updates into coaching text, at most once per [`COOLDOWN`]
pub struct FeedbackGenerator {
    completion: Arc<dyn TextCompletion>,
    threshold_deg: f32,
    rng: fastrand::Rng,
    visible: bool,
    last_attempt: Option<Instant>,
    current: Option<Feedback>,
}

impl FeedbackGenerator {
    pub fn new(completion: Arc<dyn TextCompletion>, threshold_deg: f32) -> Self {
        Self::with_rng(completion, threshold_deg, fastrand::Rng::new())
    }

    pub fn with_rng(completion: Arc<dyn TextCompletion>, threshold_deg: f32, rng: fastrand::Rng) -> Self {
        Self {
            completion,
            threshold_deg,
            rng,
            visible: false,
            last_attempt: None,
            current: None,
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn current(&self) -> Option<&Feedback> {
        self.current.as_ref()
    }

    fn gate_open(&self, now: Instant) -> bool {
        self.visible
            && self
                .last_attempt
                .map_or(true, |last| now.saturating_duration_since(last) >= COOLDOWN)
    }

    /// Generate feedback for `state` unless hidden or inside the cooldown window.
    ///
    /// Returns the new feedback, or `None` if the update was dropped.
    pub async fn on_posture(&mut self, state: &PostureState, now: Instant) -> Option<Feedback> {
        if !self.gate_open(now) {
            return None;
        }
        self.last_attempt = Some(now);

        let tone = TONES[self.rng.usize(..TONES.len())];
        let format = FORMATS[self.rng.usize(..FORMATS.len())];
        let prompt = build_prompt(state, self.threshold_deg, tone, format);

        let feedback = match self.completion.generate(&prompt).await {
            Ok(text) => {
                let (assessment, instruction) = parse_feedback(&text);
                Feedback {
                    assessment,
                    instruction,
                    severity: severity_for(state.label),
                    generated_at_ms: now_ms(),
                }
            }
            Err(e) => {
                log::warn!("Feedback generation failed: {e}");
                Feedback {
                    assessment: FALLBACK_ASSESSMENT.to_string(),
                    instruction: FALLBACK_INSTRUCTION.to_string(),
                    severity: Severity::Neutral,
                    generated_at_ms: now_ms(),
                }
            }
        };

        log::debug!("Feedback: {} | {}", feedback.assessment, feedback.instruction);
        self.current = Some(feedback.clone());
        Some(feedback)
    }

    /// Feed posture updates into the generator until the channel closes
    pub fn spawn(
        mut self,
        mut posture: watch::Receiver<Option<PostureState>>,
        events: mpsc::UnboundedSender<CoachEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while posture.changed().await.is_ok() {
                let snapshot = posture.borrow_and_update().clone();
                let Some(state) = snapshot else {
                    self.set_visible(false);
                    continue;
                };
                self.set_visible(true);
                let now = tokio::time::Instant::now().into_std();
                if let Some(feedback) = self.on_posture(&state, now).await {
                    if posture.borrow().is_none() {
                        log::debug!("Capture stopped during generation, dropping feedback");
                        self.current = None;
                        continue;
                    }
                    if events.send(CoachEvent::Feedback(feedback)).is_err() {
                        break;
                    }
                }
            }
            log::debug!("Feedback generator stopped");
        })
    }
}

pub fn build_tips_prompt(tone: &str, count: &str, hint: Option<&str>) -> String {
    let hint = hint
        .filter(|h| !h.trim().is_empty())
        .map(|h| format!("Backend hint: {h}\n"))
        .unwrap_or_default();
    format!(
        "Act as a {tone}.\n\
         Context: User shows signs of forward-head or rounded-shoulder posture from webcam landmarks.\n\
         {hint}\n\
         {count}\n\
         Make each tip < 90 characters, actionable, safe for general audiences.\n\
         Avoid medical claims or diagnosis.\n\
         Respond ONLY as JSON: {{\"suggestions\": [\"tip1\",\"tip2\", ...]}}. No prose."
    )
}

#[derive(Debug, Deserialize)]
struct SuggestionList {
    suggestions: Vec<String>,
}

/// JSON `{"suggestions": [...]}` first, then one tip per non-empty line
pub fn parse_tips(text: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<SuggestionList>(text.trim()) {
        if !list.suggestions.is_empty() {
            return list.suggestions.into_iter().take(MAX_JSON_TIPS).collect();
        }
    }
    text.lines()
        .map(|line| {
            line.trim_start_matches(|c: char| {
                c.is_whitespace() || c.is_ascii_digit() || matches!(c, '*' | '-' | '.' | ')')
            })
            .trim()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_LINE_TIPS)
        .map(str::to_string)
        .collect()
}

/// On-demand tip lists, not subject to the feedback cooldown
pub struct TipGenerator {
    completion: Arc<dyn TextCompletion>,
    rng: fastrand::Rng,
}

impl TipGenerator {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self::with_rng(completion, fastrand::Rng::new())
    }

    pub fn with_rng(completion: Arc<dyn TextCompletion>, rng: fastrand::Rng) -> Self {
        Self { completion, rng }
    }

    pub async fn request_tips(&mut self, hint: Option<&str>) -> Result<Vec<String>, CoachError> {
        let tone = TONES[self.rng.usize(..TONES.len())];
        let count = TIP_COUNTS[self.rng.usize(..TIP_COUNTS.len())];
        let text = self
            .completion
            .generate(&build_tips_prompt(tone, count, hint))
            .await?;
        let tips = parse_tips(&text);
        if tips.is_empty() {
            return Err(CoachError::MalformedResponse("empty suggestions from model".to_string()));
        }
        Ok(tips)
    }
}
