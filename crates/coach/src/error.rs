//! Error taxonomy shared by the coaching components

/// Errors crossing component boundaries.
///
/// Only `Permission` and `Configuration` ever reach the user. `Transport` and
/// `MalformedResponse` are recovered locally by the component that hit them.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("camera access denied: {0}")]
    Permission(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for CoachError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CoachError::MalformedResponse(e.to_string())
        } else {
            CoachError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoachError {
    fn from(e: serde_json::Error) -> Self {
        CoachError::MalformedResponse(e.to_string())
    }
}
