use thiserror::Error;

use crate::worker::WorkerState;

/// Failure to obtain a response from the network.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install aborted: failed to cache {url}: {reason}")]
    InstallAborted { url: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid push payload: {0}")]
    InvalidPushPayload(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid cache generation name '{0}'")]
    InvalidGeneration(String),

    #[error("Cache storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: WorkerState,
    },

    #[error("Worker has stopped")]
    Stopped,
}

/// Maximum length for payload excerpts in error messages
const MAX_PAYLOAD_EXCERPT_LENGTH: usize = 200;

impl WorkerError {
    /// Build an `InvalidPushPayload`, truncating the raw payload so a
    /// large message does not flood the log.
    pub fn invalid_payload(raw: &[u8], reason: &str) -> Self {
        let text = String::from_utf8_lossy(raw);
        let excerpt: String = text.chars().take(MAX_PAYLOAD_EXCERPT_LENGTH).collect();
        let suffix = if text.chars().count() > MAX_PAYLOAD_EXCERPT_LENGTH {
            "..."
        } else {
            ""
        };
        WorkerError::InvalidPushPayload(format!("{} ({}{})", reason, excerpt, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_truncates() {
        let raw = "x".repeat(500);
        let err = WorkerError::invalid_payload(raw.as_bytes(), "expected value");
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid push payload: expected value ("));
        assert!(msg.ends_with("...)"));
        assert!(msg.len() < 300);
    }

    #[test]
    fn test_fetch_error_wraps_transparently() {
        let err: WorkerError = FetchError::Unreachable("offline".to_string()).into();
        assert_eq!(err.to_string(), "Unreachable: offline");
    }
}
