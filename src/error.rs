use crate::data::TrackId;
use thiserror::Error;

/// Track recorder error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("A track is already being recorded")]
    AlreadyRecording,

    #[error("No track is being recorded")]
    NotRecording,

    #[error("Current track is already paused")]
    AlreadyPaused,

    #[error("Current track is not paused")]
    NotPaused,

    #[error("Track {0} not found")]
    TrackNotFound(TrackId),

    #[error("No location available")]
    NoLocation,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecorderError {
    /// Poisoned-lock errors all look the same apart from what was being locked.
    pub(crate) fn lock(what: &str) -> Self {
        RecorderError::Internal(format!("Failed to acquire {} lock", what))
    }

    /// Errors caused by calling an operation in the wrong recording state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            RecorderError::AlreadyRecording
                | RecorderError::NotRecording
                | RecorderError::AlreadyPaused
                | RecorderError::NotPaused
        )
    }
}

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors() {
        assert!(RecorderError::AlreadyRecording.is_state_error());
        assert!(RecorderError::NotPaused.is_state_error());
        assert!(!RecorderError::NoLocation.is_state_error());
        assert!(!RecorderError::TrackNotFound(TrackId::new(3)).is_state_error());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RecorderError::TrackNotFound(TrackId::new(7)).to_string(),
            "Track 7 not found"
        );
        assert_eq!(
            RecorderError::lock("state").to_string(),
            "Internal error: Failed to acquire state lock"
        );
    }
}
