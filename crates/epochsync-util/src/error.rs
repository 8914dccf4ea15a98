//! Error types for epochsync

use thiserror::Error;

use crate::EpochId;

/// Core error type for epochsync operations
#[derive(Debug, Error)]
pub enum EpochSyncError {
    #[error("Invalid epoch boundary: {0}")]
    InvalidBoundary(String),

    #[error("No epoch loaded")]
    NoEpochLoaded,

    #[error("Final ranking already set for epoch {0}")]
    FinalRankingAlreadySet(EpochId),

    #[error("Epoch {epoch_id} is in phase {phase}, final ranking requires SETTLING")]
    NotSettling { epoch_id: EpochId, phase: String },

    #[error("Loop already running: {0}")]
    AlreadyRunning(&'static str),

    #[error("No async runtime available to spawn {0}")]
    NoRuntime(&'static str),

}

impl EpochSyncError {
    pub fn invalid_boundary(msg: impl Into<String>) -> Self {
        Self::InvalidBoundary(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EpochSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_epoch() {
        let err = EpochSyncError::FinalRankingAlreadySet(EpochId::new("round-7"));
        assert_eq!(err.to_string(), "Final ranking already set for epoch round-7");

        let err = EpochSyncError::NotSettling {
            epoch_id: EpochId::new("round-7"),
            phase: "ACTIVE".into(),
        };
        assert!(err.to_string().contains("ACTIVE"));
    }

    #[test]
    fn constructor_helpers() {
        assert!(matches!(
            EpochSyncError::invalid_boundary("end before start"),
            EpochSyncError::InvalidBoundary(msg) if msg == "end before start"
        ));
        assert_eq!(
            EpochSyncError::NoRuntime("epoch-tick").to_string(),
            "No async runtime available to spawn epoch-tick"
        );
    }
}
