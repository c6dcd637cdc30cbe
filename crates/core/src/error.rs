use thiserror::Error;

pub type TrackingResult<T> = Result<T, TrackingError>;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Visitor not found: {0}")]
    VisitorNotFound(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Persistence conflict for visitor {visitor_id} after {attempts} attempts")]
    PersistenceConflict { visitor_id: String, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TrackingError {
    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            TrackingError::VisitorNotFound(_) => "visitor_not_found",
            TrackingError::InvalidEvent(_) => "invalid_event",
            TrackingError::PersistenceConflict { .. } => "persistence_conflict",
            TrackingError::Storage(_) => "storage_error",
            TrackingError::Serialization(_) => "serialization_error",
            TrackingError::Internal(_) => "internal_error",
        }
    }
}
