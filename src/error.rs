use thiserror::Error;

use crate::events::SensorKind;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("invalid game state: {0}")]
    InvalidGameState(String),

    #[error("invalid goal event: {0}")]
    InvalidGoal(String),

    // Raised at the dispatcher boundary; `source` is the root cause.
    #[error("invalid {kind} sensor data: {source}")]
    InvalidSensorData {
        kind: SensorKind,
        #[source]
        source: Box<AnalyticsError>,
    },

    #[error("payload mismatch: expected {expected} data, got {found}")]
    PayloadMismatch {
        expected: SensorKind,
        found: &'static str,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("insufficient data: {available} historical games, need {required}")]
    InsufficientData { required: u64, available: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalyticsError {
    pub fn sensor(kind: SensorKind, cause: AnalyticsError) -> Self {
        AnalyticsError::InvalidSensorData {
            kind,
            source: Box::new(cause),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
