//! Error taxonomy for the sync pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure or a non-success status other than 304/429.
    #[error("network failure: {0}")]
    Network(String),

    #[error("backend throttled; retry in {retry_in_ms}ms")]
    RateLimited { retry_in_ms: i64 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("cached entry is past its ttl")]
    StaleCache,

    #[error("not modified but no cached payload for {0}")]
    NotModifiedWithoutCache(String),

    #[error("bbox rejected: {0}")]
    BboxRejected(String),

    #[error("unknown centre: {0}")]
    UnknownCentre(String),

    #[error("pack version not found: {0}")]
    VersionNotFound(String),

    #[error("data missing: {0}")]
    MissingData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl SyncError {
    /// Short label used in error summaries recorded on the settings surface.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "network",
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::MalformedPayload(_) | SyncError::Json(_) => "malformed_payload",
            SyncError::StaleCache => "stale_cache",
            SyncError::NotModifiedWithoutCache(_) => "not_modified_without_cache",
            SyncError::BboxRejected(_) => "bbox_rejected",
            SyncError::UnknownCentre(_) => "unknown_centre",
            SyncError::VersionNotFound(_) => "version_not_found",
            SyncError::MissingData(_) => "missing_data",
            SyncError::Io(_) | SyncError::Csv(_) => "io",
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
