use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Fetch failed with HTTP status {0}")]
    FetchStatus(u16),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("Fetch transport error: {0}")]
    FetchTransport(String),

    #[error("Raster decode error: {0}")]
    Decode(String),

    #[error("Cancelled before completion")]
    Cancelled,

    #[error("Worker pool closed before the task was handed off")]
    PoolClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Unsupported input document: {0}")]
    UnsupportedInput(String),

    #[error("Invalid worker count: {0} (must be positive)")]
    InvalidWorkerCount(usize),

    #[error("Invalid tile size: {0} (must be between 1 and 4096)")]
    InvalidTileSize(u32),

    #[error("Invalid color tolerance: {0} (must be finite and non-negative)")]
    InvalidTolerance(f64),

    #[error("Invalid marker color: {0} (expected #RRGGBB)")]
    InvalidMarkerColor(String),

    #[error("Invalid rate limit: burst={0}, interval={1:?}")]
    InvalidRateLimit(u32, Duration),
}

impl ScanError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ScanError::FetchTimeout(_) | ScanError::FetchTransport(_) => true,
            ScanError::FetchStatus(status) => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(ScanError::FetchStatus(503).is_transient());
        assert!(ScanError::FetchStatus(429).is_transient());
        assert!(!ScanError::FetchStatus(404).is_transient());
        assert!(ScanError::FetchTimeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_per_feature_errors_not_transient() {
        assert!(!ScanError::Geometry("2 vertices".into()).is_transient());
        assert!(!ScanError::Decode("bad png".into()).is_transient());
        assert!(!ScanError::Cancelled.is_transient());
    }

    #[test]
    fn test_pool_closed_is_not_a_fetch_error() {
        let err = ScanError::PoolClosed;
        assert!(!err.is_transient());
        assert!(!err.to_string().contains("Fetch"));
    }
}
