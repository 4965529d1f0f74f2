// Library exports for testing and reuse

pub mod balance;
pub mod batch;
pub mod classify;
pub mod cli;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod io;
pub mod pool;
pub mod progress;
pub mod rate_limit;
pub mod wms;

// Re-export commonly used types
pub use batch::{BatchOrchestrator, BatchSummary, ScanConfig};
pub use classify::{classify, Classification, MarkerSpec, RasterTile};
pub use error::{Result, ScanError};
pub use feature::BuildingFeature;
pub use geometry::{point_in_polygon, BoundingBox, LonLat, Polygon};
pub use pool::{CancellationToken, TaskProcessor, WorkerPool};
pub use wms::{TileSource, WmsClient, WmsConfig};
