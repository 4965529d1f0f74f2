use crate::classify::{self, Classification, MarkerSpec};
use crate::error::{Result, ScanError};
use crate::feature::BuildingFeature;
use crate::geometry::BoundingBox;
use crate::io::{read_feature_document, write_feature_document};
use crate::pool::{CancellationToken, TaskProcessor, WorkerPool};
use crate::progress::Progress;
use crate::rate_limit::RateLimiter;
use crate::wms::{validate_tile_size, TileSource, DEFAULT_TILE_SIZE};
use log::{debug, info, warn};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub tile_size: u32,
    pub marker: MarkerSpec,
    pub workers: usize,
    /// Minimum spacing between requests to the imagery service.
    pub dispatch_interval: Duration,
    pub burst: u32,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Log progress every N completed features.
    pub progress_every: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            marker: MarkerSpec::default(),
            workers: num_cpus::get(),
            dispatch_interval: Duration::from_millis(50),
            burst: 1,
            max_retries: 2,
            retry_backoff: Duration::from_secs(5),
            progress_every: 100,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        validate_tile_size(self.tile_size)?;
        if self.workers == 0 {
            return Err(ScanError::InvalidWorkerCount(self.workers));
        }
        if self.burst == 0 {
            return Err(ScanError::InvalidRateLimit(self.burst, self.dispatch_interval));
        }
        MarkerSpec::new(self.marker.color, self.marker.tolerance)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub marked: usize,
    pub unmarked: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    fn from_features(features: &[BuildingFeature], elapsed: Duration) -> Self {
        let failed = features.iter().filter(|f| f.error().is_some()).count();
        let marked = features.iter().filter(|f| f.is_marked()).count();
        Self {
            total: features.len(),
            marked,
            unmarked: features.len() - marked - failed,
            failed,
            elapsed,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buildings in {:.1}s: {} marked, {} unmarked, {} failed",
            self.total,
            self.elapsed.as_secs_f64(),
            self.marked,
            self.unmarked,
            self.failed
        )
    }
}

/// Per-task work: frame the polygon, fetch imagery with retries, classify.
struct FeatureProcessor<'a, S> {
    source: &'a S,
    config: &'a ScanConfig,
    limiter: &'a RateLimiter,
    cancel: &'a CancellationToken,
}

impl<S: TileSource> FeatureProcessor<'_, S> {
    fn fetch_with_retries(&self, bbox: &BoundingBox, building: usize) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_tile(bbox, self.config.tile_size) {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let wait = self.config.retry_backoff * attempt;
                    warn!(
                        "Building {}: {} (retry {}/{} in {:?})",
                        building, err, attempt, self.config.max_retries, wait
                    );
                    std::thread::sleep(wait);
                    if self.cancel.is_cancelled() {
                        return Err(ScanError::Cancelled);
                    }
                    self.limiter.acquire();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: TileSource> TaskProcessor for FeatureProcessor<'_, S> {
    type Payload = (BoundingBox, Vec<u8>);

    fn prepare(&self, feature: &BuildingFeature) -> Result<()> {
        BoundingBox::around(&feature.polygon).map(|_| ())
    }

    fn fetch(&self, feature: &BuildingFeature) -> Result<Self::Payload> {
        let bbox = BoundingBox::around(&feature.polygon)?;
        let bytes = self.fetch_with_retries(&bbox, feature.index)?;
        Ok((bbox, bytes))
    }

    fn classify(
        &self,
        feature: &BuildingFeature,
        payload: Self::Payload,
    ) -> Result<Classification> {
        let (bbox, bytes) = payload;
        classify::classify(&bytes, &bbox, &feature.polygon, &self.config.marker)
    }
}

/// Runs a building collection through the worker pool.
pub struct BatchOrchestrator<S> {
    source: S,
    config: ScanConfig,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl<S: TileSource> BatchOrchestrator<S> {
    pub fn new(source: S, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.dispatch_interval, config.burst)?);
        Ok(Self {
            source,
            config,
            limiter,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops dispatch of further tasks when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Classify every feature. The output has one entry per input, in
    /// input order; failures carry an error instead of being dropped.
    pub fn run(
        &self,
        features: Vec<BuildingFeature>,
    ) -> Result<(Vec<BuildingFeature>, BatchSummary)> {
        let started = Instant::now();
        let total = features.len();
        info!(
            "Classifying {} buildings with {} workers (interval {:?}, burst {})",
            total, self.config.workers, self.config.dispatch_interval, self.config.burst
        );

        let pool = WorkerPool::new(self.config.workers, Arc::clone(&self.limiter))?
            .with_cancellation(self.cancel.clone());
        let processor = FeatureProcessor {
            source: &self.source,
            config: &self.config,
            limiter: &self.limiter,
            cancel: &self.cancel,
        };
        let progress = Progress::new(total);
        let every = self.config.progress_every.max(1);

        let results = pool.run(features, &processor, |result| {
            let snapshot = progress.record(result.success());
            if snapshot.completed % every == 0 || snapshot.completed == snapshot.total {
                info!("Progress: {}", snapshot);
            }
        });

        let annotated: Vec<BuildingFeature> = results.into_iter().map(|r| r.feature).collect();
        let summary = BatchSummary::from_features(&annotated, started.elapsed());
        info!("Done: {}", summary);
        debug!("Final progress: {}", progress.snapshot());
        Ok((annotated, summary))
    }

    /// Read a collection, classify it, and write the annotated copy.
    pub fn scan_file(&self, input: &Path, output: &Path) -> Result<BatchSummary> {
        let mut document = read_feature_document(input)?;
        let buildings = document.building_features();
        let (annotated, summary) = self.run(buildings)?;
        document.annotate(&annotated);
        write_feature_document(output, &document)?;
        Ok(summary)
    }
}
