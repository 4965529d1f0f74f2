use crate::classify::Classification;
use crate::error::{Result, ScanError};
use crate::feature::BuildingFeature;
use crate::rate_limit::RateLimiter;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Lifecycle of one classification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Dispatched,
    Fetching,
    Classifying,
    Completed,
    Failed,
}

#[derive(Debug)]
pub struct WorkerTask {
    pub index: usize,
    pub feature: BuildingFeature,
}

#[derive(Debug)]
pub struct WorkerResult {
    pub index: usize,
    pub feature: BuildingFeature,
    pub state: TaskState,
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn success(&self) -> bool {
        self.state == TaskState::Completed
    }

    fn failed(index: usize, mut feature: BuildingFeature, err: &ScanError) -> Self {
        let message = err.to_string();
        feature.annotate(Classification::failed(message.clone()));
        Self {
            index,
            feature,
            state: TaskState::Failed,
            error: Some(message),
        }
    }
}

/// The stages a worker runs for every task.
///
/// `prepare` runs before a rate-limit token is taken, so a task rejected
/// there never counts against the imagery service. The pool checks for
/// cancellation before `fetch` and between `fetch` and `classify`.
pub trait TaskProcessor: Sync {
    type Payload: Send;

    fn prepare(&self, _feature: &BuildingFeature) -> Result<()> {
        Ok(())
    }

    fn fetch(&self, feature: &BuildingFeature) -> Result<Self::Payload>;

    fn classify(
        &self,
        feature: &BuildingFeature,
        payload: Self::Payload,
    ) -> Result<Classification>;
}

/// Cooperative cancellation flag shared between a batch and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed number of worker threads draining a FIFO task queue.
///
/// Workers take a token from the shared limiter immediately before each
/// fetch, so successive fetches are spaced by the limiter interval no matter
/// how long earlier tasks sat in the queue.
pub struct WorkerPool {
    workers: usize,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, limiter: Arc<RateLimiter>) -> Result<Self> {
        if workers == 0 {
            return Err(ScanError::InvalidWorkerCount(workers));
        }
        Ok(Self {
            workers,
            limiter,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run one task per feature and return the results in submission order.
    ///
    /// `on_result` is called on the calling thread, in completion order.
    pub fn run<P, F>(
        &self,
        features: Vec<BuildingFeature>,
        processor: &P,
        mut on_result: F,
    ) -> Vec<WorkerResult>
    where
        P: TaskProcessor,
        F: FnMut(&WorkerResult),
    {
        let total = features.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.workers.min(total);
        debug!("Starting {} workers for {} tasks", workers, total);

        let (task_tx, task_rx) = bounded::<WorkerTask>(workers);
        let (result_tx, result_rx) = unbounded::<WorkerResult>();
        let mut slots: Vec<Option<WorkerResult>> = (0..total).map(|_| None).collect();

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let cancel = &self.cancel;
                let limiter = self.limiter.as_ref();
                scope.spawn(move || {
                    for task in task_rx.iter() {
                        let result = execute(worker_id, task, processor, limiter, cancel);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                    trace!("Worker {} idle, queue closed", worker_id);
                });
            }
            drop(task_rx);

            let dispatch_results = result_tx.clone();
            scope.spawn(move || self.dispatch(features, task_tx, dispatch_results));
            drop(result_tx);

            // Ends once the dispatcher and every worker have dropped their senders
            for result in result_rx.iter() {
                on_result(&result);
                let index = result.index;
                slots[index] = Some(result);
            }
        });

        let results: Vec<WorkerResult> = slots.into_iter().flatten().collect();
        if results.len() != total {
            warn!("Expected {} results, collected {}", total, results.len());
        }
        results
    }

    fn dispatch(
        &self,
        features: Vec<BuildingFeature>,
        task_tx: Sender<WorkerTask>,
        result_tx: Sender<WorkerResult>,
    ) {
        for (index, feature) in features.into_iter().enumerate() {
            trace!("Task {} {:?}", index, TaskState::Queued);
            if self.cancel.is_cancelled() {
                let cancelled = WorkerResult::failed(index, feature, &ScanError::Cancelled);
                let _ = result_tx.send(cancelled);
                continue;
            }

            trace!("Task {} {:?}", index, TaskState::Dispatched);
            if let Err(err) = task_tx.send(WorkerTask { index, feature }) {
                let WorkerTask { index, feature } = err.into_inner();
                let closed = WorkerResult::failed(index, feature, &ScanError::PoolClosed);
                let _ = result_tx.send(closed);
            }
        }
    }
}

fn execute<P: TaskProcessor>(
    worker_id: usize,
    task: WorkerTask,
    processor: &P,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
) -> WorkerResult {
    let WorkerTask { index, mut feature } = task;

    let cancelled = || {
        if cancel.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    };

    let outcome = cancelled()
        .and_then(|()| processor.prepare(&feature))
        .and_then(|()| {
            limiter.acquire();
            cancelled()?;
            trace!("Task {} {:?} on worker {}", index, TaskState::Fetching, worker_id);
            processor.fetch(&feature)
        })
        .and_then(|payload| {
            cancelled()?;
            trace!("Task {} {:?} on worker {}", index, TaskState::Classifying, worker_id);
            processor.classify(&feature, payload)
        });

    match outcome {
        Ok(classification) => {
            trace!("Task {} {:?}", index, TaskState::Completed);
            feature.annotate(classification);
            WorkerResult {
                index,
                feature,
                state: TaskState::Completed,
                error: None,
            }
        }
        Err(err) => {
            debug!("Task {} (building {}) failed: {}", index, feature.index, err);
            WorkerResult::failed(index, feature, &err)
        }
    }
}
