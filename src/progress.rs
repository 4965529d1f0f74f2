use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Completion counters for one batch.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, success: bool) -> ProgressSnapshot {
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.snapshot()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl ProgressSnapshot {
    /// Completed features per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time remaining, once the rate is known.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.total.saturating_sub(self.completed);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let rate = self.rate();
        if rate > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%), {} failed, {:.2}/s, ETA {}",
            self.completed,
            self.total,
            self.percent(),
            self.failed,
            self.rate(),
            self.eta()
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let progress = Progress::new(3);
        progress.record(true);
        let snap = progress.record(false);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.total, 3);
    }

    #[test]
    fn test_rate_and_eta() {
        let snap = ProgressSnapshot {
            total: 100,
            completed: 25,
            failed: 0,
            elapsed: Duration::from_secs(10),
        };
        assert!((snap.rate() - 2.5).abs() < 1e-9);
        assert_eq!(snap.eta(), Some(Duration::from_secs(30)));
        assert!((snap.percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_unknown_before_first_completion() {
        let snap = ProgressSnapshot {
            total: 10,
            completed: 0,
            failed: 0,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(snap.eta(), None);
        assert!(snap.to_string().contains("ETA unknown"));
    }

    #[test]
    fn test_display() {
        let snap = ProgressSnapshot {
            total: 1000,
            completed: 120,
            failed: 3,
            elapsed: Duration::from_secs(60),
        };
        assert_eq!(snap.to_string(), "120/1000 (12.0%), 3 failed, 2.00/s, ETA 7m 20s");
    }
}
