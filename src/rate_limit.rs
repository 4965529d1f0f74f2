use crate::error::{Result, ScanError};
use log::trace;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Token bucket shared by every request to the imagery service.
///
/// One token is refilled every `interval`, up to `burst` tokens. Each
/// request consumes one token, blocking until one is available.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    burst: u32,
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Result<Self> {
        if burst == 0 {
            return Err(ScanError::InvalidRateLimit(burst, interval));
        }
        Ok(Self {
            interval,
            burst,
            state: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// A limiter that never blocks.
    pub fn unlimited() -> Self {
        Self {
            interval: Duration::ZERO,
            burst: 1,
            state: Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take a token without blocking. Returns the wait needed otherwise.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let mut bucket = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(self.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(self.interval.mul_f64(missing))
        }
    }

    /// Block until a token is available.
    pub fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            trace!("Rate limit: waiting {:?}", wait);
            std::thread::sleep(wait);
        }
    }
}
