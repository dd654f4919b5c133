use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Absorbs float rounding between the computed sleep and the measured elapsed time.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: u32,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    /// `None` also when the bucket is empty and never refills.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens added per second. Zero disables refill.
    pub rps: f64,
    /// Bucket capacity; the bucket starts full.
    pub burst: u32,
}

impl RateLimiterConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            rps: 10.0,
            burst: 10,
        }
    }

    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: (rps.ceil() as u32).max(1), // default burst: 1 second worth, at least 1
        })
    }

    /// Reject a refill rate that is negative, NaN or infinite.
    pub fn validate(&self) -> Result<()> {
        if !self.rps.is_finite() || self.rps < 0.0 {
            return Err(Error::configuration_with_context(
                "rps must be finite and >= 0",
                ErrorContext::new()
                    .with_field_path("rate_limit.rps")
                    .with_details(format!("value: {}", self.rps))
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }

    /// Set the maximum tokens (burst size)
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Token-bucket rate limiter.
///
/// Refill is computed lazily from the time elapsed since the previous refill,
/// so there is no background task to stop. Fractional tokens accumulate between
/// calls. Fairness between concurrent waiters is not guaranteed.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let tokens = cfg.burst as f64;
        Self {
            cfg,
            state: Mutex::new(State {
                tokens,
                last: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is two plain fields, always consistent between statements.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        if cfg.rps > 0.0 {
            let elapsed = now.duration_since(st.last).as_secs_f64();
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst as f64);
        }
        st.last = now;
    }

    fn take_locked(st: &mut State) -> bool {
        if st.tokens + TOKEN_EPSILON >= 1.0 {
            st.tokens = (st.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Take a token if one is available, otherwise report how long until the next one.
    fn try_take(&self) -> Result<Option<Duration>> {
        let cfg = &self.cfg;
        let mut st = self.lock();
        Self::refill_locked(cfg, &mut st);
        if Self::take_locked(&mut st) {
            return Ok(None);
        }
        if cfg.rps.is_nan() || cfg.rps <= 0.0 || cfg.burst == 0 {
            // Nothing will ever refill this bucket.
            return Err(Error::RateLimited);
        }
        let missing = 1.0 - st.tokens;
        // A rate so low the wait overflows `Duration` is treated as no refill.
        Duration::try_from_secs_f64(missing / cfg.rps)
            .map(Some)
            .map_err(|_| Error::RateLimited)
    }

    /// Return a token taken by a call whose work was then refused downstream.
    pub(crate) fn refund(&self) {
        let mut st = self.lock();
        Self::refill_locked(&self.cfg, &mut st);
        st.tokens = (st.tokens + 1.0).min(self.cfg.burst as f64);
    }

    /// Try to take a token without waiting; returns true on success.
    pub fn allow(&self) -> bool {
        let mut st = self.lock();
        Self::refill_locked(&self.cfg, &mut st);
        Self::take_locked(&mut st)
    }

    /// Acquire one token, sleeping as long as needed.
    ///
    /// Fails with [`Error::RateLimited`] when the bucket is empty and has no refill rate.
    /// Dropping the future never consumes a token.
    pub async fn acquire(&self) -> Result<()> {
        while let Some(wait) = self.try_take()? {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Acquire one token or fail with [`Error::Cancelled`] once `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        while let Some(wait) = self.try_take()? {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
        Ok(())
    }

    /// Acquire one token or fail with [`Error::DeadlineExceeded`] after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(res) => res,
            Err(_) => Err(Error::DeadlineExceeded(timeout)),
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.lock();
        Self::refill_locked(cfg, &mut st);

        let refills = !cfg.rps.is_nan() && cfg.rps > 0.0;
        let estimated_wait_ms = if st.tokens + TOKEN_EPSILON >= 1.0 || !refills {
            None
        } else {
            let missing = 1.0 - st.tokens;
            // Float-to-int `as` saturates, so a huge wait reads as u64::MAX.
            Some((missing / cfg.rps * 1000.0).ceil() as u64)
        };

        RateLimiterSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rate_limiter_config_from_rps() {
        let config = RateLimiterConfig::from_rps(10.0).unwrap();
        assert_eq!(config.rps, 10.0);
        assert_eq!(config.burst, 10);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_low() {
        let config = RateLimiterConfig::from_rps(0.5).unwrap();
        assert_eq!(config.rps, 0.5);
        // burst should be at least 1
        assert_eq!(config.burst, 1);
    }

    #[test]
    fn test_rate_limiter_config_from_rps_invalid() {
        assert!(RateLimiterConfig::from_rps(-1.0).is_none());
        assert!(RateLimiterConfig::from_rps(f64::NAN).is_none());
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).is_none());
    }

    #[test]
    fn test_rate_limiter_config_builder() {
        let config = RateLimiterConfig::new().with_burst(100).with_refill_rate(50.0);
        assert_eq!(config.burst, 100);
        assert_eq!(config.rps, 50.0);
    }

    #[test]
    fn test_burst_then_refill_one_per_second() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(5).with_refill_rate(1.0));

        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());

        thread::sleep(Duration::from_millis(1050));

        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_tokens_capped_at_burst() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(2).with_refill_rate(1000.0));
        thread::sleep(Duration::from_millis(20));

        let snapshot = limiter.snapshot();
        assert!(snapshot.tokens <= 2.0);

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_zero_rate_is_fixed_budget() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(2).with_refill_rate(0.0));
        assert!(limiter.allow());
        assert!(limiter.allow());
        thread::sleep(Duration::from_millis(20));
        assert!(!limiter.allow());
        assert!(limiter.snapshot().estimated_wait_ms.is_none());
    }

    #[test]
    fn test_zero_burst_never_allows() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(0).with_refill_rate(100.0));
        assert!(!limiter.allow());
        thread::sleep(Duration::from_millis(20));
        assert!(!limiter.allow());
    }

    #[test]
    fn test_concurrent_allow_grants_exactly_burst() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig::new().with_burst(50).with_refill_rate(0.0),
        ));
        let granted = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let granted = Arc::clone(&granted);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    if limiter.allow() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(1).with_refill_rate(50.0));
        limiter.acquire().await.unwrap();

        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_acquire_without_refill_fails_fast() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(1).with_refill_rate(0.0));
        assert!(limiter.acquire().await.is_ok());
        assert!(matches!(limiter.acquire().await, Err(Error::RateLimited)));
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig::new().with_burst(1).with_refill_rate(0.1),
        ));
        assert!(limiter.allow());

        let cancel = CancellationToken::new();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.wait(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(Error::Cancelled)));
        // The cancelled waiter must not have taken anything.
        assert!(limiter.snapshot().tokens < 1.0);
    }

    #[tokio::test]
    async fn test_wait_already_cancelled() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(3).with_refill_rate(1.0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(limiter.wait(&cancel).await, Err(Error::Cancelled)));
        assert!(limiter.snapshot().tokens > 2.0);
    }

    #[tokio::test]
    async fn test_wait_timeout_deadline() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(1).with_refill_rate(0.5));
        assert!(limiter.wait_timeout(Duration::from_millis(10)).await.is_ok());

        let res = limiter.wait_timeout(Duration::from_millis(30)).await;
        assert!(matches!(res, Err(Error::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_vanishing_rate_does_not_overflow_wait() {
        let cfg = RateLimiterConfig::new().with_burst(1).with_refill_rate(1e-20);
        assert!(cfg.validate().is_ok());
        let limiter = RateLimiter::new(cfg);
        assert!(limiter.allow());

        let cancel = CancellationToken::new();
        assert!(matches!(limiter.wait(&cancel).await, Err(Error::RateLimited)));
        assert!(matches!(limiter.acquire().await, Err(Error::RateLimited)));
        assert!(limiter.snapshot().estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn test_nan_rate_never_refills() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(1).with_refill_rate(f64::NAN));
        assert!(limiter.config().validate().is_err());
        let _ = limiter.allow();
        let cancel = CancellationToken::new();
        assert!(limiter.wait(&cancel).await.is_err());
        assert!(limiter.snapshot().estimated_wait_ms.is_none());
    }

    #[test]
    fn test_config_validate_field_path() {
        let err = RateLimiterConfig::new()
            .with_refill_rate(f64::INFINITY)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("rate_limit.rps")
        );
        assert!(RateLimiterConfig::new().with_refill_rate(-2.0).validate().is_err());
        assert!(RateLimiterConfig::new().with_refill_rate(0.0).validate().is_ok());
    }

    #[test]
    fn test_refund_is_capped_at_burst() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(2).with_refill_rate(0.0));
        assert!(limiter.allow());
        limiter.refund();
        limiter.refund();
        assert_eq!(limiter.snapshot().tokens, 2.0);
    }

    #[tokio::test]
    async fn test_snapshot_reports_wait() {
        let limiter = RateLimiter::new(RateLimiterConfig::new().with_burst(1).with_refill_rate(1.0));
        assert!(limiter.allow());

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.burst, 1);
        assert_eq!(snapshot.rps, 1.0);
        let wait = snapshot.estimated_wait_ms.unwrap();
        assert!(wait > 900 && wait <= 1000);
    }
}
