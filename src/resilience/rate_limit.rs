//! Per-domain token bucket rate limiting with priority queueing.
//!
//! A request that finds a token runs immediately. Otherwise it waits in the
//! domain's priority queue, which a single drain task per domain empties as
//! tokens refill (polling every `1 / refill_per_second` seconds). CRITICAL
//! requests pay a token like everyone else; priority only decides who is
//! dispatched first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::resilience::retries::Priority;

/// Slowest accepted refill rate; lower (or non-finite) rates are raised to it.
const MIN_REFILL_PER_SECOND: f64 = 0.01;

/// Errors raised by the limiter itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// Backpressure: the domain's queue is at its limit.
    #[error("request queue for {domain} is full ({limit} pending)")]
    QueueFull { domain: String, limit: usize },

    /// The drain task went away before dispatching the request.
    #[error("rate limiter for {domain} stopped before dispatch")]
    Closed { domain: String },
}

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).clamp(0.0, capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct QueuedRequest {
    priority: Priority,
    seq: u64,
    enqueued_at: Instant,
    permit: oneshot::Sender<()>,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher priority first, then lower sequence (FIFO).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DomainLimiter {
    bucket: TokenBucket,
    queue: BinaryHeap<QueuedRequest>,
    draining: bool,
    next_seq: u64,
}

type Slot = Arc<Mutex<DomainLimiter>>;

fn lock(slot: &Slot) -> MutexGuard<'_, DomainLimiter> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Token buckets keyed by domain.
pub struct RateLimiterRegistry {
    slots: DashMap<String, Slot>,
    capacity: f64,
    refill_per_second: f64,
    queue_limit: usize,
}

impl RateLimiterRegistry {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: f64::from(config.capacity.max(1)),
            refill_per_second: clamp_refill(config.refill_per_second),
            queue_limit: config.queue_limit,
        }
    }

    fn slot(&self, domain: &str) -> Slot {
        self.slots
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DomainLimiter {
                    bucket: TokenBucket::new(self.capacity, Instant::now()),
                    queue: BinaryHeap::new(),
                    draining: false,
                    next_seq: 0,
                }))
            })
            .clone()
    }

    /// Run `f` once a token for `domain` is available.
    pub async fn execute<F, Fut, T>(
        &self,
        domain: &str,
        priority: Priority,
        f: F,
    ) -> Result<T, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(permit) = self.admit(domain, priority)? {
            permit.await.map_err(|_| LimiterError::Closed {
                domain: domain.to_string(),
            })?;
        }
        Ok(f().await)
    }

    /// Take a token now (returns `None`) or enqueue and return the permit
    /// receiver to wait on.
    fn admit(
        &self,
        domain: &str,
        priority: Priority,
    ) -> Result<Option<oneshot::Receiver<()>>, LimiterError> {
        let slot = self.slot(domain);
        let mut state = lock(&slot);
        let now = Instant::now();
        state.bucket.refill(now, self.capacity, self.refill_per_second);

        if state.queue.is_empty() && state.bucket.try_take() {
            return Ok(None);
        }

        if state.queue.len() >= self.queue_limit {
            tracing::warn!(
                domain = %domain,
                priority = %priority,
                limit = self.queue_limit,
                "Rate limiter queue full"
            );
            metrics::record_queue_rejection(domain);
            return Err(LimiterError::QueueFull {
                domain: domain.to_string(),
                limit: self.queue_limit,
            });
        }

        let (tx, rx) = oneshot::channel();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedRequest {
            priority,
            seq,
            enqueued_at: now,
            permit: tx,
        });
        metrics::record_queue_depth(domain, state.queue.len());
        tracing::debug!(
            domain = %domain,
            priority = %priority,
            depth = state.queue.len(),
            "Request queued for rate limit token"
        );

        if !state.draining {
            state.draining = true;
            tokio::spawn(drain(
                domain.to_string(),
                slot.clone(),
                self.capacity,
                self.refill_per_second,
            ));
        }

        Ok(Some(rx))
    }

    /// Tokens currently available for `domain` (after refill).
    pub fn available_tokens(&self, domain: &str) -> Option<f64> {
        let slot = self.slots.get(domain)?.clone();
        let mut state = lock(&slot);
        state
            .bucket
            .refill(Instant::now(), self.capacity, self.refill_per_second);
        Some(state.bucket.tokens)
    }

    /// Number of requests waiting for a token.
    pub fn queue_depth(&self, domain: &str) -> usize {
        self.slots
            .get(domain)
            .map(|slot| lock(&slot).queue.len())
            .unwrap_or(0)
    }
}

fn clamp_refill(rate: f64) -> f64 {
    if rate.is_finite() && rate >= MIN_REFILL_PER_SECOND {
        rate
    } else {
        tracing::warn!(
            configured = rate,
            using = MIN_REFILL_PER_SECOND,
            "Rate limit refill too low, clamping"
        );
        MIN_REFILL_PER_SECOND
    }
}

async fn drain(domain: String, slot: Slot, capacity: f64, refill_per_second: f64) {
    let interval = Duration::from_secs_f64(1.0 / refill_per_second);

    loop {
        tokio::time::sleep(interval).await;

        let mut state = lock(&slot);
        let now = Instant::now();
        state.bucket.refill(now, capacity, refill_per_second);

        while state.bucket.tokens >= 1.0 {
            let Some(entry) = state.queue.pop() else {
                break;
            };
            let waited = now.saturating_duration_since(entry.enqueued_at);
            // A dropped receiver means the caller gave up; keep the token.
            if entry.permit.send(()).is_ok() {
                state.bucket.tokens -= 1.0;
                tracing::trace!(
                    domain = %domain,
                    priority = %entry.priority,
                    waited_ms = waited.as_millis() as u64,
                    "Dispatched queued request"
                );
            }
        }

        metrics::record_queue_depth(&domain, state.queue.len());
        if state.queue.is_empty() {
            state.draining = false;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill: f64, queue_limit: usize) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_per_second: refill,
            queue_limit,
        }
    }

    #[test]
    fn test_bucket_stays_within_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3.0, start);
        for step in 0..50u64 {
            let now = start + Duration::from_millis(step * 370);
            bucket.refill(now, 3.0, 2.5);
            if step % 3 != 0 {
                bucket.try_take();
            }
            assert!(bucket.tokens >= 0.0 && bucket.tokens <= 3.0);
        }
        bucket.refill(start + Duration::from_secs(3600), 3.0, 2.5);
        assert_eq!(bucket.tokens, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_when_tokens_available() {
        let limiter = RateLimiterRegistry::new(&config(2, 1.0, 10));
        let start = Instant::now();
        assert_eq!(limiter.execute("a", Priority::Normal, || async { 1 }).await, Ok(1));
        assert_eq!(limiter.execute("a", Priority::Normal, || async { 2 }).await, Ok(2));
        assert_eq!(Instant::now(), start, "no queuing latency while tokens last");
        assert!(limiter.available_tokens("a").unwrap() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_request_waits_for_refill() {
        let limiter = RateLimiterRegistry::new(&config(1, 2.0, 10));
        let start = Instant::now();
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();
        assert!(Instant::now() - start >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refill_is_clamped() {
        let limiter = RateLimiterRegistry::new(&config(1, 0.0, 10));
        let start = Instant::now();
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(100));

        assert_eq!(clamp_refill(f64::NAN), MIN_REFILL_PER_SECOND);
        assert_eq!(clamp_refill(-3.0), MIN_REFILL_PER_SECOND);
        assert_eq!(clamp_refill(5.0), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_then_fifo() {
        let limiter = RateLimiterRegistry::new(&config(1, 1.0, 10));
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let run = |label: &'static str, priority: Priority| {
            let order = order.clone();
            let limiter = &limiter;
            async move {
                limiter
                    .execute("a", priority, || async move {
                        order.lock().unwrap().push(label);
                    })
                    .await
                    .unwrap();
            }
        };

        tokio::join!(
            run("low", Priority::Low),
            run("normal-1", Priority::Normal),
            run("critical", Priority::Critical),
            run("normal-2", Priority::Normal),
        );

        assert_eq!(
            *order.lock().unwrap(),
            vec!["critical", "normal-1", "normal-2", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_rejects() {
        let limiter = RateLimiterRegistry::new(&config(1, 1.0, 1));
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();

        let queued = limiter.execute("a", Priority::Low, || async {});
        let rejected = limiter.execute("a", Priority::Critical, || async {});
        let (queued, rejected) = tokio::join!(queued, rejected);

        assert!(queued.is_ok());
        assert_eq!(
            rejected,
            Err(LimiterError::QueueFull {
                domain: "a".into(),
                limit: 1
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = RateLimiterRegistry::new(&config(1, 0.1, 10));
        let start = Instant::now();
        limiter.execute("a", Priority::Normal, || async {}).await.unwrap();
        limiter.execute("b", Priority::Normal, || async {}).await.unwrap();
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.queue_depth("a"), 0);
    }
}
