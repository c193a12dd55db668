//! Resilient block-explorer client.
//!
//! # Request Flow
//! ```text
//! request(ApiRequest)
//!     → fresh cache hit? return (no network, no token)
//!     → identical request in flight? await the same shared future
//!     → for endpoint in priority order:
//!           skip if circuit open
//!           rate limiter token → HTTP call with endpoint timeout
//!           retry 429/5xx/network errors with backoff (per-priority table)
//!           2xx with a body that passes the request's check → record success, cache, return
//!           4xx other than 429 → domain answered: record success, next endpoint
//!           failure or unusable body → record failure, next endpoint
//!     → all failed: stale cache entry (plus background refresh) or last error
//! ```
//!
//! This is the only path to the network; breaker, limiter and cache state
//! live in registries owned by the client rather than in globals.
//!
//! An in-flight entry lives exactly as long as someone awaits it. When the
//! last waiter is dropped the entry is removed and the underlying call is
//! cancelled with it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::{timeout, Instant};

use crate::config::{RetryTable, WalletConfig};
use crate::explorer::cache::ResponseCache;
use crate::explorer::endpoints::{Endpoint, EndpointRegistry};
use crate::explorer::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::explorer::types::{ClientError, ClientResult, HttpMethod};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot};
use crate::resilience::rate_limit::{LimiterError, RateLimiterRegistry};
use crate::resilience::retries::{counts_against_endpoint, is_retryable, FailureKind, Priority};

/// Delay before re-trying the network after serving a stale entry.
const STALE_REFRESH_DELAY: Duration = Duration::from_secs(5);

/// Longest error body kept in `ClientError::Http`.
const MAX_ERROR_BODY: usize = 256;

type SharedResponse = Shared<BoxFuture<'static, ClientResult<String>>>;

/// Check run against a 2xx body before it is accepted. A rejected body is
/// treated like an endpoint failure: it is not cached and the next endpoint
/// is tried.
#[derive(Clone, Copy)]
pub struct ResponseCheck(pub fn(&str) -> ClientResult<()>);

impl std::fmt::Debug for ResponseCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseCheck")
    }
}

/// Cache placement for a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub key: String,
    pub ttl: Duration,
}

/// One logical API request, independent of which endpoint serves it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<String>,
    pub priority: Priority,
    pub cache: Option<CachePolicy>,
    pub check: Option<ResponseCheck>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            priority: Priority::Normal,
            cache: None,
            check: None,
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body.into()),
            priority: Priority::Normal,
            cache: None,
            check: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Cache the response under `key`. Ignored for non-GET requests.
    pub fn cached(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache = Some(CachePolicy {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Reject 2xx bodies that fail `check`.
    pub fn checked(mut self, check: fn(&str) -> ClientResult<()>) -> Self {
        self.check = Some(ResponseCheck(check));
        self
    }

    fn cache_policy(&self) -> Option<&CachePolicy> {
        match self.method {
            HttpMethod::Get => self.cache.as_ref(),
            HttpMethod::Post => None,
        }
    }

    fn dedup_key(&self) -> String {
        format!(
            "{} {} {}",
            self.method,
            self.path,
            self.body.as_deref().unwrap_or("")
        )
    }
}

/// Diagnostics for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub name: String,
    pub domain: String,
    pub priority: u32,
    pub circuit: Option<CircuitSnapshot>,
    pub queued: usize,
}

/// A request being served, shared by every caller that asked for it.
struct InFlight {
    id: u64,
    waiters: AtomicUsize,
    response: SharedResponse,
}

/// Held by each caller awaiting an in-flight request. The last one to go
/// away removes the entry, which drops the shared call if it has not finished.
struct InFlightWaiter<'a> {
    in_flight: &'a DashMap<String, InFlight>,
    key: String,
    id: u64,
}

impl Drop for InFlightWaiter<'_> {
    fn drop(&mut self) {
        let id = self.id;
        let removed = self.in_flight.remove_if(&self.key, |_, flight| {
            flight.id == id && flight.waiters.fetch_sub(1, Ordering::AcqRel) == 1
        });
        if removed.is_some() {
            tracing::trace!(key = %self.key, "Last waiter left in-flight request");
        }
    }
}

struct ClientInner {
    endpoints: EndpointRegistry,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiterRegistry,
    cache: ResponseCache<String>,
    retries: RetryTable,
    transport: Arc<dyn HttpTransport>,
    in_flight: DashMap<String, InFlight>,
    next_flight: AtomicU64,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

impl ResilientClient {
    /// Build a client with an explicit transport.
    pub fn new(config: &WalletConfig, transport: Arc<dyn HttpTransport>) -> ClientResult<Self> {
        let endpoints = EndpointRegistry::new(&config.effective_endpoints())?;

        tracing::info!(
            network = %config.network,
            endpoints = endpoints.len(),
            "Explorer client initialized"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoints,
                breakers: CircuitBreakerRegistry::new(&config.circuit_breaker),
                limiter: RateLimiterRegistry::new(&config.rate_limit),
                cache: ResponseCache::new(config.cache.refresh_ahead_ratio),
                retries: config.retries.clone(),
                transport,
                in_flight: DashMap::new(),
                next_flight: AtomicU64::new(0),
            }),
        })
    }

    /// Build a client using the reqwest transport.
    pub fn from_config(config: &WalletConfig) -> ClientResult<Self> {
        let transport = ReqwestTransport::new().map_err(|e| ClientError::Config(e.to_string()))?;
        Self::new(config, Arc::new(transport))
    }

    /// Execute one logical request.
    pub async fn request(&self, request: ApiRequest) -> ClientResult<String> {
        if let Some(policy) = request.cache_policy() {
            let now = Instant::now();
            if let Some(hit) = self.inner.cache.get_at(&policy.key, policy.ttl, now) {
                tracing::debug!(key = %policy.key, "Serving fresh cache entry");
                if self.inner.cache.wants_refresh_at(&policy.key, policy.ttl, now) {
                    self.spawn_refresh(request.clone(), Duration::ZERO);
                }
                return Ok(hit);
            }
            metrics::record_cache_event("miss");
        }

        let key = request.dedup_key();
        let (id, shared) = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(method = %request.method, path = %request.path, "Joining in-flight request");
                let flight = entry.get();
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                (flight.id, flight.response.clone())
            }
            Entry::Vacant(entry) => {
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let client = self.clone();
                let flight_key = key.clone();
                let future = async move {
                    let result = client.fetch(&request).await;
                    client
                        .inner
                        .in_flight
                        .remove_if(&flight_key, |_, flight| flight.id == id);
                    result
                }
                .boxed()
                .shared();
                entry.insert(InFlight {
                    id,
                    waiters: AtomicUsize::new(1),
                    response: future.clone(),
                });
                (id, future)
            }
        };

        let _waiter = InFlightWaiter {
            in_flight: &self.inner.in_flight,
            key,
            id,
        };
        shared.await
    }

    /// Endpoint loop plus stale fallback.
    async fn fetch(&self, request: &ApiRequest) -> ClientResult<String> {
        let error = match self.fetch_from_endpoints(request).await {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };

        if let Some(policy) = request.cache_policy() {
            if let Some(stale) = self.inner.cache.get_stale(&policy.key) {
                tracing::warn!(
                    key = %policy.key,
                    error = %error,
                    "All endpoints failed, serving stale cache entry"
                );
                metrics::record_cache_event("stale");
                self.spawn_refresh(request.clone(), STALE_REFRESH_DELAY);
                return Ok(stale);
            }
        }

        Err(error)
    }

    async fn fetch_from_endpoints(&self, request: &ApiRequest) -> ClientResult<String> {
        let mut last_error: Option<ClientError> = None;

        for endpoint in self.inner.endpoints.iter() {
            let domain = endpoint.domain();
            if self.inner.breakers.is_open(domain) {
                tracing::debug!(endpoint = %endpoint.name, domain = %domain, "Circuit open, skipping endpoint");
                last_error.get_or_insert_with(|| ClientError::CircuitOpen {
                    domain: domain.to_string(),
                });
                continue;
            }

            match self.try_endpoint(endpoint, request).await {
                Ok(body) => {
                    if let Some(policy) = request.cache_policy() {
                        self.inner.cache.set(&policy.key, body.clone());
                    }
                    return Ok(body);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint.name,
                        method = %request.method,
                        path = %request.path,
                        error = %e,
                        "Endpoint failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::NoEndpoints))
    }

    /// All attempts against a single endpoint.
    async fn try_endpoint(&self, endpoint: &Endpoint, request: &ApiRequest) -> ClientResult<String> {
        let domain = endpoint.domain();
        let policy = self.inner.retries.for_priority(request.priority);
        let url = endpoint.url_for(&request.path);
        let mut retry = 0u32;

        loop {
            let start = std::time::Instant::now();
            let http_request = HttpRequest {
                method: request.method,
                url: url.clone(),
                body: request.body.clone(),
            };
            let transport = self.inner.transport.clone();
            let deadline = endpoint.timeout;

            let outcome = self
                .inner
                .limiter
                .execute(domain, request.priority, move || async move {
                    timeout(deadline, transport.send(http_request)).await
                })
                .await;

            let (kind, error) = match outcome {
                Err(LimiterError::QueueFull { .. }) => {
                    self.inner.breakers.release_trial(domain);
                    return Err(ClientError::QueueFull {
                        domain: domain.to_string(),
                    });
                }
                Err(LimiterError::Closed { .. }) => {
                    self.inner.breakers.release_trial(domain);
                    return Err(ClientError::Transport {
                        endpoint: endpoint.name.clone(),
                        message: "rate limiter stopped".to_string(),
                    });
                }
                Ok(Ok(Ok(response))) if response.is_success() => {
                    if let Some(ResponseCheck(check)) = request.check {
                        if let Err(e) = check(&response.body) {
                            metrics::record_request(&endpoint.name, "bad_body", start);
                            self.inner.breakers.record_failure(domain);
                            return Err(e);
                        }
                    }
                    metrics::record_request(&endpoint.name, "success", start);
                    self.inner.breakers.record_success(domain);
                    return Ok(response.body);
                }
                Ok(Ok(Ok(response))) => {
                    metrics::record_request(&endpoint.name, "http_error", start);
                    (
                        FailureKind::Status(response.status),
                        ClientError::Http {
                            endpoint: endpoint.name.clone(),
                            status: response.status,
                            body: truncate(response.body),
                        },
                    )
                }
                Ok(Ok(Err(e))) => {
                    metrics::record_request(&endpoint.name, "network_error", start);
                    (
                        FailureKind::Network,
                        ClientError::Transport {
                            endpoint: endpoint.name.clone(),
                            message: e.to_string(),
                        },
                    )
                }
                Ok(Err(_elapsed)) => {
                    metrics::record_request(&endpoint.name, "timeout", start);
                    (
                        FailureKind::Timeout,
                        ClientError::Timeout {
                            endpoint: endpoint.name.clone(),
                            timeout_ms: deadline.as_millis() as u64,
                        },
                    )
                }
            };

            if is_retryable(kind) && retry + 1 < policy.max_attempts {
                let delay = calculate_backoff(retry, policy);
                tracing::debug!(
                    endpoint = %endpoint.name,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
                continue;
            }

            if counts_against_endpoint(kind) {
                self.inner.breakers.record_failure(domain);
            } else {
                // The domain answered; only the request was refused
                self.inner.breakers.record_success(domain);
            }
            return Err(error);
        }
    }

    /// Detached refresh of a cached GET; at most one per key at a time.
    fn spawn_refresh(&self, request: ApiRequest, delay: Duration) {
        let Some(policy) = request.cache_policy().cloned() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if !self.inner.cache.begin_refresh(&policy.key) {
            return;
        }

        let client = self.clone();
        let request = request.with_priority(Priority::Low);
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match client.fetch_from_endpoints(&request).await {
                Ok(_) => {
                    metrics::record_cache_event("refresh");
                    tracing::debug!(key = %policy.key, "Background refresh stored");
                }
                Err(e) => tracing::debug!(key = %policy.key, error = %e, "Background refresh failed"),
            }
            client.inner.cache.end_refresh(&policy.key);
        });
    }

    /// Drop a cached response.
    pub fn invalidate(&self, cache_key: &str) {
        self.inner.cache.invalidate(cache_key);
    }

    /// Per-endpoint breaker and queue state.
    pub fn endpoint_health(&self) -> Vec<EndpointHealth> {
        self.inner
            .endpoints
            .iter()
            .map(|endpoint| EndpointHealth {
                name: endpoint.name.clone(),
                domain: endpoint.domain().to_string(),
                priority: endpoint.priority,
                circuit: self.inner.breakers.snapshot(endpoint.domain()),
                queued: self.inner.limiter.queue_depth(endpoint.domain()),
            })
            .collect()
    }

    /// Whether the breaker for `domain` currently rejects requests.
    pub fn is_circuit_open(&self, domain: &str) -> bool {
        self.inner
            .breakers
            .snapshot(domain)
            .is_some_and(|snapshot| snapshot.is_open)
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("endpoints", &self.inner.endpoints.len())
            .field("cached", &self.inner.cache.len())
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
