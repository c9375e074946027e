// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Politeness limits shared by all workers.
//!
//! Every outbound request first takes a slot on its origin (host and port)
//! and then, when a global rate is configured, a token from the bucket.

use crate::config::ScanConfig;
use crate::signal::RunSignal;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Key identifying an origin for concurrency purposes.
pub fn origin_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
            match parsed.port_or_known_default() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            }
        }
        Err(_) => url.to_string(),
    }
}

/// Caps in-flight requests per origin.
pub struct OriginLimiter {
    limit: usize,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl OriginLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a slot on the origin of `url`. The slot is released when the
    /// permit drops.
    pub async fn acquire(&self, url: &str) -> Option<OriginPermit> {
        let key = origin_key(url);
        let semaphore = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit)))
            .clone();
        let permit = semaphore.clone().acquire_owned().await.ok()?;
        Some(OriginPermit {
            key,
            semaphore,
            permit: Some(permit),
            slots: self.slots.clone(),
        })
    }

    /// Number of origins with a request in flight or waiting.
    pub fn origins(&self) -> usize {
        self.slots.len()
    }
}

/// A held slot on one origin.
///
/// Dropping the last holder of an origin forgets the origin.
pub struct OriginPermit {
    key: String,
    semaphore: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl Drop for OriginPermit {
    fn drop(&mut self) {
        self.permit.take();
        // Map entry plus ours: nobody else holds or waits on this origin.
        self.slots.remove_if(&self.key, |_, sem| {
            Arc::ptr_eq(sem, &self.semaphore) && Arc::strong_count(sem) == 2
        });
    }
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

/// Token bucket enforcing an aggregate request rate.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate` tokens per second, bursting up to one second's worth.
    pub fn new(rate: f64) -> Self {
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Permission to send one request.
pub struct Admission {
    _slot: Option<OriginPermit>,
}

/// Both limits bundled for the engine.
pub struct RequestLimits {
    origin: OriginLimiter,
    bucket: Option<TokenBucket>,
}

impl RequestLimits {
    pub fn new(per_origin: usize, global_rate: Option<f64>) -> Self {
        Self {
            origin: OriginLimiter::new(per_origin),
            bucket: global_rate.map(TokenBucket::new),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.per_origin_concurrency_limit, config.global_rate_limit)
    }

    /// Unlimited apart from one request per origin at a time.
    pub fn unlimited() -> Self {
        Self::new(1, None)
    }

    /// Wait until `url` may be requested. Hold the returned admission for
    /// the duration of the request.
    ///
    /// `None` when the run stops before both limits admit the request.
    pub async fn admit(&self, url: &str, signal: &RunSignal) -> Option<Admission> {
        let wait = async {
            let slot = self.origin.acquire(url).await;
            if let Some(bucket) = &self.bucket {
                bucket.acquire().await;
            }
            Admission { _slot: slot }
        };
        tokio::select! {
            biased;
            _ = signal.stopped() => None,
            admission = wait => Some(admission),
        }
    }

    pub fn origins(&self) -> usize {
        self.origin.origins()
    }
}
