// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resilient probing of one target.
//!
//! Walks the attempt plans for a domain, retries transient failures with
//! exponential backoff (or the server's `Retry-After`), follows redirects by
//! hand, and keeps the first success or the most informative failure.

use super::client::{FetchError, FetchRequest, FetchResponse, Fetcher};
use super::limits::RequestLimits;
use super::plan::{AttemptPlan, HostVariant, PlanFeedback, PlanSequence};
use crate::config::ScanConfig;
use crate::model::{ErrorClass, Outcome, ProbeAttempt, ProbeResult, Scheme, Target};
use crate::signal::RunSignal;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound for a computed backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Upper bound for a server-requested `Retry-After` delay.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub jitter_max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, jitter_max: Duration) -> Self {
        Self {
            base,
            multiplier,
            jitter_max,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(64) as i32;
        let scaled_ms = self.base.as_millis() as f64 * self.multiplier.powi(exp);
        let capped_ms = scaled_ms.min(MAX_BACKOFF.as_millis() as f64);
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        (Duration::from_millis(capped_ms as u64) + Duration::from_millis(jitter)).min(MAX_BACKOFF)
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let delay = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
            (at - now).to_std().unwrap_or(Duration::ZERO)
        }
    };
    Some(delay.min(MAX_RETRY_AFTER))
}

/// Engine knobs derived from [`ScanConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub candidate_paths: Vec<String>,
    pub timeout: Duration,
    pub max_redirects: u32,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub try_www: bool,
    pub http_fallback: bool,
    pub max_body_bytes: usize,
}

impl ProbeSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            candidate_paths: config.candidate_paths.clone(),
            timeout: config.attempt_timeout(),
            max_redirects: config.max_redirects,
            max_retries: config.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.backoff_base_ms),
                config.backoff_multiplier,
                Duration::from_millis(config.backoff_jitter_max_ms),
            ),
            try_www: config.try_www_variant,
            http_fallback: config.try_http_fallback,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

/// Result of following one candidate URL through its redirects.
struct Hop {
    attempt: ProbeAttempt,
    retry_after: Option<String>,
    /// The run stopped before a redirect could be followed.
    stopped: bool,
}

/// Result of one plan including its retries. `attempt` is `None` only when
/// the run stopped before any request was sent.
struct PlanRun {
    attempt: Option<ProbeAttempt>,
    retry_after_honored: bool,
    exhausted: bool,
    cancelled: bool,
}

/// Probes targets. Cheap to clone; clones share the fetcher and limits.
#[derive(Clone)]
pub struct ProbeEngine {
    fetcher: Arc<dyn Fetcher>,
    settings: ProbeSettings,
    limits: Arc<RequestLimits>,
}

impl ProbeEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: ProbeSettings, limits: Arc<RequestLimits>) -> Self {
        Self {
            fetcher,
            settings,
            limits,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probe every viable plan for `target` until one succeeds.
    ///
    /// Never fails: every outcome is data on the returned result.
    pub async fn probe(&self, target: &Target, signal: &RunSignal) -> ProbeResult {
        let mut plans = PlanSequence::new(
            &target.domain,
            &self.settings.candidate_paths,
            self.settings.http_fallback,
            self.settings.try_www,
        );
        let mut attempts: Vec<ProbeAttempt> = Vec::new();
        let mut executed: Vec<AttemptPlan> = Vec::new();
        let mut retry_after_honored = false;
        let mut exhausted = false;
        let mut cancelled = false;

        while let Some(plan) = plans.next_plan() {
            if signal.is_stopped() {
                cancelled = true;
                break;
            }
            let run = self.run_plan(&plan, signal).await;
            retry_after_honored |= run.retry_after_honored;
            exhausted |= run.exhausted;
            let mut success = false;
            if let Some(attempt) = run.attempt {
                plans.record(&plan, feedback_for(&attempt));
                debug!(
                    domain = %target.domain,
                    url = %attempt.candidate_url,
                    outcome = %attempt.outcome,
                    tries = attempt.tries,
                    "probe attempt"
                );
                success = attempt.outcome.is_success();
                attempts.push(attempt);
                executed.push(plan);
            }
            if run.cancelled {
                cancelled = true;
                break;
            }
            if success {
                break;
            }
        }

        let retained = pick_retained(&attempts);
        let mut notes = Vec::new();
        if cancelled {
            notes.push("cancelled".to_string());
        }
        if attempts
            .iter()
            .any(|a| a.error_class == Some(ErrorClass::Dns))
        {
            notes.push("dns_unresolved".to_string());
        }
        if let Some(plan) = retained.and_then(|i| executed.get(i)) {
            if plan.variant == HostVariant::Www {
                notes.push("www_variant".to_string());
            }
            if plan.scheme == Scheme::Http {
                notes.push("http_fallback".to_string());
            }
        }
        if retry_after_honored {
            notes.push("retry_after_honored".to_string());
        }
        if exhausted {
            notes.push("retries_exhausted".to_string());
        }
        if let Some(attempt) = retained.and_then(|i| attempts.get(i)) {
            if attempt.truncated {
                notes.push("body_truncated".to_string());
            }
            if !attempt.outcome.is_success() {
                notes.push(attempt.failure_class());
            }
        }

        ProbeResult {
            domain: target.domain.clone(),
            attempts,
            retained,
            notes,
        }
    }

    async fn run_plan(&self, plan: &AttemptPlan, signal: &RunSignal) -> PlanRun {
        let url = plan.url();
        let started = Instant::now();
        let mut tries = 0u32;
        let mut retry_after_honored = false;
        let mut previous: Option<ProbeAttempt> = None;

        loop {
            tries += 1;
            let Some(Hop {
                mut attempt,
                retry_after,
                stopped,
            }) = self.follow_redirects(&url, signal).await
            else {
                return PlanRun {
                    attempt: previous,
                    retry_after_honored,
                    exhausted: false,
                    cancelled: true,
                };
            };
            attempt.tries = tries;
            attempt.elapsed_ms = started.elapsed().as_millis() as u64;

            if !attempt.is_transient() {
                return PlanRun {
                    attempt: Some(attempt),
                    retry_after_honored,
                    exhausted: false,
                    cancelled: stopped,
                };
            }
            if tries > self.settings.max_retries {
                return PlanRun {
                    attempt: Some(attempt),
                    retry_after_honored,
                    exhausted: true,
                    cancelled: false,
                };
            }

            let server_delay = match (attempt.status, retry_after.as_deref()) {
                (Some(429), Some(value)) => parse_retry_after(value, Utc::now()),
                _ => None,
            };
            let delay = server_delay.unwrap_or_else(|| self.settings.backoff.delay(tries));
            debug!(url = %url, outcome = %attempt.outcome, ?delay, "retrying");
            if !signal.sleep(delay).await {
                return PlanRun {
                    attempt: Some(attempt),
                    retry_after_honored,
                    exhausted: false,
                    cancelled: true,
                };
            }
            retry_after_honored |= server_delay.is_some();
            previous = Some(attempt);
        }
    }

    /// Fetch `url` and any redirects it leads to. `None` when the run
    /// stopped before the first request; a stop before a later hop ends the
    /// chain at the unfollowed redirect.
    async fn follow_redirects(&self, url: &str, signal: &RunSignal) -> Option<Hop> {
        let mut chain = vec![url.to_string()];
        let mut current = url.to_string();
        let mut followed = 0u32;
        let mut pending: Option<FetchResponse> = None;

        loop {
            let Some(_admission) = self.limits.admit(&current, signal).await else {
                let resp = pending?;
                chain.pop();
                let code = resp.status;
                let mut hop = finished(url, chain, resp, Outcome::HttpError { code });
                hop.stopped = true;
                return Some(hop);
            };
            let request = FetchRequest {
                url: current.clone(),
                timeout: self.settings.timeout,
                max_body_bytes: self.settings.max_body_bytes,
            };
            let resp = match self.fetcher.fetch(&request).await {
                Ok(resp) => resp,
                Err(err) => {
                    return Some(Hop {
                        attempt: failed_attempt(url, chain, err),
                        retry_after: None,
                        stopped: false,
                    })
                }
            };

            let next = if resp.is_redirect() {
                resp.location
                    .as_deref()
                    .and_then(|loc| resolve_location(&current, loc))
            } else {
                None
            };
            let Some(next) = next else {
                let outcome = response_outcome(&resp);
                return Some(finished(url, chain, resp, outcome));
            };

            if chain.contains(&next) {
                chain.push(next);
                return Some(finished(url, chain, resp, Outcome::RedirectLoop));
            }
            if followed >= self.settings.max_redirects {
                return Some(finished(url, chain, resp, Outcome::RedirectLimit));
            }
            followed += 1;
            chain.push(next.clone());
            current = next;
            pending = Some(resp);
        }
    }
}

fn resolve_location(current: &str, location: &str) -> Option<String> {
    let base = url::Url::parse(current).ok()?;
    let mut next = base.join(location.trim()).ok()?;
    next.set_fragment(None);
    match next.scheme() {
        "http" | "https" => Some(next.to_string()),
        _ => None,
    }
}

fn response_outcome(resp: &FetchResponse) -> Outcome {
    match resp.status {
        200 if resp.body.iter().all(u8::is_ascii_whitespace) => Outcome::EmptyBody,
        200 => Outcome::Success,
        code => Outcome::HttpError { code },
    }
}

fn finished(candidate: &str, chain: Vec<String>, resp: FetchResponse, outcome: Outcome) -> Hop {
    Hop {
        attempt: ProbeAttempt {
            candidate_url: candidate.to_string(),
            method: "GET".to_string(),
            status: Some(resp.status),
            elapsed_ms: 0,
            redirect_chain: chain,
            tls: resp.tls,
            body: resp.body,
            content_type: resp.content_type,
            etag: resp.etag,
            last_modified: resp.last_modified,
            truncated: resp.truncated,
            outcome,
            tries: 1,
            error_class: None,
            error: None,
        },
        retry_after: resp.retry_after,
        stopped: false,
    }
}

fn failed_attempt(candidate: &str, chain: Vec<String>, err: FetchError) -> ProbeAttempt {
    let (outcome, error_class) = match &err {
        FetchError::Timeout => (Outcome::Timeout, None),
        FetchError::Dns(_) => (Outcome::ConnectionError, Some(ErrorClass::Dns)),
        FetchError::Connect(_) => (Outcome::ConnectionError, Some(ErrorClass::Connect)),
        FetchError::Tls(_) => (Outcome::TlsError, None),
        FetchError::Other(_) => (Outcome::ConnectionError, Some(ErrorClass::Io)),
    };
    ProbeAttempt {
        candidate_url: candidate.to_string(),
        method: "GET".to_string(),
        status: None,
        elapsed_ms: 0,
        redirect_chain: chain,
        tls: None,
        body: Vec::new(),
        content_type: None,
        etag: None,
        last_modified: None,
        truncated: false,
        outcome,
        tries: 1,
        error_class,
        error: Some(err.to_string()),
    }
}

/// What a finished plan tells the plan sequence.
fn feedback_for(attempt: &ProbeAttempt) -> PlanFeedback {
    // A failure after a redirect still means the candidate origin answered.
    if attempt.got_response() || attempt.redirect_chain.len() > 1 {
        return PlanFeedback::Answered;
    }
    match (attempt.outcome, attempt.error_class) {
        (Outcome::ConnectionError, Some(ErrorClass::Dns)) => PlanFeedback::HostUnresolved,
        (Outcome::ConnectionError, Some(ErrorClass::Connect)) | (Outcome::TlsError, _) => {
            PlanFeedback::OriginUnreachable
        }
        _ => PlanFeedback::PathFailed,
    }
}

/// The success, else the highest-ranked failure (earliest on ties).
fn pick_retained(attempts: &[ProbeAttempt]) -> Option<usize> {
    if let Some(i) = attempts.iter().position(|a| a.outcome.is_success()) {
        return Some(i);
    }
    let mut best: Option<(usize, u8)> = None;
    for (i, attempt) in attempts.iter().enumerate() {
        let rank = attempt.failure_rank();
        if best.map_or(true, |(_, r)| rank > r) {
            best = Some((i, rank));
        }
    }
    best.map(|(i, _)| i)
}
