// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Probe engine: resilient HTTP probing of well-known candidate paths.

pub mod client;
pub mod engine;
pub mod fake;
pub mod limits;
pub mod plan;

pub use client::{FetchError, FetchRequest, FetchResponse, Fetcher, ReqwestFetcher};
pub use engine::{parse_retry_after, BackoffPolicy, ProbeEngine, ProbeSettings};
pub use fake::ScriptedFetcher;
pub use limits::{origin_key, Admission, OriginLimiter, OriginPermit, RequestLimits, TokenBucket};
pub use plan::{AttemptPlan, HostVariant, PlanFeedback, PlanSequence};
