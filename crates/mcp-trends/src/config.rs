// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fully resolved scan configuration.
//!
//! Loading (flags, files, env) happens outside the core; this module only
//! defines the shape, the defaults, validation, and a stable fingerprint that
//! is stamped on every record of a run.

use crate::error::{ScanError, ScanResult};
use crate::exposure::ExposurePolicy;
use crate::model::TlsVersion;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::path::PathBuf;
use std::time::Duration;

/// Default well-known path probed on every host.
pub const WELLKNOWN_MCP: &str = "/.well-known/mcp.json";

/// Capability name fragments treated as dangerous unless configured otherwise.
pub const DEFAULT_DENYLIST: &[&str] = &[
    r"\bwrite\b",
    r"\bdelete\b",
    r"\bremove\b",
    r"\bchmod\b",
    r"\bchown\b",
    "shell",
    "exec",
    "spawn",
    "sudo",
    "curl",
    r"\bfetch\b",
    r"\bhttp\b",
    "docker",
    "kubectl",
    r"\bssh\b",
];

/// Every knob the pipeline recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How many ranking entries to acquire.
    pub tranco_top_n: usize,
    /// Well-known paths in priority order.
    pub candidate_paths: Vec<String>,
    #[serde(alias = "timeout_per_attempt")]
    pub timeout_per_attempt_ms: u64,
    pub max_redirects: u32,
    pub max_retries: u32,
    #[serde(alias = "backoff_base")]
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(alias = "backoff_jitter_max")]
    pub backoff_jitter_max_ms: u64,
    pub try_www_variant: bool,
    pub try_http_fallback: bool,
    pub max_body_bytes: usize,
    pub worker_pool_size: usize,
    pub per_origin_concurrency_limit: usize,
    /// Aggregate requests per second across all workers; `None` disables it.
    pub global_rate_limit: Option<f64>,
    pub capability_denylist_patterns: Vec<String>,
    pub min_supported_manifest_version: String,
    pub tls_protocol_floor: String,
    pub overwrite_existing_run: bool,
    /// Reject invalid certificates instead of recording a mixed-trust success.
    pub strict_tls: bool,
    pub user_agent: String,
    /// Root directory holding one subdirectory per run.
    pub data_dir: PathBuf,
    /// Optional wall-clock budget for the whole run.
    pub run_deadline_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tranco_top_n: 10_000,
            candidate_paths: vec![WELLKNOWN_MCP.to_string()],
            timeout_per_attempt_ms: 10_000,
            max_redirects: 5,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_multiplier: 2.0,
            backoff_jitter_max_ms: 250,
            try_www_variant: true,
            try_http_fallback: false,
            max_body_bytes: 256 * 1024,
            worker_pool_size: 64,
            per_origin_concurrency_limit: 1,
            global_rate_limit: None,
            capability_denylist_patterns: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            min_supported_manifest_version: "0.1".to_string(),
            tls_protocol_floor: "TLSv1.2".to_string(),
            overwrite_existing_run: false,
            strict_tls: true,
            user_agent: format!("mcp-trends/{} (well-known census)", env!("CARGO_PKG_VERSION")),
            data_dir: PathBuf::from("data/runs"),
            run_deadline_secs: None,
        }
    }
}

impl ScanConfig {
    /// Reject anything that would make a run meaningless. Called before any
    /// probing starts.
    pub fn validate(&self) -> ScanResult<()> {
        if self.candidate_paths.is_empty() {
            return Err(invalid("candidate_paths must not be empty"));
        }
        for path in &self.candidate_paths {
            if !path.starts_with('/') || path.contains(char::is_whitespace) || path.contains('#') {
                return Err(invalid(format!(
                    "candidate path {path:?} must be an absolute path without whitespace or fragment"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.candidate_paths.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(invalid(format!("candidate path {dup:?} listed twice")));
        }
        if self.tranco_top_n == 0 {
            return Err(invalid("tranco_top_n must be at least 1"));
        }
        if self.timeout_per_attempt_ms == 0 {
            return Err(invalid("timeout_per_attempt_ms must be positive"));
        }
        if self.max_redirects > 20 {
            return Err(invalid("max_redirects must be at most 20"));
        }
        if self.max_retries > 10 {
            return Err(invalid("max_retries must be at most 10"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier must be a finite number >= 1.0"));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes must be positive"));
        }
        if self.worker_pool_size == 0 {
            return Err(invalid("worker_pool_size must be at least 1"));
        }
        if self.per_origin_concurrency_limit == 0 {
            return Err(invalid("per_origin_concurrency_limit must be at least 1"));
        }
        if let Some(rate) = self.global_rate_limit {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(invalid("global_rate_limit must be a positive number"));
            }
        }
        if self.run_deadline_secs == Some(0) {
            return Err(invalid("run_deadline_secs must be positive when set"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent must not be empty"));
        }
        // Compiles the denylist and parses the version/TLS floor.
        ExposurePolicy::from_config(self)?;
        Ok(())
    }

    pub fn tls_floor(&self) -> ScanResult<TlsVersion> {
        self.tls_protocol_floor
            .parse::<TlsVersion>()
            .map_err(|e| invalid(format!("tls_protocol_floor: {e}")))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_per_attempt_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    /// Stable FNV-1a digest of the canonical JSON form of this config.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(canonical.as_bytes());
        format!("{:016x}", hasher.finish())
    }
}

fn invalid(msg: impl Into<String>) -> ScanError {
    ScanError::Config(msg.into())
}
