// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types shared by every pipeline stage.
//!
//! Everything here is plain data: targets, probe attempts, run metadata and
//! the append-only `RunRecord`. Stages produce these values once and never
//! mutate them afterwards.

use crate::exposure::{ExposureAssessment, ExposureFlag, Severity, TlsGrade};
use crate::manifest::{Manifest, ManifestSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ── Targets ──

/// Why a domain was nominated for probing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    /// Listed in a popularity ranking snapshot.
    Tranco { rank: u32 },
    /// Named by a server registry snapshot.
    Registry { name: String, snapshot_id: String },
}

/// Collapsed provenance label written to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Tranco,
    Registry,
    Both,
}

/// A host to probe, unique by domain within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub domain: String,
    pub provenance: Vec<Provenance>,
}

impl Target {
    pub fn new(domain: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            domain: domain.into(),
            provenance: vec![provenance],
        }
    }

    /// Add a provenance tag unless an identical one is already present.
    pub fn add_provenance(&mut self, provenance: Provenance) {
        if !self.provenance.contains(&provenance) {
            self.provenance.push(provenance);
        }
    }

    pub fn seed_source(&self) -> SeedSource {
        let tranco = self
            .provenance
            .iter()
            .any(|p| matches!(p, Provenance::Tranco { .. }));
        let registry = self
            .provenance
            .iter()
            .any(|p| matches!(p, Provenance::Registry { .. }));
        match (tranco, registry) {
            (true, true) => SeedSource::Both,
            (false, true) => SeedSource::Registry,
            _ => SeedSource::Tranco,
        }
    }

    /// Best (lowest) ranking position, if the domain came from the ranking.
    pub fn tranco_rank(&self) -> Option<u32> {
        self.provenance
            .iter()
            .filter_map(|p| match p {
                Provenance::Tranco { rank } => Some(*rank),
                Provenance::Registry { .. } => None,
            })
            .min()
    }
}

// ── Transport ──

/// URL scheme used for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Negotiated TLS protocol version, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "SSLv3")]
    Ssl3,
    #[serde(rename = "TLSv1.0")]
    Tls10,
    #[serde(rename = "TLSv1.1")]
    Tls11,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssl3 => write!(f, "SSLv3"),
            Self::Tls10 => write!(f, "TLSv1.0"),
            Self::Tls11 => write!(f, "TLSv1.1"),
            Self::Tls12 => write!(f, "TLSv1.2"),
            Self::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

impl FromStr for TlsVersion {
    type Err = String;

    /// Accepts `TLSv1.2`, `tls1.2`, `1.2` and `SSLv3` style spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        let norm = norm
            .trim_start_matches("tlsv")
            .trim_start_matches("tls")
            .trim();
        match norm {
            "sslv3" | "ssl3" => Ok(Self::Ssl3),
            "1.0" | "1" => Ok(Self::Tls10),
            "1.1" => Ok(Self::Tls11),
            "1.2" => Ok(Self::Tls12),
            "1.3" => Ok(Self::Tls13),
            _ => Err(format!("unknown TLS protocol version: {s}")),
        }
    }
}

/// What the handshake told us about transport security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSummary {
    /// `None` when a handshake completed but the version could not be observed.
    pub protocol_version: Option<TlsVersion>,
    /// Symmetric key strength in bits, when observable.
    pub cipher_strength: Option<u16>,
    pub cert_valid: bool,
}

// ── Probe attempts ──

/// Classified result of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Timeout,
    ConnectionError,
    TlsError,
    HttpError { code: u16 },
    RedirectLoop,
    RedirectLimit,
    /// HTTP 200 with nothing in the body.
    EmptyBody,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short label without the status code.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::TlsError => "tls_error",
            Self::HttpError { .. } => "http_error",
            Self::RedirectLoop => "redirect_loop",
            Self::RedirectLimit => "redirect_limit",
            Self::EmptyBody => "empty_body",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpError { code } => write!(f, "http_error({code})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Sub-class of a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Name resolution failed.
    Dns,
    /// TCP connect refused, reset, or unreachable.
    Connect,
    /// Anything else below HTTP (body read errors, protocol errors).
    Io,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Io => "io",
        }
    }
}

/// One candidate URL tried for a target, including any redirects and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub candidate_url: String,
    pub method: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    /// Every URL visited, starting with `candidate_url`.
    pub redirect_chain: Vec<String>,
    /// Absent for plaintext responses and for failures before a handshake.
    pub tls: Option<TlsSummary>,
    /// Response body, capped at the configured maximum.
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub truncated: bool,
    pub outcome: Outcome,
    /// Requests issued for this candidate (1 = no retry).
    pub tries: u32,
    pub error_class: Option<ErrorClass>,
    pub error: Option<String>,
}

impl ProbeAttempt {
    /// URL the attempt ended on.
    pub fn final_url(&self) -> &str {
        self.redirect_chain
            .last()
            .map(String::as_str)
            .unwrap_or(&self.candidate_url)
    }

    pub fn is_plaintext(&self) -> bool {
        self.final_url().starts_with("http://")
    }

    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self.outcome {
            Outcome::Timeout => true,
            Outcome::ConnectionError => self.error_class != Some(ErrorClass::Dns),
            Outcome::HttpError { code } => code == 429 || (500..600).contains(&code),
            _ => false,
        }
    }

    /// Whether any HTTP response came back (regardless of status).
    pub fn got_response(&self) -> bool {
        self.status.is_some()
    }

    /// Failure label used in notes, e.g. `connection_error:dns`.
    pub fn failure_class(&self) -> String {
        match self.error_class {
            Some(class) => format!("{}:{}", self.outcome, class.as_str()),
            None => self.outcome.to_string(),
        }
    }

    /// Preference when picking the representative failure (higher wins):
    /// permanent HTTP > transient exhaustion > TLS > connection-level.
    pub fn failure_rank(&self) -> u8 {
        match self.outcome {
            Outcome::Success => 5,
            Outcome::HttpError { .. } if !self.is_transient() => 4,
            Outcome::RedirectLoop | Outcome::RedirectLimit | Outcome::EmptyBody => 4,
            Outcome::HttpError { .. } | Outcome::Timeout => 3,
            Outcome::ConnectionError if self.is_transient() => 1,
            Outcome::TlsError => 2,
            Outcome::ConnectionError => 0,
        }
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            url: self.final_url().to_string(),
            status: self.status,
            outcome: self.outcome,
            tries: self.tries,
            elapsed_ms: self.elapsed_ms,
            error_class: self.error_class,
        }
    }
}

/// Audit line for one attempt inside a `ProbeSummary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub url: String,
    pub status: Option<u16>,
    pub outcome: Outcome,
    pub tries: u32,
    pub elapsed_ms: u64,
    pub error_class: Option<ErrorClass>,
}

/// Retained outcome of probing one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub domain: String,
    /// Every attempt made, in order.
    pub attempts: Vec<ProbeAttempt>,
    /// Index of the success or the most informative failure.
    pub retained: Option<usize>,
    pub notes: Vec<String>,
}

impl ProbeResult {
    pub fn retained_attempt(&self) -> Option<&ProbeAttempt> {
        self.retained.and_then(|i| self.attempts.get(i))
    }

    pub fn succeeded(&self) -> bool {
        self.retained_attempt()
            .map(|a| a.outcome.is_success())
            .unwrap_or(false)
    }

    /// Serializable view of the result: the retained attempt plus an audit
    /// trail of every attempt, without body bytes.
    pub fn summary(&self) -> ProbeSummary {
        let retained = self.retained_attempt();
        ProbeSummary {
            url: retained.map(|a| a.final_url().to_string()),
            status: retained.and_then(|a| a.status),
            outcome: retained.map(|a| a.outcome),
            succeeded: self.succeeded(),
            tls: retained.and_then(|a| a.tls),
            redirect_chain: retained
                .map(|a| a.redirect_chain.clone())
                .unwrap_or_default(),
            content_type: retained.and_then(|a| a.content_type.clone()),
            etag: retained.and_then(|a| a.etag.clone()),
            last_modified: retained.and_then(|a| a.last_modified.clone()),
            body_bytes: retained.map(|a| a.body.len()).unwrap_or(0),
            sha256: retained
                .filter(|a| !a.body.is_empty())
                .map(|a| sha256_hex(&a.body)),
            truncated: retained.map(|a| a.truncated).unwrap_or(false),
            attempts: self.attempts.iter().map(ProbeAttempt::summary).collect(),
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// What a `RunRecord` keeps of a `ProbeResult`. Enough to recompute the
/// exposure assessment offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub url: Option<String>,
    pub status: Option<u16>,
    pub outcome: Option<Outcome>,
    pub succeeded: bool,
    pub tls: Option<TlsSummary>,
    pub redirect_chain: Vec<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    pub body_bytes: usize,
    /// Hex SHA-256 of the retained body as received, when non-empty.
    #[serde(default)]
    pub sha256: Option<String>,
    pub truncated: bool,
    pub attempts: Vec<AttemptSummary>,
}

impl ProbeSummary {
    pub fn is_plaintext(&self) -> bool {
        self.url
            .as_deref()
            .map(|u| u.starts_with("http://"))
            .unwrap_or(false)
    }
}

// ── Run metadata and records ──

/// Process-wide context for one run. Built once, threaded into every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_ts: DateTime<Utc>,
    pub tranco_list_id: String,
    pub registry_snapshot_id: Option<String>,
    pub scan_version: String,
    pub config_fingerprint: String,
}

impl RunMetadata {
    pub fn new(
        run_ts: DateTime<Utc>,
        tranco_list_id: impl Into<String>,
        registry_snapshot_id: Option<String>,
        config_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            run_ts,
            tranco_list_id: tranco_list_id.into(),
            registry_snapshot_id,
            scan_version: env!("CARGO_PKG_VERSION").to_string(),
            config_fingerprint: config_fingerprint.into(),
        }
    }

    /// Dataset identifier: one dataset per UTC day.
    pub fn run_id(&self) -> String {
        self.run_ts.format("%Y-%m-%d").to_string()
    }

    /// `run_ts` in the form written to records.
    pub fn run_ts_string(&self) -> String {
        self.run_ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

/// The append-only unit of output: one per target per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub run: RunMetadata,
    pub domain: String,
    pub seed_source: SeedSource,
    pub provenance: Vec<Provenance>,
    /// Final successful URL or representative failing URL.
    pub url: Option<String>,
    /// HTTP status of the retained attempt, 0 when no response came back.
    pub status: u16,
    pub has_manifest: bool,
    /// Body size of the retained response, absent when it was empty.
    #[serde(default)]
    pub bytes: Option<usize>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    pub exposure_flags: BTreeSet<ExposureFlag>,
    pub severity: Severity,
    pub auth: Option<String>,
    pub tls_grade: Option<TlsGrade>,
    pub manifest_sample: Option<ManifestSample>,
    pub notes: Vec<String>,
    pub probe: ProbeSummary,
    pub manifest: Option<Manifest>,
}

impl RunRecord {
    pub fn new(
        run: &RunMetadata,
        target: &Target,
        probe: ProbeSummary,
        manifest: Option<Manifest>,
        assessment: ExposureAssessment,
        notes: Vec<String>,
    ) -> Self {
        Self {
            run: run.clone(),
            domain: target.domain.clone(),
            seed_source: target.seed_source(),
            provenance: target.provenance.clone(),
            url: probe.url.clone(),
            status: probe.status.unwrap_or(0),
            has_manifest: manifest.is_some(),
            bytes: Some(probe.body_bytes).filter(|n| *n > 0),
            etag: probe.etag.clone(),
            last_modified: probe.last_modified.clone(),
            sha256: probe.sha256.clone(),
            exposure_flags: assessment.flags,
            severity: assessment.severity,
            auth: manifest.as_ref().map(|m| m.auth_label()),
            tls_grade: assessment.tls_grade,
            manifest_sample: manifest.as_ref().map(Manifest::sample),
            notes,
            probe,
            manifest,
        }
    }

    /// The assessment as stored in this record.
    pub fn assessment(&self) -> ExposureAssessment {
        ExposureAssessment {
            flags: self.exposure_flags.clone(),
            tls_grade: self.tls_grade,
            severity: self.severity,
        }
    }
}

/// Companion record describing one registry seed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub run_ts: DateTime<Utc>,
    pub registry_snapshot_id: String,
    pub name: String,
    pub homepage: String,
    pub target: Option<String>,
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: Outcome) -> ProbeAttempt {
        ProbeAttempt {
            candidate_url: "https://example.com/.well-known/mcp.json".into(),
            method: "GET".into(),
            status: None,
            elapsed_ms: 5,
            redirect_chain: vec!["https://example.com/.well-known/mcp.json".into()],
            tls: None,
            body: Vec::new(),
            content_type: None,
            etag: None,
            last_modified: None,
            truncated: false,
            outcome,
            tries: 1,
            error_class: None,
            error: None,
        }
    }

    #[test]
    fn test_summary_carries_change_tracking_fields() {
        let mut ok = attempt(Outcome::Success);
        ok.status = Some(200);
        ok.body = b"abc".to_vec();
        ok.etag = Some("\"v1\"".into());
        ok.last_modified = Some("Sat, 06 Sep 2025 08:00:00 GMT".into());
        let result = ProbeResult {
            domain: "example.com".into(),
            attempts: vec![attempt(Outcome::Timeout), ok],
            retained: Some(1),
            notes: Vec::new(),
        };
        let summary = result.summary();
        assert_eq!(summary.body_bytes, 3);
        assert_eq!(
            summary.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(summary.etag.as_deref(), Some("\"v1\""));
        assert_eq!(summary.last_modified.as_deref(), Some("Sat, 06 Sep 2025 08:00:00 GMT"));

        let failed = ProbeResult {
            domain: "example.com".into(),
            attempts: vec![attempt(Outcome::Timeout)],
            retained: Some(0),
            notes: Vec::new(),
        };
        assert_eq!(failed.summary().sha256, None);
    }

    #[test]
    fn test_seed_source_both() {
        let mut t = Target::new("example.com", Provenance::Tranco { rank: 3 });
        assert_eq!(t.seed_source(), SeedSource::Tranco);
        t.add_provenance(Provenance::Registry {
            name: "Example".into(),
            snapshot_id: "snap-1".into(),
        });
        t.add_provenance(Provenance::Tranco { rank: 3 });
        assert_eq!(t.provenance.len(), 2);
        assert_eq!(t.seed_source(), SeedSource::Both);
        assert_eq!(t.tranco_rank(), Some(3));
    }

    #[test]
    fn test_tls_version_parse_and_order() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("tls1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("2.0".parse::<TlsVersion>().is_err());
        assert!(TlsVersion::Tls11 < TlsVersion::Tls12);
        assert_eq!(TlsVersion::Tls13.to_string(), "TLSv1.3");
    }

    #[test]
    fn test_transient_classification() {
        assert!(attempt(Outcome::Timeout).is_transient());
        assert!(attempt(Outcome::HttpError { code: 503 }).is_transient());
        assert!(attempt(Outcome::HttpError { code: 429 }).is_transient());
        assert!(!attempt(Outcome::HttpError { code: 404 }).is_transient());
        assert!(!attempt(Outcome::TlsError).is_transient());

        let mut dns = attempt(Outcome::ConnectionError);
        dns.error_class = Some(ErrorClass::Dns);
        assert!(!dns.is_transient());
        assert_eq!(dns.failure_class(), "connection_error:dns");

        let mut reset = attempt(Outcome::ConnectionError);
        reset.error_class = Some(ErrorClass::Connect);
        assert!(reset.is_transient());
    }

    #[test]
    fn test_failure_rank_prefers_permanent_http() {
        let not_found = attempt(Outcome::HttpError { code: 404 });
        let unavailable = attempt(Outcome::HttpError { code: 503 });
        let tls = attempt(Outcome::TlsError);
        let mut dns = attempt(Outcome::ConnectionError);
        dns.error_class = Some(ErrorClass::Dns);
        assert!(not_found.failure_rank() > unavailable.failure_rank());
        assert!(unavailable.failure_rank() > tls.failure_rank());
        assert!(tls.failure_rank() > dns.failure_rank());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::HttpError { code: 404 }).unwrap();
        assert_eq!(json, r#"{"kind":"http_error","code":404}"#);
        assert_eq!(Outcome::HttpError { code: 404 }.to_string(), "http_error(404)");
    }

    #[test]
    fn test_run_id_is_utc_day() {
        let ts = DateTime::parse_from_rfc3339("2025-09-06T23:10:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let meta = RunMetadata::new(ts, "tranco-X5Y7N", None, "abc");
        assert_eq!(meta.run_id(), "2025-09-06");
        assert_eq!(meta.run_ts_string(), "2025-09-06T23:10:00Z");
    }

    #[test]
    fn test_summary_without_attempts() {
        let result = ProbeResult {
            domain: "example.com".into(),
            attempts: Vec::new(),
            retained: None,
            notes: vec!["cancelled".into()],
        };
        let summary = result.summary();
        assert!(!summary.succeeded);
        assert!(summary.url.is_none());
        assert!(summary.attempts.is_empty());
    }
}
