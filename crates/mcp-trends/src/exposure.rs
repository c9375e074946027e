// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Exposure classification.
//!
//! A pure function from (probe summary, manifest, policy) to an
//! `ExposureAssessment`. No clock, no network: the same inputs always give
//! the same flags, grade and severity, so stored records can be re-scored
//! offline and compared bit for bit.

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::manifest::{AuthMode, Manifest};
use crate::model::{ProbeSummary, RunRecord, TlsSummary, TlsVersion};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Named risk indicator. Declaration order is the serialized order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureFlag {
    AnonymousAccess,
    DangerousTools,
    StaleManifest,
    WeakTransport,
}

impl ExposureFlag {
    pub const ALL: [ExposureFlag; 4] = [
        ExposureFlag::AnonymousAccess,
        ExposureFlag::DangerousTools,
        ExposureFlag::StaleManifest,
        ExposureFlag::WeakTransport,
    ];

    /// Fixed ranking: dangerous_tools > anonymous_access > weak_transport > stale_manifest.
    pub fn severity(&self) -> Severity {
        match self {
            Self::DangerousTools => Severity::Critical,
            Self::AnonymousAccess => Severity::High,
            Self::WeakTransport => Severity::Medium,
            Self::StaleManifest => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnonymousAccess => "anonymous_access",
            Self::DangerousTools => "dangerous_tools",
            Self::StaleManifest => "stale_manifest",
            Self::WeakTransport => "weak_transport",
        }
    }
}

impl fmt::Display for ExposureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall severity of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Coarse transport grade. `A` is best; ordering follows the letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsGrade {
    A,
    B,
    C,
    D,
    F,
}

/// Result of classifying one target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExposureAssessment {
    pub flags: BTreeSet<ExposureFlag>,
    /// Absent when nothing answered, so there was no transport to grade.
    pub tls_grade: Option<TlsGrade>,
    pub severity: Severity,
}

/// Classifier inputs that come from configuration.
#[derive(Debug, Clone)]
pub struct ExposurePolicy {
    denylist: Vec<Regex>,
    min_version: Vec<u64>,
    tls_floor: TlsVersion,
}

impl ExposurePolicy {
    pub fn new(
        denylist_patterns: &[String],
        min_supported_version: &str,
        tls_floor: TlsVersion,
    ) -> ScanResult<Self> {
        let denylist = denylist_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ScanError::Config(format!("capability pattern {p:?}: {e}")))
            })
            .collect::<ScanResult<Vec<_>>>()?;
        let min_version = parse_version(min_supported_version).ok_or_else(|| {
            ScanError::Config(format!(
                "min_supported_manifest_version {min_supported_version:?} is not a dotted version"
            ))
        })?;
        Ok(Self {
            denylist,
            min_version,
            tls_floor,
        })
    }

    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        Self::new(
            &config.capability_denylist_patterns,
            &config.min_supported_manifest_version,
            config.tls_floor()?,
        )
    }

    fn is_dangerous(&self, capability: &str) -> bool {
        self.denylist.iter().any(|re| re.is_match(capability))
    }

    fn is_stale(&self, version: Option<&str>) -> bool {
        match version.and_then(parse_version) {
            Some(v) => compare_versions(&v, &self.min_version) == Ordering::Less,
            None => true,
        }
    }
}

/// Score one target.
pub fn classify(
    probe: &ProbeSummary,
    manifest: Option<&Manifest>,
    policy: &ExposurePolicy,
) -> ExposureAssessment {
    let mut flags = BTreeSet::new();

    if let Some(m) = manifest {
        if m.auth_mode == AuthMode::None {
            flags.insert(ExposureFlag::AnonymousAccess);
        }
        if m.capabilities.iter().any(|c| policy.is_dangerous(c)) {
            flags.insert(ExposureFlag::DangerousTools);
        }
        if policy.is_stale(m.version.as_deref()) {
            flags.insert(ExposureFlag::StaleManifest);
        }
    }

    if probe.succeeded && is_weak_transport(probe, policy.tls_floor) {
        flags.insert(ExposureFlag::WeakTransport);
    }

    let severity = flags
        .iter()
        .map(ExposureFlag::severity)
        .max()
        .unwrap_or(Severity::None);

    ExposureAssessment {
        flags,
        tls_grade: tls_grade(probe),
        severity,
    }
}

/// Re-score a stored record using only what the record embeds.
pub fn reclassify(record: &RunRecord, policy: &ExposurePolicy) -> ExposureAssessment {
    classify(&record.probe, record.manifest.as_ref(), policy)
}

/// True when re-scoring reproduces the stored assessment exactly.
pub fn verify_record(record: &RunRecord, policy: &ExposurePolicy) -> bool {
    reclassify(record, policy) == record.assessment()
}

fn is_weak_transport(probe: &ProbeSummary, floor: TlsVersion) -> bool {
    if probe.is_plaintext() {
        return true;
    }
    match &probe.tls {
        None => true,
        Some(tls) => !tls.cert_valid || tls.protocol_version.is_some_and(|v| v < floor),
    }
}

/// Grade the transport of the retained attempt; `None` when no response came back.
pub fn tls_grade(probe: &ProbeSummary) -> Option<TlsGrade> {
    if probe.status.is_none() && probe.tls.is_none() {
        return None;
    }
    Some(grade_transport(probe.tls.as_ref()))
}

/// Fixed rubric over protocol version, cipher strength and certificate validity.
pub fn grade_transport(tls: Option<&TlsSummary>) -> TlsGrade {
    let Some(tls) = tls else {
        return TlsGrade::F;
    };

    let mut grade = match tls.protocol_version {
        Some(TlsVersion::Tls13) | Some(TlsVersion::Tls12) => TlsGrade::A,
        Some(TlsVersion::Tls11) | Some(TlsVersion::Tls10) => TlsGrade::C,
        Some(TlsVersion::Ssl3) => TlsGrade::F,
        None => TlsGrade::B,
    };

    match tls.cipher_strength {
        Some(bits) if bits < 112 => grade = grade.max(TlsGrade::D),
        Some(bits) if bits < 128 => grade = grade.max(TlsGrade::C),
        _ => {}
    }

    if !tls.cert_valid {
        grade = grade.max(TlsGrade::D);
    }

    grade
}

/// Parse `1.2.3`, `v0.1`, `2025.06-rc1` style versions into numeric parts.
pub fn parse_version(raw: &str) -> Option<Vec<u64>> {
    let s = raw.trim().trim_start_matches(['v', 'V']);
    if s.is_empty() {
        return None;
    }
    s.split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u64>().ok()
        })
        .collect()
}

/// Compare numeric versions, treating missing components as zero.
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
