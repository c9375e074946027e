// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Target acquisition. Merges a ranking snapshot and an optional registry
//! snapshot into one deduplicated, provenance-tagged target list.
//!
//! Loading touches the filesystem; [`acquire`] itself is pure.

pub mod ranking;
pub mod registry;

pub use ranking::{RankedDomain, RankingSnapshot};
pub use registry::{RegistryEntry, RegistryServer, RegistrySnapshot};

use crate::model::{Provenance, SeedRecord, Target};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Companion description of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub name: String,
    pub homepage: String,
    /// Resolved target domain, if any.
    pub target: Option<String>,
    pub notes: Vec<String>,
}

impl SeedEntry {
    pub fn to_record(&self, run_ts: DateTime<Utc>, snapshot_id: &str) -> SeedRecord {
        SeedRecord {
            run_ts,
            registry_snapshot_id: snapshot_id.to_string(),
            name: self.name.clone(),
            homepage: self.homepage.clone(),
            target: self.target.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Output of [`acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Acquisition {
    /// Unique by domain: ranking order, then registry-only domains.
    pub targets: Vec<Target>,
    pub seeds: Vec<SeedEntry>,
    pub notes: Vec<String>,
}

/// Canonical form of a host name, or `None` if `raw` does not name one.
///
/// Lowercases and trims, drops any scheme, credentials, port, path and
/// trailing dot.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some((_, rest)) = s.split_once("://") {
        s = rest.to_string();
    }
    let end = s.find(['/', '?', '#']).unwrap_or(s.len());
    s.truncate(end);
    if let Some((_, host)) = s.rsplit_once('@') {
        s = host.to_string();
    }
    if let Some((host, port)) = s.rsplit_once(':') {
        if !port.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s = host.to_string();
    }
    let s = s.trim_end_matches('.');
    if !s.contains('.') {
        return None;
    }
    let valid_labels = s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    (valid_labels && s.len() <= 253).then(|| s.to_string())
}

/// Resolve the host a registry listing points at.
fn resolve_registry_target(server: &RegistryServer) -> Result<String, &'static str> {
    let candidates = server
        .target
        .iter()
        .chain(server.url_direct.iter())
        .chain(server.remote_urls.iter())
        .chain(std::iter::once(&server.homepage).filter(|h| !h.is_empty()));
    let mut saw_any = false;
    for candidate in candidates {
        saw_any = true;
        if let Some(domain) = normalize_domain(candidate) {
            return Ok(domain);
        }
    }
    Err(if saw_any { "invalid_host" } else { "no_host" })
}

/// Build the target list for a run.
pub fn acquire(
    ranking: &RankingSnapshot,
    registry: Option<&RegistrySnapshot>,
    top_n: usize,
) -> Acquisition {
    let mut out = Acquisition::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut ranked: Vec<&RankedDomain> = ranking.entries.iter().collect();
    ranked.sort_by_key(|e| e.rank);
    for entry in ranked.into_iter().take(top_n) {
        let Some(domain) = normalize_domain(&entry.domain) else {
            out.notes
                .push(format!("ranking_entry_skipped:{}:invalid_domain", entry.rank));
            continue;
        };
        let provenance = Provenance::Tranco { rank: entry.rank };
        match index.get(&domain) {
            Some(&i) => out.targets[i].add_provenance(provenance),
            None => {
                index.insert(domain.clone(), out.targets.len());
                out.targets.push(Target::new(domain, provenance));
            }
        }
    }

    if let Some(registry) = registry {
        for entry in &registry.entries {
            let server = match entry {
                RegistryEntry::Server(server) => server,
                RegistryEntry::Malformed { line, reason } => {
                    out.notes
                        .push(format!("registry_entry_skipped:line{line}:{reason}"));
                    out.seeds.push(SeedEntry {
                        name: String::new(),
                        homepage: String::new(),
                        target: None,
                        notes: vec![format!("malformed:{reason}")],
                    });
                    continue;
                }
            };

            let mut seed = SeedEntry {
                name: server.name.clone(),
                homepage: server.homepage.clone(),
                target: None,
                notes: Vec::new(),
            };
            match resolve_registry_target(server) {
                Ok(domain) => {
                    let provenance = Provenance::Registry {
                        name: server.name.clone(),
                        snapshot_id: registry.snapshot_id.clone(),
                    };
                    match index.get(&domain) {
                        Some(&i) => out.targets[i].add_provenance(provenance),
                        None => {
                            index.insert(domain.clone(), out.targets.len());
                            out.targets.push(Target::new(domain.clone(), provenance));
                        }
                    }
                    seed.target = Some(domain);
                }
                Err(reason) => {
                    out.notes
                        .push(format!("registry_entry_skipped:{}:{reason}", server.name));
                    seed.notes.push(reason.to_string());
                }
            }
            out.seeds.push(seed);
        }
    }

    out
}
