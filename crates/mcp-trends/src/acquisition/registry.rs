// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Server registry snapshots (one JSON object per line).

use crate::error::{ScanError, ScanResult};
use serde_json::{Map, Value};
use std::path::Path;

/// A registry server listing, reduced to the fields that can name a host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryServer {
    pub name: String,
    /// `homepage`, else `url`, else `external_url`.
    pub homepage: String,
    /// Explicit target host, when the listing carries one.
    pub target: Option<String>,
    pub url_direct: Option<String>,
    /// `remotes[].url_direct`, in listing order.
    pub remote_urls: Vec<String>,
}

impl RegistryServer {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let remote_urls = obj
            .get("remotes")
            .and_then(Value::as_array)
            .map(|remotes| {
                remotes
                    .iter()
                    .filter_map(|r| r.get("url_direct").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: text("name").unwrap_or_default(),
            homepage: text("homepage")
                .or_else(|| text("url"))
                .or_else(|| text("external_url"))
                .unwrap_or_default(),
            target: text("target"),
            url_direct: text("url_direct"),
            remote_urls,
        }
    }
}

/// One line of a registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEntry {
    Server(RegistryServer),
    /// A line that is not a JSON object; kept so it can be reported.
    Malformed { line: usize, reason: String },
}

/// An immutable, identified registry listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub snapshot_id: String,
    pub entries: Vec<RegistryEntry>,
}

impl RegistrySnapshot {
    pub fn new(snapshot_id: impl Into<String>, entries: Vec<RegistryEntry>) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            entries,
        }
    }

    pub fn load_jsonl(path: &Path, snapshot_id: impl Into<String>) -> ScanResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::SnapshotUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = Self::parse_jsonl(snapshot_id, &text);
        tracing::info!(
            "loaded registry {} with {} entries from {}",
            snapshot.snapshot_id,
            snapshot.entries.len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Parse JSONL. Never fails: bad lines become `Malformed` entries.
    pub fn parse_jsonl(snapshot_id: impl Into<String>, text: &str) -> Self {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(obj)) => RegistryEntry::Server(RegistryServer::from_object(&obj)),
                Ok(_) => RegistryEntry::Malformed {
                    line: lineno + 1,
                    reason: "not_an_object".to_string(),
                },
                Err(e) => {
                    tracing::warn!("registry line {} is not valid JSON: {e}", lineno + 1);
                    RegistryEntry::Malformed {
                        line: lineno + 1,
                        reason: "invalid_json".to_string(),
                    }
                }
            };
            entries.push(entry);
        }
        Self::new(snapshot_id, entries)
    }
}
