// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Popularity ranking snapshots (Tranco CSV or one domain per line).

use crate::error::{ScanError, ScanResult};
use std::path::Path;

/// One ranked domain as it appears in the snapshot (not yet normalized).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedDomain {
    pub rank: u32,
    pub domain: String,
}

/// An immutable, identified ranking list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingSnapshot {
    pub list_id: String,
    pub entries: Vec<RankedDomain>,
}

impl RankingSnapshot {
    pub fn new(list_id: impl Into<String>, entries: Vec<RankedDomain>) -> Self {
        Self {
            list_id: list_id.into(),
            entries,
        }
    }

    /// Read a snapshot from disk.
    pub fn load(path: &Path, list_id: impl Into<String>) -> ScanResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::SnapshotUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = Self::parse(list_id, &text)?;
        tracing::info!(
            "loaded ranking {} with {} entries from {}",
            snapshot.list_id,
            snapshot.entries.len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Parse `rank,domain` CSV or plain text where the rank is the position
    /// of the line. Blank lines and `#` comments are ignored; a CSV header
    /// on the first line is skipped.
    pub fn parse(list_id: impl Into<String>, text: &str) -> ScanResult<Self> {
        let mut entries = Vec::new();
        let mut position = 0u32;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(',') {
                Some((rank, domain)) => match rank.trim().parse::<u32>() {
                    Ok(rank) => entries.push(RankedDomain {
                        rank,
                        domain: domain.trim().to_string(),
                    }),
                    Err(_) if entries.is_empty() && position == 0 => {}
                    Err(_) => {
                        return Err(ScanError::InvalidSnapshot(format!(
                            "line {}: rank {:?} is not a number",
                            lineno + 1,
                            rank.trim()
                        )))
                    }
                },
                None => {
                    position += 1;
                    entries.push(RankedDomain {
                        rank: position,
                        domain: line.to_string(),
                    });
                }
            }
        }
        Ok(Self::new(list_id, entries))
    }
}
