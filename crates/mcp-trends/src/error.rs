// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run-level error taxonomy.
//!
//! Probe and parse failures never show up here: they are captured as data on
//! the per-target record. `ScanError` covers the two fatal classes only:
//! configuration problems detected before any probing starts, and storage
//! failures that abort a run midway.

use std::path::PathBuf;

/// Process exit codes reported to the operator.
pub mod exit_codes {
    pub const CONFIG: i32 = 2;
    pub const STORAGE: i32 = 3;
}

/// Errors that abort a scan run.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Snapshot unreadable: {path}: {source}")]
    SnapshotUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The run directory already holds a dataset and overwrite was not requested.
    #[error("Run {run_id} already exists at {path} (set overwrite_existing_run to replace it)")]
    RunExists { run_id: String, path: PathBuf },

    #[error("Duplicate record for {domain} in run {run_ts}")]
    DuplicateRecord { domain: String, run_ts: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record sink closed before the run finished")]
    SinkClosed,
}

impl ScanError {
    /// True for configuration-class errors (bad config or input snapshots).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ScanError::Config(_)
                | ScanError::SnapshotUnreadable { .. }
                | ScanError::InvalidSnapshot(_)
        )
    }

    /// Non-zero process status for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_config() {
            exit_codes::CONFIG
        } else {
            exit_codes::STORAGE
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
