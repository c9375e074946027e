// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Append-only JSONL dataset for one run.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/<run_id>/run.json              run metadata, written once
//! <data_dir>/<run_id>/scan_results.jsonl    one RunRecord per line
//! <data_dir>/<run_id>/registry_seeds.jsonl  one SeedRecord per line
//! ```
//!
//! Each record is written with a single `write_all` of a complete line and
//! synced before the next one, so a crash can at worst leave one torn
//! trailing line, which the readers skip.

use crate::error::{ScanError, ScanResult};
use crate::model::{RunMetadata, RunRecord, SeedRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const RUN_MARKER: &str = "run.json";
pub const RESULTS_FILE: &str = "scan_results.jsonl";
pub const SEEDS_FILE: &str = "registry_seeds.jsonl";

/// Counters for what has been written so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub records: usize,
    pub seeds: usize,
}

/// Destination for the records of one run.
///
/// Implementations are driven from a single blocking writer thread.
pub trait RecordSink: Send {
    fn append(&mut self, record: &RunRecord) -> ScanResult<()>;
    fn append_seed(&mut self, seed: &SeedRecord) -> ScanResult<()>;
}

/// Contents of the run marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    #[serde(flatten)]
    pub run: RunMetadata,
    /// Input entries dropped while building the target list.
    #[serde(default)]
    pub acquisition_notes: Vec<String>,
}

/// Writer for one run directory. Exactly one owner per run.
pub struct RunRecorder {
    dir: PathBuf,
    run_ts: String,
    results: File,
    seeds: File,
    seen: HashSet<String>,
    stats: RecorderStats,
}

impl RunRecorder {
    /// Directory that holds the dataset for `meta`.
    pub fn run_dir(data_dir: &Path, meta: &RunMetadata) -> PathBuf {
        data_dir.join(meta.run_id())
    }

    /// Claim the run directory for `meta`.
    ///
    /// Fails with [`ScanError::RunExists`] when the run was already recorded
    /// and `overwrite` is false. With `overwrite`, the old directory is
    /// removed first.
    pub fn create(data_dir: &Path, meta: &RunMetadata, overwrite: bool) -> ScanResult<Self> {
        Self::create_with_notes(data_dir, meta, &[], overwrite)
    }

    /// Like [`RunRecorder::create`], also keeping `acquisition_notes` in the
    /// run marker.
    pub fn create_with_notes(
        data_dir: &Path,
        meta: &RunMetadata,
        acquisition_notes: &[String],
        overwrite: bool,
    ) -> ScanResult<Self> {
        let dir = Self::run_dir(data_dir, meta);
        if overwrite && dir.exists() {
            tracing::warn!("overwriting existing run at {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        let marker_path = dir.join(RUN_MARKER);
        let mut marker = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ScanError::RunExists {
                    run_id: meta.run_id(),
                    path: dir,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let contents = RunMarker {
            run: meta.clone(),
            acquisition_notes: acquisition_notes.to_vec(),
        };
        serde_json::to_writer_pretty(&mut marker, &contents)?;
        marker.write_all(b"\n")?;
        marker.sync_all()?;

        let results = open_append(&dir.join(RESULTS_FILE))?;
        let seeds = open_append(&dir.join(SEEDS_FILE))?;
        tracing::info!("recording run {} into {}", meta.run_id(), dir.display());

        Ok(Self {
            dir,
            run_ts: meta.run_ts_string(),
            results,
            seeds,
            seen: HashSet::new(),
            stats: RecorderStats::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn seeds_path(&self) -> PathBuf {
        self.dir.join(SEEDS_FILE)
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    /// Append one record. A domain may be recorded once per run.
    pub fn append(&mut self, record: &RunRecord) -> ScanResult<()> {
        if self.seen.contains(&record.domain) {
            return Err(ScanError::DuplicateRecord {
                domain: record.domain.clone(),
                run_ts: self.run_ts.clone(),
            });
        }
        write_line(&mut self.results, record)?;
        self.seen.insert(record.domain.clone());
        self.stats.records += 1;
        Ok(())
    }

    pub fn append_seed(&mut self, seed: &SeedRecord) -> ScanResult<()> {
        write_line(&mut self.seeds, seed)?;
        self.stats.seeds += 1;
        Ok(())
    }
}

impl RecordSink for RunRecorder {
    fn append(&mut self, record: &RunRecord) -> ScanResult<()> {
        RunRecorder::append(self, record)
    }

    fn append_seed(&mut self, seed: &SeedRecord) -> ScanResult<()> {
        RunRecorder::append_seed(self, seed)
    }
}

fn open_append(path: &Path) -> ScanResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn write_line<T: Serialize>(file: &mut File, value: &T) -> ScanResult<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(())
}

/// Read every intact line of a JSONL file, skipping torn or foreign lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> ScanResult<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!("skipping unreadable line {} of {}: {e}", lineno + 1, path.display()),
        }
    }
    Ok(out)
}

pub fn read_records(path: &Path) -> ScanResult<Vec<RunRecord>> {
    read_jsonl(path)
}

pub fn read_seeds(path: &Path) -> ScanResult<Vec<SeedRecord>> {
    read_jsonl(path)
}

/// The marker file of a run directory.
pub fn read_marker(run_dir: &Path) -> ScanResult<RunMarker> {
    let file = File::open(run_dir.join(RUN_MARKER))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Run metadata from a run directory's marker file.
pub fn read_metadata(run_dir: &Path) -> ScanResult<RunMetadata> {
    Ok(read_marker(run_dir)?.run)
}
