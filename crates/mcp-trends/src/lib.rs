// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! MCP Trends measures adoption of the `/.well-known/mcp.json` discovery
//! manifest across a ranked, provenance-tagged set of hosts.
//!
//! A run acquires targets, probes their well-known paths, normalizes any
//! manifest found, classifies its exposure, and appends one record per
//! target to a JSONL dataset.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod exposure;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod recorder;
pub mod signal;

pub use acquisition::{acquire, Acquisition, RankingSnapshot, RegistrySnapshot};
pub use config::ScanConfig;
pub use error::{ScanError, ScanResult};
pub use exposure::{classify, verify_record, ExposureAssessment, ExposureFlag, ExposurePolicy};
pub use manifest::{parse_manifest, Manifest, ParsedManifest};
pub use model::{RunMetadata, RunRecord, Target};
pub use pipeline::{run_scan, Coordinator, RunSummary};
pub use probe::{Fetcher, ProbeEngine, ReqwestFetcher, ScriptedFetcher};
pub use recorder::{RecordSink, RunMarker, RunRecorder};
pub use signal::{RunController, RunSignal};
