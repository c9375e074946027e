// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline coordinator: acquire → dispatch → probe → parse → classify → record.
//!
//! A fixed pool of tokio workers pulls targets from a shared queue. Each
//! worker produces exactly one `RunRecord` per target and hands it to a single
//! blocking writer over a bounded channel, so the recorder never sees
//! concurrent writes. Target failures are data; only a sink failure stops
//! the run.

use crate::acquisition::{acquire, Acquisition, RankingSnapshot, RegistrySnapshot};
use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::exposure::{classify, ExposureFlag, ExposurePolicy};
use crate::manifest::parse_manifest;
use crate::model::{ProbeResult, RunMetadata, RunRecord, Target};
use crate::probe::{Fetcher, ProbeEngine, ProbeSettings, RequestLimits};
use crate::recorder::{RecordSink, RunRecorder};
use crate::signal::{RunController, RunSignal};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Aggregate view of a finished (or stopped) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Targets handed to the coordinator.
    pub targets: usize,
    /// Records durably appended.
    pub recorded: usize,
    pub manifests_found: usize,
    /// Manifests whose final URL was HTTPS.
    pub https_manifests: usize,
    pub flag_counts: BTreeMap<ExposureFlag, usize>,
    /// The run stopped early (cancel, deadline or sink failure).
    pub cancelled: bool,
}

impl RunSummary {
    fn absorb(&mut self, record: &RunRecord) {
        self.recorded += 1;
        if record.has_manifest {
            self.manifests_found += 1;
            if record.url.as_deref().is_some_and(|u| u.starts_with("https://")) {
                self.https_manifests += 1;
            }
        }
        for flag in &record.exposure_flags {
            *self.flag_counts.entry(*flag).or_default() += 1;
        }
    }
}

/// Runs one scan over an acquired target set.
pub struct Coordinator {
    config: ScanConfig,
    engine: ProbeEngine,
    policy: Arc<ExposurePolicy>,
}

impl Coordinator {
    pub fn new(config: ScanConfig, fetcher: Arc<dyn Fetcher>) -> ScanResult<Self> {
        let policy = Arc::new(ExposurePolicy::from_config(&config)?);
        let engine = ProbeEngine::new(
            fetcher,
            ProbeSettings::from_config(&config),
            Arc::new(RequestLimits::from_config(&config)),
        );
        Ok(Self {
            config,
            engine,
            policy,
        })
    }

    /// Probe every target and record one line per target.
    ///
    /// Consumes the sink: the writer task is its only owner for the rest of
    /// the run. A sink failure cancels `controller` and is returned.
    pub async fn run<S: RecordSink + 'static>(
        &self,
        meta: &RunMetadata,
        acquisition: &Acquisition,
        sink: S,
        controller: &RunController,
    ) -> ScanResult<RunSummary> {
        let mut signal = controller.signal();
        if let Some(budget) = self.config.run_deadline() {
            signal = signal.with_budget(budget);
        }

        let total = acquisition.targets.len();
        let workers = self.config.worker_pool_size.min(total);
        info!(
            "run {} starting: {} targets, {} workers",
            meta.run_id(),
            total,
            workers
        );

        let queue: Arc<Mutex<VecDeque<Target>>> =
            Arc::new(Mutex::new(acquisition.targets.iter().cloned().collect()));
        let (tx, rx) = mpsc::channel::<RunRecord>(self.config.worker_pool_size.max(1) * 2);

        let seeds: Vec<_> = acquisition
            .seeds
            .iter()
            .map(|s| {
                s.to_record(
                    meta.run_ts,
                    meta.registry_snapshot_id.as_deref().unwrap_or_default(),
                )
            })
            .collect();
        let writer = {
            let controller = controller.clone();
            tokio::task::spawn_blocking(move || write_all(sink, seeds, rx, &controller))
        };

        let meta = Arc::new(meta.clone());
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let engine = self.engine.clone();
            let policy = Arc::clone(&self.policy);
            let meta = Arc::clone(&meta);
            let signal = signal.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if signal.is_stopped() {
                        break;
                    }
                    let Some(target) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let record = AssertUnwindSafe(process_target(
                        &engine, &policy, &meta, &target, &signal,
                    ))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!("worker {worker_id} panicked while probing {}", target.domain);
                        internal_error_record(&meta, &target, &policy)
                    });
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task failed: {e}");
            }
        }

        let mut summary = match writer.await {
            Ok(result) => result?,
            Err(e) => {
                warn!("writer task failed: {e}");
                return Err(ScanError::SinkClosed);
            }
        };
        summary.targets = total;
        summary.cancelled = signal.is_stopped() || summary.recorded < total;
        info!(
            "run {} finished: {}/{} recorded, {} manifests ({} https){}",
            meta.run_id(),
            summary.recorded,
            total,
            summary.manifests_found,
            summary.https_manifests,
            if summary.cancelled { ", stopped early" } else { "" }
        );
        Ok(summary)
    }
}

/// Single consumer: writes seeds, then every record as it arrives.
fn write_all<S: RecordSink>(
    mut sink: S,
    seeds: Vec<crate::model::SeedRecord>,
    mut rx: mpsc::Receiver<RunRecord>,
    controller: &RunController,
) -> ScanResult<RunSummary> {
    for seed in &seeds {
        if let Err(e) = sink.append_seed(seed) {
            controller.cancel();
            return Err(e);
        }
    }
    let mut summary = RunSummary::default();
    while let Some(record) = rx.blocking_recv() {
        if let Err(e) = sink.append(&record) {
            warn!("record sink failed, stopping run: {e}");
            controller.cancel();
            return Err(e);
        }
        summary.absorb(&record);
    }
    Ok(summary)
}

/// Probe, parse, and classify one target into its record.
pub async fn process_target(
    engine: &ProbeEngine,
    policy: &ExposurePolicy,
    meta: &RunMetadata,
    target: &Target,
    signal: &RunSignal,
) -> RunRecord {
    let result = engine.probe(target, signal).await;
    let mut notes = result.notes.clone();

    let manifest = match result.retained_attempt().filter(|a| a.outcome.is_success()) {
        Some(attempt) => {
            let parsed = parse_manifest(
                &attempt.body,
                attempt.content_type.as_deref(),
                attempt.truncated,
            );
            notes.extend(parsed.notes);
            parsed.manifest
        }
        None => None,
    };

    let summary = result.summary();
    let assessment = classify(&summary, manifest.as_ref(), policy);
    RunRecord::new(meta, target, summary, manifest, assessment, notes)
}

fn internal_error_record(meta: &RunMetadata, target: &Target, policy: &ExposurePolicy) -> RunRecord {
    let result = ProbeResult {
        domain: target.domain.clone(),
        attempts: Vec::new(),
        retained: None,
        notes: Vec::new(),
    };
    let summary = result.summary();
    let assessment = classify(&summary, None, policy);
    RunRecord::new(
        meta,
        target,
        summary,
        None,
        assessment,
        vec!["internal_error".to_string()],
    )
}

/// Full run from loaded snapshots: validate, claim the run directory,
/// acquire targets, then probe and record them.
///
/// Configuration problems and run-id collisions fail before any request is
/// sent.
pub async fn run_scan(
    config: &ScanConfig,
    ranking: &RankingSnapshot,
    registry: Option<&RegistrySnapshot>,
    run_ts: DateTime<Utc>,
    fetcher: Arc<dyn Fetcher>,
    controller: &RunController,
) -> ScanResult<RunSummary> {
    config.validate()?;
    let meta = RunMetadata::new(
        run_ts,
        ranking.list_id.clone(),
        registry.map(|r| r.snapshot_id.clone()),
        config.fingerprint(),
    );
    let acquisition = acquire(ranking, registry, config.tranco_top_n);
    for note in &acquisition.notes {
        warn!("acquisition: {note}");
    }
    let recorder = RunRecorder::create_with_notes(
        &config.data_dir,
        &meta,
        &acquisition.notes,
        config.overwrite_existing_run,
    )?;

    let coordinator = Coordinator::new(config.clone(), fetcher)?;
    coordinator
        .run(&meta, &acquisition, recorder, controller)
        .await
}
