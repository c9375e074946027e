// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs over a scripted fetcher and a temporary data directory.

use chrono::{DateTime, Utc};
use mcp_trends::acquisition::{RankingSnapshot, RegistrySnapshot};
use mcp_trends::exposure::{verify_record, ExposureFlag, ExposurePolicy, Severity, TlsGrade};
use mcp_trends::model::{sha256_hex, Outcome, SeedSource, TlsSummary, TlsVersion};
use mcp_trends::probe::{FetchResponse, ScriptedFetcher};
use mcp_trends::recorder::{
    read_marker, read_metadata, read_records, read_seeds, RESULTS_FILE, SEEDS_FILE,
};
use mcp_trends::{run_scan, RunController, ScanConfig, ScanError};
use std::path::Path;
use std::sync::Arc;

const EXAMPLE_URL: &str = "https://example.com/.well-known/mcp.json";
const EXAMPLE_BODY: &str = r#"{"name":"Example","version":"0.1","capabilities":["fs.write"],"auth":"none","contact":{"email":"ops@example.com"}}"#;

fn run_ts() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-09-06T06:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn config(data_dir: &Path) -> ScanConfig {
    ScanConfig {
        data_dir: data_dir.to_path_buf(),
        worker_pool_size: 8,
        backoff_base_ms: 10,
        backoff_jitter_max_ms: 0,
        ..ScanConfig::default()
    }
}

fn weak_example_fetcher() -> ScriptedFetcher {
    ScriptedFetcher::new().respond(
        EXAMPLE_URL,
        FetchResponse::json(EXAMPLE_BODY)
        .with_etag("W/\"5f2a\"")
        .with_last_modified("Fri, 05 Sep 2025 22:14:03 GMT")
        .with_tls(TlsSummary {
            protocol_version: Some(TlsVersion::Tls10),
            cipher_strength: Some(56),
            cert_valid: true,
        }),
    )
}

#[tokio::test]
async fn test_example_com_with_weak_tls() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let ranking = RankingSnapshot::parse("tranco-X5Y7N", "1,example.com\n2,bad..example\n").unwrap();

    let summary = run_scan(
        &config,
        &ranking,
        None,
        run_ts(),
        Arc::new(weak_example_fetcher()),
        &RunController::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.manifests_found, 1);
    assert_eq!(summary.flag_counts.get(&ExposureFlag::DangerousTools), Some(&1));

    let run_dir = tmp.path().join("2025-09-06");
    let records = read_records(&run_dir.join(RESULTS_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.domain, "example.com");
    assert_eq!(record.seed_source, SeedSource::Tranco);
    assert_eq!(record.url.as_deref(), Some(EXAMPLE_URL));
    assert_eq!(record.status, 200);
    assert!(record.has_manifest);
    let flags: Vec<&str> = record.exposure_flags.iter().map(ExposureFlag::as_str).collect();
    assert_eq!(flags, vec!["anonymous_access", "dangerous_tools", "weak_transport"]);
    assert_eq!(record.severity, Severity::Critical);
    assert_eq!(record.tls_grade, Some(TlsGrade::D));
    assert_eq!(record.auth.as_deref(), Some("none"));
    assert_eq!(record.run.tranco_list_id, "tranco-X5Y7N");
    assert_eq!(record.run.config_fingerprint, config.fingerprint());

    // Change-tracking fields for run-over-run comparison.
    assert_eq!(record.bytes, Some(EXAMPLE_BODY.len()));
    assert_eq!(record.etag.as_deref(), Some("W/\"5f2a\""));
    assert_eq!(record.last_modified.as_deref(), Some("Fri, 05 Sep 2025 22:14:03 GMT"));
    let digest = record.sha256.as_deref().unwrap();
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, sha256_hex(EXAMPLE_BODY.as_bytes()));
    assert_eq!(record.probe.sha256.as_deref(), Some(digest));

    // Unrecognized manifest fields ride along untouched.
    let manifest = record.manifest.as_ref().unwrap();
    assert!(manifest.extra_fields.contains("contact"));
    assert_eq!(
        manifest.extra_fields.get("contact").unwrap().to_json(),
        r#"{"email":"ops@example.com"}"#
    );

    let meta = read_metadata(&run_dir).unwrap();
    assert_eq!(meta.run_id(), "2025-09-06");
    let marker = read_marker(&run_dir).unwrap();
    assert_eq!(marker.acquisition_notes, vec!["ranking_entry_skipped:2:invalid_domain"]);
}

#[tokio::test]
async fn test_parked_domain_dns_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let ranking = RankingSnapshot::parse("tranco-X5Y7N", "parked-domain.test\n").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());

    run_scan(&config, &ranking, None, run_ts(), fetcher.clone(), &RunController::new())
        .await
        .unwrap();

    // Bare host then www, each exactly once: DNS failures are never retried.
    assert_eq!(
        fetcher.calls(),
        vec![
            "https://parked-domain.test/.well-known/mcp.json",
            "https://www.parked-domain.test/.well-known/mcp.json",
        ]
    );

    let records = read_records(&tmp.path().join("2025-09-06").join(RESULTS_FILE)).unwrap();
    let record = &records[0];
    assert_eq!(record.status, 0);
    assert!(!record.has_manifest);
    assert!(record.exposure_flags.is_empty());
    assert_eq!(record.severity, Severity::None);
    assert_eq!(record.tls_grade, None);
    assert_eq!(record.bytes, None);
    assert_eq!(record.sha256, None);
    assert_eq!(record.etag, None);
    assert_eq!(record.probe.outcome, Some(Outcome::ConnectionError));
    assert!(record.notes.contains(&"connection_error:dns".to_string()));
    assert!(record.notes.contains(&"dns_unresolved".to_string()));
}

#[tokio::test]
async fn test_run_id_collision_fails_before_probing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let ranking = RankingSnapshot::parse("tranco-X5Y7N", "1,example.com\n").unwrap();

    run_scan(
        &config,
        &ranking,
        None,
        run_ts(),
        Arc::new(weak_example_fetcher()),
        &RunController::new(),
    )
    .await
    .unwrap();

    // Same UTC day, later in the day: same run id.
    let later = DateTime::parse_from_rfc3339("2025-09-06T21:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let second = Arc::new(weak_example_fetcher());
    let err = run_scan(&config, &ranking, None, later, second.clone(), &RunController::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::RunExists { ref run_id, .. } if run_id == "2025-09-06"));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(second.total_calls(), 0);

    let records = read_records(&tmp.path().join("2025-09-06").join(RESULTS_FILE)).unwrap();
    assert_eq!(records.len(), 1);

    // Explicit overwrite replaces the dataset.
    let overwrite = ScanConfig {
        overwrite_existing_run: true,
        ..config.clone()
    };
    run_scan(&overwrite, &ranking, None, later, second.clone(), &RunController::new())
        .await
        .unwrap();
    assert_eq!(second.total_calls(), 1);
    let records = read_records(&tmp.path().join("2025-09-06").join(RESULTS_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].run.run_ts, later);
}

#[tokio::test]
async fn test_invalid_config_fails_before_probing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        worker_pool_size: 0,
        ..config(tmp.path())
    };
    let ranking = RankingSnapshot::parse("t", "1,example.com\n").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let err = run_scan(&config, &ranking, None, run_ts(), fetcher.clone(), &RunController::new())
        .await
        .unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.exit_code(), 2);
    assert_eq!(fetcher.total_calls(), 0);
    assert!(!tmp.path().join("2025-09-06").exists());
}

#[tokio::test]
async fn test_mixed_run_is_unique_and_replayable() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        try_http_fallback: true,
        ..config(tmp.path())
    };
    let ranking = RankingSnapshot::parse(
        "tranco-X5Y7N",
        "1,example.com\n2,secure.test\n3,plain.test\n4,missing.test\n5,Example.com\n",
    )
    .unwrap();
    let registry = RegistrySnapshot::parse_jsonl(
        "pulse-2025-09-06",
        r#"{"name":"Secure","homepage":"https://secure.test/"}
{"name":"Remote","remotes":[{"url_direct":"https://mcp.remote.test/sse"}]}
{"name":"Nothing"}
"#,
    );
    let fetcher = weak_example_fetcher()
        .respond(
            "https://secure.test/.well-known/mcp.json",
            FetchResponse::json(r#"{"name":"Secure","version":"2.1","tools":[{"name":"search"}],"auth":{"type":"oauth2"}}"#),
        )
        .fail(
            "https://plain.test/.well-known/mcp.json",
            mcp_trends::probe::FetchError::Connect("connection refused".into()),
        )
        .respond(
            "http://plain.test/.well-known/mcp.json",
            FetchResponse::json(r#"{"name":"Plain","version":"v0.0.9"}"#).with_content_type("text/plain"),
        )
        .respond("https://missing.test/.well-known/mcp.json", FetchResponse::new(404))
        .respond("https://mcp.remote.test/.well-known/mcp.json", FetchResponse::new(503));

    let summary = run_scan(
        &config,
        &ranking,
        Some(&registry),
        run_ts(),
        Arc::new(fetcher),
        &RunController::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary.targets, 5);
    assert_eq!(summary.recorded, 5);
    assert_eq!(summary.manifests_found, 3);
    assert_eq!(summary.https_manifests, 2);

    let run_dir = tmp.path().join("2025-09-06");
    let records = read_records(&run_dir.join(RESULTS_FILE)).unwrap();
    let mut domains: Vec<&str> = records.iter().map(|r| r.domain.as_str()).collect();
    domains.sort();
    assert_eq!(
        domains,
        vec!["example.com", "mcp.remote.test", "missing.test", "plain.test", "secure.test"]
    );

    let by_domain = |d: &str| records.iter().find(|r| r.domain == d).unwrap();

    let secure = by_domain("secure.test");
    assert_eq!(secure.seed_source, SeedSource::Both);
    assert!(secure.exposure_flags.is_empty());
    assert_eq!(secure.tls_grade, Some(TlsGrade::A));
    assert_eq!(secure.auth.as_deref(), Some("oauth2"));

    let plain = by_domain("plain.test");
    assert_eq!(plain.url.as_deref(), Some("http://plain.test/.well-known/mcp.json"));
    assert!(plain.exposure_flags.contains(&ExposureFlag::WeakTransport));
    assert!(plain.exposure_flags.contains(&ExposureFlag::StaleManifest));
    assert_eq!(plain.tls_grade, Some(TlsGrade::F));
    assert!(plain.notes.contains(&"http_fallback".to_string()));
    assert!(plain.notes.contains(&"content_type:text/plain".to_string()));

    let missing = by_domain("missing.test");
    assert_eq!(missing.status, 404);
    assert!(!missing.has_manifest);

    let remote = by_domain("mcp.remote.test");
    assert_eq!(remote.seed_source, SeedSource::Registry);
    assert_eq!(remote.status, 503);
    assert!(remote.notes.contains(&"retries_exhausted".to_string()));

    // Every stored record re-scores to exactly what was written.
    let policy = ExposurePolicy::from_config(&config).unwrap();
    assert!(records.iter().all(|r| verify_record(r, &policy)));

    let seeds = read_seeds(&run_dir.join(SEEDS_FILE)).unwrap();
    assert_eq!(seeds.len(), 3);
    assert!(seeds.iter().all(|s| s.registry_snapshot_id == "pulse-2025-09-06"));
    assert_eq!(seeds[2].target, None);
}

#[tokio::test]
async fn test_cancelled_run_stops_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let ranking = RankingSnapshot::parse("t", "a.test\nb.test\nc.test\n").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let controller = RunController::new();
    controller.cancel();

    let summary = run_scan(&config, &ranking, None, run_ts(), fetcher.clone(), &controller)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.recorded, 0);
    assert_eq!(fetcher.total_calls(), 0);
}
