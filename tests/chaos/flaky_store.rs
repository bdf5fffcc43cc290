//! Chaos test: uploads against a slow, unreliable store.
//!
//! A `FaultyStore` wraps the file store with seeded random latency and
//! scripted failures. Transient faults must be absorbed by retries;
//! permanent ones must fail the run and leave a rerun able to finish.

use std::sync::Arc;

use dedup_cas::Chunker;
use dedup_engine::{DedupPipeline, EngineError, Phase, RetryPolicy, UploadConfig, reassemble};
use dedup_integration_tests::{TestBed, small_config, test_data};
use dedup_store::{ErrorKind, FaultyStore};
use dedup_types::Fingerprint;

fn fingerprints(config: &UploadConfig, data: &[u8]) -> Vec<Fingerprint> {
    let mut fps: Vec<Fingerprint> = Chunker::new(config.engine, config.chunking)
        .unwrap()
        .chunk(data)
        .unwrap()
        .iter()
        .map(|c| c.fingerprint)
        .collect();
    fps.sort();
    fps.dedup();
    fps
}

/// Every third chunk fails twice before landing; the run still succeeds.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_transient_faults_absorbed_by_retries() {
    let bed = TestBed::new();
    let config = UploadConfig {
        workers: 6,
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        },
        ..small_config()
    };
    let data = test_data(400_000);
    let fps = fingerprints(&config, &data);

    let mut faulty = FaultyStore::new(bed.store.clone()).latency(0, 4).seed(7);
    for fp in fps.iter().step_by(3) {
        faulty = faulty.fail_times(&fp.to_string(), 2, ErrorKind::Transient);
    }
    let store = Arc::new(faulty);
    let source = bed.write_source("flaky.bin", &data);

    let summary = DedupPipeline::new(store.clone(), config.clone())
        .unwrap()
        .run(&source, &bed.staging())
        .await
        .unwrap();

    assert!(summary.report.is_complete());
    assert_eq!(summary.report.uploaded.len(), fps.len());
    for fp in fps.iter().step_by(3) {
        assert_eq!(store.put_attempts(&fp.to_string()), 3, "{fp}");
    }
    assert_eq!(bed.read_back(&config, "flaky.bin").await, data);
}

/// A chunk the store keeps rejecting fails the run; once the store
/// recovers, a rerun uploads only that chunk.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_rerun_after_permanent_fault_uploads_remainder() {
    let bed = TestBed::new();
    let config = small_config();
    let data = test_data(300_000);
    let fps = fingerprints(&config, &data);
    let rejected = fps[fps.len() / 2];

    let faulty = Arc::new(
        FaultyStore::new(bed.store.clone())
            .latency(0, 3)
            .seed(11)
            .fail_always(&rejected.to_string(), ErrorKind::Transient),
    );
    let source = bed.write_source("big.iso", &data);

    let err = DedupPipeline::new(faulty.clone(), config.clone())
        .unwrap()
        .run(&source, &bed.staging())
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Phase::ChunkUpload);
    match &err {
        EngineError::ChunkUpload { failed, .. } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, rejected);
        }
        other => panic!("expected ChunkUpload, got {other:?}"),
    }
    assert!(reassemble(bed.store.as_ref(), "dedup", "big.iso").await.is_err());

    // Same store without the fault.
    let summary = bed
        .pipeline(config.clone())
        .run(&source, &bed.staging())
        .await
        .unwrap();
    assert_eq!(summary.report.uploaded, vec![rejected]);
    assert_eq!(summary.report.skipped.len(), fps.len() - 1);
    assert_eq!(bed.read_back(&config, "big.iso").await, data);
}
