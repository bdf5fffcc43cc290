//! Integration test: full pipeline over the file-backed store.
//!
//! Sources, staging directories and the store all live in one temp dir.
//! Every test reads the result back through the store's composite read.

use dedup_cas::{deserialize_manifest, serialize_manifest, verify_reassembly};
use dedup_engine::{EngineError, Phase};
use dedup_integration_tests::{TestBed, small_config, test_data};
use dedup_store::{BlobStore, ContainerStatus, ErrorKind, FileStore};

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_round_trip_through_file_store() {
    let bed = TestBed::new();
    let config = small_config();
    let data = test_data(500_000);

    let summary = bed.upload("archive.tar", &data, config.clone()).await;

    assert_eq!(summary.report.container_status, ContainerStatus::Created);
    assert_eq!(bed.chunk_objects(&config).await, summary.distinct_chunks);
    assert_eq!(bed.read_back(&config, "archive.tar").await, data);

    // Chunk objects are plain files named by fingerprint.
    let first = summary.manifest.segments[0].fingerprint;
    let chunk_path = bed.store_root().join("chunks").join(first.to_string());
    assert_eq!(
        std::fs::metadata(chunk_path).unwrap().len(),
        summary.manifest.segments[0].size
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_second_upload_skips_every_chunk() {
    let bed = TestBed::new();
    let config = small_config();
    let data = test_data(300_000);

    let first = bed.upload("same.bin", &data, config.clone()).await;
    let second = bed.upload("same.bin", &data, config.clone()).await;

    assert!(second.report.uploaded.is_empty());
    assert_eq!(second.report.skipped.len(), first.distinct_chunks);
    assert_eq!(second.report.container_status, ContainerStatus::Existing);
    assert_eq!(bed.chunk_objects(&config).await, first.distinct_chunks);
    assert_eq!(bed.read_back(&config, "same.bin").await, data);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_local_manifest_verifies_read_back() {
    let bed = TestBed::new();
    let config = small_config();
    let data = test_data(120_000);

    let summary = bed.upload("verified.bin", &data, config.clone()).await;
    let artifact = serialize_manifest(&summary.manifest).unwrap();
    let manifest = deserialize_manifest(&artifact).unwrap();

    let got = bed.read_back(&config, "verified.bin").await;
    verify_reassembly(&manifest, &got).unwrap();

    let mut tampered = got.clone();
    tampered[1000] ^= 0xFF;
    assert!(verify_reassembly(&manifest, &tampered).is_err());
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_reserved_source_name_fails_before_upload() {
    let bed = TestBed::new();
    let staging = bed.staging();

    for name in ["archive.tmp", "data.manifest.json"] {
        let source = bed.write_source(name, &test_data(50_000));
        let err = bed
            .pipeline(small_config())
            .run(&source, &staging)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Store { .. }), "{name}: got {err:?}");
        assert_eq!(err.phase(), Phase::Setup);
        assert!(err.orphans().is_empty());
    }
    assert!(!staging.exists());
    assert!(bed.store.list("chunks").await.is_err());
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_missing_containers_fail_without_side_effects() {
    let bed = TestBed::strict();
    let source = bed.write_source("data.bin", &test_data(50_000));
    let staging = bed.staging();

    let err = bed
        .pipeline(small_config())
        .run(&source, &staging)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ContainerNotFound { .. }), "got {err:?}");
    assert_eq!(err.phase(), Phase::ChunkUpload);
    assert!(err.orphans().is_empty());
    assert!(!staging.exists());
    assert!(bed.store.list("chunks").await.is_err());
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_rerun_after_manifest_failure_completes() {
    let bed = TestBed::strict();
    let config = small_config();
    let data = test_data(200_000);
    // Only the chunk container exists.
    FileStore::new(bed.store_root(), true)
        .unwrap()
        .ensure_container("chunks")
        .await
        .unwrap();
    let source = bed.write_source("report.pdf", &data);

    let err = bed
        .pipeline(config.clone())
        .run(&source, &bed.staging())
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Phase::ManifestUpload);
    assert!(err.is_store_kind(ErrorKind::ContainerNotFound));
    let orphans = err.orphans().to_vec();
    assert_eq!(orphans.len(), bed.chunk_objects(&config).await);

    // The operator creates the manifest container and runs again.
    FileStore::new(bed.store_root(), true)
        .unwrap()
        .ensure_container("dedup")
        .await
        .unwrap();
    let summary = bed
        .pipeline(config.clone())
        .run(&source, &bed.staging())
        .await
        .unwrap();

    assert!(summary.report.uploaded.is_empty());
    assert_eq!(summary.report.skipped, orphans);
    assert_eq!(bed.read_back(&config, "report.pdf").await, data);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_composite_is_stored_beside_chunks() {
    let bed = TestBed::new();
    let config = small_config();
    let data = test_data(80_000);

    let summary = bed.upload("notes.md", &data, config.clone()).await;

    let names = bed.store.list("dedup").await.unwrap();
    assert_eq!(names, vec!["notes.md".to_string()]);
    let composite = std::fs::read_to_string(
        bed.store_root().join("dedup").join("notes.md.manifest.json"),
    )
    .unwrap();
    for segment in &summary.manifest.segments {
        assert!(composite.contains(&segment.fingerprint.to_string()));
    }
}
