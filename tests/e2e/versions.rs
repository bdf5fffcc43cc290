//! Integration test: successive versions of files sharing content.

use dedup_engine::UploadConfig;
use dedup_integration_tests::{TestBed, small_config, test_data, test_data_seeded};
use dedup_types::{ChunkingParams, EngineKind};

/// Insert bytes in the middle of a file: chunks away from the edit are reused.
#[tokio::test]
#[ntest::timeout(20000)]
async fn test_inserted_bytes_reuse_surrounding_chunks() {
    for engine in [EngineKind::Rolling, EngineKind::FastCdc] {
        let bed = TestBed::new();
        let config = UploadConfig {
            engine,
            ..small_config()
        };
        let v1 = test_data(400_000);
        let mut v2 = v1.clone();
        v2.splice(200_000..200_000, test_data_seeded(777, 9));

        let first = bed.upload("doc.v1", &v1, config.clone()).await;
        let second = bed.upload("doc.v2", &v2, config.clone()).await;

        assert!(
            second.report.skipped.len() * 10 >= first.distinct_chunks * 8,
            "{engine}: only {} of {} chunks reused",
            second.report.skipped.len(),
            first.distinct_chunks
        );
        assert_eq!(bed.read_back(&config, "doc.v1").await, v1);
        assert_eq!(bed.read_back(&config, "doc.v2").await, v2);
    }
}

/// Appending to a file keeps every chunk before the old tail.
#[tokio::test]
#[ntest::timeout(20000)]
async fn test_append_reuses_prefix_chunks() {
    let bed = TestBed::new();
    let config = small_config();
    let log = test_data(250_000);
    let grown = [log.clone(), test_data_seeded(50_000, 3)].concat();

    let first = bed.upload("app.log", &log, config.clone()).await;
    let second = bed.upload("app.log.1", &grown, config.clone()).await;

    let prefix = &first.manifest.segments[..first.manifest.segments.len() - 1];
    assert_eq!(&second.manifest.segments[..prefix.len()], prefix);
    assert_eq!(bed.read_back(&config, "app.log.1").await, grown);
}

/// Fixed chunks over [a][b][a][c]: three chunk objects, four segments.
#[tokio::test]
#[ntest::timeout(20000)]
async fn test_repeated_block_stored_once() {
    let bed = TestBed::new();
    let config = UploadConfig {
        engine: EngineKind::Fixed,
        chunking: ChunkingParams::new(2048, 4096, 4096),
        ..small_config()
    };
    let a = test_data_seeded(4096, 1);
    let b = test_data_seeded(4096, 2);
    let c = test_data_seeded(4096, 3);
    let data = [a.clone(), b, a, c].concat();

    let summary = bed.upload("abac.img", &data, config.clone()).await;

    let objects: Vec<String> = summary
        .manifest
        .segment_refs()
        .into_iter()
        .map(|r| r.object)
        .collect();
    assert_eq!(objects.len(), 4);
    assert_eq!(objects[0], objects[2]);
    assert_eq!(bed.chunk_objects(&config).await, 3);
    assert_eq!(bed.read_back(&config, "abac.img").await, data);
}

/// Unrelated files share nothing and all read back.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_many_unrelated_files() {
    let bed = TestBed::new();
    let config = small_config();
    let mut total_chunks = 0;
    let mut files = Vec::new();

    for i in 0..10u32 {
        let data = test_data_seeded(20_000 + i as usize * 7_000, i + 100);
        let name = format!("file-{i:02}.bin");
        let summary = bed.upload(&name, &data, config.clone()).await;
        assert_eq!(summary.report.skipped.len(), 0, "{name}");
        total_chunks += summary.distinct_chunks;
        files.push((name, data));
    }

    assert_eq!(bed.chunk_objects(&config).await, total_chunks);
    for (name, data) in &files {
        assert_eq!(&bed.read_back(&config, name).await, data, "{name}");
    }
}
