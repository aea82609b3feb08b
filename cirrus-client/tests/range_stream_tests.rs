//! Integration tests for plain ranged reads
//!
//! Run with: cargo test --test range_stream_tests -p cirrus-client

mod common;

use common::{client, payload, store_split, Fault, MemoryCloud, SHARD_A, SHARD_B, WEBLINK_SHARD};
use cirrus_client::ReadStream;
use cirrus_core::error::CirrusError;
use cirrus_core::LogicalFile;
use proptest::prelude::*;
use std::io::SeekFrom;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_plain_file_full_read() {
    let cloud = MemoryCloud::new();
    let data = payload(1000, 1);
    let file = store_split(&cloud, "/docs/report.pdf", &data, &[1000]);
    let client = client(&cloud);

    let out = client.read_range(&file, None, None).await.unwrap();

    assert_eq!(out, data);
    assert_eq!(client.shards().total_pending(), 0);
    assert_eq!(cloud.requests()[0].key, "/docs/report.pdf");
}

#[tokio::test]
async fn test_multi_part_range() {
    let cloud = MemoryCloud::new();
    let data = payload(723, 2);
    let file = store_split(&cloud, "/video/big.mkv", &data, &[300, 300, 123]);
    let client = client(&cloud);

    let out = client.read_range(&file, Some(250), Some(650)).await.unwrap();
    assert_eq!(out, data[250..650]);

    let ranges: Vec<(String, Option<(u64, u64)>)> = cloud
        .requests()
        .into_iter()
        .map(|r| (r.key, r.range))
        .collect();
    assert_eq!(
        ranges,
        vec![
            ("/video/big.mkv.wdmrc.000".to_string(), Some((250, 300))),
            ("/video/big.mkv.wdmrc.001".to_string(), Some((0, 300))),
            ("/video/big.mkv.wdmrc.002".to_string(), Some((0, 50))),
        ]
    );
}

#[tokio::test]
async fn test_weblink_part_uses_weblink_shard() {
    let cloud = MemoryCloud::new();
    let data = payload(200, 3);
    cloud.put_public("AbC/123", data.clone());
    let file = LogicalFile::new("/public/clip.mp4", 200, "").with_public_link("AbC/123");
    let client = client(&cloud);

    let out = client.read_range(&file, Some(10), None).await.unwrap();

    assert_eq!(out, data[10..]);
    assert_eq!(cloud.requests()[0].shard, WEBLINK_SHARD);
}

#[tokio::test]
async fn test_end_is_clamped_to_size() {
    let cloud = MemoryCloud::new();
    let data = payload(100, 4);
    let file = store_split(&cloud, "/a.bin", &data, &[100]);
    let client = client(&cloud);

    let stream = client.open_stream(&file, Some(90), Some(10_000)).await.unwrap();
    assert_eq!(stream.len(), 10);
}

#[tokio::test]
async fn test_seek_then_read() {
    let cloud = MemoryCloud::new();
    let data = payload(1500, 5);
    let file = store_split(&cloud, "/s.bin", &data, &[700, 800]);
    let client = client(&cloud);

    let mut stream = client.open_stream(&file, Some(100), None).await.unwrap();
    assert_eq!(stream.seek(SeekFrom::Start(900)).unwrap(), 900);
    assert_eq!(stream.position(), 900);

    let rest = stream.read_to_end().await.unwrap();
    assert_eq!(rest, data[1000..]);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_retry_after_transient_failure() {
    let cloud = MemoryCloud::new();
    let data = payload(300, 6);
    let file = store_split(&cloud, "/t.bin", &data, &[300]);
    let client = client(&cloud);
    cloud.fail_next(Fault::Transient);

    let out = client.read_range(&file, None, None).await.unwrap();

    assert_eq!(out, data);
    assert_eq!(cloud.request_count(), 2);
    // Connection failures are not the endpoint's fault
    assert!(!client.shards().is_banned(SHARD_A));
    assert!(!client.shards().is_banned(SHARD_B));
}

#[tokio::test]
async fn test_server_error_bans_endpoint() {
    let cloud = MemoryCloud::new();
    let data = payload(300, 7);
    let file = store_split(&cloud, "/b.bin", &data, &[300]);
    let client = client(&cloud);
    cloud.fail_next(Fault::Server(502));

    let out = client.read_range(&file, None, None).await.unwrap();
    assert_eq!(out, data);

    let requests = cloud.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].shard, SHARD_A);
    assert_eq!(requests[1].shard, SHARD_B);
    assert!(client.shards().is_banned(SHARD_A));
    assert_eq!(client.shards().total_pending(), 0);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let cloud = MemoryCloud::new();
    let file = LogicalFile::new("/missing.bin", 100, "");
    let client = client(&cloud);

    let err = client.read_range(&file, None, None).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(cloud.request_count(), 1);
    assert_eq!(client.shards().total_pending(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_surface_as_transport() {
    let cloud = MemoryCloud::new();
    let data = payload(300, 8);
    let file = store_split(&cloud, "/x.bin", &data, &[300]);
    cloud.break_shard(SHARD_A);
    cloud.break_shard(SHARD_B);
    let client = client(&cloud);

    let err = client.read_range(&file, None, None).await.unwrap_err();

    assert!(matches!(err, CirrusError::Transport(_)), "got {:?}", err);
    assert_eq!(cloud.request_count(), 2);
    assert!(client.shards().is_banned(SHARD_A));
    assert!(client.shards().is_banned(SHARD_B));
    assert_eq!(client.shards().total_pending(), 0);
}

#[tokio::test]
async fn test_truncated_response_is_an_error() {
    let cloud = MemoryCloud::new();
    let data = payload(500, 9);
    let file = store_split(&cloud, "/cut.bin", &data, &[500]);
    let client = client(&cloud);
    cloud.fail_next(Fault::Truncate(100));

    let err = client.read_range(&file, None, None).await.unwrap_err();

    assert!(
        matches!(
            err,
            CirrusError::UnexpectedEof {
                expected: 500,
                actual: 100
            }
        ),
        "got {:?}",
        err
    );
    assert_eq!(client.shards().total_pending(), 0);
}

// ============================================================================
// Resource accounting
// ============================================================================

#[tokio::test]
async fn test_drop_mid_stream_releases_allocation() {
    let cloud = MemoryCloud::new();
    let data = payload(1000, 10);
    let file = store_split(&cloud, "/d.bin", &data, &[1000]);
    let client = client(&cloud);

    let mut stream = client.open_stream(&file, None, None).await.unwrap();
    // Opening is lazy
    assert_eq!(client.shards().total_pending(), 0);

    let mut buf = [0u8; 10];
    stream.read(&mut buf).await.unwrap();
    assert_eq!(client.shards().total_pending(), 1);

    drop(stream);
    assert_eq!(client.shards().total_pending(), 0);
}

#[tokio::test]
async fn test_part_switch_releases_previous_allocation() {
    let cloud = MemoryCloud::with_chunk_size(16);
    let data = payload(64, 11);
    let file = store_split(&cloud, "/p.bin", &data, &[32, 32]);
    let client = client(&cloud);

    let mut stream = client.open_stream(&file, None, None).await.unwrap();
    let mut buf = [0u8; 16];
    for _ in 0..3 {
        stream.read(&mut buf).await.unwrap();
        assert!(client.shards().total_pending() <= 1);
    }
    let _ = stream.read_to_end().await.unwrap();
    assert_eq!(client.shards().total_pending(), 0);
}

// ============================================================================
// Chunked reads
// ============================================================================

fn split_sizes(len: usize, cuts: &[usize]) -> Vec<u64> {
    let mut bounds: Vec<usize> = cuts.iter().map(|c| c % len).filter(|c| *c > 0).collect();
    bounds.sort_unstable();
    bounds.dedup();
    bounds.push(len);

    let mut sizes = Vec::new();
    let mut prev = 0;
    for b in bounds {
        sizes.push((b - prev) as u64);
        prev = b;
    }
    sizes
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_small_reads_concatenate_to_full_read(
        len in 1usize..3000,
        cuts in proptest::collection::vec(any::<usize>(), 0..4),
        chunk in 1usize..200,
        buf_size in 1usize..300,
        a in any::<usize>(),
        b in any::<usize>(),
    ) {
        let (start, end) = {
            let (x, y) = (a % (len + 1), b % (len + 1));
            (x.min(y) as u64, x.max(y) as u64)
        };
        let data = payload(len, 12);
        let sizes = split_sizes(len, &cuts);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (small, full) = rt.block_on(async {
            let cloud = MemoryCloud::with_chunk_size(chunk);
            let file = store_split(&cloud, "/prop.bin", &data, &sizes);
            let client = client(&cloud);

            let mut stream = client.open_stream(&file, Some(start), Some(end)).await.unwrap();
            let mut small = Vec::new();
            let mut buf = vec![0u8; buf_size];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                small.extend_from_slice(&buf[..n]);
            }

            let full = client.read_range(&file, Some(start), Some(end)).await.unwrap();
            (small, full)
        });

        prop_assert_eq!(&small, &full);
        prop_assert_eq!(&full[..], &data[start as usize..end as usize]);
    }
}
