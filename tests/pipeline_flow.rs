//! Write pipeline integration tests
//!
//! Failure semantics: partial uploads roll back, the original cause wins,
//! and a revert that cannot finish leaves cleanup to the garbage collector.

#[allow(dead_code)]
mod common;

use common::{testbed, LocalFinder, MIB};
use cairn::error::CairnError;
use cairn::head::WritePipeline;
use cairn::types::MapType;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_partial_failure_rolls_back_every_chunk() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 1024 * MIB, 1);
    let c2 = bed.install_cluster("c2", 1024 * MIB, 1);
    let c3 = bed.install_cluster("c3", 1024 * MIB, 1);

    // The middle cluster's master refuses every create.
    bed.net
        .node(&bed.master_address(&c2))
        .unwrap()
        .fail_create
        .store(true, Ordering::SeqCst);

    let data = patterned(96 * MIB as usize);
    let reservation = bed.manager.reserve(96 * MIB).await.unwrap();
    let reservation_id = reservation.id.clone();

    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let result = pipeline.process(data.as_slice()).await;

    // The pipeline reports the create failure, not anything from revert.
    assert!(matches!(result, Err(CairnError::Network(_))));

    // No chunk survived anywhere.
    for cluster in [&c1, &c2, &c3] {
        assert_eq!(bed.net.chunk_count(&bed.master_address(cluster)), 0);
    }

    // Nothing became addressable.
    let hash = cairn::types::content_hash(&data[..32 * MIB as usize]);
    assert!(matches!(
        bed.manager.find(&hash, MapType::Read).await,
        Err(CairnError::NotFound(_))
    ));

    // Discard releases the claims without accounting usage.
    bed.manager.discard(&reservation_id).await.unwrap();
    for cluster in bed.manager.get_clusters().await.unwrap() {
        assert_eq!(cluster.used, 0);
        assert!(cluster.reservations.is_empty());
    }
}

#[tokio::test]
async fn test_short_input_is_fatal() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 1024 * MIB, 1);
    let c2 = bed.install_cluster("c2", 1024 * MIB, 1);

    let reservation = bed.manager.reserve(64 * MIB).await.unwrap();
    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );

    // Only half the reserved bytes arrive.
    let data = patterned(32 * MIB as usize);
    let result = pipeline.process(data.as_slice()).await;

    assert!(matches!(result, Err(CairnError::ShortRead { .. })));

    // The slot that did upload was reverted.
    assert_eq!(bed.net.chunk_count(&bed.master_address(&c1)), 0);
    assert_eq!(bed.net.chunk_count(&bed.master_address(&c2)), 0);
}

#[tokio::test]
async fn test_exhausted_revert_leaves_chunk_to_gc() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 1024 * MIB, 1);
    let c2 = bed.install_cluster("c2", 1024 * MIB, 1);

    // c2 fails the upload; c1 then refuses the revert deletes too.
    bed.net
        .node(&bed.master_address(&c2))
        .unwrap()
        .fail_create
        .store(true, Ordering::SeqCst);
    bed.net
        .node(&bed.master_address(&c1))
        .unwrap()
        .fail_delete
        .store(true, Ordering::SeqCst);

    let data = patterned(64 * MIB as usize);
    let reservation = bed.manager.reserve(64 * MIB).await.unwrap();
    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let result = pipeline.process(data.as_slice()).await;

    // The create failure is the reported cause even though revert also failed.
    assert!(matches!(result, Err(CairnError::Network(_))));

    // The undeletable chunk stays behind for garbage collection.
    assert_eq!(bed.net.chunk_count(&bed.master_address(&c1)), 1);
}

#[tokio::test]
async fn test_successful_pipeline_covers_whole_input() {
    let bed = testbed();
    bed.install_cluster("c1", 1024 * MIB, 1);

    let data = patterned(70 * MIB as usize);
    let reservation = bed.manager.reserve(70 * MIB).await.unwrap();
    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let output = pipeline.process(data.as_slice()).await.unwrap();

    let total: u64 = output.chunks.iter().map(|c| c.size as u64).sum();
    assert_eq!(total, 70 * MIB);

    // Sequences come back sorted and contiguous.
    let sequences: Vec<u16> = output.chunks.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}
