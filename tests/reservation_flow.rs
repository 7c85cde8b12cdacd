//! Reservation protocol integration tests
//!
//! Exercises reserve / commit / discard against a simulated fleet: slot
//! planning, dedup accounting, capacity limits, and expiry.

#[allow(dead_code)]
mod common;

use common::{testbed, LocalFinder, MIB};
use cairn::error::CairnError;
use cairn::head::WritePipeline;
use cairn::types::MapType;
use std::collections::HashMap;
use std::sync::Arc;

/// Patterned payload whose 32 MiB chunks all hash differently.
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Slot planning
// =============================================================================

#[tokio::test]
async fn test_reserve_splits_across_clusters() {
    let bed = testbed();
    bed.install_cluster("c1", 1024 * MIB, 1);
    bed.install_cluster("c2", 1024 * MIB, 1);

    let map = bed.manager.reserve(80 * MIB).await.unwrap();

    let layout: Vec<(String, u64)> = map
        .clusters
        .iter()
        .map(|s| (s.cluster_id.clone(), s.chunk.size as u64 / MIB))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("c1".to_string(), 32),
            ("c2".to_string(), 32),
            ("c1".to_string(), 16),
        ]
    );

    // Capacity invariant holds while the reservation is pending.
    for cluster in bed.manager.get_clusters().await.unwrap() {
        let reserved: u64 = cluster.reservations.values().sum();
        assert!(cluster.used + reserved <= cluster.size);
    }
}

#[tokio::test]
async fn test_reserve_out_of_space_leaves_catalog_unchanged() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 100 * MIB, 1);
    let c2 = bed.install_cluster("c2", 100 * MIB, 1);

    for cluster in [&c1, &c2] {
        let mut tx = bed.manager.catalog().save(&cluster.id).await.unwrap();
        tx.used = 80 * MIB;
        tx.commit().unwrap();
    }

    let result = bed.manager.reserve(60 * MIB).await;
    assert!(matches!(result, Err(CairnError::NoSpace(_))));

    for cluster in bed.manager.get_clusters().await.unwrap() {
        assert_eq!(cluster.used, 80 * MIB);
        assert!(cluster.reservations.is_empty());
    }
}

// =============================================================================
// Upload, commit, dedup
// =============================================================================

#[tokio::test]
async fn test_upload_commit_and_find() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 1024 * MIB, 1);
    let c2 = bed.install_cluster("c2", 1024 * MIB, 1);

    let data = patterned(80 * MIB as usize);
    let reservation = bed.manager.reserve(80 * MIB).await.unwrap();
    let reservation_id = reservation.id.clone();

    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let output = pipeline.process(data.as_slice()).await.unwrap();

    assert_eq!(output.chunks.len(), 3);
    assert_eq!(output.cluster_usage[&c1.id], 48 * MIB);
    assert_eq!(output.cluster_usage[&c2.id], 32 * MIB);

    bed.manager
        .commit(&reservation_id, &output.cluster_usage)
        .await
        .unwrap();

    // Masters now hold the chunks; a sync publishes them to the index.
    bed.manager.sync_cluster(&c1.id).await.unwrap();
    bed.manager.sync_cluster(&c2.id).await.unwrap();

    let clusters = bed.manager.get_clusters().await.unwrap();
    assert_eq!(clusters[0].used, 48 * MIB);
    assert_eq!(clusters[1].used, 32 * MIB);
    assert!(clusters.iter().all(|c| c.reservations.is_empty()));

    // Every chunk resolves to the cluster that stored it.
    let expected = [&c1.id, &c2.id, &c1.id];
    for (chunk, expected_cluster) in output.chunks.iter().zip(expected) {
        let (cluster_id, _) = bed
            .manager
            .find(&chunk.hash, MapType::Read)
            .await
            .unwrap();
        assert_eq!(&cluster_id, expected_cluster);
    }
}

#[tokio::test]
async fn test_second_identical_upload_is_free() {
    let bed = testbed();
    let c1 = bed.install_cluster("c1", 1024 * MIB, 1);
    let c2 = bed.install_cluster("c2", 1024 * MIB, 1);

    let data = patterned(80 * MIB as usize);

    // First upload.
    let reservation = bed.manager.reserve(80 * MIB).await.unwrap();
    let first_id = reservation.id.clone();
    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let output = pipeline.process(data.as_slice()).await.unwrap();
    bed.manager
        .commit(&first_id, &output.cluster_usage)
        .await
        .unwrap();
    bed.manager.sync_cluster(&c1.id).await.unwrap();
    bed.manager.sync_cluster(&c2.id).await.unwrap();

    let used_before: HashMap<String, u64> = bed
        .manager
        .get_clusters()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.id.clone(), c.used))
        .collect();

    // Second upload of the same bytes: every create deduplicates.
    let reservation = bed.manager.reserve(80 * MIB).await.unwrap();
    let second_id = reservation.id.clone();
    let pipeline = WritePipeline::new(
        reservation,
        Arc::new(LocalFinder {
            manager: Arc::clone(&bed.manager),
        }),
        bed.net.clone(),
    );
    let output = pipeline.process(data.as_slice()).await.unwrap();

    assert!(output.cluster_usage.values().all(|&bytes| bytes == 0));

    bed.manager
        .commit(&second_id, &output.cluster_usage)
        .await
        .unwrap();

    for cluster in bed.manager.get_clusters().await.unwrap() {
        assert_eq!(cluster.used, used_before[&cluster.id]);
        assert!(cluster.reservations.is_empty());
    }
}

// =============================================================================
// Commit-xor-discard
// =============================================================================

#[tokio::test]
async fn test_discard_leaves_used_untouched() {
    let bed = testbed();
    bed.install_cluster("c1", 1024 * MIB, 1);

    let map = bed.manager.reserve(40 * MIB).await.unwrap();
    bed.manager.discard(&map.id).await.unwrap();

    let cluster = bed.manager.get_cluster("c1").await.unwrap();
    assert_eq!(cluster.used, 0);
    assert!(cluster.reservations.is_empty());
}

#[tokio::test]
async fn test_commit_after_discard_is_rejected() {
    let bed = testbed();
    bed.install_cluster("c1", 1024 * MIB, 1);

    let map = bed.manager.reserve(40 * MIB).await.unwrap();
    bed.manager.discard(&map.id).await.unwrap();

    let result = bed
        .manager
        .commit(&map.id, &HashMap::from([("c1".to_string(), 40 * MIB)]))
        .await;

    assert!(matches!(result, Err(CairnError::ReservationNotFound(_))));
    assert_eq!(bed.manager.get_cluster("c1").await.unwrap().used, 0);
}

#[tokio::test]
async fn test_expiry_sweep_discards_stale_reservations() {
    let bed = common::testbed_with_ttl(std::time::Duration::ZERO);
    bed.install_cluster("c1", 1024 * MIB, 1);

    let map = bed.manager.reserve(40 * MIB).await.unwrap();
    assert!(!bed
        .manager
        .get_cluster("c1")
        .await
        .unwrap()
        .reservations
        .is_empty());

    bed.manager.sweep_expired_reservations().await;

    let cluster = bed.manager.get_cluster("c1").await.unwrap();
    assert!(cluster.reservations.is_empty());
    assert_eq!(cluster.used, 0);

    // The swept reservation is spent; a late commit cannot revive it.
    let result = bed.manager.commit(&map.id, &HashMap::new()).await;
    assert!(matches!(result, Err(CairnError::ReservationNotFound(_))));
}
