//! Reservation planning: turning a byte count into cluster slots.
//!
//! A reservation is a pending claim on capacity, recorded against each
//! chosen cluster but never added to `used` until commit. The plan is
//! greedy and deterministic: every slot goes to the least-loaded eligible
//! cluster at that moment, ties resolved by cluster id, so the same catalog
//! state always yields the same plan.

use crate::error::{CairnError, Result};
use crate::types::{ChunkFrame, Cluster, ClusterSlot, ReservationMap, BLOCK_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Build a placement plan over the given working copies and record the
/// reservation on each chosen cluster.
///
/// Callers run this inside a whole-catalog transaction: on error the
/// transaction is dropped and no cluster keeps the partial claim.
pub fn plan(size: u64, clusters: &mut [Cluster]) -> Result<ReservationMap> {
    if size == 0 {
        return Err(CairnError::InvalidArgument("reservation of zero bytes".into()));
    }

    let eligible: Vec<usize> = clusters
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.frozen && !c.paralyzed && c.master().is_some())
        .map(|(i, _)| i)
        .collect();

    let total_available: u64 = eligible.iter().map(|&i| clusters[i].available()).sum();
    if total_available < size {
        return Err(CairnError::NoSpace(size));
    }

    let reservation_id = Uuid::new_v4().to_string();
    let mut slots = Vec::new();
    let mut remaining = size;
    let mut offset = 0u64;
    let mut sequence = 0u16;

    while remaining > 0 {
        // Least-loaded first; the running reservation feeds back into the
        // weight so consecutive slots spread across equally-loaded clusters.
        let chosen = eligible
            .iter()
            .copied()
            .filter(|&i| clusters[i].available() > 0)
            .min_by(|&a, &b| {
                clusters[a]
                    .weight()
                    .partial_cmp(&clusters[b].weight())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| clusters[a].id.cmp(&clusters[b].id))
            })
            .ok_or(CairnError::NoSpace(size))?;

        let cluster = &mut clusters[chosen];
        let take = BLOCK_SIZE.min(remaining).min(cluster.available());

        let address = cluster
            .master()
            .map(|m| m.address.clone())
            .expect("eligible cluster has a master");

        slots.push(ClusterSlot {
            cluster_id: cluster.id.clone(),
            address,
            chunk: ChunkFrame {
                sequence,
                index: offset,
                size: take as u32,
            },
        });

        *cluster
            .reservations
            .entry(reservation_id.clone())
            .or_insert(0) += take;

        sequence += 1;
        offset += take;
        remaining -= take;
    }

    Ok(ReservationMap {
        id: reservation_id,
        clusters: slots,
    })
}

/// Issue times of live reservations, feeding the expiry sweep.
///
/// The per-cluster reservation maps stay `id -> bytes`; only the sweep needs
/// to know when a reservation was handed out.
#[derive(Default)]
pub struct ReservationTracker {
    issued: Mutex<HashMap<String, Instant>>,
}

impl ReservationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, reservation_id: &str) {
        self.issued
            .lock()
            .insert(reservation_id.to_string(), Instant::now());
    }

    pub fn untrack(&self, reservation_id: &str) {
        self.issued.lock().remove(reservation_id);
    }

    /// Reservations older than the TTL, removed from the tracker.
    pub fn take_expired(&self, ttl: Duration) -> Vec<String> {
        let mut issued = self.issued.lock();
        let expired: Vec<String> = issued
            .iter()
            .filter(|(_, at)| at.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            issued.remove(id);
        }
        expired
    }
}
