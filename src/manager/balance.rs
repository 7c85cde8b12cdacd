//! Data balancer: even out committed bytes across clusters.
//!
//! Hashes migrate from clusters above the mean usage to clusters below it,
//! one chunk at a time over the data nodes' move op, until every
//! participant sits within one block of the mean. Participants are frozen
//! for the duration so reservations cannot land mid-migration, and the
//! placement index tracks every moved hash as it goes.

use crate::catalog::Catalog;
use crate::datanode::DataNodeProvider;
use crate::error::{CairnError, Result};
use crate::index::PlacementIndex;
use crate::types::{Cluster, BLOCK_SIZE};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ClusterBalancer {
    catalog: Arc<Catalog>,
    index: Arc<PlacementIndex>,
    nodes: Arc<dyn DataNodeProvider>,
    /// Usage band around the mean inside which a cluster counts as settled.
    tolerance: u64,
}

impl ClusterBalancer {
    pub fn new(
        catalog: Arc<Catalog>,
        index: Arc<PlacementIndex>,
        nodes: Arc<dyn DataNodeProvider>,
    ) -> Self {
        Self {
            catalog,
            index,
            nodes,
            tolerance: BLOCK_SIZE,
        }
    }

    /// Balance the given clusters; an empty list balances the whole catalog.
    pub async fn balance(&self, cluster_ids: &[String]) -> Result<()> {
        let ids = if cluster_ids.is_empty() {
            self.catalog.ids()
        } else {
            cluster_ids.to_vec()
        };
        if ids.len() < 2 {
            return Err(CairnError::InvalidArgument(
                "balancing needs at least two clusters".into(),
            ));
        }

        // Admin-frozen and paralyzed clusters sit out; the rest freeze for
        // the duration so a concurrent reserve cannot pick them.
        let mut participants = Vec::new();
        for id in &ids {
            let cluster = self.catalog.get(id).await?;
            if cluster.frozen || cluster.paralyzed || cluster.master().is_none() {
                debug!(cluster_id = %id, "Skipping unavailable cluster");
                continue;
            }
            participants.push(cluster);
        }
        if participants.len() < 2 {
            return Err(CairnError::NotAvailableForClusterAction(
                "fewer than two balanceable clusters".into(),
            ));
        }

        for cluster in &participants {
            self.catalog.set_freeze(&cluster.id, true).await?;
        }

        let outcome = self.migrate(&mut participants).await;

        for cluster in &participants {
            if let Err(e) = self.catalog.set_freeze(&cluster.id, false).await {
                warn!(cluster_id = %cluster.id, error = %e, "Unfreeze after balance failed");
            }
        }

        outcome
    }

    async fn migrate(&self, participants: &mut [Cluster]) -> Result<()> {
        let mean = participants.iter().map(|c| c.used).sum::<u64>() / participants.len() as u64;
        info!(
            clusters = participants.len(),
            mean, "Balancing clusters around mean usage"
        );

        // Inventory each source master once; sizes drive the accounting.
        let mut inventories: HashMap<String, Vec<(String, u64)>> = HashMap::new();
        for cluster in participants.iter() {
            if cluster.used > mean + self.tolerance {
                let master = cluster.master().expect("participants have masters");
                let container = self
                    .nodes
                    .acquire(&master.address)
                    .sync_list()
                    .await
                    .map_err(|e| {
                        warn!(cluster_id = %cluster.id, error = %e, "Sync list failed");
                        CairnError::Sync(cluster.id.clone())
                    })?;
                let mut items: Vec<(String, u64)> = container
                    .file_items
                    .into_iter()
                    .map(|(hash, item)| (hash, item.size))
                    .collect();
                // Deterministic migration order.
                items.sort();
                inventories.insert(cluster.id.clone(), items);
            }
        }

        let mut moved = 0usize;
        loop {
            let hot = match self.pick_hot(participants, mean) {
                Some(i) => i,
                None => break,
            };
            let cold = match self.pick_cold(participants, mean, hot) {
                Some(i) => i,
                None => break,
            };

            let (hash, size) = match inventories
                .get_mut(&participants[hot].id)
                .and_then(|items| items.pop())
            {
                Some(item) => item,
                None => break,
            };

            let source_address = participants[hot]
                .master()
                .expect("participants have masters")
                .address
                .clone();
            let target_master = participants[cold]
                .master()
                .expect("participants have masters")
                .address
                .clone();

            let pulled = self
                .nodes
                .acquire(&target_master)
                .sync_move(&hash, &source_address)
                .await?;
            if !pulled {
                return Err(CairnError::Sync(format!(
                    "{} would not pull {}",
                    participants[cold].id, hash
                )));
            }

            self.index.remove(&participants[hot].id, [hash.as_str()]);
            self.index.add(&participants[cold].id, [hash.clone()]);

            let source_id = participants[hot].id.clone();
            let target_id = participants[cold].id.clone();
            self.apply_accounting(&source_id, &target_id, size).await?;
            participants[hot].used = participants[hot].used.saturating_sub(size);
            participants[cold].used += size;
            moved += 1;
        }

        info!(moved, "Balance pass complete");
        Ok(())
    }

    fn pick_hot(&self, participants: &[Cluster], mean: u64) -> Option<usize> {
        participants
            .iter()
            .enumerate()
            .filter(|(_, c)| c.used > mean + self.tolerance)
            .max_by_key(|(_, c)| c.used)
            .map(|(i, _)| i)
    }

    fn pick_cold(&self, participants: &[Cluster], mean: u64, hot: usize) -> Option<usize> {
        participants
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != hot && c.used + self.tolerance < mean)
            .min_by_key(|(_, c)| c.used)
            .map(|(i, _)| i)
    }

    /// Persist one migration's usage change, locking in ascending id order.
    async fn apply_accounting(&self, source_id: &str, target_id: &str, size: u64) -> Result<()> {
        let (first, second) = if source_id < target_id {
            (source_id, target_id)
        } else {
            (target_id, source_id)
        };

        let mut first_tx = self.catalog.save(first).await?;
        let mut second_tx = self.catalog.save(second).await?;

        for tx in [&mut first_tx, &mut second_tx] {
            if tx.id == source_id {
                tx.used = tx.used.saturating_sub(size);
            } else {
                tx.used += size;
            }
        }

        first_tx.commit()?;
        second_tx.commit()
    }
}
