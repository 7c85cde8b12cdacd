//! Consistency check of the file metadata tree against the placement index.
//!
//! The metadata tree itself lives behind an external collaborator; the
//! check only needs to walk folders and files, repair the folder tree
//! shape, and mark files whose chunks no longer resolve anywhere.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::index::PlacementIndex;
use crate::types::DataChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One folder in the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Absolute path, `/`-separated, no trailing slash except the root.
    pub full_path: String,
}

/// One file in the metadata tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub chunks: Vec<DataChunk>,
    /// Hashes whose content could not be located anywhere.
    pub missing: Vec<String>,
}

impl FileRecord {
    /// Fold a verification result into the record. Chunks reported missing
    /// mark the file as degraded until their content reappears.
    pub fn ingest(&mut self, found: Vec<String>, missing: Vec<String>) {
        self.missing.retain(|h| !found.contains(h));
        for hash in missing {
            if !self.missing.contains(&hash) {
                self.missing.push(hash);
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// External collaborator walking the file metadata tree.
///
/// `lock_tree` takes the tree-wide exclusive lock; the checker holds it for
/// the whole pass and releases it through `unlock_tree` on every path.
#[async_trait]
pub trait MetadataCursor: Send + Sync {
    async fn lock_tree(&self) -> Result<()>;

    async fn unlock_tree(&self);

    async fn folders(&self) -> Result<Vec<FolderRecord>>;

    async fn replace_folders(&self, folders: Vec<FolderRecord>) -> Result<()>;

    async fn files(&self) -> Result<Vec<FileRecord>>;

    async fn update_file(&self, file: FileRecord) -> Result<()>;
}

/// Repair the folder tree shape: duplicate paths collapse to one record and
/// orphans gain their missing ancestors.
pub fn normalize(folders: Vec<FolderRecord>) -> Vec<FolderRecord> {
    let mut by_path: BTreeMap<String, FolderRecord> = BTreeMap::new();

    for folder in folders {
        let path = canonical_path(&folder.full_path);
        by_path
            .entry(path.clone())
            .or_insert(FolderRecord { full_path: path });
    }

    // Every ancestor of a surviving folder must itself exist.
    let paths: Vec<String> = by_path.keys().cloned().collect();
    for path in paths {
        let mut current = path.as_str();
        while let Some(pos) = current.rfind('/') {
            let parent = if pos == 0 { "/" } else { &current[..pos] };
            by_path
                .entry(parent.to_string())
                .or_insert_with(|| FolderRecord {
                    full_path: parent.to_string(),
                });
            if parent == "/" {
                break;
            }
            current = parent;
        }
    }

    by_path.into_values().collect()
}

fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Walk the metadata tree and mark every file whose chunks cannot be
/// located in any cluster.
pub async fn check_consistency(
    cursor: &dyn MetadataCursor,
    catalog: &Catalog,
    index: &PlacementIndex,
) -> Result<()> {
    cursor.lock_tree().await?;
    let outcome = check_locked(cursor, catalog, index).await;
    cursor.unlock_tree().await;
    outcome
}

async fn check_locked(
    cursor: &dyn MetadataCursor,
    catalog: &Catalog,
    index: &PlacementIndex,
) -> Result<()> {
    let folders = cursor.folders().await?;
    let folder_count = folders.len();
    let normalized = normalize(folders);
    if normalized.len() != folder_count {
        info!(
            before = folder_count,
            after = normalized.len(),
            "Folder tree normalized"
        );
    }
    cursor.replace_folders(normalized).await?;

    let cluster_ids = catalog.ids();
    let mut degraded = 0usize;

    for mut file in cursor.files().await? {
        let missing: Vec<String> = file
            .chunks
            .iter()
            .filter(|chunk| index.find(&cluster_ids, &chunk.hash).is_err())
            .map(|chunk| chunk.hash.clone())
            .collect();

        if missing.is_empty() && file.missing.is_empty() {
            continue;
        }

        if !missing.is_empty() {
            warn!(path = %file.path, missing = missing.len(), "File has unlocatable chunks");
            degraded += 1;
        }
        file.ingest(Vec::new(), missing);
        cursor.update_file(file).await?;
    }

    info!(degraded, "Consistency check complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(path: &str) -> FolderRecord {
        FolderRecord {
            full_path: path.to_string(),
        }
    }

    #[test]
    fn test_normalize_collapses_duplicates() {
        let folders = vec![folder("/a"), folder("/a/"), folder("/a")];
        let normalized = normalize(folders);

        let paths: Vec<&str> = normalized.iter().map(|f| f.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/a"]);
    }

    #[test]
    fn test_normalize_repairs_orphans() {
        let folders = vec![folder("/a/b/c")];
        let normalized = normalize(folders);

        let paths: Vec<&str> = normalized.iter().map(|f| f.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn test_ingest_marks_and_clears() {
        let mut file = FileRecord {
            path: "/f".to_string(),
            chunks: Vec::new(),
            missing: Vec::new(),
        };

        file.ingest(Vec::new(), vec!["h1".to_string()]);
        assert!(file.is_degraded());

        file.ingest(vec!["h1".to_string()], Vec::new());
        assert!(!file.is_degraded());
    }
}
