use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use tempfile::Builder;

use crate::config::HarvestPaths;
use crate::domain::Partition;
use crate::error::HarvestError;
use crate::shard::{self, ShardName};

/// Filesystem layout of a harvest: shard directory, browser staging
/// directory and the consolidated outputs.
#[derive(Debug, Clone)]
pub struct Store {
    paths: HarvestPaths,
}

#[derive(Debug, Clone)]
pub struct ShardFile {
    pub name: ShardName,
    pub file_name: String,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ShardListing {
    /// Committed shards, sorted by (partition, page, file name).
    pub committed: Vec<ShardFile>,
    /// Staged pages of partitions that have not reached the end of their results.
    pub staged: Vec<ShardFile>,
    /// Files that are neither, e.g. raw browser downloads.
    pub ignored: Vec<String>,
}

impl ShardListing {
    /// Committed and staged pages of `partition`, committed first.
    pub fn pages_for(&self, partition: &Partition) -> Vec<ShardFile> {
        self.committed
            .iter()
            .chain(&self.staged)
            .filter(|file| &file.name.partition == partition)
            .cloned()
            .collect()
    }
}

impl Store {
    pub fn new(paths: HarvestPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &HarvestPaths {
        &self.paths
    }

    pub fn shard_dir(&self) -> &Utf8Path {
        &self.paths.shard_dir
    }

    pub fn download_dir(&self) -> &Utf8Path {
        &self.paths.download_dir
    }

    pub fn subset_path(&self, name: &str) -> Utf8PathBuf {
        self.paths.subsets_dir.join(format!("{name}.{}", shard::SHARD_EXTENSION))
    }

    pub fn ensure_shard_dir(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.paths.shard_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn ensure_download_dir(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.paths.download_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    /// Scans the shard directory. A directory that does not exist yet lists
    /// as empty; one that exists but cannot be read is an error.
    pub fn list_shards(&self) -> Result<ShardListing, HarvestError> {
        let dir = self.paths.shard_dir.as_std_path();
        if !dir.exists() {
            return Ok(ShardListing::default());
        }
        let entries = fs::read_dir(dir).map_err(|err| {
            HarvestError::ShardDirectory(format!("{}: {err}", self.paths.shard_dir))
        })?;

        let mut listing = ShardListing::default();
        for entry in entries {
            let entry = entry.map_err(|err| {
                HarvestError::ShardDirectory(format!("{}: {err}", self.paths.shard_dir))
            })?;
            let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("skipping non-UTF-8 file name in {}", self.paths.shard_dir);
                continue;
            };
            let path = self.paths.shard_dir.join(&file_name);
            if let Some(name) = shard::decode(&file_name) {
                listing.committed.push(ShardFile {
                    name,
                    file_name,
                    path,
                });
            } else if let Some(name) = shard::decode_staged(&file_name) {
                listing.staged.push(ShardFile {
                    name,
                    file_name,
                    path,
                });
            } else {
                listing.ignored.push(file_name);
            }
        }

        let order = |a: &ShardFile, b: &ShardFile| {
            (&a.name.partition, a.name.page, &a.file_name).cmp(&(
                &b.name.partition,
                b.name.page,
                &b.file_name,
            ))
        };
        listing.committed.sort_by(order);
        listing.staged.sort_by(order);
        listing.ignored.sort();
        Ok(listing)
    }

    /// Writes one fetched page as a staged shard. The write is atomic, so a
    /// staged file on disk always holds a complete page.
    pub fn write_staged_page(
        &self,
        partition: &Partition,
        page: u32,
        fetched_at: NaiveDateTime,
        content: &[u8],
    ) -> Result<ShardFile, HarvestError> {
        let file_name = shard::encode_staged(partition, page, fetched_at);
        let path = self.paths.shard_dir.join(&file_name);
        Self::write_bytes_atomic(&path, content)?;
        Ok(ShardFile {
            name: ShardName {
                partition: partition.clone(),
                page,
                fetched_at: Some(fetched_at),
            },
            file_name,
            path,
        })
    }

    /// Renames a staged page to its committed shard name.
    pub fn promote(&self, staged: &ShardFile) -> Result<ShardFile, HarvestError> {
        let file_name = shard::strip_staged_suffix(&staged.file_name)
            .ok_or_else(|| {
                HarvestError::Filesystem(format!("not a staged shard: {}", staged.file_name))
            })?
            .to_string();
        let path = self.paths.shard_dir.join(&file_name);
        fs::rename(staged.path.as_std_path(), path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("promote {}: {err}", staged.path)))?;
        Ok(ShardFile {
            name: staged.name.clone(),
            file_name,
            path,
        })
    }

    pub fn remove_file(path: &Utf8Path) -> Result<(), HarvestError> {
        fs::remove_file(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("remove {path}: {err}")))
    }

    /// Deletes raw browser downloads left behind in the shard and staging
    /// directories. Returns the removed paths.
    pub fn prune_generic_downloads(&self) -> Result<Vec<Utf8PathBuf>, HarvestError> {
        let mut removed = Vec::new();
        for dir in [&self.paths.shard_dir, &self.paths.download_dir] {
            if !dir.as_std_path().exists() {
                continue;
            }
            let entries = fs::read_dir(dir.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if shard::is_generic_download(&file_name) {
                    let path = dir.join(&file_name);
                    Self::remove_file(&path)?;
                    removed.push(path);
                }
            }
        }
        removed.sort();
        Ok(removed)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".harvest-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store_in(root: &Utf8Path) -> Store {
        Store::new(HarvestPaths {
            shard_dir: root.join("downloads"),
            download_dir: root.join("incoming"),
            merged: root.join("merged.csv"),
            summary: root.join("summary.txt"),
            subsets_dir: root.join("subsets"),
            quality_report: root.join("subsets/quality_report.txt"),
        })
    }

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn missing_shard_dir_lists_empty() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let listing = store_in(&root).list_shards().unwrap();
        assert!(listing.committed.is_empty());
        assert!(listing.staged.is_empty());
    }

    #[test]
    fn staged_pages_promote_to_committed() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = store_in(&root);
        let partition: Partition = "ALAMEDA".parse().unwrap();

        let staged = store
            .write_staged_page(&partition, 1, stamp(), b"ID\n1\n")
            .unwrap();
        let listing = store.list_shards().unwrap();
        assert!(listing.committed.is_empty());
        assert_eq!(listing.staged.len(), 1);
        assert_eq!(listing.pages_for(&partition).len(), 1);

        let committed = store.promote(&staged).unwrap();
        assert_eq!(committed.file_name, "ALAMEDA_page1_20250102_030405.csv");
        let listing = store.list_shards().unwrap();
        assert_eq!(listing.committed.len(), 1);
        assert!(listing.staged.is_empty());
    }

    #[test]
    fn prune_removes_only_generic_downloads() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = store_in(&root);
        store.ensure_shard_dir().unwrap();
        store.ensure_download_dir().unwrap();
        fs::write(root.join("downloads/Assessor-Search-Results.csv"), "x").unwrap();
        fs::write(root.join("incoming/Assessor-Search-Results (1).csv"), "x").unwrap();
        fs::write(root.join("downloads/ALAMEDA_page1_20250102_030405.csv"), "x").unwrap();

        let removed = store.prune_generic_downloads().unwrap();
        assert_eq!(removed.len(), 2);
        let listing = store.list_shards().unwrap();
        assert_eq!(listing.committed.len(), 1);
        assert!(listing.ignored.is_empty());
    }
}
