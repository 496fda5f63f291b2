use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::config::ProvenanceColumns;
use crate::error::HarvestError;
use crate::store::{ShardListing, Store};
use crate::table::Table;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedShard {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Consolidation {
    pub table: Table,
    pub files_read: usize,
    pub skipped: Vec<SkippedShard>,
    pub rows_before_dedup: usize,
    pub duplicates_removed: usize,
    /// Rows per partition after deduplication.
    pub partition_rows: BTreeMap<String, usize>,
    /// Shard files read per partition.
    pub partition_pages: BTreeMap<String, usize>,
}

impl Consolidation {
    /// Partitions ordered by row count, largest first, ties by name.
    pub fn rows_by_partition(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = self
            .partition_rows
            .iter()
            .map(|(partition, count)| (partition.as_str(), *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        counts
    }

    pub fn multi_page_partitions(&self) -> Vec<(&str, usize)> {
        self.partition_pages
            .iter()
            .filter(|(_, pages)| **pages > 1)
            .map(|(partition, pages)| (partition.as_str(), *pages))
            .collect()
    }
}

/// Reads every committed shard into one deduplicated table.
///
/// Each row is tagged with the partition decoded from its file name and with
/// the file name itself. The filename partition wins over any column of the
/// same name inside the shard. Unreadable shards are logged and skipped.
pub fn consolidate(
    store: &Store,
    columns: &ProvenanceColumns,
) -> Result<Consolidation, HarvestError> {
    let listing = store.list_shards()?;
    consolidate_listing(&listing, columns)
}

pub fn consolidate_listing(
    listing: &ShardListing,
    columns: &ProvenanceColumns,
) -> Result<Consolidation, HarvestError> {
    for name in &listing.ignored {
        tracing::debug!("ignoring {name}: not a shard file name");
    }
    if !listing.staged.is_empty() {
        tracing::info!(
            "{} staged page(s) of unfinished partitions left out",
            listing.staged.len()
        );
    }

    let mut table = Table::default();
    let mut files_read = 0;
    let mut skipped = Vec::new();
    let mut partition_pages = BTreeMap::new();

    for file in &listing.committed {
        let mut shard = match Table::read_csv(file.path.as_std_path()) {
            Ok(shard) => shard,
            Err(err) => {
                tracing::warn!("skipping unreadable shard {}: {err}", file.file_name);
                skipped.push(SkippedShard {
                    file_name: file.file_name.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        tracing::debug!("{}: {} row(s)", file.file_name, shard.len());
        shard.fill_column(&columns.partition, file.name.partition.as_str());
        shard.fill_column(&columns.source_file, &file.file_name);
        table.append(shard);
        files_read += 1;
        *partition_pages
            .entry(file.name.partition.to_string())
            .or_insert(0) += 1;
    }

    let rows_before_dedup = table.len();
    let duplicates_removed = table.dedup();
    if duplicates_removed > 0 {
        tracing::info!("removed {duplicates_removed} duplicate row(s)");
    }

    let mut partition_rows = BTreeMap::new();
    if let Some(index) = table.column_index(&columns.partition) {
        for row in table.rows() {
            if let Some(partition) = &row[index] {
                *partition_rows.entry(partition.clone()).or_insert(0) += 1;
            }
        }
    }

    Ok(Consolidation {
        table,
        files_read,
        skipped,
        rows_before_dedup,
        duplicates_removed,
        partition_rows,
        partition_pages,
    })
}

/// Plain-text collection summary.
pub fn render_summary(consolidation: &Consolidation, collected_at: &str) -> String {
    let rule = "=".repeat(50);
    let thin = "-".repeat(50);
    let mut out = String::new();
    let _ = writeln!(out, "Harvest Collection Summary");
    let _ = writeln!(out, "{rule}\n");
    let _ = writeln!(out, "Collection Date: {collected_at}");
    let _ = writeln!(out, "Total Records: {}", consolidation.table.len());
    let _ = writeln!(out, "Total Partitions: {}", consolidation.partition_rows.len());
    let _ = writeln!(out, "Total Files Processed: {}", consolidation.files_read);
    let _ = writeln!(out, "Files Skipped: {}", consolidation.skipped.len());
    let _ = writeln!(
        out,
        "Duplicate Rows Removed: {}\n",
        consolidation.duplicates_removed
    );

    let multi_page = consolidation.multi_page_partitions();
    if !multi_page.is_empty() {
        let _ = writeln!(out, "Multi-page Partitions: {}", multi_page.len());
        let _ = writeln!(out, "{thin}");
        for (partition, pages) in multi_page {
            let _ = writeln!(out, "{partition}: {pages} pages");
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Records by Partition:");
    let _ = writeln!(out, "{thin}");
    for (partition, count) in consolidation.rows_by_partition() {
        let _ = writeln!(out, "{partition}: {count}");
    }

    if !consolidation.skipped.is_empty() {
        let _ = writeln!(out, "\nSkipped Files:");
        let _ = writeln!(out, "{thin}");
        for skipped in &consolidation.skipped {
            let _ = writeln!(out, "{}: {}", skipped.file_name, skipped.reason);
        }
    }
    out
}

/// Writes the merged dataset and the summary report.
pub fn write_outputs(
    store: &Store,
    consolidation: &Consolidation,
    collected_at: &str,
) -> Result<(), HarvestError> {
    let paths = store.paths();
    consolidation.table.write_csv(&paths.merged)?;
    tracing::info!(
        "wrote {} row(s) to {}",
        consolidation.table.len(),
        paths.merged
    );
    let summary = render_summary(consolidation, collected_at);
    Store::write_bytes_atomic(&paths.summary, summary.as_bytes())?;
    tracing::info!("wrote summary to {}", paths.summary);
    Ok(())
}
