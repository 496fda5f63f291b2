use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{Partition, TraversalOrder};
use crate::error::HarvestError;
use crate::store::{ShardListing, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestPlan {
    pub order: TraversalOrder,
    pub work: Vec<Partition>,
    pub already_done: usize,
    pub remaining: usize,
    /// Partitions in the work list holding staged pages from an interrupted run.
    pub resumable: usize,
    /// Partitions with shards that the source no longer lists.
    pub unlisted: Vec<Partition>,
}

/// Partitions that have at least one committed shard and no staged page.
/// Committed and staged pages side by side mean a commit stopped halfway.
pub fn completed_partitions(listing: &ShardListing) -> BTreeSet<Partition> {
    let staged = staged_partitions(listing);
    harvested_partitions(listing)
        .into_iter()
        .filter(|partition| !staged.contains(partition))
        .collect()
}

fn harvested_partitions(listing: &ShardListing) -> BTreeSet<Partition> {
    listing
        .committed
        .iter()
        .map(|file| file.name.partition.clone())
        .collect()
}

fn staged_partitions(listing: &ShardListing) -> BTreeSet<Partition> {
    listing
        .staged
        .iter()
        .map(|file| file.name.partition.clone())
        .collect()
}

pub fn plan(
    partitions: &[Partition],
    order: TraversalOrder,
    store: &Store,
) -> Result<HarvestPlan, HarvestError> {
    let listing = store.list_shards()?;
    Ok(plan_from_listing(partitions, order, &listing))
}

pub fn plan_from_listing(
    partitions: &[Partition],
    order: TraversalOrder,
    listing: &ShardListing,
) -> HarvestPlan {
    let completed = completed_partitions(listing);
    let staged = staged_partitions(listing);

    let mut ordered: Vec<&Partition> = partitions.iter().collect();
    if order == TraversalOrder::Reversed {
        ordered.reverse();
    }

    let work: Vec<Partition> = ordered
        .into_iter()
        .filter(|partition| !completed.contains(*partition))
        .cloned()
        .collect();
    let already_done = partitions.len() - work.len();
    let resumable = work.iter().filter(|partition| staged.contains(partition)).count();

    let listed: BTreeSet<&Partition> = partitions.iter().collect();
    let unlisted = harvested_partitions(listing)
        .into_iter()
        .filter(|partition| !listed.contains(partition))
        .collect();

    HarvestPlan {
        order,
        remaining: work.len(),
        work,
        already_done,
        resumable,
        unlisted,
    }
}
