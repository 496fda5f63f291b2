use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::consolidate::{self, SkippedShard};
use crate::domain::{TraversalOrder, normalize_partitions};
use crate::error::HarvestError;
use crate::planner::{self, HarvestPlan};
use crate::quality::{self, PartitionQuality, SubsetWrite};
use crate::session::AutomationSession;
use crate::store::Store;
use crate::table::Table;
use crate::traverser::{PartitionOutcome, Traverser};

const COLLECTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub enumerated: usize,
    #[serde(flatten)]
    pub plan: HarvestPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub order: TraversalOrder,
    pub enumerated: usize,
    pub processed: usize,
    /// Partitions left out because a previous run already completed them.
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub pages_written: u32,
    pub outcomes: Vec<PartitionOutcome>,
}

impl HarvestResult {
    pub fn failures(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_completed())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionCount {
    pub partition: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateResult {
    pub merged_path: String,
    pub summary_path: String,
    pub total_rows: usize,
    pub partitions: usize,
    pub files_read: usize,
    pub duplicates_removed: usize,
    pub skipped: Vec<SkippedShard>,
    pub rows_by_partition: Vec<PartitionCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub dataset: String,
    pub report_path: String,
    pub total_rows: usize,
    pub key_fields: Vec<String>,
    pub absent_key_fields: Vec<String>,
    pub subsets: Vec<SubsetWrite>,
    pub top_partitions: Vec<PartitionQuality>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub harvest: HarvestResult,
    pub consolidate: ConsolidateResult,
    pub score: ScoreResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanResult {
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Plan,
    Harvest,
    Consolidate,
    Score,
    Clean,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: AutomationSession> {
    config: ResolvedConfig,
    store: Store,
    session: S,
}

impl<S: AutomationSession> App<S> {
    pub fn new(config: ResolvedConfig, session: S) -> Self {
        let store = Store::new(config.paths.clone());
        Self {
            config,
            store,
            session,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Enumerates the source and works out which partitions still need a
    /// harvest. Nothing is selected or downloaded.
    pub fn plan(
        &mut self,
        order: TraversalOrder,
        sink: &dyn ProgressSink,
    ) -> Result<PlanResult, HarvestError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; enumerating partitions".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let raw = self.session.enumerate_partitions().map_err(|err| match err {
            HarvestError::Enumeration(_) => err,
            other => HarvestError::Enumeration(other.to_string()),
        })?;
        let partitions = normalize_partitions(raw);
        if partitions.is_empty() {
            return Err(HarvestError::NoPartitions);
        }
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} partition(s) listed", partitions.len()),
            elapsed: Some(start.elapsed()),
        });

        let plan = planner::plan(&partitions, order, &self.store)?;
        tracing::info!(
            "{} partition(s): {} already harvested, {} to go ({order})",
            partitions.len(),
            plan.already_done,
            plan.remaining
        );
        if plan.resumable > 0 {
            tracing::info!("{} partition(s) resume from staged pages", plan.resumable);
        }
        for partition in &plan.unlisted {
            tracing::warn!("{partition} has shards but is no longer listed by the source");
        }
        Ok(PlanResult {
            enumerated: partitions.len(),
            plan,
        })
    }

    /// Traverses every partition still in the work list. Partition failures
    /// are reported in the result; only planning errors abort the harvest.
    pub fn harvest(
        &mut self,
        order: TraversalOrder,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        self.store.ensure_shard_dir()?;
        self.store.ensure_download_dir()?;

        let PlanResult { enumerated, plan } = self.plan(order, sink)?;
        let listing = self.store.list_shards()?;
        let traverser = Traverser::new(&self.store);
        let total = plan.work.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, partition) in plan.work.iter().enumerate() {
            tracing::info!("[{}/{total}] {partition}", index + 1);
            sink.event(ProgressEvent {
                message: format!("phase=Traverse; [{}/{total}] {partition}", index + 1),
                elapsed: None,
            });
            let on_disk = listing.pages_for(partition);
            let start = Instant::now();
            let outcome = traverser.traverse(&mut self.session, partition, on_disk, sink);
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Traverse; {partition} {}",
                    if outcome.is_completed() { "completed" } else { "failed" }
                ),
                elapsed: Some(start.elapsed()),
            });
            outcomes.push(outcome);
        }

        let completed = outcomes.iter().filter(|outcome| outcome.is_completed()).count();
        let result = HarvestResult {
            order,
            enumerated,
            processed: outcomes.len(),
            skipped: plan.already_done,
            completed,
            failed: outcomes.len() - completed,
            pages_written: outcomes.iter().map(|outcome| outcome.downloaded).sum(),
            outcomes,
        };
        tracing::info!(
            "harvest finished: {} processed, {} completed, {} failed, {} skipped, {} page(s)",
            result.processed,
            result.completed,
            result.failed,
            result.skipped,
            result.pages_written
        );
        Ok(result)
    }

    pub fn consolidate(&self, sink: &dyn ProgressSink) -> Result<ConsolidateResult, HarvestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Merge; reading shards from {}", self.store.shard_dir()),
            elapsed: None,
        });
        let start = Instant::now();
        let consolidation = consolidate::consolidate(&self.store, &self.config.columns)?;
        let collected_at = Local::now().format(COLLECTED_AT_FORMAT).to_string();
        consolidate::write_outputs(&self.store, &consolidation, &collected_at)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Merge; {} row(s) from {} file(s)",
                consolidation.table.len(),
                consolidation.files_read
            ),
            elapsed: Some(start.elapsed()),
        });

        let paths = self.store.paths();
        Ok(ConsolidateResult {
            merged_path: paths.merged.to_string(),
            summary_path: paths.summary.to_string(),
            total_rows: consolidation.table.len(),
            partitions: consolidation.partition_rows.len(),
            files_read: consolidation.files_read,
            duplicates_removed: consolidation.duplicates_removed,
            rows_by_partition: consolidation
                .rows_by_partition()
                .into_iter()
                .map(|(partition, rows)| PartitionCount {
                    partition: partition.to_string(),
                    rows,
                })
                .collect(),
            skipped: consolidation.skipped,
        })
    }

    pub fn score(&self, sink: &dyn ProgressSink) -> Result<ScoreResult, HarvestError> {
        let paths = self.store.paths();
        if !paths.merged.as_std_path().exists() {
            return Err(HarvestError::DatasetNotFound(
                paths.merged.as_std_path().to_path_buf(),
            ));
        }
        sink.event(ProgressEvent {
            message: format!("phase=Score; loading {}", paths.merged),
            elapsed: None,
        });
        let start = Instant::now();
        let table = Table::read_csv(paths.merged.as_std_path())?;
        let rules = &self.config.quality;
        let analysis = quality::analyze(&table, rules, &self.config.columns);
        let subsets =
            quality::write_outputs(&self.store, &table, &analysis, rules.report_top_partitions)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Score; {} row(s) scored, {} subset(s)",
                analysis.total_rows,
                subsets.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        Ok(ScoreResult {
            dataset: paths.merged.to_string(),
            report_path: paths.quality_report.to_string(),
            total_rows: analysis.total_rows,
            key_fields: analysis.key_fields,
            absent_key_fields: analysis.absent_key_fields,
            subsets,
            top_partitions: analysis
                .partitions
                .into_iter()
                .take(rules.report_top_partitions)
                .collect(),
        })
    }

    /// Harvest, then consolidate, then score.
    pub fn run(
        &mut self,
        order: TraversalOrder,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, HarvestError> {
        let harvest = self.harvest(order, sink)?;
        let consolidate = self.consolidate(sink)?;
        let score = self.score(sink)?;
        Ok(RunResult {
            harvest,
            consolidate,
            score,
        })
    }

    pub fn clean(&self, sink: &dyn ProgressSink) -> Result<CleanResult, HarvestError> {
        sink.event(ProgressEvent {
            message: "phase=Store; removing stray browser downloads".to_string(),
            elapsed: None,
        });
        let removed = self.store.prune_generic_downloads()?;
        for path in &removed {
            tracing::info!("removed {path}");
        }
        Ok(CleanResult {
            removed: removed.into_iter().map(|path| path.to_string()).collect(),
        })
    }
}
