use std::collections::BTreeMap;
use std::fmt;

use chrono::Local;
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::Partition;
use crate::error::HarvestError;
use crate::session::{AutomationSession, SessionCheckout};
use crate::shard;
use crate::store::{ShardFile, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    Selecting,
    Searched,
    SinglePage,
    MultiPage,
    FetchingPage(u32),
    CheckingNext(u32),
    Done(u32),
    Failed,
}

impl fmt::Display for TraversalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalState::Selecting => write!(f, "selecting"),
            TraversalState::Searched => write!(f, "searched"),
            TraversalState::SinglePage => write!(f, "single_page"),
            TraversalState::MultiPage => write!(f, "multi_page"),
            TraversalState::FetchingPage(page) => write!(f, "fetching_page({page})"),
            TraversalState::CheckingNext(page) => write!(f, "checking_next({page})"),
            TraversalState::Done(pages) => write!(f, "done({pages})"),
            TraversalState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    pub partition: String,
    pub status: OutcomeStatus,
    /// Pages held for the partition at the end: committed on success,
    /// staged on failure.
    pub pages: u32,
    pub downloaded: u32,
    pub reused: u32,
    pub shard_files: Vec<String>,
    pub failed_in: Option<String>,
    pub error: Option<String>,
}

impl PartitionOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

struct PartitionRun {
    partition: Partition,
    paginated: bool,
    /// Pages on disk by number. Entries are staged unless a previous commit
    /// was cut short after promoting them.
    on_disk: BTreeMap<u32, ShardFile>,
    downloaded: u32,
    reused: u32,
    error: Option<(TraversalState, HarvestError)>,
}

pub struct Traverser<'a> {
    store: &'a Store,
}

impl<'a> Traverser<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Runs one partition to `Done` or `Failed`. `on_disk` are pages left by
    /// an earlier, unfinished traversal of the same partition. Errors never
    /// escape: they end the partition and are reported in the outcome.
    pub fn traverse<S: AutomationSession + ?Sized>(
        &self,
        session: &mut S,
        partition: &Partition,
        on_disk: Vec<ShardFile>,
        sink: &dyn ProgressSink,
    ) -> PartitionOutcome {
        let mut run = PartitionRun {
            partition: partition.clone(),
            paginated: false,
            on_disk: on_disk
                .into_iter()
                .map(|file| (file.name.page, file))
                .collect(),
            downloaded: 0,
            reused: 0,
            error: None,
        };
        if !run.on_disk.is_empty() {
            tracing::info!(
                "{partition}: resuming with {} page(s) on disk",
                run.on_disk.len()
            );
        }

        let mut checkout = SessionCheckout::new(session, partition.clone());
        let mut state = TraversalState::Selecting;
        loop {
            let next = self.step(state, &mut checkout, &mut run, sink);
            tracing::debug!("{partition}: {state} -> {next}");
            state = next;
            match state {
                TraversalState::Done(pages) => {
                    return match self.commit(&mut run, pages) {
                        Ok(committed) => {
                            tracing::info!("{partition}: done, {pages} page(s) committed");
                            PartitionOutcome {
                                partition: partition.to_string(),
                                status: OutcomeStatus::Completed,
                                pages,
                                downloaded: run.downloaded,
                                reused: run.reused,
                                shard_files: committed,
                                failed_in: None,
                                error: None,
                            }
                        }
                        Err(err) => {
                            run.error = Some((state, err));
                            failed_outcome(run)
                        }
                    };
                }
                TraversalState::Failed => return failed_outcome(run),
                _ => {}
            }
        }
    }

    fn step<S: AutomationSession + ?Sized>(
        &self,
        state: TraversalState,
        session: &mut SessionCheckout<'_, S>,
        run: &mut PartitionRun,
        sink: &dyn ProgressSink,
    ) -> TraversalState {
        let result = match state {
            TraversalState::Selecting => session
                .select_partition(&run.partition)
                .and_then(|()| session.submit_search())
                .map(|()| TraversalState::Searched),
            TraversalState::Searched => session.is_paginated().map(|paginated| {
                run.paginated = paginated;
                if paginated {
                    tracing::info!("{}: multiple pages", run.partition);
                    TraversalState::MultiPage
                } else {
                    tracing::info!("{}: single page", run.partition);
                    TraversalState::SinglePage
                }
            }),
            TraversalState::SinglePage | TraversalState::MultiPage => {
                Ok(TraversalState::FetchingPage(1))
            }
            TraversalState::FetchingPage(page) => self
                .fetch_page(session, run, page, sink)
                .map(|()| TraversalState::CheckingNext(page)),
            TraversalState::CheckingNext(page) if !run.paginated => {
                Ok(TraversalState::Done(page))
            }
            TraversalState::CheckingNext(page) => {
                session.advance_to_next_page().map(|advanced| {
                    if advanced {
                        tracing::debug!("{}: moving to page {}", run.partition, page + 1);
                        TraversalState::FetchingPage(page + 1)
                    } else {
                        tracing::info!("{}: last page reached", run.partition);
                        TraversalState::Done(page)
                    }
                })
            }
            TraversalState::Done(_) | TraversalState::Failed => Ok(state),
        };

        result.unwrap_or_else(|err| {
            tracing::warn!("{}: failed while {state}: {err}", run.partition);
            run.error = Some((state, err));
            TraversalState::Failed
        })
    }

    fn fetch_page<S: AutomationSession + ?Sized>(
        &self,
        session: &mut SessionCheckout<'_, S>,
        run: &mut PartitionRun,
        page: u32,
        sink: &dyn ProgressSink,
    ) -> Result<(), HarvestError> {
        if run.on_disk.contains_key(&page) {
            tracing::info!("{}: page {page} already on disk, not downloading", run.partition);
            run.reused += 1;
            return Ok(());
        }

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} page {page}", run.partition),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let content = session.download_current_page()?;
        if content.is_empty() {
            return Err(HarvestError::Session(format!(
                "page {page} downloaded as an empty file"
            )));
        }
        let fetched_at = Local::now().naive_local();
        let file = self
            .store
            .write_staged_page(&run.partition, page, fetched_at, &content)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; staged {}", file.file_name),
            elapsed: Some(start.elapsed()),
        });
        run.downloaded += 1;
        run.on_disk.insert(page, file);
        Ok(())
    }

    /// Promotes pages `1..=pages` and drops pages beyond the last one, which
    /// belong to an earlier, longer result set. Pages a cut-short commit
    /// already promoted are kept as they are.
    fn commit(&self, run: &mut PartitionRun, pages: u32) -> Result<Vec<String>, HarvestError> {
        let stale: Vec<u32> = run.on_disk.range(pages + 1..).map(|(page, _)| *page).collect();
        for page in stale {
            if let Some(file) = run.on_disk.remove(&page) {
                tracing::info!("{}: discarding stale page {page}", run.partition);
                Store::remove_file(&file.path)?;
            }
        }

        let mut committed = Vec::new();
        while let Some((page, file)) = run.on_disk.pop_first() {
            if shard::strip_staged_suffix(&file.file_name).is_none() {
                committed.push(file.file_name);
                continue;
            }
            match self.store.promote(&file) {
                Ok(promoted) => committed.push(promoted.file_name),
                Err(err) => {
                    run.on_disk.insert(page, file);
                    let left: Vec<&str> = run
                        .on_disk
                        .values()
                        .map(|file| file.file_name.as_str())
                        .collect();
                    tracing::warn!(
                        "{}: commit stopped after {} page(s), still staged: {}",
                        run.partition,
                        committed.len(),
                        left.join(", ")
                    );
                    return Err(err);
                }
            }
        }
        Ok(committed)
    }
}

fn failed_outcome(run: PartitionRun) -> PartitionOutcome {
    let (failed_in, error) = match run.error {
        Some((state, err)) => (Some(state.to_string()), Some(err.to_string())),
        None => (None, None),
    };
    PartitionOutcome {
        partition: run.partition.to_string(),
        status: OutcomeStatus::Failed,
        pages: run.on_disk.len() as u32,
        downloaded: run.downloaded,
        reused: run.reused,
        shard_files: run.on_disk.values().map(|file| file.file_name.clone()).collect(),
        failed_in,
        error,
    }
}
