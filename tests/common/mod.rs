#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;

use assessor_harvest::config::{Config, ConfigLoader, PathsEntry, ResolvedConfig};
use assessor_harvest::domain::Partition;
use assessor_harvest::error::HarvestError;
use assessor_harvest::session::AutomationSession;

/// Config whose every output lives under `root`.
pub fn config_in(root: &Path) -> ResolvedConfig {
    config_with(root, Config::default())
}

pub fn config_with(root: &Path, config: Config) -> ResolvedConfig {
    let path = |name: &str| root.join(name).to_string_lossy().into_owned();
    ConfigLoader::resolve_config(Config {
        paths: PathsEntry {
            shard_dir: path("shards"),
            download_dir: path("incoming"),
            merged: path("merged.csv"),
            summary: path("data_summary.txt"),
            subsets_dir: path("subsets"),
            quality_report: path("subsets/quality_report.txt"),
        },
        ..config
    })
    .unwrap()
}

/// Scripted search site: each partition maps to its result pages.
#[derive(Default)]
pub struct MockSession {
    pub listing: Vec<String>,
    pub results: HashMap<String, Vec<String>>,
    pub fail_search: HashSet<String>,
    pub fail_download: Option<(String, u32)>,
    selected: Option<String>,
    page: u32,
    pub downloads: Vec<(String, u32)>,
    pub resets: usize,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, code: &str, pages: &[&str]) -> Self {
        self.listing.push(code.to_string());
        self.results.insert(
            code.to_uppercase(),
            pages.iter().map(|page| page.to_string()).collect(),
        );
        self
    }

    fn pages(&self) -> Result<&Vec<String>, HarvestError> {
        self.selected
            .as_ref()
            .and_then(|code| self.results.get(code))
            .ok_or_else(|| HarvestError::Session("no partition selected".to_string()))
    }
}

impl AutomationSession for MockSession {
    fn enumerate_partitions(&mut self) -> Result<Vec<String>, HarvestError> {
        Ok(self.listing.clone())
    }

    fn select_partition(&mut self, partition: &Partition) -> Result<(), HarvestError> {
        if !self.results.contains_key(partition.as_str()) {
            return Err(HarvestError::Session(format!("no option {partition}")));
        }
        self.selected = Some(partition.to_string());
        self.page = 1;
        Ok(())
    }

    fn submit_search(&mut self) -> Result<(), HarvestError> {
        match &self.selected {
            Some(code) if self.fail_search.contains(code) => {
                Err(HarvestError::Timeout("results table".to_string()))
            }
            Some(_) => Ok(()),
            None => Err(HarvestError::Session("nothing selected".to_string())),
        }
    }

    fn is_paginated(&mut self) -> Result<bool, HarvestError> {
        Ok(self.pages()?.len() > 1)
    }

    fn download_current_page(&mut self) -> Result<Vec<u8>, HarvestError> {
        let code = self.selected.clone().unwrap_or_default();
        if self.fail_download.as_ref() == Some(&(code.clone(), self.page)) {
            return Err(HarvestError::Timeout("CSV download".to_string()));
        }
        let content = self.pages()?[self.page as usize - 1].clone();
        self.downloads.push((code, self.page));
        Ok(content.into_bytes())
    }

    fn advance_to_next_page(&mut self) -> Result<bool, HarvestError> {
        let total = self.pages()?.len() as u32;
        if self.page < total {
            self.page += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reset_session(&mut self) -> Result<(), HarvestError> {
        self.resets += 1;
        self.selected = None;
        self.page = 0;
        Ok(())
    }
}
