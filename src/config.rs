use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::TraversalOrder;
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub source: SourceEntry,
    #[serde(default)]
    pub order: Option<TraversalOrder>,
    #[serde(default)]
    pub paths: PathsEntry,
    #[serde(default)]
    pub timeouts: TimeoutsEntry,
    #[serde(default)]
    pub selectors: SiteSelectors,
    #[serde(default)]
    pub columns: ProvenanceColumns,
    #[serde(default)]
    pub quality: QualityEntry,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceEntry {
    pub url: String,
    pub webdriver_url: String,
    pub headless: bool,
}

impl Default for SourceEntry {
    fn default() -> Self {
        Self {
            url: "https://www.portlandmaps.com/advanced/?action=assessor".to_string(),
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsEntry {
    pub shard_dir: String,
    pub download_dir: String,
    pub merged: String,
    pub summary: String,
    pub subsets_dir: String,
    pub quality_report: String,
}

impl Default for PathsEntry {
    fn default() -> Self {
        Self {
            shard_dir: "downloads".to_string(),
            download_dir: "downloads/.incoming".to_string(),
            merged: "Portland_Assessor_AllNeighborhoods.csv".to_string(),
            summary: "data_summary.txt".to_string(),
            subsets_dir: "subsets".to_string(),
            quality_report: "subsets/quality_report.txt".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutsEntry {
    pub element_secs: u64,
    pub download_secs: u64,
    pub page_secs: u64,
    pub settle_ms: u64,
    pub poll_ms: u64,
}

impl Default for TimeoutsEntry {
    fn default() -> Self {
        Self {
            element_secs: 10,
            download_secs: 30,
            page_secs: 10,
            settle_ms: 2000,
            poll_ms: 250,
        }
    }
}

/// XPath expressions locating the controls of the search page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub partition_select: String,
    pub search_button: String,
    pub download_button: String,
    pub page_links: String,
    pub next_page: String,
    pub clear_button: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            partition_select: "//select".to_string(),
            search_button: "//button[contains(text(),'Search')]".to_string(),
            download_button: "//button[contains(text(),'CSV')]".to_string(),
            page_links: "//a[text()='2' or text()='3' or text()='4' or text()='5']".to_string(),
            next_page: "//a[@title='Go to next page']".to_string(),
            clear_button: "//button[contains(text(),'Clear')]".to_string(),
        }
    }
}

/// Names of the provenance columns added during consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvenanceColumns {
    pub partition: String,
    pub source_file: String,
}

impl Default for ProvenanceColumns {
    fn default() -> Self {
        Self {
            partition: "neighborhood".to_string(),
            source_file: "source_file".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct QualityEntry {
    pub key_fields: Vec<String>,
    pub thresholds: Vec<ThresholdEntry>,
    pub geography: Option<GeographyRule>,
    pub required: Option<RequiredRule>,
    pub structural: Option<StructuralRule>,
    pub report_top_partitions: usize,
}

impl Default for QualityEntry {
    fn default() -> Self {
        Self {
            key_fields: default_key_fields(),
            thresholds: vec![
                ThresholdEntry::Detailed(ThresholdRule {
                    name: "high_quality_80pct".to_string(),
                    min_score: 80.0,
                }),
                ThresholdEntry::Detailed(ThresholdRule {
                    name: "medium_quality_60pct".to_string(),
                    min_score: 60.0,
                }),
            ],
            geography: Some(GeographyRule {
                name: "portland_focused".to_string(),
                field: "CITY".to_string(),
                target: "PORTLAND".to_string(),
                fallback_top_partitions: 50,
            }),
            required: Some(RequiredRule {
                name: "complete_core_fields".to_string(),
                fields: strings(&[
                    "PROPERTY_ID",
                    "ADDRESS",
                    "OWNER",
                    "MARKET_VALUE",
                    "YEAR_BUILT",
                ]),
            }),
            structural: Some(StructuralRule {
                name: "residential_high_quality".to_string(),
                min_score: 70.0,
                fields: strings(&["YEAR_BUILT", "SQUARE_FEET"]),
            }),
            report_top_partitions: 20,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ThresholdEntry {
    Shorthand(f64),
    Detailed(ThresholdRule),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThresholdRule {
    pub name: String,
    pub min_score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeographyRule {
    pub name: String,
    pub field: String,
    pub target: String,
    #[serde(default = "default_fallback_top_partitions")]
    pub fallback_top_partitions: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RequiredRule {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StructuralRule {
    pub name: String,
    pub min_score: f64,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub webdriver_url: String,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct HarvestPaths {
    pub shard_dir: Utf8PathBuf,
    pub download_dir: Utf8PathBuf,
    pub merged: Utf8PathBuf,
    pub summary: Utf8PathBuf,
    pub subsets_dir: Utf8PathBuf,
    pub quality_report: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub element: Duration,
    pub download: Duration,
    pub page: Duration,
    pub settle: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityRules {
    pub key_fields: Vec<String>,
    pub thresholds: Vec<ThresholdRule>,
    pub geography: Option<GeographyRule>,
    pub required: Option<RequiredRule>,
    pub structural: Option<StructuralRule>,
    pub report_top_partitions: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: SourceSettings,
    pub order: TraversalOrder,
    pub paths: HarvestPaths,
    pub timeouts: SessionTimeouts,
    pub selectors: SiteSelectors,
    pub columns: ProvenanceColumns,
    pub quality: QualityRules,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `harvest.json` in the current directory when no path
    /// is given. A missing default file resolves to the built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let paths = HarvestPaths {
            shard_dir: non_empty_path("paths.shard_dir", config.paths.shard_dir)?,
            download_dir: non_empty_path("paths.download_dir", config.paths.download_dir)?,
            merged: non_empty_path("paths.merged", config.paths.merged)?,
            summary: non_empty_path("paths.summary", config.paths.summary)?,
            subsets_dir: non_empty_path("paths.subsets_dir", config.paths.subsets_dir)?,
            quality_report: non_empty_path("paths.quality_report", config.paths.quality_report)?,
        };
        if paths.download_dir == paths.shard_dir {
            return Err(HarvestError::InvalidConfig(
                "paths.download_dir must differ from paths.shard_dir".to_string(),
            ));
        }

        let timeouts = TimeoutsEntry {
            poll_ms: config.timeouts.poll_ms.max(10),
            ..config.timeouts
        };
        let timeouts = SessionTimeouts {
            element: Duration::from_secs(timeouts.element_secs),
            download: Duration::from_secs(timeouts.download_secs),
            page: Duration::from_secs(timeouts.page_secs),
            settle: Duration::from_millis(timeouts.settle_ms),
            poll: Duration::from_millis(timeouts.poll_ms),
        };

        if config.columns.partition.trim().is_empty()
            || config.columns.source_file.trim().is_empty()
            || config.columns.partition == config.columns.source_file
        {
            return Err(HarvestError::InvalidConfig(
                "provenance column names must be non-empty and distinct".to_string(),
            ));
        }

        let quality = Self::resolve_quality(config.quality)?;

        Ok(ResolvedConfig {
            schema_version,
            source: SourceSettings {
                url: config.source.url,
                webdriver_url: config.source.webdriver_url.trim_end_matches('/').to_string(),
                headless: config.source.headless,
            },
            order: config.order.unwrap_or_default(),
            paths,
            timeouts,
            selectors: config.selectors,
            columns: config.columns,
            quality,
        })
    }

    fn resolve_quality(entry: QualityEntry) -> Result<QualityRules, HarvestError> {
        let thresholds = entry
            .thresholds
            .into_iter()
            .map(|entry| match entry {
                ThresholdEntry::Shorthand(min_score) => ThresholdRule {
                    name: format!("quality_{}pct", min_score.round() as i64),
                    min_score,
                },
                ThresholdEntry::Detailed(rule) => rule,
            })
            .collect::<Vec<_>>();

        let mut names = HashSet::new();
        let mut check_name = |name: &str| -> Result<(), HarvestError> {
            let valid = !name.trim().is_empty()
                && !name.contains(['/', '\\'])
                && name != "quality_report";
            if !valid || !names.insert(name.to_string()) {
                return Err(HarvestError::InvalidConfig(format!(
                    "subset name {name:?} is empty, reserved or repeated"
                )));
            }
            Ok(())
        };

        for rule in &thresholds {
            check_name(&rule.name)?;
            check_score(&rule.name, rule.min_score)?;
        }
        if let Some(rule) = &entry.geography {
            check_name(&rule.name)?;
        }
        if let Some(rule) = &entry.required {
            check_name(&rule.name)?;
        }
        if let Some(rule) = &entry.structural {
            check_name(&rule.name)?;
            check_score(&rule.name, rule.min_score)?;
        }

        Ok(QualityRules {
            key_fields: entry.key_fields,
            thresholds,
            geography: entry.geography,
            required: entry.required,
            structural: entry.structural,
            report_top_partitions: entry.report_top_partitions,
        })
    }
}

pub fn default_key_fields() -> Vec<String> {
    strings(&[
        "PROPERTY_ID",
        "STATE_ID",
        "ADDRESS",
        "OWNER",
        "YEAR_BUILT",
        "MARKET_VALUE",
        "SALE_PRICE",
        "SALE_DATE",
        "SQUARE_FEET",
        "LEGAL_DESCRIPTION",
        "CITY",
        "ZIP_CODE",
        "LATITUDE",
        "LONGITUDE",
        "neighborhood",
    ])
}

fn default_fallback_top_partitions() -> usize {
    50
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn non_empty_path(field: &str, value: String) -> Result<Utf8PathBuf, HarvestError> {
    if value.trim().is_empty() {
        return Err(HarvestError::InvalidConfig(format!("{field} is empty")));
    }
    Ok(Utf8PathBuf::from(value))
}

fn check_score(name: &str, score: f64) -> Result<(), HarvestError> {
    if !(0.0..=100.0).contains(&score) {
        return Err(HarvestError::InvalidConfig(format!(
            "{name}: min_score {score} outside 0..=100"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.order, TraversalOrder::Forward);
        assert_eq!(resolved.paths.shard_dir, Utf8PathBuf::from("downloads"));
        assert_eq!(resolved.quality.thresholds.len(), 2);
        assert_eq!(resolved.quality.key_fields, default_key_fields());
        assert_eq!(resolved.timeouts.element, Duration::from_secs(10));
    }

    #[test]
    fn threshold_shorthand_gets_a_name() {
        let raw = r#"{ "quality": { "thresholds": [90, {"name": "ok", "min_score": 50}] } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.quality.thresholds[0].name, "quality_90pct");
        assert_eq!(resolved.quality.thresholds[1].name, "ok");
    }
}
