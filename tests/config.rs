use std::fs;

use assessor_harvest::config::{Config, ConfigLoader, ThresholdEntry};
use assessor_harvest::domain::TraversalOrder;
use assessor_harvest::error::HarvestError;
use assert_matches::assert_matches;
use std::time::Duration;

#[test]
fn loads_partial_file_over_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    fs::write(
        &path,
        r#"{
            "order": "reversed",
            "source": { "headless": true },
            "paths": { "shard_dir": "shards" },
            "timeouts": { "download_secs": 90 },
            "quality": { "thresholds": [75], "geography": null }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.order, TraversalOrder::Reversed);
    assert!(resolved.source.headless);
    assert_eq!(resolved.paths.shard_dir.as_str(), "shards");
    assert_eq!(resolved.paths.merged.as_str(), "Portland_Assessor_AllNeighborhoods.csv");
    assert_eq!(resolved.timeouts.download, Duration::from_secs(90));
    assert_eq!(resolved.quality.thresholds[0].name, "quality_75pct");
    assert!(resolved.quality.geography.is_none());
    assert!(resolved.quality.structural.is_some());
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigRead(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvest.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigParse(_));
}

#[test]
fn rejects_shared_download_and_shard_directory() {
    let config: Config =
        serde_json::from_str(r#"{ "paths": { "shard_dir": "data", "download_dir": "data" } }"#)
            .unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, HarvestError::InvalidConfig(_));
}

#[test]
fn rejects_duplicate_subset_names() {
    let mut config = Config::default();
    config.quality.thresholds.push(ThresholdEntry::Shorthand(80.0));
    config.quality.thresholds.push(ThresholdEntry::Shorthand(80.0));
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, HarvestError::InvalidConfig(_));
}

#[test]
fn rejects_out_of_range_threshold() {
    let config: Config =
        serde_json::from_str(r#"{ "quality": { "thresholds": [120] } }"#).unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, HarvestError::InvalidConfig(_));
}
