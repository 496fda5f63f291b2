mod common;

use std::fs;

use assessor_harvest::app::App;
use assessor_harvest::consolidate;
use assessor_harvest::error::HarvestError;
use assessor_harvest::output::JsonOutput;
use assessor_harvest::store::Store;
use assessor_harvest::table::Table;
use assert_matches::assert_matches;

use common::{MockSession, config_in};

fn write_shard(dir: &std::path::Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn merges_pages_with_provenance() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    write_shard(
        &shards,
        "ALAMEDA_page1_20250101_120000.csv",
        "PROPERTY_ID,ADDRESS\nR1,1 A ST\nR2,2 A ST\nR3,3 A ST\n",
    );
    write_shard(
        &shards,
        "ALAMEDA_page2_20250101_120005.csv",
        "PROPERTY_ID,ADDRESS\nR4,4 A ST\nR5,5 A ST\n",
    );
    write_shard(
        &shards,
        "BUCKMAN_page1_20250101_120100.csv",
        "PROPERTY_ID,ADDRESS\nR6,6 B ST\nR7,7 B ST\n",
    );

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.table.len(), 7);
    assert_eq!(merged.files_read, 3);
    assert_eq!(merged.rows_by_partition(), vec![("ALAMEDA", 5), ("BUCKMAN", 2)]);
    assert_eq!(merged.multi_page_partitions(), vec![("ALAMEDA", 2)]);
    assert_eq!(merged.table.value(0, "neighborhood"), Some("ALAMEDA"));
    assert_eq!(
        merged.table.value(6, "source_file"),
        Some("BUCKMAN_page1_20250101_120100.csv")
    );
}

#[test]
fn exact_duplicates_collapse_and_partition_column_is_overridden() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    write_shard(
        &shards,
        "CULLY_page1_20250101_120000.csv",
        "PROPERTY_ID,neighborhood\nR1,wrong\nR1,wrong\nR2,wrong\n",
    );

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.rows_before_dedup, 3);
    assert_eq!(merged.duplicates_removed, 1);
    assert_eq!(merged.table.len(), 2);
    assert_eq!(merged.table.value(0, "neighborhood"), Some("CULLY"));
}

#[test]
fn same_record_in_two_partitions_is_kept_twice() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    let record = "PROPERTY_ID,ADDRESS\nR1,1 BORDER ST\n";
    write_shard(&shards, "ALAMEDA_page1_20250101_120000.csv", record);
    write_shard(&shards, "BUCKMAN_page1_20250101_120000.csv", record);

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.table.len(), 2);
    assert_eq!(merged.duplicates_removed, 0);
    assert_eq!(merged.rows_by_partition(), vec![("ALAMEDA", 1), ("BUCKMAN", 1)]);
}

#[test]
fn same_row_on_two_pages_of_one_partition_is_kept() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    let record = "PROPERTY_ID,ADDRESS\nR1,1 A ST\n";
    write_shard(&shards, "ALAMEDA_page1_20250101_120000.csv", record);
    write_shard(&shards, "ALAMEDA_page2_20250101_120005.csv", record);

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.table.len(), 2);
    assert_eq!(merged.duplicates_removed, 0);
    assert_eq!(merged.rows_by_partition(), vec![("ALAMEDA", 2)]);
    assert_eq!(
        merged.table.value(1, "source_file"),
        Some("ALAMEDA_page2_20250101_120005.csv")
    );
}

#[test]
fn schemas_are_unioned_and_bad_files_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    write_shard(&shards, "ALAMEDA_page1_20250101_120000.csv", "PROPERTY_ID\nR1\n");
    write_shard(
        &shards,
        "BUCKMAN_page1_20250101_120000.csv",
        "PROPERTY_ID,YEAR_BUILT\nR2,1925\n",
    );
    write_shard(&shards, "CULLY_page1_20250101_120000.csv", "");
    write_shard(&shards, "Assessor-Search-Results.csv", "PROPERTY_ID\nR9\n");
    write_shard(
        &shards,
        "DOWNTOWN_page1_20250101_120000.csv.partial",
        "PROPERTY_ID\nR8\n",
    );

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.table.len(), 2);
    assert_eq!(merged.skipped.len(), 1);
    assert_eq!(merged.skipped[0].file_name, "CULLY_page1_20250101_120000.csv");
    assert_eq!(merged.table.value(0, "YEAR_BUILT"), None);
    assert_eq!(merged.table.value(1, "YEAR_BUILT"), Some("1925"));
}

#[test]
fn legacy_names_count_as_first_page() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    write_shard(&shards, "ARGAY_20240101_000000.csv", "PROPERTY_ID\nR1\n");

    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert_eq!(merged.rows_by_partition(), vec![("ARGAY", 1)]);
}

#[test]
fn consolidate_writes_dataset_and_summary() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let shards = config.paths.shard_dir.as_std_path().to_path_buf();
    write_shard(
        &shards,
        "ALAMEDA_page1_20250101_120000.csv",
        "PROPERTY_ID\nR1\nR2\n",
    );
    write_shard(
        &shards,
        "ALAMEDA_page2_20250101_120000.csv",
        "PROPERTY_ID\nR3\n",
    );

    let app = App::new(config.clone(), MockSession::new());
    let result = app.consolidate(&JsonOutput).unwrap();
    assert_eq!(result.total_rows, 3);
    assert_eq!(result.partitions, 1);

    let merged = Table::read_csv(config.paths.merged.as_std_path()).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(
        merged.columns(),
        &["PROPERTY_ID".to_string(), "neighborhood".to_string(), "source_file".to_string()]
    );

    let summary = fs::read_to_string(config.paths.summary.as_std_path()).unwrap();
    assert!(summary.contains("Total Records: 3"));
    assert!(summary.contains("ALAMEDA: 2 pages"));
    assert!(summary.contains("ALAMEDA: 3"));
}

#[test]
fn missing_shard_directory_yields_empty_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    let store = Store::new(config.paths.clone());
    let merged = consolidate::consolidate(&store, &config.columns).unwrap();
    assert!(merged.table.is_empty());
}

#[test]
fn unreadable_shard_directory_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let config = config_in(temp.path());
    fs::write(config.paths.shard_dir.as_std_path(), b"not a directory").unwrap();
    let store = Store::new(config.paths.clone());
    let err = consolidate::consolidate(&store, &config.columns).unwrap_err();
    assert_matches!(err, HarvestError::ShardDirectory(_));
}
