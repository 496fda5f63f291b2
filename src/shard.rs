use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::domain::Partition;

pub const SHARD_EXTENSION: &str = "csv";
pub const STAGED_SUFFIX: &str = ".partial";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name the source site gives every export before it is renamed.
pub const GENERIC_DOWNLOAD_PREFIX: &str = "Assessor-Search-Results";

static PAGED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<partition>.+?)_page(?P<page>\d+)(?:_(?P<suffix>.*))?\.csv$")
        .expect("paged shard pattern")
});

static LEGACY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<partition>[^_]+)(?:_.*)?\.csv$").expect("legacy shard pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardName {
    pub partition: Partition,
    pub page: u32,
    pub fetched_at: Option<NaiveDateTime>,
}

pub fn encode(partition: &Partition, page: u32, fetched_at: NaiveDateTime) -> String {
    format!(
        "{}_page{}_{}.{SHARD_EXTENSION}",
        partition.as_str(),
        page,
        fetched_at.format(TIMESTAMP_FORMAT)
    )
}

pub fn encode_staged(partition: &Partition, page: u32, fetched_at: NaiveDateTime) -> String {
    format!("{}{STAGED_SUFFIX}", encode(partition, page, fetched_at))
}

/// Decodes a committed shard name. Returns `None` for anything that is not a
/// shard, including staged pages and raw browser downloads.
pub fn decode(file_name: &str) -> Option<ShardName> {
    if is_generic_download(file_name) {
        return None;
    }

    if let Some(caps) = PAGED_NAME.captures(file_name) {
        let partition = caps["partition"].parse::<Partition>().ok()?;
        let page = caps["page"].parse::<u32>().ok().filter(|page| *page > 0)?;
        let fetched_at = caps.name("suffix").and_then(|suffix| {
            NaiveDateTime::parse_from_str(suffix.as_str(), TIMESTAMP_FORMAT).ok()
        });
        return Some(ShardName {
            partition,
            page,
            fetched_at,
        });
    }

    let caps = LEGACY_NAME.captures(file_name)?;
    let partition = caps["partition"].parse::<Partition>().ok()?;
    Some(ShardName {
        partition,
        page: 1,
        fetched_at: None,
    })
}

/// Decodes a staged page name (`*.csv.partial`).
pub fn decode_staged(file_name: &str) -> Option<ShardName> {
    let committed = strip_staged_suffix(file_name)?;
    decode(committed)
}

/// The committed name a staged page is promoted to.
pub fn strip_staged_suffix(file_name: &str) -> Option<&str> {
    let cut = file_name.len().checked_sub(STAGED_SUFFIX.len())?;
    let (head, tail) = file_name.split_at_checked(cut)?;
    tail.eq_ignore_ascii_case(STAGED_SUFFIX).then_some(head)
}

pub fn is_generic_download(file_name: &str) -> bool {
    file_name
        .get(..GENERIC_DOWNLOAD_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(GENERIC_DOWNLOAD_PREFIX))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap()
    }

    #[test]
    fn encode_layout() {
        let partition: Partition = "alameda".parse().unwrap();
        assert_eq!(
            encode(&partition, 2, stamp()),
            "ALAMEDA_page2_20250314_092653.csv"
        );
    }

    #[test]
    fn encode_then_decode_returns_identity() {
        let partition: Partition = "South Portland".parse().unwrap();
        let name = encode(&partition, 7, stamp());
        let decoded = decode(&name).unwrap();
        assert_eq!(decoded.partition, partition);
        assert_eq!(decoded.page, 7);
        assert_eq!(decoded.fetched_at, Some(stamp()));
    }

    #[test]
    fn decode_is_case_insensitive() {
        let decoded = decode("buckman_PAGE3_20250101_000000.CSV").unwrap();
        assert_eq!(decoded.partition.as_str(), "BUCKMAN");
        assert_eq!(decoded.page, 3);
    }

    #[test]
    fn decode_legacy_names_as_page_one() {
        let decoded = decode("Cully_20240102_101010.csv").unwrap();
        assert_eq!(decoded.partition.as_str(), "CULLY");
        assert_eq!(decoded.page, 1);
        assert_eq!(decoded.fetched_at, None);

        let bare = decode("ARGAY.csv").unwrap();
        assert_eq!(bare.partition.as_str(), "ARGAY");
        assert_eq!(bare.page, 1);
    }

    #[test]
    fn decode_page_without_timestamp() {
        let decoded = decode("EASTMORELAND_page4.csv").unwrap();
        assert_eq!(decoded.page, 4);
        assert_eq!(decoded.fetched_at, None);
    }

    #[test]
    fn decode_rejects_non_shards() {
        assert_eq!(decode("Assessor-Search-Results.csv"), None);
        assert_eq!(decode("Assessor-Search-Results (3).csv"), None);
        assert_eq!(decode("notes.txt"), None);
        assert_eq!(decode("_page1_20250101_000000.csv"), None);
        assert_eq!(decode("ALAMEDA_page0_20250101_000000.csv"), None);
        assert_eq!(decode("ALAMEDA_page1_20250101_000000.csv.partial"), None);
    }

    #[test]
    fn staged_names_round_trip() {
        let partition: Partition = "ALAMEDA".parse().unwrap();
        let staged = encode_staged(&partition, 2, stamp());
        assert!(staged.ends_with(".csv.partial"));
        assert_eq!(decode(&staged), None);
        let decoded = decode_staged(&staged).unwrap();
        assert_eq!((decoded.partition, decoded.page), (partition.clone(), 2));
        assert_eq!(
            strip_staged_suffix(&staged),
            Some(encode(&partition, 2, stamp()).as_str())
        );
    }
}
