use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Delimiter between the partition code and the page segment of a shard name.
/// Compared against the upper-cased code, so it is stored upper-cased here.
pub const PAGE_DELIMITER: &str = "_PAGE";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition(String);

impl Partition {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Partition {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = !normalized.is_empty()
            && !normalized.contains(PAGE_DELIMITER)
            && !normalized.contains(['/', '\\'])
            && !normalized.chars().any(|ch| ch.is_control());
        if !is_valid {
            return Err(HarvestError::InvalidPartition(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TraversalOrder {
    #[default]
    Forward,
    Reversed,
}

impl fmt::Display for TraversalOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalOrder::Forward => write!(f, "forward"),
            TraversalOrder::Reversed => write!(f, "reversed"),
        }
    }
}

impl FromStr for TraversalOrder {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "forward" => Ok(TraversalOrder::Forward),
            "reversed" | "reverse" => Ok(TraversalOrder::Reversed),
            _ => Err(HarvestError::InvalidOrder(value.to_string())),
        }
    }
}

/// Parses raw partition codes as listed by the source. Invalid codes are
/// logged and dropped; duplicates after normalization keep their first position.
pub fn normalize_partitions<I, S>(raw: I) -> Vec<Partition>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut partitions = Vec::new();
    for value in raw {
        let value = value.as_ref();
        match value.parse::<Partition>() {
            Ok(partition) => {
                if seen.insert(partition.clone()) {
                    partitions.push(partition);
                }
            }
            Err(err) => tracing::warn!("skipping partition {value:?}: {err}"),
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_partition_normalizes_case() {
        let partition: Partition = " alameda ".parse().unwrap();
        assert_eq!(partition.as_str(), "ALAMEDA");
    }

    #[test]
    fn parse_partition_keeps_inner_spaces() {
        let partition: Partition = "South Portland".parse().unwrap();
        assert_eq!(partition.as_str(), "SOUTH PORTLAND");
    }

    #[test]
    fn parse_partition_rejects_delimiter() {
        let err = "FOO_page".parse::<Partition>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidPartition(_));
    }

    #[test]
    fn parse_partition_rejects_empty_and_paths() {
        assert_matches!(
            "   ".parse::<Partition>(),
            Err(HarvestError::InvalidPartition(_))
        );
        assert_matches!(
            "A/B".parse::<Partition>(),
            Err(HarvestError::InvalidPartition(_))
        );
    }

    #[test]
    fn parse_traversal_order() {
        assert_eq!(
            "reverse".parse::<TraversalOrder>().unwrap(),
            TraversalOrder::Reversed
        );
        assert_eq!(
            "Forward".parse::<TraversalOrder>().unwrap(),
            TraversalOrder::Forward
        );
        assert_matches!(
            "sideways".parse::<TraversalOrder>(),
            Err(HarvestError::InvalidOrder(_))
        );
    }

    #[test]
    fn normalize_drops_invalid_and_duplicates() {
        let partitions = normalize_partitions(["alameda", "", "ALAMEDA", "buckman"]);
        let codes: Vec<_> = partitions.iter().map(Partition::as_str).collect();
        assert_eq!(codes, vec!["ALAMEDA", "BUCKMAN"]);
    }
}
