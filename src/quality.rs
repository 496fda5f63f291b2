use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use serde::Serialize;

use crate::config::{ProvenanceColumns, QualityRules};
use crate::error::HarvestError;
use crate::store::Store;
use crate::table::Table;

pub const SCORE_COLUMN: &str = "completeness_score";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowScores {
    /// Key fields found in the schema; the score denominator.
    pub present: Vec<String>,
    /// Key fields the schema lacks; excluded for every row.
    pub absent: Vec<String>,
    pub scores: Vec<f64>,
}

/// Percentage of present key fields that are non-missing, per row. Key
/// fields absent from the schema are left out of numerator and denominator
/// alike; with no key field in the schema every row scores 0.
pub fn score_rows(table: &Table, key_fields: &[String]) -> RowScores {
    let (present, absent): (Vec<&String>, Vec<&String>) =
        key_fields.iter().partition(|field| table.has_column(field));
    let indices: Vec<usize> = present
        .iter()
        .filter_map(|field| table.column_index(field))
        .collect();

    let scores = table
        .rows()
        .iter()
        .map(|row| {
            if indices.is_empty() {
                return 0.0;
            }
            let filled = indices.iter().filter(|index| row[**index].is_some()).count();
            filled as f64 / indices.len() as f64 * 100.0
        })
        .collect();

    RowScores {
        present: present.into_iter().cloned().collect(),
        absent: absent.into_iter().cloned().collect(),
        scores,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCompleteness {
    pub column: String,
    pub non_missing: usize,
    pub percent: f64,
}

/// Non-missing share of every column, highest first (ties by name).
pub fn column_completeness(table: &Table) -> Vec<ColumnCompleteness> {
    let mut columns: Vec<ColumnCompleteness> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let non_missing = table.rows().iter().filter(|row| row[index].is_some()).count();
            ColumnCompleteness {
                column: column.clone(),
                non_missing,
                percent: percent(non_missing, table.len()),
            }
        })
        .collect();
    columns.sort_by(|a, b| {
        b.percent
            .total_cmp(&a.percent)
            .then_with(|| a.column.cmp(&b.column))
    });
    columns
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionQuality {
    pub partition: String,
    pub mean_score: f64,
    pub rows: usize,
}

/// Mean row score per partition, best first (ties by name).
pub fn partition_quality(
    table: &Table,
    scores: &[f64],
    partition_column: &str,
) -> Vec<PartitionQuality> {
    let Some(index) = table.column_index(partition_column) else {
        return Vec::new();
    };
    let mut totals = BTreeMap::<&str, (f64, usize)>::new();
    for (row, score) in table.rows().iter().zip(scores) {
        if let Some(partition) = row[index].as_deref() {
            let entry = totals.entry(partition).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    let mut ranking: Vec<PartitionQuality> = totals
        .into_iter()
        .map(|(partition, (total, rows))| PartitionQuality {
            partition: partition.to_string(),
            mean_score: total / rows as f64,
            rows,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.mean_score
            .total_cmp(&a.mean_score)
            .then_with(|| a.partition.cmp(&b.partition))
    });
    ranking
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubsetRule {
    Threshold { min_score: f64 },
    Geography { field: String, target: String },
    /// The locale field is missing, so the best-scoring partitions stand in.
    GeographyFallback { partitions: Vec<String> },
    Required { fields: Vec<String> },
    Structural { min_score: f64, fields: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subset {
    pub name: String,
    pub rule: SubsetRule,
    /// Indices into the consolidated table, ascending.
    #[serde(skip)]
    pub rows: Vec<usize>,
}

impl Subset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds every configured subset straight from the consolidated table.
pub fn build_subsets(
    table: &Table,
    scores: &RowScores,
    ranking: &[PartitionQuality],
    rules: &QualityRules,
    columns: &ProvenanceColumns,
) -> Vec<Subset> {
    let mut subsets = Vec::new();

    for rule in &rules.thresholds {
        subsets.push(Subset {
            name: rule.name.clone(),
            rule: SubsetRule::Threshold {
                min_score: rule.min_score,
            },
            rows: matching(table, |index, _| scores.scores[index] >= rule.min_score),
        });
    }

    if let Some(rule) = &rules.geography {
        let subset = match table.column_index(&rule.field) {
            Some(field) => {
                let target = rule.target.to_uppercase();
                Subset {
                    name: rule.name.clone(),
                    rule: SubsetRule::Geography {
                        field: rule.field.clone(),
                        target: rule.target.clone(),
                    },
                    rows: matching(table, |_, row| {
                        row[field]
                            .as_deref()
                            .is_some_and(|value| value.to_uppercase().contains(&target))
                    }),
                }
            }
            None => {
                let partitions: Vec<String> = ranking
                    .iter()
                    .take(rule.fallback_top_partitions)
                    .map(|entry| entry.partition.clone())
                    .collect();
                tracing::info!(
                    "{}: no {} column, using the {} best-scoring partitions",
                    rule.name,
                    rule.field,
                    partitions.len()
                );
                let wanted: HashSet<&str> = partitions.iter().map(String::as_str).collect();
                let rows = match table.column_index(&columns.partition) {
                    Some(index) => matching(table, |_, row| {
                        row[index].as_deref().is_some_and(|value| wanted.contains(value))
                    }),
                    None => Vec::new(),
                };
                Subset {
                    name: rule.name.clone(),
                    rule: SubsetRule::GeographyFallback { partitions },
                    rows,
                }
            }
        };
        subsets.push(subset);
    }

    if let Some(rule) = &rules.required {
        let fields: Vec<String> = rule
            .fields
            .iter()
            .filter(|field| table.has_column(field))
            .cloned()
            .collect();
        let indices: Vec<usize> = fields
            .iter()
            .filter_map(|field| table.column_index(field))
            .collect();
        subsets.push(Subset {
            name: rule.name.clone(),
            rule: SubsetRule::Required { fields },
            rows: matching(table, |_, row| indices.iter().all(|index| row[*index].is_some())),
        });
    }

    if let Some(rule) = &rules.structural {
        let indices: Option<Vec<usize>> = rule
            .fields
            .iter()
            .map(|field| table.column_index(field))
            .collect();
        let rows = match indices {
            Some(indices) => matching(table, |index, row| {
                scores.scores[index] >= rule.min_score
                    && indices.iter().all(|field| row[*field].is_some())
            }),
            None => {
                tracing::info!("{}: structural field missing from schema", rule.name);
                Vec::new()
            }
        };
        subsets.push(Subset {
            name: rule.name.clone(),
            rule: SubsetRule::Structural {
                min_score: rule.min_score,
                fields: rule.fields.clone(),
            },
            rows,
        });
    }

    subsets
}

fn matching<F>(table: &Table, mut keep: F) -> Vec<usize>
where
    F: FnMut(usize, &[Option<String>]) -> bool,
{
    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(index, row)| keep(*index, row.as_slice()))
        .map(|(index, _)| index)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAnalysis {
    pub total_rows: usize,
    pub key_fields: Vec<String>,
    pub absent_key_fields: Vec<String>,
    pub columns: Vec<ColumnCompleteness>,
    pub partitions: Vec<PartitionQuality>,
    pub subsets: Vec<Subset>,
    #[serde(skip)]
    pub scores: Vec<f64>,
}

pub fn analyze(
    table: &Table,
    rules: &QualityRules,
    columns: &ProvenanceColumns,
) -> QualityAnalysis {
    let scores = score_rows(table, &rules.key_fields);
    if !scores.absent.is_empty() {
        tracing::info!(
            "key field(s) not in dataset, excluded from scoring: {}",
            scores.absent.join(", ")
        );
    }
    let partitions = partition_quality(table, &scores.scores, &columns.partition);
    let subsets = build_subsets(table, &scores, &partitions, rules, columns);
    QualityAnalysis {
        total_rows: table.len(),
        key_fields: scores.present.clone(),
        absent_key_fields: scores.absent.clone(),
        columns: column_completeness(table),
        partitions,
        subsets,
        scores: scores.scores,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsetWrite {
    pub name: String,
    pub rows: usize,
    pub percent: f64,
    pub path: Option<String>,
}

/// Writes one CSV per non-empty subset plus the quality report. An empty
/// subset produces no file and removes the one a previous run left.
pub fn write_outputs(
    store: &Store,
    table: &Table,
    analysis: &QualityAnalysis,
    top_partitions: usize,
) -> Result<Vec<SubsetWrite>, HarvestError> {
    let mut scored = table.clone();
    scored.set_column(
        SCORE_COLUMN,
        analysis
            .scores
            .iter()
            .map(|score| Some(format!("{score:.2}")))
            .collect(),
    )?;

    let mut writes = Vec::new();
    for subset in &analysis.subsets {
        let path = store.subset_path(&subset.name);
        let written = if subset.is_empty() {
            if path.as_std_path().exists() {
                Store::remove_file(&path)?;
            }
            tracing::info!("{}: no matching rows, nothing written", subset.name);
            None
        } else {
            let wanted: HashSet<usize> = subset.rows.iter().copied().collect();
            scored
                .select(|index, _| wanted.contains(&index))
                .write_csv(&path)?;
            tracing::info!("{}: wrote {} row(s) to {path}", subset.name, subset.len());
            Some(path.to_string())
        };
        writes.push(SubsetWrite {
            name: subset.name.clone(),
            rows: subset.len(),
            percent: percent(subset.len(), analysis.total_rows),
            path: written,
        });
    }

    let report = render_report(analysis, top_partitions);
    Store::write_bytes_atomic(&store.paths().quality_report, report.as_bytes())?;
    tracing::info!("wrote quality report to {}", store.paths().quality_report);
    Ok(writes)
}

pub fn render_report(analysis: &QualityAnalysis, top_partitions: usize) -> String {
    let rule = "=".repeat(70);
    let thin = "-".repeat(70);
    let mut out = String::new();
    let _ = writeln!(out, "Harvest Data Quality Report");
    let _ = writeln!(out, "{rule}\n");
    let _ = writeln!(out, "Original Dataset: {} records\n", analysis.total_rows);

    let _ = writeln!(out, "Quality-Filtered Subsets:");
    let _ = writeln!(out, "{thin}");
    for subset in &analysis.subsets {
        let _ = writeln!(
            out,
            "{:<30} {:>10} records ({:.1}%)",
            subset.name,
            subset.len(),
            percent(subset.len(), analysis.total_rows)
        );
    }

    let _ = writeln!(out, "\nKey Fields Scored: {}", analysis.key_fields.join(", "));
    if !analysis.absent_key_fields.is_empty() {
        let _ = writeln!(out, "Key Fields Absent: {}", analysis.absent_key_fields.join(", "));
    }

    let shown = analysis.partitions.len().min(top_partitions);
    let _ = writeln!(out, "\n\nTop {shown} Highest Quality Partitions:");
    let _ = writeln!(out, "{thin}");
    for entry in analysis.partitions.iter().take(top_partitions) {
        let _ = writeln!(
            out,
            "{:<40} {:>6.1}%  ({} records)",
            entry.partition, entry.mean_score, entry.rows
        );
    }

    let _ = writeln!(out, "\n\nColumn Completeness (All Columns):");
    let _ = writeln!(out, "{thin}");
    for column in &analysis.columns {
        let _ = writeln!(out, "{:<40} {:>6.1}%", column.column, column.percent);
    }
    out
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}
