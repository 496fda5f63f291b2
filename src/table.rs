use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use camino::Utf8Path;

use crate::error::HarvestError;
use crate::store::Store;

/// Cell values treated as missing in addition to blank cells.
const MISSING_TOKENS: &[&str] = &[
    "NA", "N/A", "NaN", "nan", "NULL", "null", "None", "#N/A", "<NA>",
];

pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || MISSING_TOKENS.contains(&trimmed)
}

pub type Row = Vec<Option<String>>;

/// Missing cells are `None`; every row has one cell per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Adds a row, padding short rows with missing cells.
    pub fn push_row(&mut self, mut row: Row) -> Result<(), HarvestError> {
        if row.len() > self.columns.len() {
            return Err(HarvestError::Csv(format!(
                "row has {} fields, header has {}",
                row.len(),
                self.columns.len()
            )));
        }
        row.resize(self.columns.len(), None);
        self.rows.push(row);
        Ok(())
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// Sets every cell of `name` to `value`, adding the column if needed.
    pub fn fill_column(&mut self, name: &str, value: &str) {
        let index = self.ensure_column(name);
        for row in &mut self.rows {
            row[index] = Some(value.to_string());
        }
    }

    /// Sets `name` from a per-row vector, adding the column if needed.
    pub fn set_column(
        &mut self,
        name: &str,
        values: Vec<Option<String>>,
    ) -> Result<(), HarvestError> {
        if values.len() != self.rows.len() {
            return Err(HarvestError::Csv(format!(
                "column {name} has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        let index = self.ensure_column(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[index] = value;
        }
        Ok(())
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.columns.len() - 1
    }

    /// Concatenates `other` below `self`. Columns are the union of both
    /// schemas in first-seen order; cells for columns a side lacks are missing.
    pub fn append(&mut self, other: Table) {
        let mapping: Vec<usize> = other
            .columns
            .iter()
            .map(|column| self.ensure_column(column))
            .collect();
        let width = self.columns.len();
        for row in other.rows {
            let mut target = vec![None; width];
            for (value, index) in row.into_iter().zip(&mapping) {
                target[*index] = value;
            }
            self.rows.push(target);
        }
    }

    /// Removes rows identical to an earlier row across every column and
    /// returns how many were dropped.
    pub fn dedup(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::with_capacity(before);
        self.rows.retain(|row| seen.insert(row.clone()));
        before - self.rows.len()
    }

    /// New table with the same schema holding the rows whose index passes.
    pub fn select<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(usize, &Row) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .enumerate()
                .filter(|(index, row)| keep(*index, *row))
                .map(|(_, row)| row.clone())
                .collect(),
        }
    }

    pub fn read_csv(path: &Path) -> Result<Table, HarvestError> {
        let file = File::open(path)
            .map_err(|err| HarvestError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Table, HarvestError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        let mut table = Table::new(unique_headers(headers.iter()));
        if table.columns.is_empty() {
            return Err(HarvestError::Csv("file has no header row".to_string()));
        }
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|err| HarvestError::Csv(err.to_string()))?;
            let row = record
                .iter()
                .map(|value| (!is_missing(value)).then(|| value.to_string()))
                .collect();
            table
                .push_row(row)
                .map_err(|err| HarvestError::Csv(format!("record {}: {err}", line + 1)))?;
        }
        Ok(table)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), HarvestError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer
            .write_record(&self.columns)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|value| value.as_deref().unwrap_or("")))
                .map_err(|err| HarvestError::Csv(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn write_csv(&self, path: &Utf8Path) -> Result<(), HarvestError> {
        let mut buffer = Vec::new();
        self.to_writer(&mut buffer)?;
        Store::write_bytes_atomic(path, &buffer)
    }
}

/// Makes header names unique the way spreadsheet exports are usually read:
/// blank names become `Unnamed: {i}`, repeats get `.1`, `.2`, ...
fn unique_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts = HashMap::<String, usize>::new();
    let mut columns = Vec::new();
    for (index, header) in headers.enumerate() {
        let base = if header.trim().is_empty() {
            format!("Unnamed: {index}")
        } else {
            header.to_string()
        };
        let mut name = base.clone();
        while columns.contains(&name) {
            let seen = counts.entry(base.clone()).or_insert(0);
            *seen += 1;
            name = format!("{base}.{seen}");
        }
        columns.push(name);
    }
    columns
}
