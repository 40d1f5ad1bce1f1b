//! The caller's tabular data: a loose string table and the validated
//! (location, value) dataset extracted from it.

use crate::error::{PlotError, Result};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Column-named rows of strings, as read from a CSV file or built in code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row; short rows are padded with empty cells.
    pub fn push_row<S: Into<String>>(&mut self, cells: impl IntoIterator<Item = S>) {
        let mut row: Vec<String> = cells.into_iter().map(Into::into).collect();
        row.resize(self.headers.len().max(row.len()), String::new());
        self.rows.push(row);
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::from_csv_reader(file)?;
        info!(path = ?path, rows = table.len(), "Loaded CSV data");
        Ok(table)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut table = Table::new(headers);
        for result in rdr.records() {
            let record = result?;
            table.push_row(record.iter());
        }
        Ok(table)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

/// Case-insensitive, whitespace-trimmed form used for joining identifiers.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    /// Identifier as the caller wrote it.
    pub location: String,
    /// `None` for an empty value cell.
    pub value: Option<f64>,
}

/// Validated user data: unique identifiers and numeric values.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDataset {
    location_column: String,
    value_column: String,
    rows: Vec<UserRow>,
}

impl UserDataset {
    /// Extracts the two required columns from `table`.
    ///
    /// Fails when a column is absent, the table is empty, an identifier is
    /// blank or repeated (after normalisation), or a value is not a number.
    pub fn from_table(table: &Table, location_col: &str, value_col: &str) -> Result<Self> {
        let loc_idx = table.column_index(location_col).ok_or_else(|| {
            PlotError::binding(format!(
                "Location column '{}' not found in data columns: {:?}",
                location_col,
                table.headers()
            ))
        })?;
        let val_idx = table.column_index(value_col).ok_or_else(|| {
            PlotError::binding(format!(
                "Value column '{}' not found in data columns: {:?}",
                value_col,
                table.headers()
            ))
        })?;

        let mut rows = Vec::with_capacity(table.len());
        for (i, row) in table.rows().enumerate() {
            let location = row.get(loc_idx).map(|s| s.trim()).unwrap_or("");
            if location.is_empty() {
                return Err(PlotError::binding(format!(
                    "Row {} has an empty '{}' value",
                    i + 1,
                    location_col
                )));
            }
            let raw = row.get(val_idx).map(|s| s.trim()).unwrap_or("");
            let value = if raw.is_empty() {
                None
            } else {
                match raw.parse::<f64>() {
                    Ok(v) if v.is_finite() => Some(v),
                    _ => {
                        return Err(PlotError::binding(format!(
                            "Row {} ('{}'): value '{}' in column '{}' is not a number",
                            i + 1,
                            location,
                            raw,
                            value_col
                        )))
                    }
                }
            };
            rows.push(UserRow {
                location: location.to_string(),
                value,
            });
        }

        Self::from_rows(location_col, value_col, rows)
    }

    /// Builds a dataset from (identifier, value) pairs.
    pub fn from_pairs<S: Into<String>>(
        location_col: &str,
        value_col: &str,
        pairs: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self> {
        let rows = pairs
            .into_iter()
            .map(|(location, value)| UserRow {
                location: location.into(),
                value: Some(value),
            })
            .collect();
        Self::from_rows(location_col, value_col, rows)
    }

    fn from_rows(location_col: &str, value_col: &str, rows: Vec<UserRow>) -> Result<Self> {
        if rows.is_empty() {
            return Err(PlotError::binding("User data has no rows"));
        }
        let mut seen: HashMap<String, &str> = HashMap::new();
        for row in &rows {
            if let Some(previous) = seen.insert(normalize_key(&row.location), &row.location) {
                return Err(PlotError::binding(format!(
                    "Duplicate location identifier '{}' (also given as '{}')",
                    row.location, previous
                )));
            }
        }
        Ok(Self {
            location_column: location_col.to_string(),
            value_column: value_col.to_string(),
            rows,
        })
    }

    pub fn location_column(&self) -> &str {
        &self.location_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    pub fn rows(&self) -> &[UserRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_table(text: &str) -> Table {
        Table::from_csv_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn reads_csv_and_extracts_columns() {
        let table = csv_table("state, population ,notes\nCalifornia,39.5,big\n Texas ,29.1,\nVermont,,tiny\n");
        assert_eq!(table.headers(), &["state", "population", "notes"]);
        let data = UserDataset::from_table(&table, "state", "population").unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.rows()[1].location, "Texas");
        assert_eq!(data.rows()[1].value, Some(29.1));
        assert_eq!(data.rows()[2].value, None);
        assert_eq!(data.value_column(), "population");
    }

    #[test]
    fn missing_columns_are_binding_errors() {
        let table = csv_table("state,value\nOhio,1\n");
        let err = UserDataset::from_table(&table, "region", "value").unwrap_err();
        assert!(matches!(err, PlotError::Binding(_)));
        assert!(err.to_string().contains("region"));
        assert!(UserDataset::from_table(&table, "state", "amount").is_err());
    }

    #[test]
    fn duplicate_identifiers_are_rejected_case_insensitively() {
        let err = UserDataset::from_pairs("loc", "val", vec![("Ohio", 1.0), (" ohio ", 2.0)])
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn non_numeric_and_empty_inputs_are_rejected() {
        let table = csv_table("state,value\nOhio,lots\n");
        assert!(UserDataset::from_table(&table, "state", "value").is_err());

        let empty = csv_table("state,value\n");
        assert!(UserDataset::from_table(&empty, "state", "value").is_err());

        let blank_id = csv_table("state,value\n  ,3\n");
        assert!(UserDataset::from_table(&blank_id, "state", "value").is_err());
    }

    #[test]
    fn table_pads_short_rows() {
        let mut table = Table::new(["a", "b", "c"]);
        table.push_row(["1"]);
        assert_eq!(table.rows().next().unwrap(), &["1", "", ""]);
    }

    #[test]
    fn normalize_key_trims_and_lowercases() {
        assert_eq!(normalize_key("  New York "), "new york");
    }
}
