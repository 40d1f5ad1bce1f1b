use crate::dataset::{normalize_key, UserDataset};
use crate::error::{PlotError, Result};
use crate::types::{BoundValue, MergedRecord, RegionRecord};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindOptions {
    /// Fail instead of warning when no user row matches any region.
    pub require_overlap: bool,
}

/// Outcome of a bind that did not fail: what matched and what did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindReport {
    pub matched: usize,
    /// User identifiers with no geometry, in input order.
    pub unmatched_rows: Vec<String>,
    /// Codes of regions that received the missing-value sentinel.
    pub missing_regions: Vec<String>,
    /// Codes of source features dropped because the region was already present.
    pub duplicate_regions: Vec<String>,
}

impl BindReport {
    pub fn has_warnings(&self) -> bool {
        !self.unmatched_rows.is_empty() || !self.duplicate_regions.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.unmatched_rows.is_empty() {
            warnings.push(format!(
                "{} data row(s) matched no region: {}",
                self.unmatched_rows.len(),
                self.unmatched_rows.join(", ")
            ));
        }
        if !self.duplicate_regions.is_empty() {
            warnings.push(format!(
                "duplicate source features ignored for: {}",
                self.duplicate_regions.join(", ")
            ));
        }
        warnings
    }
}

/// Regions with their bound values plus the bind report.
#[derive(Debug, Clone)]
pub struct MergedDataset {
    pub records: Vec<MergedRecord>,
    pub report: BindReport,
}

impl MergedDataset {
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().filter_map(|r| r.value.value())
    }

    pub fn get(&self, code: &str) -> Option<&MergedRecord> {
        self.records.iter().find(|r| r.code == code)
    }
}

/// Left-joins user rows onto region records.
#[derive(Debug, Clone)]
pub struct DataBinder {
    join_column: String,
    code_column: String,
    name_column: String,
    options: BindOptions,
}

impl DataBinder {
    /// `join_column` is the geometry attribute matched against user
    /// identifiers; `code_column` identifies regions in the merged output.
    pub fn new(join_column: &str, code_column: &str, name_column: &str) -> Self {
        Self {
            join_column: join_column.to_string(),
            code_column: code_column.to_string(),
            name_column: name_column.to_string(),
            options: BindOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BindOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bind(&self, regions: &[RegionRecord], data: &UserDataset) -> Result<MergedDataset> {
        if !regions.is_empty() && !regions.iter().any(|r| r.has_attribute(&self.join_column)) {
            return Err(PlotError::binding(format!(
                "Geo join column '{}' not found in geometry attributes",
                self.join_column
            )));
        }

        let lookup: HashMap<String, usize> = data
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| (normalize_key(&row.location), i))
            .collect();

        let mut report = BindReport::default();
        let mut matched_rows: HashSet<usize> = HashSet::new();
        let mut seen_regions: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(regions.len());

        for region in regions {
            let join_key = region.attribute(&self.join_column).unwrap_or("");
            let code = region
                .attribute(&self.code_column)
                .unwrap_or(join_key)
                .to_string();

            if !seen_regions.insert(normalize_key(&code)) {
                warn!(code = %code, "Duplicate region feature ignored");
                report.duplicate_regions.push(code);
                continue;
            }

            let row_index = if join_key.is_empty() {
                None
            } else {
                lookup.get(&normalize_key(join_key)).copied()
            };

            let value = match row_index {
                Some(i) => {
                    matched_rows.insert(i);
                    match data.rows()[i].value {
                        Some(v) => BoundValue::Value(v),
                        None => BoundValue::Missing,
                    }
                }
                None => BoundValue::Missing,
            };
            if value.is_missing() {
                report.missing_regions.push(code.clone());
            }

            records.push(MergedRecord {
                name: region
                    .attribute(&self.name_column)
                    .unwrap_or(join_key)
                    .to_string(),
                code,
                geometry: region.geometry.clone(),
                value,
            });
        }

        report.matched = matched_rows.len();
        report.unmatched_rows = data
            .rows()
            .iter()
            .enumerate()
            .filter(|(i, _)| !matched_rows.contains(i))
            .map(|(_, row)| row.location.clone())
            .collect();

        if report.matched == 0 && self.options.require_overlap {
            return Err(PlotError::binding(format!(
                "None of the {} data rows matched a region on '{}'",
                data.len(),
                self.join_column
            )));
        }

        if !report.unmatched_rows.is_empty() {
            warn!(
                unmatched = ?report.unmatched_rows,
                "Data rows without a matching region were excluded"
            );
        }
        debug!(missing = ?report.missing_regions, "Regions without data");
        info!(
            regions = records.len(),
            matched = report.matched,
            "Bound user data onto regions"
        );

        Ok(MergedDataset { records, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn region(name: &str, code: &str) -> RegionRecord {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        RegionRecord::new(MultiPolygon::new(vec![square]))
            .with_attribute("name", name)
            .with_attribute("postal", code)
    }

    fn regions() -> Vec<RegionRecord> {
        vec![
            region("California", "CA"),
            region("Texas", "TX"),
            region("Ohio", "OH"),
        ]
    }

    fn binder() -> DataBinder {
        DataBinder::new("name", "postal", "name")
    }

    #[test]
    fn matches_case_insensitively_and_trimmed() {
        let data =
            UserDataset::from_pairs("state", "v", vec![("  california", 10.0), ("TEXAS ", 8.0)])
                .unwrap();
        let merged = binder().bind(&regions(), &data).unwrap();
        assert_eq!(merged.records.len(), 3);
        assert_eq!(merged.get("CA").unwrap().value, BoundValue::Value(10.0));
        assert_eq!(merged.get("TX").unwrap().value, BoundValue::Value(8.0));
        assert_eq!(merged.get("OH").unwrap().value, BoundValue::Missing);
        assert_eq!(merged.report.matched, 2);
        assert_eq!(merged.report.missing_regions, vec!["OH"]);
        assert!(merged.report.unmatched_rows.is_empty());
        assert!(!merged.report.has_warnings());
    }

    #[test]
    fn unmatched_rows_are_reported_in_order() {
        let data = UserDataset::from_pairs(
            "state",
            "v",
            vec![("Narnia", 1.0), ("Ohio", 2.0), ("Gondor", 3.0)],
        )
        .unwrap();
        let merged = binder().bind(&regions(), &data).unwrap();
        assert_eq!(merged.report.unmatched_rows, vec!["Narnia", "Gondor"]);
        assert_eq!(merged.values().collect::<Vec<_>>(), vec![2.0]);
        assert!(merged.report.warnings()[0].contains("Narnia, Gondor"));
    }

    #[test]
    fn zero_overlap_warns_unless_required() {
        let data = UserDataset::from_pairs("state", "v", vec![("Narnia", 1.0)]).unwrap();
        let merged = binder().bind(&regions(), &data).unwrap();
        assert_eq!(merged.report.matched, 0);
        assert!(merged.records.iter().all(|r| r.value.is_missing()));
        assert_eq!(merged.report.unmatched_rows, vec!["Narnia"]);

        let strict = binder().with_options(BindOptions {
            require_overlap: true,
        });
        assert!(matches!(
            strict.bind(&regions(), &data),
            Err(PlotError::Binding(_))
        ));
    }

    #[test]
    fn binds_on_code_column_when_configured() {
        let data = UserDataset::from_pairs("code", "v", vec![("oh", 4.0)]).unwrap();
        let merged = DataBinder::new("postal", "postal", "name")
            .bind(&regions(), &data)
            .unwrap();
        let ohio = merged.get("OH").unwrap();
        assert_eq!(ohio.value, BoundValue::Value(4.0));
        assert_eq!(ohio.name, "Ohio");
    }

    #[test]
    fn duplicate_features_appear_once() {
        let mut source = regions();
        source.push(region("Texas", "TX"));
        let data = UserDataset::from_pairs("state", "v", vec![("Texas", 1.0)]).unwrap();
        let merged = binder().bind(&source, &data).unwrap();
        assert_eq!(merged.records.iter().filter(|r| r.code == "TX").count(), 1);
        assert_eq!(merged.report.duplicate_regions, vec!["TX"]);
    }

    #[test]
    fn missing_join_column_is_an_error() {
        let data = UserDataset::from_pairs("state", "v", vec![("Texas", 1.0)]).unwrap();
        let err = DataBinder::new("gn_name", "postal", "name")
            .bind(&regions(), &data)
            .unwrap_err();
        assert!(err.to_string().contains("gn_name"));
    }
}
