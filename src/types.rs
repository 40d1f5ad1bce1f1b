use geo::MultiPolygon;
use std::collections::HashMap;

/// One feature of a geometry source: a polygonal geometry plus the attribute
/// columns that were requested when the source was read.
///
/// Attribute names are stored lowercased so lookups work across sources that
/// disagree on case (`NAME` vs `name`).
#[derive(Debug, Clone)]
pub struct RegionRecord {
    pub geometry: MultiPolygon<f64>,
    attributes: HashMap<String, String>,
}

impl RegionRecord {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_lowercase(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }
}

/// Bound value of a merged record. `Missing` is the sentinel for regions with
/// no matching user row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue {
    Value(f64),
    Missing,
}

impl BoundValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            BoundValue::Value(v) => Some(*v),
            BoundValue::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, BoundValue::Missing)
    }
}

/// A region record augmented with the value bound from the user dataset.
#[derive(Debug, Clone)]
pub struct MergedRecord {
    pub code: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub value: BoundValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_case_insensitive() {
        let record = RegionRecord::new(MultiPolygon::new(vec![]))
            .with_attribute("NAME", "Texas")
            .with_attribute("postal", "TX");
        assert_eq!(record.attribute("name"), Some("Texas"));
        assert_eq!(record.attribute("Postal"), Some("TX"));
        assert!(record.has_attribute("POSTAL"));
        assert_eq!(record.attribute("iso_a2"), None);
    }
}
