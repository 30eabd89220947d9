//! Column renaming plus a per-column value transform pipeline (§4.F).

use std::collections::HashMap;

use crate::record::Record;

/// A pure string→string transform. The standard set is `strip`, `lowercase`,
/// `uppercase`.
pub type Transform = fn(&str) -> String;

pub fn strip(s: &str) -> String {
    s.trim().to_string()
}

pub fn lowercase(s: &str) -> String {
    s.to_lowercase()
}

pub fn uppercase(s: &str) -> String {
    s.to_uppercase()
}

/// Renames columns, then applies each output column's transform pipeline
/// left to right.
#[derive(Debug, Clone, Default)]
pub struct DataMapper {
    field_mappings: HashMap<String, String>,
    transforms: HashMap<String, Vec<Transform>>,
}

impl DataMapper {
    pub fn new(
        field_mappings: HashMap<String, String>,
        transforms: HashMap<String, Vec<Transform>>,
    ) -> Self {
        Self {
            field_mappings,
            transforms,
        }
    }

    /// Rename columns (unknown columns pass through unchanged), then run
    /// each output column's transform pipeline over its value.
    pub fn transform_record(&self, row: &Record) -> Record {
        let mut out = Record::new();
        for (column, value) in row {
            let target = self
                .field_mappings
                .get(column)
                .cloned()
                .unwrap_or_else(|| column.clone());
            out.insert(target, value.clone());
        }

        for (column, pipeline) in &self.transforms {
            if let Some(value) = out.get(column) {
                let mut transformed = value.clone();
                for f in pipeline {
                    transformed = f(&transformed);
                }
                out.insert(column.clone(), transformed);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn renames_known_columns_and_passes_through_unknown() {
        let mapper = DataMapper::new(
            [("Test".to_string(), "Value".to_string())].into_iter().collect(),
            HashMap::new(),
        );
        let input = row(&[("Test", "1"), ("Other", "2")]);
        let output = mapper.transform_record(&input);
        assert_eq!(output.get("Value"), Some(&"1".to_string()));
        assert_eq!(output.get("Other"), Some(&"2".to_string()));
    }

    #[test]
    fn applies_transform_pipeline_left_to_right() {
        let mapper = DataMapper::new(
            HashMap::new(),
            [("Test__c".to_string(), vec![strip as Transform, lowercase as Transform])]
                .into_iter()
                .collect(),
        );
        let input = row(&[("Test__c", "  MiXeD Case  ")]);
        let output = mapper.transform_record(&input);
        assert_eq!(output.get("Test__c"), Some(&"mixed case".to_string()));
    }

    #[test]
    fn renames_then_transforms_the_new_column_name() {
        let mapper = DataMapper::new(
            [("Old__c".to_string(), "New__c".to_string())].into_iter().collect(),
            [("New__c".to_string(), vec![uppercase as Transform])].into_iter().collect(),
        );
        let input = row(&[("Old__c", "abc")]);
        let output = mapper.transform_record(&input);
        assert_eq!(output.get("New__c"), Some(&"ABC".to_string()));
        assert!(!output.contains_key("Old__c"));
    }
}
