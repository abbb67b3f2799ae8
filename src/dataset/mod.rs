//! Raw measure data.
//!
//! A dataset is a list of hospital ids plus named columns of optional
//! values, one value per hospital. Measure and denominator columns are both
//! stored this way.

pub mod preprocess;

pub use preprocess::{standardize, PreparedGroup, PreprocessConfig, StandardizedData};

use crate::error::RatingError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One named data column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Hospital measure data as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub hospitals: Vec<String>,
    pub columns: Vec<Column>,
}

impl Dataset {
    /// Load a dataset from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

        let dataset = Self::from_json(&content)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;

        Ok(dataset)
    }

    /// Parse and check a dataset from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(content)?;
        dataset.check()?;
        Ok(dataset)
    }

    /// Every column must have one entry per hospital and names must be unique.
    pub fn check(&self) -> crate::error::Result<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if column.values.len() != self.hospitals.len() {
                return Err(RatingError::Shape(format!(
                    "column {} has {} values for {} hospitals",
                    column.name,
                    column.values.len(),
                    self.hospitals.len()
                )));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(RatingError::Shape(format!(
                    "column {} appears twice",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn n_hospitals(&self) -> usize {
        self.hospitals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "hospitals": ["010001", "010005", "010006"],
        "columns": [
            { "name": "MORT_30_AMI", "values": [0.14, null, 0.12] },
            { "name": "MORT_30_AMI_DEN", "values": [120, null, 80] }
        ]
    }"#;

    #[test]
    fn test_parse_dataset() {
        let data = Dataset::from_json(SAMPLE).unwrap();
        assert_eq!(data.n_hospitals(), 3);
        assert_eq!(data.column("MORT_30_AMI").unwrap()[1], None);
        assert_eq!(data.column("MORT_30_AMI_DEN").unwrap()[0], Some(120.0));
        assert!(data.column("READM_30_HF").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let data = Dataset::load(file.path()).unwrap();
        assert_eq!(data.columns.len(), 2);
    }

    #[test]
    fn test_ragged_column_is_rejected() {
        let ragged = r#"{ "hospitals": ["a", "b"], "columns": [{ "name": "X", "values": [1.0] }] }"#;
        let err = Dataset::from_json(ragged).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RatingError>(),
            Some(RatingError::Shape(_))
        ));
    }
}
