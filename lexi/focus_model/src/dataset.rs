use std::{collections::BTreeMap, fs::File, io::Read, path::Path};

use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DataSchemaError, DatasetError},
    features::{features_to_matrix, FeatureVector, FEATURE_COUNT, FEATURE_NAMES},
};

/// Default name of the target column.
pub const DEFAULT_LABEL_COLUMN: &str = "difficulty_level";

/// Share of one class in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassShare {
    /// Number of records.
    pub count: usize,
    /// Percentage of all records (0-100).
    pub percentage: f64,
}

/// Parallel feature vectors and raw labels read from a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Feature vectors in file order.
    pub features: Vec<FeatureVector>,
    /// Raw label strings, aligned with `features`.
    pub labels: Vec<String>,
}

impl Dataset {
    /// Builds a dataset from already-parsed records.
    pub fn from_records(
        features: Vec<FeatureVector>,
        labels: Vec<String>,
    ) -> Result<Self, DatasetError> {
        if features.is_empty() {
            return Err(DatasetError::Empty);
        }
        debug_assert_eq!(features.len(), labels.len());
        Ok(Self { features, labels })
    }

    /// Reads a headered CSV file.
    pub fn from_csv_path(path: impl AsRef<Path>, label_column: &str) -> Result<Self, DatasetError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file, label_column)
    }

    /// Reads headered CSV from any reader.
    ///
    /// The ten feature columns and `label_column` must be present; other
    /// columns are ignored.
    pub fn from_reader<R: Read>(reader: R, label_column: &str) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|header| header == name);

        let mut missing = Vec::new();
        let mut feature_columns = [0usize; FEATURE_COUNT];
        for (slot, name) in feature_columns.iter_mut().zip(FEATURE_NAMES) {
            match position(name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }
        let label_idx = position(label_column);
        if label_idx.is_none() {
            missing.push(label_column.to_string());
        }
        let label_idx = match label_idx {
            Some(idx) if missing.is_empty() => idx,
            _ => return Err(DataSchemaError { missing }.into()),
        };

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let row = row_idx + 1;
            let mut values = [0.0; FEATURE_COUNT];
            for ((value, column), name) in values
                .iter_mut()
                .zip(feature_columns)
                .zip(FEATURE_NAMES)
            {
                let raw = record.get(column).unwrap_or_default();
                *value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|parsed| parsed.is_finite())
                    .ok_or_else(|| DatasetError::InvalidValue {
                        row,
                        column: name.to_string(),
                        value: raw.to_string(),
                    })?;
            }
            let label = record.get(label_idx).unwrap_or_default();
            if label.is_empty() {
                return Err(DatasetError::EmptyLabel { row });
            }
            features.push(FeatureVector::from_array(values));
            labels.push(label.to_string());
        }
        Self::from_records(features, labels)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when the dataset has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature matrix in canonical column order.
    #[must_use]
    pub fn matrix(&self) -> Array2<f64> {
        features_to_matrix(&self.features)
    }

    /// Count and percentage of every label, in lexicographic label order.
    #[must_use]
    pub fn class_distribution(&self) -> IndexMap<String, ClassShare> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        let total = self.labels.len().max(1) as f64;
        counts
            .into_iter()
            .map(|(label, count)| {
                (
                    label.to_string(),
                    ClassShare {
                        count,
                        percentage: count as f64 / total * 100.0,
                    },
                )
            })
            .collect()
    }
}
