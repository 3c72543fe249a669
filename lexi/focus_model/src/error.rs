use std::path::PathBuf;

use thiserror::Error;

/// Required dataset columns are absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dataset is missing required column(s): {}", missing.join(", "))]
pub struct DataSchemaError {
    /// Missing column names, feature columns first in canonical order.
    pub missing: Vec<String>,
}

/// Errors raised while reading a training dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Header lacks required columns.
    #[error(transparent)]
    Schema(#[from] DataSchemaError),
    /// A feature cell could not be parsed as a finite number.
    #[error("row {row}: column `{column}` has non-numeric value `{value}`")]
    InvalidValue {
        /// 1-based data row (header excluded).
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },
    /// A label cell was blank.
    #[error("row {row}: empty label")]
    EmptyLabel {
        /// 1-based data row (header excluded).
        row: usize,
    },
    /// The file contained a header but no records.
    #[error("dataset contains no records")]
    Empty,
    /// CSV framing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inference request rejected before any computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Request body is not a JSON object.
    #[error("request must be a JSON object with the ten assessment fields")]
    NotAnObject,
    /// A required feature field is absent.
    #[error("missing required field `{0}`")]
    MissingField(String),
    /// A required feature field is not a finite number.
    #[error("field `{0}` must be a finite number")]
    NonNumeric(String),
}

impl ValidationError {
    /// Name of the offending field, if the error is field-specific.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject => None,
            Self::MissingField(field) | Self::NonNumeric(field) => Some(field.as_str()),
        }
    }
}

/// Artifact bundle could not be loaded; the serving process must not start.
#[derive(Debug, Error)]
pub enum BundleLoadError {
    /// One of the three members is absent.
    #[error("bundle member `{member}` not found at {path:?}")]
    MissingMember {
        /// Member name (`model`, `scaler`, `labels`).
        member: &'static str,
        /// Expected path.
        path: PathBuf,
    },
    /// A member exists but cannot be read or parsed.
    #[error("bundle member `{member}` is corrupt: {reason}")]
    Corrupt {
        /// Member name.
        member: &'static str,
        /// Parser or I/O message.
        reason: String,
    },
    /// Members come from different training runs or an unsupported format.
    #[error("bundle version mismatch: {0}")]
    VersionMismatch(String),
    /// Members parse but disagree on shape.
    #[error("bundle members are inconsistent: {0}")]
    Inconsistent(String),
}

/// Errors raised while training, evaluating or selecting candidates.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// A configuration value is out of range.
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
    /// Classification needs at least two classes.
    #[error("fewer than two classes in training data: {0}")]
    SingleClass(String),
    /// The candidate registry is empty.
    #[error("no candidates to select from")]
    NoCandidates,
    /// Inputs disagree on shape.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// A label is not known to the codec.
    #[error("label `{0}` is not known to the codec")]
    UnknownLabel(String),
    /// A candidate failed to fit.
    #[error("candidate `{name}` failed to fit: {reason}")]
    Fit {
        /// Candidate name.
        name: String,
        /// Failure description.
        reason: String,
    },
}
