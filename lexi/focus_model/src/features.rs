use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Number of assessment fields in every feature vector.
pub const FEATURE_COUNT: usize = 10;

/// Canonical field order. Column lookup, matrix layout, request validation
/// and the response echo all go through this constant.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "reading_speed",
    "reading_accuracy",
    "reading_comprehension",
    "writing_speed",
    "writing_quality",
    "grammar_sentence",
    "phonetic_spelling",
    "irregular_word_spelling",
    "spelling_accuracy",
];

/// One student's ten raw assessment scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Age in years.
    pub age: f64,
    /// Reading speed score.
    pub reading_speed: f64,
    /// Reading accuracy score.
    pub reading_accuracy: f64,
    /// Reading comprehension score.
    pub reading_comprehension: f64,
    /// Writing speed score.
    pub writing_speed: f64,
    /// Writing quality score.
    pub writing_quality: f64,
    /// Grammar and sentence construction score.
    pub grammar_sentence: f64,
    /// Phonetic spelling score.
    pub phonetic_spelling: f64,
    /// Irregular word spelling score.
    pub irregular_word_spelling: f64,
    /// Spelling accuracy score.
    pub spelling_accuracy: f64,
}

impl FeatureVector {
    /// Builds a vector from values laid out in [`FEATURE_NAMES`] order.
    #[must_use]
    pub const fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            age: values[0],
            reading_speed: values[1],
            reading_accuracy: values[2],
            reading_comprehension: values[3],
            writing_speed: values[4],
            writing_quality: values[5],
            grammar_sentence: values[6],
            phonetic_spelling: values[7],
            irregular_word_spelling: values[8],
            spelling_accuracy: values[9],
        }
    }

    /// Values in [`FEATURE_NAMES`] order.
    #[must_use]
    pub const fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.age,
            self.reading_speed,
            self.reading_accuracy,
            self.reading_comprehension,
            self.writing_speed,
            self.writing_quality,
            self.grammar_sentence,
            self.phonetic_spelling,
            self.irregular_word_spelling,
            self.spelling_accuracy,
        ]
    }

    /// Looks a field up by its canonical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|field| *field == name)
            .map(|idx| self.as_array()[idx])
    }

    /// Validates an inference request body.
    ///
    /// Every field must be present and finite, either a JSON number or a
    /// string holding one (`"72"` reads as `72.0`). The first offending field
    /// in canonical order is reported. Unknown extra keys are ignored.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, name) in values.iter_mut().zip(FEATURE_NAMES) {
            let raw = object
                .get(name)
                .ok_or_else(|| ValidationError::MissingField(name.to_string()))?;
            *slot = numeric_value(raw)
                .filter(|number| number.is_finite())
                .ok_or_else(|| ValidationError::NonNumeric(name.to_string()))?;
        }
        Ok(Self::from_array(values))
    }
}

fn numeric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Stacks vectors into an `n × 10` matrix in canonical column order.
#[must_use]
pub fn features_to_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let mut matrix = Array2::zeros((rows.len(), FEATURE_COUNT));
    for (mut target, row) in matrix.rows_mut().into_iter().zip(rows) {
        for (cell, value) in target.iter_mut().zip(row.as_array()) {
            *cell = value;
        }
    }
    matrix
}
