use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

/// Bijection between difficulty-level labels and dense indices `0..C`.
///
/// Classes are stored in lexicographic order, so index `i` is the `i`-th
/// smallest label seen at fit time. The codec is immutable after `fit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCodec {
    classes: Vec<String>,
}

impl LabelCodec {
    /// Builds the codec from the distinct labels in `labels`.
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<&str> = labels.iter().map(|label| label.as_ref()).collect();
        Self {
            classes: classes.into_iter().map(str::to_owned).collect(),
        }
    }

    /// Index of `label`, or `None` for a label unseen at fit time.
    #[must_use]
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(label))
            .ok()
    }

    /// Encodes every label, failing on the first unknown one.
    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>, TrainingError> {
        labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                self.encode(label)
                    .ok_or_else(|| TrainingError::UnknownLabel(label.to_string()))
            })
            .collect()
    }

    /// Label for `index`, or `None` when out of range.
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Labels in index order.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no labels were seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
