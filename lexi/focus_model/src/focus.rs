use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

/// Skill domain aggregated from three assessment fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusDomain {
    /// Speed, accuracy and comprehension.
    Reading,
    /// Speed, quality and grammar.
    Writing,
    /// Phonetic, irregular-word and overall spelling.
    Spelling,
}

impl FocusDomain {
    /// Domains in tie-break order.
    pub const ALL: [Self; 3] = [Self::Reading, Self::Writing, Self::Spelling];

    /// Display name used in responses.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reading => "Reading",
            Self::Writing => "Writing",
            Self::Spelling => "Spelling",
        }
    }

    /// Unrounded mean of the domain's three raw scores.
    #[must_use]
    pub fn score(self, features: &FeatureVector) -> f64 {
        let parts = match self {
            Self::Reading => [
                features.reading_speed,
                features.reading_accuracy,
                features.reading_comprehension,
            ],
            Self::Writing => [
                features.writing_speed,
                features.writing_quality,
                features.grammar_sentence,
            ],
            Self::Spelling => [
                features.phonetic_spelling,
                features.irregular_word_spelling,
                features.spelling_accuracy,
            ],
        };
        parts.iter().sum::<f64>() / 3.0
    }
}

impl fmt::Display for FocusDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One ranked domain as it appears in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusArea {
    /// Domain name.
    pub name: String,
    /// Domain mean rounded to two decimals.
    pub score: f64,
}

/// Domains ordered weakest first.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusAreaRanking {
    ranked: [(FocusDomain, f64); 3],
}

impl FocusAreaRanking {
    /// Weakest domain.
    #[must_use]
    pub const fn primary(&self) -> FocusDomain {
        self.ranked[0].0
    }

    /// Second weakest domain.
    #[must_use]
    pub const fn secondary(&self) -> FocusDomain {
        self.ranked[1].0
    }

    /// Strongest domain.
    #[must_use]
    pub const fn tertiary(&self) -> FocusDomain {
        self.ranked[2].0
    }

    /// Response entries with rounded scores.
    #[must_use]
    pub fn areas(&self) -> Vec<FocusArea> {
        self.ranked
            .iter()
            .map(|(domain, score)| FocusArea {
                name: domain.name().to_string(),
                score: round_to(*score, 2),
            })
            .collect()
    }
}

/// Ranks the domains by ascending unrounded mean; ties keep
/// Reading, Writing, Spelling order.
#[must_use]
pub fn rank_focus_areas(features: &FeatureVector) -> FocusAreaRanking {
    let mut ranked = FocusDomain::ALL.map(|domain| (domain, domain.score(features)));
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    FocusAreaRanking { ranked }
}

/// Rounds half away from zero to `decimals` places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(reading: f64, writing: f64, spelling: f64) -> FeatureVector {
        FeatureVector::from_array([
            9.0, reading, reading, reading, writing, writing, writing, spelling, spelling, spelling,
        ])
    }

    #[test]
    fn weakest_domain_comes_first() {
        let ranking = rank_focus_areas(&vector(40.0, 70.0, 90.0));
        assert_eq!(ranking.primary(), FocusDomain::Reading);
        assert_eq!(ranking.secondary(), FocusDomain::Writing);
        assert_eq!(ranking.tertiary(), FocusDomain::Spelling);
        let areas = ranking.areas();
        assert_eq!(areas[0], FocusArea { name: "Reading".into(), score: 40.0 });
    }

    #[test]
    fn ties_keep_declaration_order() {
        let ranking = rank_focus_areas(&vector(60.0, 60.0, 60.0));
        assert_eq!(
            [ranking.primary(), ranking.secondary(), ranking.tertiary()],
            FocusDomain::ALL
        );
        let ranking = rank_focus_areas(&vector(80.0, 50.0, 50.0));
        assert_eq!(ranking.primary(), FocusDomain::Writing);
        assert_eq!(ranking.secondary(), FocusDomain::Spelling);
    }

    #[test]
    fn scores_are_rounded_after_ranking() {
        let mut features = vector(50.0, 50.0, 50.0);
        features.reading_speed = 50.004;
        features.writing_speed = 50.002;
        let ranking = rank_focus_areas(&features);
        assert_eq!(ranking.primary(), FocusDomain::Spelling);
        assert_eq!(ranking.secondary(), FocusDomain::Writing);
        let areas = ranking.areas();
        assert_eq!(areas[1].score, 50.0);
        assert_eq!(areas[2].score, 50.0);
    }

    #[test]
    fn spelling_is_primary_when_lowest() {
        let features = FeatureVector::from_array([
            10.0, 60.0, 55.0, 65.0, 58.0, 62.0, 60.0, 25.0, 20.0, 30.0,
        ]);
        let areas = rank_focus_areas(&features).areas();
        assert_eq!(areas[0].name, "Spelling");
        assert_eq!(areas[0].score, 25.0);
    }
}
