//! Persisted artefacts: the winning model, its scaler and the label codec.
//!
//! Each member is its own JSON file wrapped in a [`BundleMember`] envelope.
//! The envelopes share a `bundle_id`, which is how a load detects members
//! mixed from different training runs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    codec::LabelCodec, error::BundleLoadError, features::FEATURE_COUNT, models::FittedModel,
    scaler::StandardScaler,
};

/// Envelope format written by this version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;
/// Model member file name.
pub const MODEL_FILE: &str = "model.json";
/// Scaler member file name.
pub const SCALER_FILE: &str = "scaler.json";
/// Label codec member file name.
pub const LABELS_FILE: &str = "labels.json";

/// Envelope around one serialised member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMember<T> {
    /// Shared by the three members of one bundle.
    pub bundle_id: Uuid,
    /// Envelope format.
    pub format_version: u32,
    /// Creation time of the bundle.
    pub created_at: DateTime<Utc>,
    /// The member itself.
    pub payload: T,
}

/// Model, scaler and codec produced together by one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    /// Identifier shared by the members.
    pub bundle_id: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Selected model.
    pub model: FittedModel,
    /// Scaler fit on the training split.
    pub scaler: StandardScaler,
    /// Label codec.
    pub codec: LabelCodec,
}

impl ArtifactBundle {
    /// Assembles a fresh bundle.
    #[must_use]
    pub fn new(model: FittedModel, scaler: StandardScaler, codec: LabelCodec) -> Self {
        Self {
            bundle_id: Uuid::new_v4(),
            created_at: Utc::now(),
            model,
            scaler,
            codec,
        }
    }

    fn envelope<T>(&self, payload: T) -> BundleMember<T> {
        BundleMember {
            bundle_id: self.bundle_id,
            format_version: BUNDLE_FORMAT_VERSION,
            created_at: self.created_at,
            payload,
        }
    }

    /// Writes the three members into `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating bundle dir {}", dir.display()))?;
        write_member(&dir.join(MODEL_FILE), &self.envelope(&self.model))?;
        write_member(&dir.join(SCALER_FILE), &self.envelope(&self.scaler))?;
        write_member(&dir.join(LABELS_FILE), &self.envelope(&self.codec))?;
        Ok(())
    }

    /// Loads and cross-checks the three members in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, BundleLoadError> {
        let dir = dir.as_ref();
        let model: BundleMember<FittedModel> = read_member(dir, "model", MODEL_FILE)?;
        let scaler: BundleMember<StandardScaler> = read_member(dir, "scaler", SCALER_FILE)?;
        let codec: BundleMember<LabelCodec> = read_member(dir, "labels", LABELS_FILE)?;

        for (member, version) in [
            ("model", model.format_version),
            ("scaler", scaler.format_version),
            ("labels", codec.format_version),
        ] {
            if version != BUNDLE_FORMAT_VERSION {
                return Err(BundleLoadError::VersionMismatch(format!(
                    "{member} has format version {version}, expected {BUNDLE_FORMAT_VERSION}"
                )));
            }
        }
        if scaler.bundle_id != model.bundle_id || codec.bundle_id != model.bundle_id {
            return Err(BundleLoadError::VersionMismatch(format!(
                "members belong to different bundles (model {}, scaler {}, labels {})",
                model.bundle_id, scaler.bundle_id, codec.bundle_id
            )));
        }

        let bundle = Self {
            bundle_id: model.bundle_id,
            created_at: model.created_at,
            model: model.payload,
            scaler: scaler.payload,
            codec: codec.payload,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }

    /// Shape agreement between the members.
    pub fn check_consistency(&self) -> Result<(), BundleLoadError> {
        if self.scaler.n_features() != FEATURE_COUNT {
            return Err(BundleLoadError::Inconsistent(format!(
                "scaler covers {} features, expected {FEATURE_COUNT}",
                self.scaler.n_features()
            )));
        }
        if self.model.n_features != FEATURE_COUNT {
            return Err(BundleLoadError::Inconsistent(format!(
                "model expects {} features, expected {FEATURE_COUNT}",
                self.model.n_features
            )));
        }
        if self.model.n_classes != self.codec.len() {
            return Err(BundleLoadError::Inconsistent(format!(
                "model predicts {} classes but the codec holds {}",
                self.model.n_classes,
                self.codec.len()
            )));
        }
        Ok(())
    }

    /// Paths of the members inside `dir`.
    #[must_use]
    pub fn member_paths(dir: impl AsRef<Path>) -> [PathBuf; 3] {
        let dir = dir.as_ref();
        [dir.join(MODEL_FILE), dir.join(SCALER_FILE), dir.join(LABELS_FILE)]
    }
}

fn write_member<T: Serialize>(path: &Path, member: &BundleMember<T>) -> Result<()> {
    let payload = serde_json::to_vec(member)?;
    fs::write(path, payload).with_context(|| format!("writing {}", path.display()))
}

fn read_member<T: DeserializeOwned>(
    dir: &Path,
    member: &'static str,
    file: &str,
) -> Result<BundleMember<T>, BundleLoadError> {
    let path = dir.join(file);
    if !path.is_file() {
        return Err(BundleLoadError::MissingMember { member, path });
    }
    let raw = fs::read(&path).map_err(|err| BundleLoadError::Corrupt {
        member,
        reason: err.to_string(),
    })?;
    serde_json::from_slice(&raw).map_err(|err| BundleLoadError::Corrupt {
        member,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        features::features_to_matrix,
        features::FeatureVector,
        models::{Algorithm, CandidateSpec, KnnParams},
    };
    use tempfile::tempdir;

    fn bundle() -> ArtifactBundle {
        let features: Vec<FeatureVector> = (0..6)
            .map(|i| FeatureVector::from_array([f64::from(i) * 10.0; FEATURE_COUNT]))
            .collect();
        let x = features_to_matrix(&features);
        let scaler = StandardScaler::fit(&x).unwrap();
        let codec = LabelCodec::fit(&["Easy", "Hard"]);
        let y = [1, 1, 1, 0, 0, 0];
        let knn = Algorithm::KNearestNeighbors(KnnParams::default());
        let model = CandidateSpec::new("K-Nearest Neighbors", knn)
            .fit(&scaler.transform(&x).unwrap(), &y, 2)
            .unwrap();
        ArtifactBundle::new(model, scaler, codec)
    }

    #[test]
    fn save_then_load_restores_members() {
        let tmp = tempdir().unwrap();
        let original = bundle();
        original.save(tmp.path()).unwrap();
        for path in ArtifactBundle::member_paths(tmp.path()) {
            assert!(path.is_file());
        }
        assert_eq!(ArtifactBundle::load(tmp.path()).unwrap(), original);
    }

    #[test]
    fn missing_member_is_named() {
        let tmp = tempdir().unwrap();
        bundle().save(tmp.path()).unwrap();
        fs::remove_file(tmp.path().join(SCALER_FILE)).unwrap();
        match ArtifactBundle::load(tmp.path()) {
            Err(BundleLoadError::MissingMember { member, .. }) => assert_eq!(member, "scaler"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn corrupt_member_is_reported() {
        let tmp = tempdir().unwrap();
        bundle().save(tmp.path()).unwrap();
        fs::write(tmp.path().join(LABELS_FILE), b"{ not json").unwrap();
        assert!(matches!(
            ArtifactBundle::load(tmp.path()),
            Err(BundleLoadError::Corrupt { member: "labels", .. })
        ));
    }

    #[test]
    fn members_from_different_runs_are_rejected() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        bundle().save(first.path()).unwrap();
        bundle().save(second.path()).unwrap();
        fs::copy(second.path().join(MODEL_FILE), first.path().join(MODEL_FILE)).unwrap();
        assert!(matches!(
            ArtifactBundle::load(first.path()),
            Err(BundleLoadError::VersionMismatch(_))
        ));
    }

    #[test]
    fn class_count_mismatch_is_inconsistent() {
        let tmp = tempdir().unwrap();
        let mut broken = bundle();
        broken.codec = LabelCodec::fit(&["Easy", "Hard", "Medium"]);
        broken.save(tmp.path()).unwrap();
        assert!(matches!(
            ArtifactBundle::load(tmp.path()),
            Err(BundleLoadError::Inconsistent(_))
        ));
    }
}
