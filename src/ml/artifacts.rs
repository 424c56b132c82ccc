//! Named JSON artifacts in a model directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ml::ModelError;

pub const FEATURE_NAMES: &str = "feature_names";
pub const SLA_PREDICTOR: &str = "sla_predictor";
pub const RF_BASELINE: &str = "rf_baseline";
pub const GB_PRODUCTION: &str = "gb_production";
pub const ANOMALY_DETECTOR: &str = "anomaly_detector";
pub const SCALER_STANDARD: &str = "scaler_standard";
pub const SHAP_EXPLAINER: &str = "shap_explainer";
pub const TRAINING_REPORT: &str = "training_report";

pub fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

pub fn artifact_exists(dir: &Path, name: &str) -> bool {
    artifact_path(dir, name).is_file()
}

/// Read and parse one artifact.
///
/// A missing file is `ArtifactMissing`; any other I/O or parse failure is
/// `ArtifactCorrupt`.
pub fn read_artifact<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, ModelError> {
    let path = artifact_path(dir, name);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ModelError::ArtifactMissing {
                name: name.to_string(),
                path,
            })
        }
        Err(e) => {
            return Err(ModelError::ArtifactCorrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
    };
    serde_json::from_str(&content).map_err(|e| ModelError::ArtifactCorrupt {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Write one artifact, creating the directory if needed.
///
/// The file is written under a temporary name and renamed into place so a
/// concurrent reader never sees a partial artifact.
pub fn write_artifact<T: Serialize>(dir: &Path, name: &str, value: &T) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    let path = artifact_path(dir, name);
    let tmp = dir.join(format!(".{}.json.tmp", name));
    let body = serde_json::to_vec(value).with_context(|| format!("failed to encode {}", name))?;
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("failed to move {} into place", name))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        match read_artifact::<Vec<String>>(dir.path(), FEATURE_NAMES) {
            Err(ModelError::ArtifactMissing { name, .. }) => assert_eq!(name, "feature_names"),
            other => panic!("expected missing, got {:?}", other),
        }

        fs::write(artifact_path(dir.path(), FEATURE_NAMES), "{not json").unwrap();
        assert!(matches!(
            read_artifact::<Vec<String>>(dir.path(), FEATURE_NAMES),
            Err(ModelError::ArtifactCorrupt { .. })
        ));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("models");
        let names = vec!["a".to_string(), "b".to_string()];
        let path = write_artifact(&nested, FEATURE_NAMES, &names).unwrap();
        assert!(path.ends_with("feature_names.json"));
        assert!(artifact_exists(&nested, FEATURE_NAMES));
        let back: Vec<String> = read_artifact(&nested, FEATURE_NAMES).unwrap();
        assert_eq!(back, names);
    }
}
