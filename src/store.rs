//! Model Store
//!
//! A bundle is persisted as one JSON document:
//!
//! ```text
//! {
//!   "format":     "dlha-model-bundle",
//!   "version":    1,
//!   "created_at": "<RFC 3339>",
//!   "checksum":   "<sha256 of parts>",
//!   "parts": { "normalizer", "reducer", "layer1", "layer2", "encoders" }
//! }
//! ```
//!
//! Writes go to a temporary file in the destination directory and are
//! renamed into place, so readers see the old bundle or the new one.

use crate::bundle::ModelBundle;
use crate::models::{CoarseDetector, FineDetector};
use crate::normalizer::{CategoryEncoders, FeatureNormalizer, ScalingState};
use crate::reducer::PcaReducer;
use crate::{DlhaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Format tag written into every bundle
pub const BUNDLE_FORMAT: &str = "dlha-model-bundle";
/// Current bundle layout version
pub const BUNDLE_VERSION: u64 = 1;
/// Part names every bundle must carry
pub const BUNDLE_PARTS: [&str; 5] = ["normalizer", "reducer", "layer1", "layer2", "encoders"];

#[derive(Serialize)]
struct PartsRef<'a> {
    normalizer: &'a ScalingState,
    reducer: &'a PcaReducer,
    layer1: &'a CoarseDetector,
    layer2: &'a FineDetector,
    encoders: &'a CategoryEncoders,
}

/// Atomic, versioned bundle persistence
pub struct ModelStore;

impl ModelStore {
    /// Write `bundle` to `destination`
    pub fn save(bundle: &ModelBundle, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();

        let parts = serde_json::to_value(PartsRef {
            normalizer: bundle.normalizer().scaling(),
            reducer: bundle.reducer(),
            layer1: bundle.layer1(),
            layer2: bundle.layer2(),
            encoders: bundle.normalizer().encoders(),
        })?;
        let checksum = checksum(&parts)?;

        let document = serde_json::json!({
            "format": BUNDLE_FORMAT,
            "version": BUNDLE_VERSION,
            "created_at": chrono::Utc::now().to_rfc3339(),
            "checksum": checksum,
            "parts": parts,
        });

        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&serde_json::to_vec(&document)?)?;
        file.as_file().sync_all()?;
        file.persist(destination).map_err(|e| DlhaError::Io(e.error))?;

        tracing::info!(
            "Saved model bundle to {} (checksum {})",
            destination.display(),
            &checksum[..12]
        );
        Ok(())
    }

    /// Read and validate a bundle from `source`
    pub fn load(source: impl AsRef<Path>) -> Result<ModelBundle> {
        let source = source.as_ref();
        let bytes = std::fs::read(source)?;

        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("malformed bundle document: {}", e)))?;

        match document.get("format").and_then(Value::as_str) {
            Some(BUNDLE_FORMAT) => {}
            other => return Err(corrupt(format!("unexpected format tag {:?}", other))),
        }
        match document.get("version").and_then(Value::as_u64) {
            Some(BUNDLE_VERSION) => {}
            other => {
                return Err(corrupt(format!(
                    "unsupported bundle version {:?} (expected {})",
                    other, BUNDLE_VERSION
                )))
            }
        }

        let parts = document
            .get("parts")
            .and_then(Value::as_object)
            .ok_or_else(|| corrupt("missing parts".into()))?;
        if let Some(missing) = BUNDLE_PARTS.iter().find(|name| !parts.contains_key(**name)) {
            return Err(corrupt(format!("missing part '{}'", missing)));
        }

        let expected = document
            .get("checksum")
            .and_then(Value::as_str)
            .ok_or_else(|| corrupt("missing checksum".into()))?;
        let actual = checksum(&Value::Object(parts.clone()))?;
        if actual != expected {
            return Err(corrupt(format!(
                "checksum mismatch (stored {}, computed {})",
                expected, actual
            )));
        }

        let normalizer = FeatureNormalizer::from_parts(part(parts, "encoders")?, part(parts, "normalizer")?)?;
        let bundle = ModelBundle::from_parts(
            normalizer,
            part(parts, "reducer")?,
            part(parts, "layer1")?,
            part(parts, "layer2")?,
        )?;

        tracing::info!(
            "Loaded model bundle from {} ({} components, layer-1 {}, layer-2 {})",
            source.display(),
            bundle.reducer().n_components(),
            fitted_label(bundle.layer1().is_fitted()),
            fitted_label(bundle.layer2().is_fitted())
        );
        Ok(bundle)
    }
}

fn corrupt(reason: String) -> DlhaError {
    DlhaError::CorruptBundle(reason)
}

fn fitted_label(fitted: bool) -> &'static str {
    if fitted {
        "fitted"
    } else {
        "unfit"
    }
}

/// SHA-256 over the canonical (key-sorted) serialization of `parts`
fn checksum(parts: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(parts)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn part<T: DeserializeOwned>(parts: &Map<String, Value>, name: &str) -> Result<T> {
    let value = parts
        .get(name)
        .ok_or_else(|| corrupt(format!("missing part '{}'", name)))?;
    <T as serde::Deserialize>::deserialize(value).map_err(|e| corrupt(format!("part '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::router::ArbitrationRouter;
    use crate::training::fixtures::labeled_records;
    use crate::training::Trainer;

    fn trained() -> ModelBundle {
        Trainer::new(DetectorConfig::default())
            .train(&labeled_records())
            .unwrap()
    }

    fn rewrite(path: &Path, edit: impl FnOnce(&mut Value)) {
        let mut document: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        edit(&mut document);
        std::fs::write(path, serde_json::to_vec(&document).unwrap()).unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join("bundle.json");
        let bundle = trained();

        ModelStore::save(&bundle, &path).unwrap();
        let restored = ModelStore::load(&path).unwrap();
        assert_eq!(restored, bundle);

        let records: Vec<_> = labeled_records().into_iter().map(|r| r.record).collect();
        let router = ArbitrationRouter::default();
        assert_eq!(
            restored.predict(&router, &records).unwrap(),
            bundle.predict(&router, &records).unwrap()
        );
    }

    #[test]
    fn test_document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        ModelStore::save(&trained(), &path).unwrap();

        let document: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(document["format"], BUNDLE_FORMAT);
        assert_eq!(document["version"], BUNDLE_VERSION);
        assert_eq!(document["checksum"].as_str().unwrap().len(), 64);
        for name in BUNDLE_PARTS {
            assert!(document["parts"].get(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_missing_layer2_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        ModelStore::save(&trained(), &path).unwrap();

        rewrite(&path, |doc| {
            doc["parts"].as_object_mut().unwrap().remove("layer2");
        });
        match ModelStore::load(&path) {
            Err(DlhaError::CorruptBundle(reason)) => assert!(reason.contains("layer2")),
            other => panic!("expected CorruptBundle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tampered_part_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        ModelStore::save(&trained(), &path).unwrap();

        rewrite(&path, |doc| {
            doc["parts"]["layer1"] = serde_json::json!({"state": "unfit"});
        });
        assert!(matches!(ModelStore::load(&path), Err(DlhaError::CorruptBundle(_))));
    }

    #[test]
    fn test_version_and_format_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        ModelStore::save(&trained(), &path).unwrap();

        rewrite(&path, |doc| doc["version"] = serde_json::json!(2));
        assert!(matches!(ModelStore::load(&path), Err(DlhaError::CorruptBundle(_))));

        rewrite(&path, |doc| {
            doc["version"] = serde_json::json!(BUNDLE_VERSION);
            doc["format"] = serde_json::json!("pickle");
        });
        assert!(matches!(ModelStore::load(&path), Err(DlhaError::CorruptBundle(_))));
    }

    #[test]
    fn test_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(ModelStore::load(&path), Err(DlhaError::CorruptBundle(_))));
    }

    #[test]
    fn test_failed_save_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        // Destination is an existing directory, so the final rename fails
        let destination = dir.path().join("occupied");
        std::fs::create_dir(&destination).unwrap();

        assert!(ModelStore::save(&trained(), &destination).is_err());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(destination.is_dir());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelStore::load(dir.path().join("absent.json")),
            Err(DlhaError::Io(_))
        ));
    }
}
