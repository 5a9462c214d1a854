// ============================================================
// Layer 6 — Weight Store
// ============================================================
// Saves and restores network weights using Burn's CompactRecorder.
//
// What gets stored per role:
//   1. <stem> weights — all parameters, written by the recorder
//      (it adds its own file extension)
//   2. <stem>.json    — the ExpertNetConfig the weights belong to
//
// Loading checks, in order:
//   - the architecture sidecar exists and parses
//   - its architecture family and class count match the declared
//     config for the role
//   - the recorded tensors fit a network built from that config
//
// Any failure is a ModelLoad error naming the role. Nothing is
// retried.
//
// File layout:
//   models/
//     best_ModalityRouter.mpk   best_ModalityRouter.json
//     best_BrainExpert.mpk      best_BrainExpert.json
//     ...
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{fs, path::PathBuf};

use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::domain::error::TriageError;
use crate::ml::model::{ExpertNet, ExpertNetConfig};

pub struct WeightStore {
    dir: PathBuf,
}

impl WeightStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn sidecar(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.json"))
    }

    /// Write weights and architecture sidecar for one role.
    pub fn save<B: Backend>(
        &self,
        stem:   &str,
        net:    &ExpertNet<B>,
        config: &ExpertNetConfig,
    ) -> Result<(), TriageError> {
        fs::create_dir_all(&self.dir)?;

        CompactRecorder::new()
            .record(net.clone().into_record(), self.dir.join(stem))
            .map_err(|e| TriageError::model_load(stem, format!("{e:?}")))?;

        let json = serde_json::to_string_pretty(config)
            .map_err(|e| TriageError::model_load(stem, e))?;
        fs::write(self.sidecar(stem), json)?;

        tracing::debug!(stem, dir = %self.dir.display(), "Saved weights");
        Ok(())
    }

    /// Read the architecture sidecar for one role.
    pub fn load_config(&self, stem: &str) -> Result<ExpertNetConfig, TriageError> {
        let path = self.sidecar(stem);
        let json = fs::read_to_string(&path).map_err(|e| {
            TriageError::model_load(stem, format!("cannot read '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| TriageError::model_load(stem, e))
    }

    /// Load one role's weights into a network of the `expected`
    /// architecture.
    pub fn load<B: Backend>(
        &self,
        stem:     &str,
        expected: &ExpertNetConfig,
        device:   &B::Device,
    ) -> Result<(ExpertNetConfig, ExpertNet<B>), TriageError> {
        let stored = self.load_config(stem)?;

        if stored.architecture != expected.architecture {
            return Err(TriageError::model_load(
                stem,
                format!(
                    "stored architecture {:?} does not match declared {:?}",
                    stored.architecture, expected.architecture
                ),
            ));
        }
        if stored.num_classes != expected.num_classes {
            return Err(TriageError::model_load(
                stem,
                format!(
                    "stored weights have {} outputs, expected {}",
                    stored.num_classes, expected.num_classes
                ),
            ));
        }

        let reference: ExpertNet<B> = stored.init(device);
        let shapes = reference.param_shapes();

        let path = self.dir.join(stem);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .map_err(|e| {
                TriageError::model_load(stem, format!("cannot read '{}': {e:?}", path.display()))
            })?;
        let net = reference.load_record(record);

        if net.param_shapes() != shapes {
            return Err(TriageError::model_load(
                stem,
                "recorded tensors do not fit the stored architecture",
            ));
        }

        tracing::info!(stem, architecture = ?stored.architecture, "Loaded weights");
        Ok((stored, net))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modality::Architecture;
    use burn::backend::NdArray;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let cfg = ExpertNetConfig::tiny(Architecture::ResNet50, 9, 0.45);
        let net: ExpertNet<NdArray> = cfg.init(&Default::default());

        store.save("best_SkinExpert", &net, &cfg).unwrap();
        assert!(dir.path().join("best_SkinExpert.json").exists());

        let (stored, loaded) = store
            .load::<NdArray>("best_SkinExpert", &cfg, &Default::default())
            .unwrap();
        assert_eq!(stored, cfg);
        assert_eq!(loaded.param_shapes(), net.param_shapes());
    }

    #[test]
    fn test_missing_files_are_model_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let cfg = ExpertNetConfig::tiny(Architecture::DenseNet121, 5, 0.3);

        let err = store.load::<NdArray>("best_LungExpert", &cfg, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ModelLoad { ref role, .. } if role == "best_LungExpert"));

        // sidecar present, weights missing
        fs::write(dir.path().join("best_LungExpert.json"), serde_json::to_string(&cfg).unwrap())
            .unwrap();
        let err = store.load::<NdArray>("best_LungExpert", &cfg, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ModelLoad { .. }));
    }

    #[test]
    fn test_architecture_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let saved = ExpertNetConfig::tiny(Architecture::ResNet50, 4, 0.0);
        let net: ExpertNet<NdArray> = saved.init(&Default::default());
        store.save("best_BrainExpert", &net, &saved).unwrap();

        let declared = ExpertNetConfig::tiny(Architecture::EfficientNetB2, 4, 0.4);
        let err = store
            .load::<NdArray>("best_BrainExpert", &declared, &Default::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not match"), "{err}");
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let saved = ExpertNetConfig::tiny(Architecture::EfficientNetB0, 3, 0.3);
        let net: ExpertNet<NdArray> = saved.init(&Default::default());
        store.save("best_ECGExpert", &net, &saved).unwrap();

        let declared = ExpertNetConfig::tiny(Architecture::EfficientNetB0, 4, 0.3);
        assert!(store
            .load::<NdArray>("best_ECGExpert", &declared, &Default::default())
            .is_err());
    }

    #[test]
    fn test_recorded_tensors_must_fit_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let cfg = ExpertNetConfig::tiny(Architecture::ResNet50, 9, 0.45);
        let net: ExpertNet<NdArray> = cfg.init(&Default::default());
        store.save("best_SkinExpert", &net, &cfg).unwrap();

        // same family and class count, wider blocks than the recorded tensors
        let widened = ExpertNetConfig { block_channels: vec![6, 12], ..cfg.clone() };
        fs::write(
            dir.path().join("best_SkinExpert.json"),
            serde_json::to_string(&widened).unwrap(),
        )
        .unwrap();

        let err = store.load::<NdArray>("best_SkinExpert", &cfg, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ModelLoad { ref role, .. } if role == "best_SkinExpert"));
        assert!(err.to_string().contains("do not fit"), "{err}");
    }

    #[test]
    fn test_corrupt_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("best_ModalityRouter.json"), "{ not json").unwrap();
        let store = WeightStore::new(dir.path());
        assert!(matches!(
            store.load_config("best_ModalityRouter"),
            Err(TriageError::ModelLoad { .. })
        ));
    }
}
