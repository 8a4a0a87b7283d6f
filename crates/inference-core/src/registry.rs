//! Ensemble member registry
//!
//! Candidates are loaded once behind a `OnceCell`; later calls return the same
//! `Arc` handles. A candidate that fails to load is logged and skipped. Only
//! when every candidate fails does loading fail.

use crate::error::ModelError;
use crate::model::{Classifier, ModelConfig, ModelHandle};
use crate::onnx_model::OnnxClassifier;
use authenticity_common::DetectionError;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

type Loader = dyn Fn(&ModelConfig) -> Result<Arc<dyn Classifier>, ModelError> + Send + Sync;

/// Load outcome of one candidate
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub loaded: bool,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct LoadedModels {
    handles: Vec<Arc<ModelHandle>>,
    statuses: Vec<ModelStatus>,
}

pub struct ModelRegistry {
    candidates: Vec<ModelConfig>,
    loader: Box<Loader>,
    loaded: OnceCell<LoadedModels>,
}

impl ModelRegistry {
    /// Registry over ONNX candidates
    pub fn new(candidates: Vec<ModelConfig>) -> Self {
        Self::with_loader(candidates, |config| {
            OnnxClassifier::load(config).map(|c| Arc::new(c) as Arc<dyn Classifier>)
        })
    }

    /// Registry with a custom loader (alternative backends, tests)
    pub fn with_loader<F>(candidates: Vec<ModelConfig>, loader: F) -> Self
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn Classifier>, ModelError> + Send + Sync + 'static,
    {
        Self {
            candidates,
            loader: Box::new(loader),
            loaded: OnceCell::new(),
        }
    }

    /// Registry over members that are already loaded
    pub fn preloaded(handles: Vec<ModelHandle>) -> Self {
        let statuses = handles
            .iter()
            .map(|h| ModelStatus {
                id: h.id.clone(),
                loaded: true,
                tags: h.tags.clone(),
                error: None,
            })
            .collect();
        let loaded = OnceCell::new();
        let _ = loaded.set(LoadedModels {
            handles: handles.into_iter().map(Arc::new).collect(),
            statuses,
        });
        Self {
            candidates: Vec::new(),
            loader: Box::new(|config: &ModelConfig| {
                Err(ModelError::LoadFailed {
                    id: config.id.clone(),
                    reason: "registry is preloaded".to_string(),
                })
            }),
            loaded,
        }
    }

    /// Read a YAML list of candidates
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path)?;
        let candidates: Vec<ModelConfig> = serde_yaml::from_str(&contents)?;
        Ok(Self::new(candidates))
    }

    pub fn candidates(&self) -> &[ModelConfig] {
        &self.candidates
    }

    /// Load every candidate (first call only) and return the members that loaded
    pub fn load_models(&self) -> Result<&[Arc<ModelHandle>], DetectionError> {
        let loaded = self.loaded.get_or_try_init(|| self.load_all())?;
        Ok(&loaded.handles)
    }

    /// Per-candidate load outcome; triggers loading if it has not happened yet
    pub fn statuses(&self) -> Vec<ModelStatus> {
        match self.loaded.get_or_try_init(|| self.load_all()) {
            Ok(loaded) => loaded.statuses.clone(),
            Err(_) => self
                .candidates
                .iter()
                .map(|c| ModelStatus {
                    id: c.id.clone(),
                    loaded: false,
                    tags: c.effective_tags(),
                    error: Some("load failed".to_string()),
                })
                .collect(),
        }
    }

    fn load_all(&self) -> Result<LoadedModels, DetectionError> {
        let mut handles = Vec::with_capacity(self.candidates.len());
        let mut statuses = Vec::with_capacity(self.candidates.len());

        for config in &self.candidates {
            let tags = config.effective_tags();
            match (self.loader)(config) {
                Ok(classifier) => {
                    info!("Loaded ensemble member '{}' (tags: {:?})", config.id, tags);
                    let mut handle = ModelHandle::new(classifier)
                        .with_tags(tags.clone())
                        .with_device(config.device);
                    handle.id = config.id.clone();
                    handle.weight_override = config.weight;
                    handles.push(Arc::new(handle));
                    statuses.push(ModelStatus {
                        id: config.id.clone(),
                        loaded: true,
                        tags,
                        error: None,
                    });
                }
                Err(e) => {
                    let err = DetectionError::from(e);
                    warn!("Skipping ensemble member '{}': {}", config.id, err);
                    statuses.push(ModelStatus {
                        id: config.id.clone(),
                        loaded: false,
                        tags,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        if handles.is_empty() {
            return Err(DetectionError::AllModelsFailed {
                attempted: self.candidates.len(),
            });
        }
        Ok(LoadedModels { handles, statuses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClassifier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scripted_loader(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&ModelConfig) -> Result<Arc<dyn Classifier>, ModelError> + Send + Sync + 'static {
        move |config: &ModelConfig| {
            calls.fetch_add(1, Ordering::SeqCst);
            if config.path.to_string_lossy().contains("broken") {
                return Err(ModelError::LoadFailed {
                    id: config.id.clone(),
                    reason: "corrupt graph".to_string(),
                });
            }
            Ok(Arc::new(ScriptedClassifier::new(&config.id, 0.6)) as Arc<dyn Classifier>)
        }
    }

    #[test]
    fn test_failed_member_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ModelRegistry::with_loader(
            vec![
                ModelConfig::new("good", "models/xception_avansat.onnx"),
                ModelConfig::new("bad", "models/broken.onnx"),
            ],
            scripted_loader(calls.clone()),
        );

        let handles = registry.load_models().unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, "good");
        assert!(handles[0].is_advanced());

        let statuses = registry.statuses();
        assert!(statuses[0].loaded);
        assert!(!statuses[1].loaded);
        assert!(statuses[1].error.as_deref().unwrap().contains("corrupt graph"));
    }

    #[test]
    fn test_all_failed() {
        let registry = ModelRegistry::with_loader(
            vec![
                ModelConfig::new("a", "broken_a.onnx"),
                ModelConfig::new("b", "broken_b.onnx"),
            ],
            scripted_loader(Arc::new(AtomicUsize::new(0))),
        );
        let err = registry.load_models().unwrap_err();
        assert!(matches!(err, DetectionError::AllModelsFailed { attempted: 2 }));
    }

    #[test]
    fn test_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ModelRegistry::with_loader(
            vec![ModelConfig::new("m", "m.onnx")],
            scripted_loader(calls.clone()),
        );
        let first = Arc::clone(&registry.load_models().unwrap()[0]);
        let second = Arc::clone(&registry.load_models().unwrap()[0]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_weight_override_carried() {
        let mut config = ModelConfig::new("m", "m.onnx");
        config.weight = Some(2.5);
        let registry =
            ModelRegistry::with_loader(vec![config], scripted_loader(Arc::new(AtomicUsize::new(0))));
        assert_eq!(registry.load_models().unwrap()[0].weight_override, Some(2.5));
    }

    #[test]
    fn test_missing_onnx_file_fails_all() {
        let registry = ModelRegistry::new(vec![ModelConfig::new("x", "does/not/exist.onnx")]);
        assert!(matches!(
            registry.load_models(),
            Err(DetectionError::AllModelsFailed { attempted: 1 })
        ));
    }
}
