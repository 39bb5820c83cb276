// THEORY:
// The `oracle` module is the seam between the heuristic engine and the two pretrained
// models used for verification: a general object detector and a general image
// classifier. The engine treats both as black boxes behind async traits.
//
// Key architectural principles:
// 1.  **Black-box contract**: `ObjectDetector::detect` takes an RGB raster of at least
//     300x300 with 0..255 samples; `ImageClassifier::classify` takes a 224x224 float
//     raster in [0,1]. What runs behind them (ONNX, a remote service, a stub) is the
//     loader's business.
// 2.  **Load once, share read-only**: models are loaded at most once per engine lifetime
//     through a bounded retry policy, then shared through `Arc`s by every call.
// 3.  **Degrade, don't fail**: if loading exhausts its budget the registry records the
//     failure and the engine keeps running heuristic-only.

use crate::core_modules::utils::retry::{Backoff, RetryPolicy, retry};
use crate::error::{LotError, LotResult};
use async_trait::async_trait;
use image::{Rgb32FImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DETECTOR_MIN_INPUT: u32 = 300;
pub const CLASSIFIER_INPUT: u32 = 224;

/// One box reported by the object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class: String,
    pub score: f32,
    /// `[x, y, width, height]` in detector input pixels.
    pub bbox: [f32; 4],
}

/// One ranked label reported by the image classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub class_name: String,
    pub probability: f32,
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image: &RgbImage) -> LotResult<Vec<DetectedObject>>;
}

#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Labels ranked by descending probability.
    async fn classify(&self, image: &Rgb32FImage) -> LotResult<Vec<ClassLabel>>;
}

/// Produces the two oracle models. Implementations fetch weights from disk or network.
#[async_trait]
pub trait OracleLoader: Send + Sync {
    async fn load_detector(&self) -> LotResult<Arc<dyn ObjectDetector>>;
    async fn load_classifier(&self) -> LotResult<Arc<dyn ImageClassifier>>;
}

/// Both oracles, ready for concurrent use.
#[derive(Clone)]
pub struct OracleModels {
    pub detector: Arc<dyn ObjectDetector>,
    pub classifier: Arc<dyn ImageClassifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelLoadConfig {
    /// Attempts at loading the pair of models.
    pub attempts: u32,
    pub attempt_timeout_secs: u64,
    /// Extra tries per individual model inside one attempt.
    pub model_retries: u32,
    /// Linear backoff step between per-model tries.
    pub retry_backoff_ms: u64,
}

impl Default for ModelLoadConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout_secs: 60,
            model_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl ModelLoadConfig {
    fn outer_policy(&self) -> RetryPolicy {
        RetryPolicy::new("oracle model load")
            .with_max_attempts(self.attempts)
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }

    fn model_policy(&self, model: &str) -> RetryPolicy {
        RetryPolicy::new(model)
            .with_max_attempts(self.model_retries + 1)
            .with_backoff(Backoff::Linear(Duration::from_millis(self.retry_backoff_ms)))
    }
}

/// Loads both models under the configured retry budget.
pub async fn load_models(
    loader: &dyn OracleLoader,
    config: &ModelLoadConfig,
) -> LotResult<OracleModels> {
    let detector_policy = config.model_policy("object detector");
    let classifier_policy = config.model_policy("image classifier");

    retry(&config.outer_policy(), || async {
        let (detector, classifier) = tokio::try_join!(
            retry(&detector_policy, || loader.load_detector()),
            retry(&classifier_policy, || loader.load_classifier()),
        )?;
        Ok::<_, LotError>(OracleModels {
            detector,
            classifier,
        })
    })
    .await
    .map_err(|e| LotError::model_load(e.to_string()))
}

/// Where the oracle pair is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unavailable,
    Unloaded,
    Loading,
    Ready,
    Failed,
}

enum ModelState {
    Unloaded,
    Loading,
    Ready(OracleModels),
    Failed,
}

/// Owns the oracle pair for one engine.
pub struct OracleRegistry {
    loader: Option<Arc<dyn OracleLoader>>,
    config: ModelLoadConfig,
    state: Mutex<ModelState>,
    /// Bumped by `teardown`; loads that started under an older generation are discarded.
    generation: AtomicU64,
    load_gate: tokio::sync::Mutex<()>,
}

impl OracleRegistry {
    pub fn new(loader: Option<Arc<dyn OracleLoader>>, config: ModelLoadConfig) -> Self {
        Self {
            loader,
            config,
            state: Mutex::new(ModelState::Unloaded),
            generation: AtomicU64::new(0),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ModelStatus {
        if self.loader.is_none() {
            return ModelStatus::Unavailable;
        }
        match &*self.lock_state() {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Failed => ModelStatus::Failed,
        }
    }

    /// The loaded models, if loading has finished successfully.
    pub fn ready(&self) -> Option<OracleModels> {
        match &*self.lock_state() {
            ModelState::Ready(models) => Some(models.clone()),
            _ => None,
        }
    }

    /// Loads the models and waits for the outcome. Returns whether they are ready.
    /// Calling this again after success or failure is a no-op.
    pub async fn load(&self) -> bool {
        let Some(loader) = self.loader.clone() else {
            return false;
        };
        let _gate = self.load_gate.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let mut state = self.lock_state();
            match &*state {
                ModelState::Ready(_) => return true,
                ModelState::Failed => return false,
                _ => *state = ModelState::Loading,
            }
        }

        let result = load_models(loader.as_ref(), &self.config).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("discarding oracle models loaded before teardown");
            return false;
        }

        let mut state = self.lock_state();
        match result {
            Ok(models) => {
                info!("oracle models loaded, verification enabled");
                *state = ModelState::Ready(models);
                true
            }
            Err(e) => {
                warn!(error = %e, "oracle models unavailable, continuing heuristic-only");
                *state = ModelState::Failed;
                false
            }
        }
    }

    /// Starts a background load on first use. Detection proceeds heuristic-only until
    /// the models are ready.
    pub fn ensure_loading(self: &Arc<Self>) {
        if self.loader.is_none() {
            return;
        }
        {
            let mut state = self.lock_state();
            if !matches!(*state, ModelState::Unloaded) {
                return;
            }
            *state = ModelState::Loading;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.load().await;
        });
    }

    /// Releases the models. A later `load` or `ensure_loading` starts over.
    pub fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_state() = ModelState::Unloaded;
    }
}
