//! Crop disease prediction orchestrator
//!
//! `predict` runs one request end to end:
//! validate input → persist image → locate script (staging a bundled copy
//! when available) → locate model → run the routine → parse its line →
//! attach a recommendation. Every temp file created along the way is
//! released before the call returns, on success and on every error path.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifacts::{ArtifactManager, ScriptLocation};
use crate::config::InferenceConfig;
use crate::error::{ErrorCategory, PredictError, Result};
use crate::invoker::{InferenceInvoker, InterruptSignal};
use crate::metrics;
use crate::parser::{parse_output, OutputFilter};
use crate::prediction::{PredictionRequest, PredictionResult};
use crate::recommendation::RecommendationTable;

const BUNDLED_PREDICT_PY: &str = include_str!("../resources/predict.py");

/// Inference scripts shipped inside the binary, keyed by name
#[derive(Debug, Clone)]
pub struct BundledScripts {
    scripts: HashMap<String, Cow<'static, str>>,
}

impl Default for BundledScripts {
    fn default() -> Self {
        Self::empty().with_script("predict.py", BUNDLED_PREDICT_PY)
    }
}

impl BundledScripts {
    pub fn empty() -> Self {
        Self {
            scripts: HashMap::new(),
        }
    }

    pub fn with_script(mut self, name: impl Into<String>, contents: impl Into<Cow<'static, str>>) -> Self {
        self.scripts.insert(name.into(), contents.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(|script| &**script)
    }
}

/// Find the model artifact: the configured path as given, then the same
/// path resolved against `working_root`.
pub fn resolve_model_path(configured: &Path, working_root: &Path) -> Option<PathBuf> {
    if configured.exists() {
        return Some(configured.to_path_buf());
    }

    let candidate = working_root.join(configured);
    candidate.exists().then_some(candidate)
}

pub struct CropDiseaseService {
    config: InferenceConfig,
    artifacts: ArtifactManager,
    invoker: InferenceInvoker,
    recommendations: Arc<RecommendationTable>,
    bundled: BundledScripts,
    interrupt: InterruptSignal,
}

impl CropDiseaseService {
    pub fn new(config: InferenceConfig, recommendations: Arc<RecommendationTable>) -> Self {
        let invoker = InferenceInvoker::new(
            config.executable.clone(),
            OutputFilter::new(config.label_prefixes.clone()),
            config.timeout,
        );

        Self {
            artifacts: ArtifactManager::new(config.artifact_dir.clone()),
            invoker,
            recommendations,
            bundled: BundledScripts::default(),
            interrupt: InterruptSignal::never(),
            config,
        }
    }

    /// Build the service and its recommendation table from configuration
    pub fn from_config(config: InferenceConfig) -> anyhow::Result<Self> {
        let recommendations = match &config.recommendations_path {
            Some(path) => RecommendationTable::with_overrides_from(path)?,
            None => RecommendationTable::default(),
        };
        info!(entries = recommendations.len(), "Recommendation table loaded");

        Ok(Self::new(config, Arc::new(recommendations)))
    }

    pub fn with_bundled_scripts(mut self, bundled: BundledScripts) -> Self {
        self.bundled = bundled;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Classify one leaf image.
    pub async fn predict(&self, request: PredictionRequest) -> Result<PredictionResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("predict", %request_id);

        async {
            let outcome = self.run(&request).await;

            match &outcome {
                Ok(result) => {
                    metrics::PREDICTIONS_TOTAL.with_label_values(&["success"]).inc();
                    info!(
                        predicted_class = %result.predicted_class,
                        confidence = result.confidence,
                        "Prediction completed"
                    );
                }
                Err(e) => {
                    metrics::PREDICTIONS_TOTAL.with_label_values(&["error"]).inc();
                    metrics::PREDICTION_ERRORS
                        .with_label_values(&[e.category().as_str()])
                        .inc();
                    match e.category() {
                        ErrorCategory::Input => debug!(error = %e, "Rejected prediction request"),
                        ErrorCategory::Process => warn!(error = %e, "Inference process failed"),
                        ErrorCategory::Resource => error!(error = %e, "Inference resources unavailable"),
                        ErrorCategory::Parse => {
                            error!(error = %e, "Inference output violated the line contract")
                        }
                    }
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }

    /// Like [`predict`](Self::predict) but folds every error into an error result
    pub async fn predict_or_error(&self, request: PredictionRequest) -> PredictionResult {
        match self.predict(request).await {
            Ok(result) => result,
            Err(e) => PredictionResult::from_error(&e),
        }
    }

    async fn run(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        if request.image.is_empty() {
            return Err(PredictError::EmptyInput);
        }
        debug!(
            image_bytes = request.image.len(),
            notes_len = request.notes.as_deref().map(str::len).unwrap_or(0),
            "Prediction requested"
        );

        // Both artifacts are deleted on drop if anything below returns early
        let mut image = self.artifacts.persist_image(&request.image).await?;
        let mut script = self.resolve_script().await?;

        let result = self.classify(image.path(), script.path()).await;

        if let Err(e) = image.release() {
            warn!(error = %e, "Failed to delete uploaded image");
        }
        if let Err(e) = script.release() {
            warn!(error = %e, "Failed to delete staged script");
        }

        result
    }

    async fn classify(&self, image: &Path, script: &Path) -> Result<PredictionResult> {
        let model = resolve_model_path(&self.config.model_path, &self.config.working_root)
            .ok_or_else(|| PredictError::ModelNotFound(self.config.model_path.display().to_string()))?;

        let captured = self
            .invoker
            .invoke(script, image, &model, &self.interrupt)
            .await?;

        let parsed = parse_output(&captured)?;
        if parsed.is_error_marker() {
            return Err(PredictError::RoutineReportedError(
                captured.line.unwrap_or_default(),
            ));
        }

        let recommendation = self.recommendations.resolve(&parsed.label);
        Ok(PredictionResult::success(parsed.label, parsed.confidence, recommendation))
    }

    /// Prefer a bundled script (staged to a temp file), else treat the
    /// configured identifier as a filesystem path.
    async fn resolve_script(&self) -> Result<ScriptLocation> {
        let name = &self.config.script;

        if let Some(contents) = self.bundled.get(name) {
            let staged = self.artifacts.stage_script(name, contents).await?;
            return Ok(ScriptLocation::Staged(staged));
        }

        let path = PathBuf::from(name);
        if path.exists() {
            return Ok(ScriptLocation::Provided(path));
        }

        Err(PredictError::ScriptNotFound(name.clone()))
    }
}
