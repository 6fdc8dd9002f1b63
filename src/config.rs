use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL_PATH: &str = "Trial model for SIH/crop_disease_model.keras";
pub const DEFAULT_SCRIPT: &str = "predict.py";
pub const DEFAULT_EXECUTABLE: &str = "python";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub max_upload_bytes: usize,
    pub inference: InferenceConfig,
}

/// Everything the orchestrator needs to locate and launch the inference routine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Model artifact, absolute or relative to `working_root`
    pub model_path: PathBuf,
    /// Bundled script name, or a filesystem path to a script
    pub script: String,
    pub executable: String,
    /// `None` waits for the routine indefinitely
    pub timeout: Option<Duration>,
    pub label_prefixes: Vec<String>,
    pub artifact_dir: PathBuf,
    pub working_root: PathBuf,
    pub recommendations_path: Option<PathBuf>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            script: DEFAULT_SCRIPT.to_string(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            label_prefixes: vec!["Tomato___".to_string()],
            artifact_dir: env::temp_dir(),
            working_root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            recommendations_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
            .parse()
            .unwrap_or(10 * 1024 * 1024);

        Ok(Self {
            api_host,
            api_port,
            max_upload_bytes,
            inference: InferenceConfig::load()?,
        })
    }
}

impl InferenceConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let model_path = env::var("ML_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);

        let script = env::var("ML_PYTHON_SCRIPT").unwrap_or(defaults.script);

        let executable = env::var("ML_PYTHON_EXECUTABLE").unwrap_or(defaults.executable);

        // 0 disables the bound entirely
        let timeout_secs: u64 = match env::var("ML_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("ML_TIMEOUT_SECS must be a whole number of seconds, got {:?}", raw))?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let label_prefixes: Vec<String> = env::var("ML_LABEL_PREFIXES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.label_prefixes);
        if label_prefixes.is_empty() {
            anyhow::bail!("ML_LABEL_PREFIXES must name at least one label prefix");
        }

        let artifact_dir = env::var("ML_ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifact_dir);

        let recommendations_path = env::var("ML_RECOMMENDATIONS_PATH").ok().map(PathBuf::from);

        Ok(Self {
            model_path,
            script,
            executable,
            timeout,
            label_prefixes,
            artifact_dir,
            working_root: defaults.working_root,
            recommendations_path,
        })
    }
}
