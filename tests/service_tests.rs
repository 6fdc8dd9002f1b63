//! End-to-end orchestration tests against stub inference routines
//!
//! Each stub is a small `sh` script launched exactly like the real routine:
//! `sh <script> <image> <model>`.

use cropdoc::recommendation::FALLBACK_RECOMMENDATION;
use cropdoc::{
    interrupt_channel, BundledScripts, CropDiseaseService, ErrorCategory, InferenceConfig,
    PredictError, PredictionRequest, PredictionStatus, RecommendationTable,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    root: TempDir,
    artifacts: PathBuf,
    model: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let artifacts = root.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        let model = root.path().join("crop_disease_model.keras");
        std::fs::write(&model, b"weights").unwrap();
        Self {
            root,
            artifacts,
            model,
        }
    }

    fn write_script(&self, body: &str) -> PathBuf {
        let path = self.root.path().join("stub.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn config(&self, script: impl Into<String>) -> InferenceConfig {
        InferenceConfig {
            model_path: self.model.clone(),
            script: script.into(),
            executable: "sh".to_string(),
            timeout: Some(Duration::from_secs(10)),
            artifact_dir: self.artifacts.clone(),
            working_root: self.root.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn service(&self, body: &str) -> CropDiseaseService {
        let script = self.write_script(body);
        self.service_with(self.config(script.display().to_string()))
    }

    fn service_with(&self, config: InferenceConfig) -> CropDiseaseService {
        CropDiseaseService::new(config, Arc::new(RecommendationTable::default()))
    }

    fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(&self.artifacts).unwrap().count()
    }
}

fn leaf() -> PredictionRequest {
    PredictionRequest::new(b"leafbytes".to_vec()).with_notes("north field, row 3")
}

#[tokio::test]
async fn test_success_with_curated_recommendation() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Tomato___healthy|0.87'\n");

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.status, PredictionStatus::Success);
    assert_eq!(result.predicted_class, "Tomato___healthy");
    assert_eq!(result.confidence, 0.87);
    assert!(result.recommendation.starts_with("Your plant looks healthy"));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_unknown_label_gets_fallback() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Tomato___Mystery|0.42'\n");

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.predicted_class, "Tomato___Mystery");
    assert_eq!(result.recommendation, FALLBACK_RECOMMENDATION);
    assert!(!result.recommendation.is_empty());
}

#[tokio::test]
async fn test_image_is_on_disk_during_inference() {
    let fx = Fixture::new();
    let service = fx.service(
        "[ \"$(cat \"$1\")\" = leafbytes ] || exit 4\n[ -f \"$2\" ] || exit 5\necho 'Tomato___Late_blight|0.91'\n",
    );

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.predicted_class, "Tomato___Late_blight");
    assert!(result.recommendation.contains("Late Blight"));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_empty_input_rejected_before_any_artifact() {
    let fx = Fixture::new();
    let mut config = fx.config(fx.write_script("exit 0\n").display().to_string());
    // Any attempt to create a temp file here would fail with an artifact error
    config.artifact_dir = fx.root.path().join("missing");
    let service = fx.service_with(config);

    let err = service.predict(PredictionRequest::new(Vec::new())).await.unwrap_err();

    assert!(matches!(err, PredictError::EmptyInput));
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_non_zero_exit_is_process_error() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Tomato___healthy|0.99'\nexit 1\n");

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::ProcessFailure { code: Some(1) }));
    assert_eq!(err.category(), ErrorCategory::Process);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_three_fields_is_parse_error() {
    let fx = Fixture::new();
    let script = fx.write_script("echo 'A|B|C'\n");
    let config = InferenceConfig {
        label_prefixes: vec!["A".to_string()],
        ..fx.config(script.display().to_string())
    };
    let service = fx.service_with(config);

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::UnexpectedFieldCount { fields: 3, .. }));
    assert_eq!(err.category(), ErrorCategory::Parse);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_noisy_preamble_is_ignored() {
    let fx = Fixture::new();
    let service = fx.service(
        "echo 'Loading model...'\necho 'WARNING: oneDNN custom operations are on'\necho 'step|1/1'\necho ''\necho 'Tomato___Late_blight|0.5'\n",
    );

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.predicted_class, "Tomato___Late_blight");
    assert_eq!(result.confidence, 0.5);
}

#[tokio::test]
async fn test_carriage_return_progress_bar_is_ignored() {
    let fx = Fixture::new();
    let service = fx.service("printf '1/1 [=====] - 0s 50ms/step\\rTomato___healthy|0.87\\n'\n");

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.status, PredictionStatus::Success);
    assert_eq!(result.predicted_class, "Tomato___healthy");
    assert_eq!(result.confidence, 0.87);
}

#[tokio::test]
async fn test_large_output_after_result_is_drained() {
    let fx = Fixture::new();
    // Several MB after the answer would block on a full pipe or die of
    // SIGPIPE if the remainder were not read
    let service = fx.service(
        "echo 'Tomato___healthy|0.87'\nhead -c 5000000 /dev/zero | tr '\\0' x\nexit 0\n",
    );

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.predicted_class, "Tomato___healthy");
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_only_noise_is_malformed() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Loading model...'\necho 'done'\n");

    let err = service.predict(leaf()).await.unwrap_err();
    assert!(matches!(err, PredictError::MalformedOutput(_)));
}

#[tokio::test]
async fn test_no_output_is_empty_output() {
    let fx = Fixture::new();
    let service = fx.service("exit 0\n");

    let err = service.predict(leaf()).await.unwrap_err();
    assert!(matches!(err, PredictError::EmptyOutput));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_error_marker_with_clean_exit() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Error|0.0'\n");

    let err = service.predict(leaf()).await.unwrap_err();
    assert!(matches!(err, PredictError::RoutineReportedError(_)));
    assert_eq!(err.category(), ErrorCategory::Process);
}

#[tokio::test]
async fn test_bundled_script_is_staged_and_removed() {
    let fx = Fixture::new();
    let bundled = BundledScripts::empty().with_script(
        "stub.sh",
        "case \"$0\" in *staged_script_*.sh) ;; *) exit 6 ;; esac\necho 'Tomato___healthy|0.7'\n",
    );
    let service = fx.service_with(fx.config("stub.sh")).with_bundled_scripts(bundled);

    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.predicted_class, "Tomato___healthy");
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_provided_script_survives_the_call() {
    let fx = Fixture::new();
    let service = fx.service("echo 'Tomato___healthy|0.7'\n");
    let script = PathBuf::from(&service.config().script);

    service.predict(leaf()).await.unwrap();
    service.predict(leaf()).await.unwrap();

    assert!(script.exists());
}

#[tokio::test]
async fn test_model_resolved_against_working_root() {
    let fx = Fixture::new();
    let script = fx.write_script("[ \"$2\" = \"$(dirname \"$0\")/crop_disease_model.keras\" ] || exit 7\necho 'Tomato___healthy|0.6'\n");
    let config = InferenceConfig {
        model_path: PathBuf::from("crop_disease_model.keras"),
        ..fx.config(script.display().to_string())
    };
    let service = fx.service_with(config);

    let result = service.predict(leaf()).await.unwrap();
    assert_eq!(result.confidence, 0.6);
}

#[tokio::test]
async fn test_missing_model_cleans_up_staged_script() {
    let fx = Fixture::new();
    let bundled = BundledScripts::empty().with_script("stub.sh", "echo 'Tomato___healthy|0.7'\n");
    let config = InferenceConfig {
        model_path: PathBuf::from("no/such/model.keras"),
        ..fx.config("stub.sh")
    };
    let service = fx.service_with(config).with_bundled_scripts(bundled);

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::ModelNotFound(_)));
    assert_eq!(err.category(), ErrorCategory::Resource);
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_missing_script() {
    let fx = Fixture::new();
    let missing = fx.root.path().join("absent.py");
    let service = fx.service_with(fx.config(missing.display().to_string()));

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::ScriptNotFound(_)));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_missing_executable_is_launch_failure() {
    let fx = Fixture::new();
    let script = fx.write_script("echo 'Tomato___healthy|0.7'\n");
    let config = InferenceConfig {
        executable: "/nonexistent/cropdoc-python".to_string(),
        ..fx.config(script.display().to_string())
    };
    let service = fx.service_with(config);

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::ProcessLaunch { .. }));
    assert!(err.is_retryable());
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_interrupt_terminates_prediction() {
    let fx = Fixture::new();
    let (trigger, interrupt) = interrupt_channel();
    let service = fx.service("exec sleep 30\n").with_interrupt(interrupt);

    let raise = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.raise();
    };
    let (outcome, _) = tokio::join!(service.predict(leaf()), raise);

    assert!(matches!(outcome, Err(PredictError::ProcessInterrupted)));
    assert!(trigger.signal().is_raised());
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_timeout_terminates_prediction() {
    let fx = Fixture::new();
    let script = fx.write_script("exec sleep 30\n");
    let config = InferenceConfig {
        timeout: Some(Duration::from_millis(200)),
        ..fx.config(script.display().to_string())
    };
    let service = fx.service_with(config);

    let err = service.predict(leaf()).await.unwrap_err();

    assert!(matches!(err, PredictError::ProcessTimeout { .. }));
    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_predict_or_error_never_fails() {
    let fx = Fixture::new();
    let service = fx.service("exit 2\n");

    let result = service.predict_or_error(leaf()).await;
    assert_eq!(result.status, PredictionStatus::Error);
    assert!(result.predicted_class.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert!(result.recommendation.contains("exit code: 2"));

    let result = service.predict_or_error(PredictionRequest::new(Vec::new())).await;
    assert_eq!(result.status, PredictionStatus::Error);
}

#[tokio::test]
async fn test_concurrent_requests_do_not_share_artifacts() {
    let fx = Fixture::new();
    // Each run echoes back its own image contents as the confidence
    let service = Arc::new(fx.service("printf 'Tomato___healthy|%s\\n' \"$(cat \"$1\")\"\n"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let request = PredictionRequest::new(format!("0.{}", i).into_bytes());
                (i, service.predict(request).await)
            })
        })
        .collect();

    for handle in handles {
        let (i, outcome) = handle.await.unwrap();
        let result = outcome.unwrap();
        let expected: f64 = format!("0.{}", i).parse().unwrap();
        assert_eq!(result.confidence, expected);
    }

    assert_eq!(fx.leftover_artifacts(), 0);
}

#[tokio::test]
async fn test_from_config_loads_recommendation_overrides() {
    let fx = Fixture::new();
    let tips = fx.root.path().join("tips.json");
    std::fs::write(&tips, r#"{"Tomato___Septoria_leaf_spot": "Mulch and rotate crops."}"#).unwrap();
    let script = fx.write_script("echo 'Tomato___Septoria_leaf_spot|0.77'\n");
    let config = InferenceConfig {
        recommendations_path: Some(tips),
        ..fx.config(script.display().to_string())
    };

    let service = CropDiseaseService::from_config(config).unwrap();
    let result = service.predict(leaf()).await.unwrap();

    assert_eq!(result.recommendation, "Mulch and rotate crops.");
}
